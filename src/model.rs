use crate::folds::FoldError;
use crate::kernel::KernelError;
use crate::numeric::{EPS, NoiseTerm};
use itertools::Itertools;
use ndarray::{Array1, Array2, Axis};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

// --- Public Data Structures ---
// A trained classifier owns only the per-class spectral and scalar
// parameters below. It never keeps the training samples or any kernel
// matrix: callers hand the training set back to `predict`.

/// Per-class parameters of a subspace model (PGPDA or NPGPDA).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassParameters {
    /// Number of training samples in the class.
    pub ni: usize,
    /// Class prior, `ni / n`.
    pub prop: f64,
    /// Effective degrees of freedom of the class kernel block.
    pub ri: usize,
    /// Dimension of the signal subspace, `di <= ri`.
    pub di: usize,
    /// Signal variances, after any parameter tying.
    pub a: Array1<f64>,
    /// The `di` leading eigenvectors of the centered, scaled class block.
    pub beta: Array2<f64>,
    /// Class noise term. Only present for models with class-specific noise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub noise: Option<NoiseTerm>,
    /// `beta diag((1/a - ib)/a) beta^T / ni`, used directly in the decision rule.
    pub projection: Array2<f64>,
}

/// Which outputs `predict` should produce besides the labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PredictOutput {
    #[default]
    Labels,
    /// Labels and the (shifted) discriminant matrix.
    Decision,
    /// Labels, the discriminant matrix and approximate posteriors.
    Posterior,
}

/// The result of a prediction. Labels are 1-based class indices.
#[derive(Debug, Clone)]
pub struct Prediction {
    pub labels: Array1<usize>,
    pub decision: Option<Array2<f64>>,
    pub posterior: Option<Array2<f64>>,
}

/// A comprehensive error type for training, prediction, cross-validation and persistence.
#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("Kernel computation failed: {0}")]
    Kernel(#[from] KernelError),

    #[error("Fold construction failed: {0}")]
    Folds(#[from] FoldError),

    #[error("Eigendecomposition failed: {0}")]
    EigendecompositionFailed(ndarray_linalg::error::LinalgError),

    #[error("The label vector is empty; at least one sample per class is required.")]
    NoSamples,

    #[error("Label at position {index} is 0; class labels must be dense over 1..C.")]
    InvalidLabel { index: usize },

    #[error("Class {0} has no training samples; class labels must be dense over 1..C.")]
    EmptyClass(usize),

    #[error("Class {label} has {found} training samples, but this model needs at least {required}.")]
    ClassTooSmall {
        label: usize,
        found: usize,
        required: usize,
    },

    #[error("Sample set has {samples} rows, but {labels} labels were provided.")]
    LabelCountMismatch { samples: usize, labels: usize },

    #[error("Expected {expected} features per sample, found {found}.")]
    FeatureMismatch { expected: usize, found: usize },

    #[error("Unknown model variant '{0}'. Expected one of M0..M6, NM0..NM4 or KDA.")]
    UnknownVariant(String),

    #[error("Cumulative variance threshold {0} must lie strictly between 0 and 1.")]
    InvalidThreshold(f64),

    #[error("Subspace dimension must be at least 1, got {0}.")]
    InvalidDimension(usize),

    #[error("Regularization {0} must be finite and non-negative.")]
    InvalidRegularization(f64),

    #[error("The {0} grid is empty.")]
    EmptyGrid(&'static str),

    #[error("The model has not been trained yet.")]
    NotTrained,

    #[error("The model was trained on {trained} classes, but the labels describe {found}.")]
    ClassCountMismatch { trained: usize, found: usize },

    #[error("Class {label} was trained on {trained} samples, but {found} were supplied.")]
    ClassSizeMismatch {
        label: usize,
        trained: usize,
        found: usize,
    },

    #[error("The model was trained on {trained} samples, but {found} training samples were supplied.")]
    TrainingSetMismatch { trained: usize, found: usize },

    #[error("Expected a saved {expected} model, but the file holds {found}.")]
    SavedModelMismatch { expected: String, found: String },

    #[error("Cannot compute an error rate on an empty test set.")]
    EmptyTestSet,

    #[error("Failed to read or write model file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse TOML file: {0}")]
    TomlParseError(#[from] toml::de::Error),

    #[error("Failed to serialize to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
}

/// Turns a raw discriminant matrix (samples x classes, smaller is better)
/// into labels and the requested optional outputs.
///
/// A negative minimum shifts the whole matrix so every score is
/// non-negative; this is a numerical convenience and leaves the arg-min
/// untouched.
pub(crate) fn finalize_decision(mut decision: Array2<f64>, output: PredictOutput) -> Prediction {
    let min = decision.iter().copied().fold(f64::INFINITY, f64::min);
    if min < 0.0 {
        decision.mapv_inplace(|v| v - min);
    }

    let labels: Array1<usize> = decision
        .rows()
        .into_iter()
        .map(|row| {
            row.iter()
                .position_min_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
                .map_or(1, |idx| idx + 1)
        })
        .collect();

    match output {
        PredictOutput::Labels => Prediction {
            labels,
            decision: None,
            posterior: None,
        },
        PredictOutput::Decision => Prediction {
            labels,
            decision: Some(decision),
            posterior: None,
        },
        PredictOutput::Posterior => {
            let posterior = approximate_posterior(&decision);
            Prediction {
                labels,
                decision: Some(decision),
                posterior: Some(posterior),
            }
        }
    }
}

/// `exp(-D/2)` normalized per row, with entries below epsilon set to zero.
/// This is an approximation, not a calibrated probability.
fn approximate_posterior(decision: &Array2<f64>) -> Array2<f64> {
    let mut posterior = decision.clone();
    for mut row in posterior.axis_iter_mut(Axis(0)) {
        // Subtracting the row minimum keeps the largest term at exp(0) = 1.
        let row_min = row.iter().copied().fold(f64::INFINITY, f64::min);
        row.mapv_inplace(|d| (-0.5 * (d - row_min)).exp());
        let total = row.sum();
        row.mapv_inplace(|p| p / total);
        row.mapv_inplace(|p| if p < EPS { 0.0 } else { p });
    }
    posterior
}

/// Saves a model to a file in human-readable TOML.
pub(crate) fn save_toml<T: Serialize, P: AsRef<Path>>(
    model: &T,
    path: P,
) -> Result<(), ClassifierError> {
    let toml_string = toml::to_string_pretty(model)?;
    let mut file = BufWriter::new(fs::File::create(path)?);
    file.write_all(toml_string.as_bytes())?;
    Ok(())
}

/// Loads a model saved with [`save_toml`].
pub(crate) fn load_toml<T: DeserializeOwned, P: AsRef<Path>>(
    path: P,
) -> Result<T, ClassifierError> {
    let toml_string = fs::read_to_string(path)?;
    Ok(toml::from_str(&toml_string)?)
}
