//! TOML configuration of a classifier and its cross-validation grids.
//!
//! ```toml
//! model = "M4"
//! folds = 5
//!
//! [kernel]
//! kind = "rbf"
//! param = 0.5
//!
//! [hyper]
//! dc = 2
//! threshold = 0.95
//! mu = 1e-7
//!
//! [grid]
//! kernel_params = [0.0625, 0.125, 0.25, 0.5]
//! dimensions = [2, 3, 4, 5]
//! ```
//!
//! Every field is optional and falls back to the defaults of the models.
//! A trained [`Classifier`] is saved as its concrete model; reading it back
//! with [`Classifier::load`] takes the family named by the same `model` tag.

use crate::crossval::{CvOutcome, KdaGrid, SubspaceGrid};
use crate::kda::{DEFAULT_REGULARIZATION, Kda};
use crate::kernel::{Kernel, Samples};
use crate::model::{ClassifierError, PredictOutput, Prediction};
use crate::npgpda::{Npgpda, NpgpdaVariant};
use crate::pgpda::{Pgpda, PgpdaVariant};
use crate::subspace::{DEFAULT_DIMENSION, DEFAULT_THRESHOLD, SubspaceParam};
use ndarray::{Array2, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

/// Default number of cross-validation folds.
pub const DEFAULT_FOLDS: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Variant tag: `M0`..`M6`, `NM0`..`NM4` or `KDA`.
    pub model: String,
    pub folds: usize,
    pub kernel: Kernel,
    pub hyper: Hyperparameters,
    pub grid: GridConfig,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            model: PgpdaVariant::M0.tag().to_string(),
            folds: DEFAULT_FOLDS,
            kernel: Kernel::default(),
            hyper: Hyperparameters::default(),
            grid: GridConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Hyperparameters {
    pub dc: usize,
    pub threshold: f64,
    pub mu: f64,
}

impl Default for Hyperparameters {
    fn default() -> Self {
        Self {
            dc: DEFAULT_DIMENSION,
            threshold: DEFAULT_THRESHOLD,
            mu: DEFAULT_REGULARIZATION,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    pub kernel_params: Vec<f64>,
    pub thresholds: Vec<f64>,
    pub dimensions: Vec<usize>,
    pub mus: Vec<f64>,
}

impl Default for GridConfig {
    fn default() -> Self {
        let subspace = SubspaceGrid::default();
        Self {
            kernel_params: subspace.kernel_params,
            thresholds: subspace.thresholds,
            dimensions: subspace.dimensions,
            mus: KdaGrid::default().mus,
        }
    }
}

impl GridConfig {
    pub fn subspace(&self) -> SubspaceGrid {
        SubspaceGrid {
            kernel_params: self.kernel_params.clone(),
            thresholds: self.thresholds.clone(),
            dimensions: self.dimensions.clone(),
        }
    }

    pub fn kda(&self) -> KdaGrid {
        KdaGrid {
            kernel_params: self.kernel_params.clone(),
            mus: self.mus.clone(),
        }
    }
}

/// The model family selected by a variant tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFamily {
    Pgpda(PgpdaVariant),
    Npgpda(NpgpdaVariant),
    Kda,
}

impl fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelFamily::Pgpda(variant) => write!(f, "{variant}"),
            ModelFamily::Npgpda(variant) => write!(f, "{variant}"),
            ModelFamily::Kda => f.write_str("KDA"),
        }
    }
}

impl FromStr for ModelFamily {
    type Err = ClassifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tag = s.trim();
        if tag == "KDA" {
            return Ok(ModelFamily::Kda);
        }
        tag.parse::<PgpdaVariant>()
            .map(ModelFamily::Pgpda)
            .or_else(|_| tag.parse::<NpgpdaVariant>().map(ModelFamily::Npgpda))
            .map_err(|_| ClassifierError::UnknownVariant(s.to_string()))
    }
}

impl ClassifierConfig {
    pub fn from_toml_str(toml_string: &str) -> Result<Self, ClassifierError> {
        Ok(toml::from_str(toml_string)?)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ClassifierError> {
        Self::from_toml_str(&fs::read_to_string(path)?)
    }

    pub fn family(&self) -> Result<ModelFamily, ClassifierError> {
        self.model.parse()
    }

    /// Builds an untrained classifier with the configured hyperparameters.
    pub fn build(&self) -> Result<Classifier, ClassifierError> {
        let classifier = match self.family()? {
            ModelFamily::Pgpda(variant) => Classifier::Pgpda(
                Pgpda::new(variant, self.kernel)
                    .with_dimension(self.hyper.dc)
                    .with_threshold(self.hyper.threshold),
            ),
            ModelFamily::Npgpda(variant) => Classifier::Npgpda(
                Npgpda::new(variant, self.kernel)
                    .with_dimension(self.hyper.dc)
                    .with_threshold(self.hyper.threshold),
            ),
            ModelFamily::Kda => {
                Classifier::Kda(Kda::new(self.kernel).with_regularization(self.hyper.mu))
            }
        };
        log::info!("Built classifier {} with kernel {:?}.", self.model, self.kernel);
        Ok(classifier)
    }
}

/// Any of the three model families behind one interface.
#[derive(Debug, Clone)]
pub enum Classifier {
    Pgpda(Pgpda),
    Npgpda(Npgpda),
    Kda(Kda),
}

/// Result of [`Classifier::cross_validate`].
#[derive(Debug, Clone)]
pub enum Selection {
    Subspace(CvOutcome<SubspaceParam>),
    Regularization(CvOutcome<f64>),
}

impl Selection {
    pub fn kernel_param(&self) -> f64 {
        match self {
            Selection::Subspace(outcome) => outcome.kernel_param,
            Selection::Regularization(outcome) => outcome.kernel_param,
        }
    }

    pub fn errors(&self) -> &Array2<f64> {
        match self {
            Selection::Subspace(outcome) => &outcome.errors,
            Selection::Regularization(outcome) => &outcome.errors,
        }
    }

    pub fn best_error(&self) -> f64 {
        match self {
            Selection::Subspace(outcome) => outcome.best_error(),
            Selection::Regularization(outcome) => outcome.best_error(),
        }
    }
}

impl Classifier {
    pub fn train(&mut self, x: &Samples, y: ArrayView1<usize>) -> Result<(), ClassifierError> {
        match self {
            Classifier::Pgpda(model) => model.train(x, y),
            Classifier::Npgpda(model) => model.train(x, y),
            Classifier::Kda(model) => model.train(x, y),
        }
    }

    pub fn predict(
        &self,
        xt: &Samples,
        x: &Samples,
        y: ArrayView1<usize>,
        output: PredictOutput,
    ) -> Result<Prediction, ClassifierError> {
        match self {
            Classifier::Pgpda(model) => model.predict(xt, x, y, output),
            Classifier::Npgpda(model) => model.predict(xt, x, y, output),
            Classifier::Kda(model) => model.predict(xt, x, y, output),
        }
    }

    /// Selects hyperparameters by `v`-fold cross-validation over `grid` and
    /// writes them into the wrapped model.
    pub fn cross_validate(
        &mut self,
        x: ArrayView2<f64>,
        y: ArrayView1<usize>,
        v: usize,
        grid: &GridConfig,
    ) -> Result<Selection, ClassifierError> {
        match self {
            Classifier::Pgpda(model) => model
                .cross_validation(x, y, v, &grid.subspace())
                .map(Selection::Subspace),
            Classifier::Npgpda(model) => model
                .cross_validation(x, y, v, &grid.subspace())
                .map(Selection::Subspace),
            Classifier::Kda(model) => model
                .cross_validation(x, y, v, &grid.kda())
                .map(Selection::Regularization),
        }
    }

    pub fn is_trained(&self) -> bool {
        match self {
            Classifier::Pgpda(model) => model.is_trained(),
            Classifier::Npgpda(model) => model.is_trained(),
            Classifier::Kda(model) => model.is_trained(),
        }
    }

    pub fn kernel(&self) -> Kernel {
        match self {
            Classifier::Pgpda(model) => model.kernel,
            Classifier::Npgpda(model) => model.kernel,
            Classifier::Kda(model) => model.kernel,
        }
    }

    pub fn family(&self) -> ModelFamily {
        match self {
            Classifier::Pgpda(model) => ModelFamily::Pgpda(model.variant),
            Classifier::Npgpda(model) => ModelFamily::Npgpda(model.variant),
            Classifier::Kda(_) => ModelFamily::Kda,
        }
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ClassifierError> {
        match self {
            Classifier::Pgpda(model) => model.save(path),
            Classifier::Npgpda(model) => model.save(path),
            Classifier::Kda(model) => model.save(path),
        }
    }

    /// Reads a model written by [`Classifier::save`]. The file does not record
    /// its family, so the caller names it and a different saved variant is an
    /// error.
    pub fn load<P: AsRef<Path>>(path: P, family: ModelFamily) -> Result<Self, ClassifierError> {
        let classifier = match family {
            ModelFamily::Pgpda(_) => Classifier::Pgpda(Pgpda::load(path)?),
            ModelFamily::Npgpda(_) => Classifier::Npgpda(Npgpda::load(path)?),
            ModelFamily::Kda => Classifier::Kda(Kda::load(path)?),
        };
        let found = classifier.family();
        if found != family {
            return Err(ClassifierError::SavedModelMismatch {
                expected: family.to_string(),
                found: found.to_string(),
            });
        }
        log::info!("Loaded a trained {found} classifier.");
        Ok(classifier)
    }
}
