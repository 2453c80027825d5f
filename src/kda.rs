//! # Kernel Discriminant Analysis
//!
//! Kernel quadratic discriminant analysis through a single generalized
//! eigenproblem. With `K` the Gram matrix of the whole training set and `K_i`
//! the columns of `K` belonging to class `i`, each row centered on its class
//! mean, the pooled operator
//!
//! ```text
//! G = mu I + sum_i K_i K_i^T / n_i
//! ```
//!
//! is decomposed against `K` (`G A = lambda K A`). Eigenpairs with a
//! non-positive eigenvalue are dropped, the rest are normalized so that
//! `A_k^T K A_k = 1`, and `S = A diag(1/lambda) A^T` is the operator of the
//! quadratic decision rule.

use crate::crossval::{CvOutcome, FoldData, KdaGrid, grid_search, misclassification_rate};
use crate::kernel::{Kernel, Samples};
use crate::model::{
    ClassifierError, PredictOutput, Prediction, finalize_decision, load_toml, save_toml,
};
use crate::numeric::EPS;
use crate::spectrum::ClassLayout;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use ndarray_linalg::error::LinalgError;
use ndarray_linalg::{Eigh, UPLO};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::path::Path;

/// Default ridge on the pooled operator.
pub const DEFAULT_REGULARIZATION: f64 = 1e-7;

/// Relative diagonal loads tried on `K` when it is not numerically positive
/// definite, after the unmodified attempt.
const JITTER_SCHEDULE: [f64; 4] = [1e-12, 1e-10, 1e-8, 1e-6];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KdaClass {
    pub ni: usize,
    pub prop: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Kda {
    pub kernel: Kernel,
    pub mu: f64,
    pub classes: Vec<KdaClass>,
    /// Retained generalized eigenvalues, in decreasing order.
    pub eigenvalues: Array1<f64>,
    /// `A diag(1/lambda) A^T`, of size `n x n` for `n` training samples.
    pub operator: Array2<f64>,
}

impl Kda {
    pub fn new(kernel: Kernel) -> Self {
        Self {
            kernel,
            mu: DEFAULT_REGULARIZATION,
            classes: Vec::new(),
            eigenvalues: Array1::zeros(0),
            operator: Array2::zeros((0, 0)),
        }
    }

    pub fn with_regularization(mut self, mu: f64) -> Self {
        self.mu = mu;
        self
    }

    pub fn is_trained(&self) -> bool {
        !self.classes.is_empty()
    }

    pub fn train(&mut self, x: &Samples, y: ArrayView1<usize>) -> Result<(), ClassifierError> {
        if !self.mu.is_finite() || self.mu < 0.0 {
            return Err(ClassifierError::InvalidRegularization(self.mu));
        }
        let layout = ClassLayout::from_labels(y)?;
        layout.check_samples(x)?;
        let n = layout.n_samples();

        // --- 1. Pooled within-class operator ---
        let gram = x.full_block(&self.kernel)?.k;
        let mut pooled = Array2::<f64>::eye(n) * self.mu;
        for class in 0..layout.n_classes() {
            let ni = layout.size(class) as f64;
            let class_cols = class_centered_columns(&gram, layout.members(class));
            pooled.scaled_add(1.0 / ni, &class_cols.dot(&class_cols.t()));
        }

        // --- 2. Generalized eigenproblem against the Gram matrix ---
        let (raw_values, raw_vectors) = generalized_eigh(&pooled, &gram)?;
        let mut order: Vec<usize> = (0..raw_values.len())
            .filter(|&k| raw_values[k] > EPS)
            .collect();
        order.sort_by(|&a, &b| {
            raw_values[b]
                .partial_cmp(&raw_values[a])
                .unwrap_or(Ordering::Equal)
        });
        if order.is_empty() {
            log::warn!(
                "KDA kept no positive generalized eigenvalue; class scores reduce to their priors."
            );
        }

        let eigenvalues: Array1<f64> = order.iter().map(|&k| raw_values[k]).collect();
        let mut vectors = raw_vectors.select(Axis(1), &order);

        // --- 3. Normalize in the K metric and build the decision operator ---
        for mut column in vectors.columns_mut() {
            let norm2 = column.dot(&gram.dot(&column));
            if norm2 > EPS {
                column /= norm2.sqrt();
            }
        }
        let weighted = &vectors / &eigenvalues;
        let operator = weighted.dot(&vectors.t());

        log::debug!(
            "Trained KDA with mu {:.3e}: kept {} of {} generalized eigenpairs.",
            self.mu,
            eigenvalues.len(),
            n
        );

        self.classes = (0..layout.n_classes())
            .map(|class| KdaClass {
                ni: layout.size(class),
                prop: layout.prior(class),
            })
            .collect();
        self.eigenvalues = eigenvalues;
        self.operator = operator;
        Ok(())
    }

    /// Classifies `xt` against the training set the model was trained on.
    pub fn predict(
        &self,
        xt: &Samples,
        x: &Samples,
        y: ArrayView1<usize>,
        output: PredictOutput,
    ) -> Result<Prediction, ClassifierError> {
        let layout = ClassLayout::from_labels(y)?;
        if !self.is_trained() {
            return Err(ClassifierError::NotTrained);
        }
        if layout.n_classes() != self.classes.len() {
            return Err(ClassifierError::ClassCountMismatch {
                trained: self.classes.len(),
                found: layout.n_classes(),
            });
        }
        if layout.n_samples() != self.operator.nrows() {
            return Err(ClassifierError::TrainingSetMismatch {
                trained: self.operator.nrows(),
                found: layout.n_samples(),
            });
        }
        layout.check_samples(x)?;

        let all: Vec<usize> = (0..layout.n_samples()).collect();
        let cross = xt.cross_block(x, &self.kernel, &all)?.k;
        let gram = x.full_block(&self.kernel)?.k;

        let mut decision = Array2::zeros((cross.nrows(), self.classes.len()));
        for (class, mut column) in decision.columns_mut().into_iter().enumerate() {
            let members = layout.members(class);
            let class_means =
                gram.select(Axis(1), members).sum_axis(Axis(1)) / members.len() as f64;
            let centered = &cross - &class_means;
            let temp = centered.dot(&self.operator);
            let scores = (&centered * &temp).sum_axis(Axis(1)) + self.classes[class].prop;
            column.assign(&scores);
        }
        Ok(finalize_decision(decision, output))
    }

    /// Grid search over the kernel parameter and `mu`. Every cell retrains
    /// from scratch: the generalized eigenproblem depends on both.
    pub fn cross_validation(
        &mut self,
        x: ArrayView2<f64>,
        y: ArrayView1<usize>,
        v: usize,
        grid: &KdaGrid,
    ) -> Result<CvOutcome<f64>, ClassifierError> {
        let base = self.kernel;
        let outcome = grid_search(
            x,
            y,
            v,
            &grid.kernel_params,
            &grid.mus,
            |fold: &FoldData, kernel_param: f64, mus: &[f64]| {
                let kernel = base.with_param(kernel_param);
                let train = Samples::features(fold.x_train.view());
                let test = Samples::features(fold.x_test.view());
                Ok(mus
                    .iter()
                    .map(|&mu| {
                        let mut trial = Kda::new(kernel).with_regularization(mu);
                        trial.train(&train, fold.y_train.view())?;
                        let prediction = trial.predict(
                            &test,
                            &train,
                            fold.y_train.view(),
                            PredictOutput::Labels,
                        )?;
                        misclassification_rate(prediction.labels.view(), fold.y_test.view())
                    })
                    .collect())
            },
        )?;

        self.kernel = base.with_param(outcome.kernel_param);
        self.mu = outcome.secondary;
        self.classes.clear();
        self.eigenvalues = Array1::zeros(0);
        self.operator = Array2::zeros((0, 0));
        log::info!(
            "KDA cross-validation selected kernel parameter {:.4e} and mu {:.1e} (error {:.4}).",
            outcome.kernel_param,
            outcome.secondary,
            outcome.best_error()
        );
        Ok(outcome)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ClassifierError> {
        save_toml(self, path)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ClassifierError> {
        load_toml(path)
    }
}

/// Columns of `gram` at `members`, each row shifted by its mean over those
/// columns.
fn class_centered_columns(gram: &Array2<f64>, members: &[usize]) -> Array2<f64> {
    let mut cols = gram.select(Axis(1), members);
    let row_means = cols.sum_axis(Axis(1)) / members.len() as f64;
    cols -= &row_means.insert_axis(Axis(1));
    cols
}

/// Solves `g A = lambda k A`. When `k` is not numerically positive definite
/// the solve is retried with a growing diagonal load on `k`, relative to its
/// mean diagonal.
fn generalized_eigh(
    g: &Array2<f64>,
    k: &Array2<f64>,
) -> Result<(Array1<f64>, Array2<f64>), ClassifierError> {
    let solve = |jitter: f64| -> Result<(Array1<f64>, Array2<f64>), LinalgError> {
        let mut loaded = k.clone();
        if jitter > 0.0 {
            loaded.diag_mut().mapv_inplace(|d| d + jitter);
        }
        let (values, (vectors, _)) = (g.view(), loaded.view()).eigh(UPLO::Lower)?;
        Ok((values, vectors))
    };

    let first_error = match solve(0.0) {
        Ok(solution) => return Ok(solution),
        Err(e) => e,
    };
    let scale = (k.diag().sum() / k.nrows().max(1) as f64).abs().max(EPS);
    for relative in JITTER_SCHEDULE {
        let jitter = relative * scale;
        log::warn!(
            "Gram matrix is not positive definite; retrying with diagonal load {jitter:.3e}."
        );
        if let Ok(solution) = solve(jitter) {
            return Ok(solution);
        }
    }
    Err(ClassifierError::EigendecompositionFailed(first_error))
}
