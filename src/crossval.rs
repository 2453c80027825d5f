//! # Cross-Validation
//!
//! A two-dimensional grid search: a kernel hyperparameter crossed with one
//! model-specific hyperparameter (threshold, subspace dimension or
//! regularization). Stratified folds are built once per search.
//!
//! Work is distributed over (kernel parameter, fold) pairs. Each pair does its
//! kernel-dependent work once, typically an eigen-decomposition of every class
//! block, and then scans the whole secondary axis against it with a private,
//! freshly built model. Per-fold error rates are accumulated in a fixed order
//! after the parallel phase, so the error grid does not depend on scheduling.

use crate::folds::Folds;
use crate::model::ClassifierError;
use crate::subspace::{DimensionRule, SubspaceParam};
use itertools::iproduct;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// Training and testing samples of one fold, materialized once per search.
#[derive(Debug, Clone)]
pub struct FoldData {
    pub x_train: Array2<f64>,
    pub y_train: Array1<usize>,
    pub x_test: Array2<f64>,
    pub y_test: Array1<usize>,
}

impl FoldData {
    fn new(x: ArrayView2<f64>, y: ArrayView1<usize>, train: &[usize], test: &[usize]) -> Self {
        Self {
            x_train: x.select(Axis(0), train),
            y_train: y.select(Axis(0), train),
            x_test: x.select(Axis(0), test),
            y_test: y.select(Axis(0), test),
        }
    }
}

/// The mean error grid of a search and the hyperparameters it selected.
#[derive(Debug, Clone)]
pub struct CvOutcome<P> {
    /// Mean misclassification rate, kernel parameters along rows.
    pub errors: Array2<f64>,
    /// Row and column of the selected cell.
    pub best: (usize, usize),
    pub kernel_param: f64,
    pub secondary: P,
}

impl<P> CvOutcome<P> {
    pub fn best_error(&self) -> f64 {
        self.errors[self.best]
    }
}

/// Search grid for the subspace models.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubspaceGrid {
    pub kernel_params: Vec<f64>,
    pub thresholds: Vec<f64>,
    pub dimensions: Vec<usize>,
}

impl Default for SubspaceGrid {
    fn default() -> Self {
        Self {
            kernel_params: default_kernel_params(),
            thresholds: linspace(0.85, 0.9999, 10),
            dimensions: (5..50).collect(),
        }
    }
}

impl SubspaceGrid {
    /// The secondary axis searched for a given dimension rule.
    pub fn secondary(&self, rule: DimensionRule) -> Vec<SubspaceParam> {
        match rule {
            DimensionRule::Threshold => self
                .thresholds
                .iter()
                .map(|&t| SubspaceParam::Threshold(t))
                .collect(),
            DimensionRule::Fixed => self
                .dimensions
                .iter()
                .map(|&d| SubspaceParam::Dimension(d))
                .collect(),
        }
    }
}

/// Search grid for kernel discriminant analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KdaGrid {
    pub kernel_params: Vec<f64>,
    pub mus: Vec<f64>,
}

impl Default for KdaGrid {
    fn default() -> Self {
        Self {
            kernel_params: default_kernel_params(),
            mus: (-15..0).map(|e| 10f64.powi(e)).collect(),
        }
    }
}

/// `2^-8, ..., 2^-1`.
pub fn default_kernel_params() -> Vec<f64> {
    (-8..0).map(|e| 2f64.powi(e)).collect()
}

/// `count` evenly spaced values from `start` to `end`, both included.
pub fn linspace(start: f64, end: f64, count: usize) -> Vec<f64> {
    match count {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (end - start) / (count - 1) as f64;
            (0..count)
                .map(|i| if i + 1 == count { end } else { start + step * i as f64 })
                .collect()
        }
    }
}

/// Fraction of mismatched labels.
pub fn misclassification_rate(
    predicted: ArrayView1<usize>,
    truth: ArrayView1<usize>,
) -> Result<f64, ClassifierError> {
    if truth.is_empty() {
        return Err(ClassifierError::EmptyTestSet);
    }
    if predicted.len() != truth.len() {
        return Err(ClassifierError::LabelCountMismatch {
            samples: predicted.len(),
            labels: truth.len(),
        });
    }
    let wrong = predicted
        .iter()
        .zip(truth.iter())
        .filter(|(p, t)| p != t)
        .count();
    Ok(wrong as f64 / truth.len() as f64)
}

/// Runs a grid search. `evaluate` receives one fold, one kernel parameter and
/// the whole secondary axis, and returns one error rate per secondary value.
///
/// A pair whose shared work fails counts as error 1.0 for every secondary
/// value on that fold; a single failing secondary value counts as 1.0 for
/// that cell only. Both cases are logged and the search continues.
pub fn grid_search<P, F>(
    x: ArrayView2<f64>,
    y: ArrayView1<usize>,
    v: usize,
    kernel_params: &[f64],
    secondary: &[P],
    evaluate: F,
) -> Result<CvOutcome<P>, ClassifierError>
where
    P: Copy + Debug + Send + Sync,
    F: Fn(&FoldData, f64, &[P]) -> Result<Vec<Result<f64, ClassifierError>>, ClassifierError>
        + Sync,
{
    if kernel_params.is_empty() {
        return Err(ClassifierError::EmptyGrid("kernel parameter"));
    }
    if secondary.is_empty() {
        return Err(ClassifierError::EmptyGrid("secondary hyperparameter"));
    }
    if x.nrows() != y.len() {
        return Err(ClassifierError::LabelCountMismatch {
            samples: x.nrows(),
            labels: y.len(),
        });
    }

    // --- 1. Build the folds once ---
    let folds = Folds::stratified(y, v)?;
    let fold_data: Vec<FoldData> = folds
        .train
        .iter()
        .zip(&folds.test)
        .map(|(train, test)| FoldData::new(x, y, train, test))
        .collect();

    // --- 2. Evaluate every (kernel parameter, fold) pair in parallel ---
    let n_secondary = secondary.len();
    let pairs: Vec<(usize, usize)> = iproduct!(0..kernel_params.len(), 0..v).collect();
    let rates: Vec<Vec<f64>> = pairs
        .par_iter()
        .map(|&(p, f)| {
            let kernel_param = kernel_params[p];
            match evaluate(&fold_data[f], kernel_param, secondary) {
                Ok(results) => {
                    let mut row: Vec<f64> = results
                        .into_iter()
                        .zip(secondary)
                        .map(|(result, param)| {
                            result.unwrap_or_else(|e| {
                                log::warn!(
                                    "Fold {f}, kernel parameter {kernel_param:.4e}, {param:?} failed: {e}"
                                );
                                1.0
                            })
                        })
                        .collect();
                    row.resize(n_secondary, 1.0);
                    row
                }
                Err(e) => {
                    log::warn!("Fold {f}, kernel parameter {kernel_param:.4e} failed: {e}");
                    vec![1.0; n_secondary]
                }
            }
        })
        .collect();

    // --- 3. Accumulate in pair order and average over folds ---
    let mut errors = Array2::<f64>::zeros((kernel_params.len(), n_secondary));
    for (&(p, _), row) in pairs.iter().zip(&rates) {
        for (cell, rate) in errors.row_mut(p).iter_mut().zip(row) {
            *cell += rate;
        }
    }
    errors /= v as f64;

    // --- 4. Select the first minimum in row-major order ---
    let best = first_minimum(&errors);
    log::debug!("Cross-validation error grid:\n{errors:.4}");

    Ok(CvOutcome {
        kernel_param: kernel_params[best.0],
        secondary: secondary[best.1],
        best,
        errors,
    })
}

/// Row-major position of the first smallest entry.
pub fn first_minimum(errors: &Array2<f64>) -> (usize, usize) {
    let mut best = (0, 0);
    let mut best_value = f64::INFINITY;
    for ((r, c), &value) in errors.indexed_iter() {
        if value < best_value {
            best_value = value;
            best = (r, c);
        }
    }
    best
}
