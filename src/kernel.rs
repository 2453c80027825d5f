//! # Kernel Provider
//!
//! Computes, centers and scales the Gram blocks consumed by the classifiers.
//! The classifiers only ever see [`KernelBlock`]s; whether a block came from a
//! kernel function evaluated on raw feature vectors or from slicing a
//! user-supplied Gram matrix is decided by [`Samples`].
//!
//! Centering follows the usual feature-space convention. A training block
//! `K` (n x n) becomes `K - 1K - K1 + 1K1` with `1 = ones / n`. A test block
//! `Kt` (m x n) is centered against its training reference, and the test
//! diagonal `k(x, x)` becomes `k(x, x) - 2 mean_j Kt[x, j] + mean(K)`, i.e. the
//! squared norm of the centered feature image.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis, Zip};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while building kernel blocks.
#[derive(Error, Debug)]
pub enum KernelError {
    #[error("Feature dimension mismatch: left block has {left} columns, right block has {right}.")]
    FeatureMismatch { left: usize, right: usize },

    #[error("Kernel parameter {value} is invalid for the {kind:?} kernel: {reason}")]
    InvalidParameter {
        kind: KernelType,
        value: f64,
        reason: &'static str,
    },

    #[error("Dimension mismatch in {context}: expected {expected}, found {found}.")]
    BlockMismatch {
        context: &'static str,
        expected: usize,
        found: usize,
    },

    #[error(
        "Cannot combine raw feature samples with a precomputed kernel; both sample sets must use the same representation."
    )]
    SampleKindMismatch,
}

/// The kernel family. The scalar hyperparameter lives in [`Kernel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KernelType {
    /// `exp(-param * ||x - z||^2)`.
    Rbf,
    /// `(1 + <x, z>)^param`.
    Polynomial,
    /// `<x, z>`; the parameter is ignored.
    Linear,
}

/// A kernel function together with its scalar hyperparameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Kernel {
    pub kind: KernelType,
    pub param: f64,
}

impl Default for Kernel {
    fn default() -> Self {
        Self::rbf(0.5)
    }
}

impl Kernel {
    pub fn new(kind: KernelType, param: f64) -> Self {
        Self { kind, param }
    }

    pub fn rbf(gamma: f64) -> Self {
        Self::new(KernelType::Rbf, gamma)
    }

    /// Same family, different hyperparameter. Used by the grid searches.
    pub fn with_param(self, param: f64) -> Self {
        Self { param, ..self }
    }

    fn validate(&self) -> Result<(), KernelError> {
        let reason = match self.kind {
            KernelType::Rbf | KernelType::Polynomial if !self.param.is_finite() => {
                Some("parameter must be finite")
            }
            KernelType::Rbf | KernelType::Polynomial if self.param <= 0.0 => {
                Some("parameter must be strictly positive")
            }
            _ => None,
        };
        match reason {
            Some(reason) => Err(KernelError::InvalidParameter {
                kind: self.kind,
                value: self.param,
                reason,
            }),
            None => Ok(()),
        }
    }

    #[inline]
    fn eval(&self, x: ArrayView1<f64>, z: ArrayView1<f64>) -> f64 {
        match self.kind {
            KernelType::Rbf => {
                let d2: f64 = x.iter().zip(z.iter()).map(|(a, b)| (a - b) * (a - b)).sum();
                (-self.param * d2).exp()
            }
            KernelType::Polynomial => (1.0 + x.dot(&z)).powf(self.param),
            KernelType::Linear => x.dot(&z),
        }
    }

    /// Computes the kernel block between the rows of `a` and the rows of `b`
    /// (or of `a` itself). Rows are evaluated in parallel.
    pub fn compute(
        &self,
        a: ArrayView2<f64>,
        b: Option<ArrayView2<f64>>,
    ) -> Result<KernelBlock, KernelError> {
        self.validate()?;
        let b = match &b {
            Some(b) => b.view(),
            None => a.view(),
        };
        if a.ncols() != b.ncols() {
            return Err(KernelError::FeatureMismatch {
                left: a.ncols(),
                right: b.ncols(),
            });
        }

        let mut k = Array2::zeros((a.nrows(), b.nrows()));
        Zip::from(k.rows_mut())
            .and(a.rows())
            .par_for_each(|mut out, x| {
                for (value, z) in out.iter_mut().zip(b.rows()) {
                    *value = self.eval(x, z);
                }
            });

        Ok(KernelBlock {
            rank: a.nrows(),
            k,
        })
    }

    /// Evaluates `k(x, x)` for every row of `a`.
    pub fn diagonal(&self, a: ArrayView2<f64>) -> Array1<f64> {
        match self.kind {
            KernelType::Rbf => Array1::ones(a.nrows()),
            KernelType::Polynomial | KernelType::Linear => {
                a.rows().into_iter().map(|x| self.eval(x, x)).collect()
            }
        }
    }
}

/// A kernel matrix together with the row count of the sample block it was
/// built from.
#[derive(Debug, Clone)]
pub struct KernelBlock {
    pub k: Array2<f64>,
    pub rank: usize,
}

impl KernelBlock {
    pub fn from_matrix(k: Array2<f64>) -> Self {
        Self { rank: k.nrows(), k }
    }

    /// Double-centers a square training block in place.
    pub fn center(&mut self) {
        let n = self.k.nrows();
        if n == 0 {
            return;
        }
        let nf = n as f64;
        let col_means = self.k.sum_axis(Axis(0)) / nf;
        let row_means = self.k.sum_axis(Axis(1)) / nf;
        let total = col_means.sum() / nf;
        Zip::indexed(&mut self.k).for_each(|(i, j), value| {
            *value -= row_means[i] + col_means[j] - total;
        });
    }

    /// Centers a test block (test rows x training columns) against the
    /// uncentered training block `reference`, and centers the test diagonal
    /// `diag` alongside it.
    pub fn center_against(
        &mut self,
        reference: &KernelBlock,
        diag: &mut Array1<f64>,
    ) -> Result<(), KernelError> {
        let n = reference.k.nrows();
        if reference.k.ncols() != n || self.k.ncols() != n {
            return Err(KernelError::BlockMismatch {
                context: "test block centering (training columns)",
                expected: n,
                found: self.k.ncols(),
            });
        }
        if diag.len() != self.k.nrows() {
            return Err(KernelError::BlockMismatch {
                context: "test block centering (diagonal length)",
                expected: self.k.nrows(),
                found: diag.len(),
            });
        }
        if n == 0 {
            return Ok(());
        }

        let nf = n as f64;
        let ref_col_means = reference.k.sum_axis(Axis(0)) / nf;
        let ref_total = ref_col_means.sum() / nf;
        let row_means = self.k.sum_axis(Axis(1)) / nf;

        Zip::from(&mut *diag)
            .and(&row_means)
            .for_each(|d, &m| *d += ref_total - 2.0 * m);
        Zip::indexed(&mut self.k).for_each(|(r, j), value| {
            *value -= ref_col_means[j] + row_means[r] - ref_total;
        });
        Ok(())
    }

    /// Divides the block by a sample count.
    pub fn scale(&mut self, n: usize) {
        if n > 0 {
            self.k /= n as f64;
        }
    }

    pub fn trace(&self) -> f64 {
        self.k.diag().sum()
    }
}

/// The representation of a sample set handed to `train` and `predict`.
///
/// With `Precomputed`, a training set carries its `n x n` Gram matrix and a
/// test set carries its `m x n` cross Gram matrix against the full training
/// set; `diag` holds `k(x, x)` for every row of `gram`.
#[derive(Debug, Clone, Copy)]
pub enum Samples<'a> {
    Features(ArrayView2<'a, f64>),
    Precomputed {
        gram: ArrayView2<'a, f64>,
        diag: ArrayView1<'a, f64>,
    },
}

impl<'a> Samples<'a> {
    pub fn features(x: ArrayView2<'a, f64>) -> Self {
        Samples::Features(x)
    }

    pub fn precomputed(
        gram: ArrayView2<'a, f64>,
        diag: ArrayView1<'a, f64>,
    ) -> Result<Self, KernelError> {
        if diag.len() != gram.nrows() {
            return Err(KernelError::BlockMismatch {
                context: "precomputed kernel diagonal",
                expected: gram.nrows(),
                found: diag.len(),
            });
        }
        Ok(Samples::Precomputed { gram, diag })
    }

    pub fn n_samples(&self) -> usize {
        match self {
            Samples::Features(x) => x.nrows(),
            Samples::Precomputed { gram, .. } => gram.nrows(),
        }
    }

    /// The training block between the samples at `rows` and at `cols`.
    pub fn block(
        &self,
        kernel: &Kernel,
        rows: &[usize],
        cols: &[usize],
    ) -> Result<KernelBlock, KernelError> {
        match self {
            Samples::Features(x) => {
                let xr = x.select(Axis(0), rows);
                if rows == cols {
                    kernel.compute(xr.view(), None)
                } else {
                    let xc = x.select(Axis(0), cols);
                    kernel.compute(xr.view(), Some(xc.view()))
                }
            }
            Samples::Precomputed { gram, .. } => {
                if gram.ncols() != gram.nrows() {
                    return Err(KernelError::BlockMismatch {
                        context: "precomputed training gram (columns)",
                        expected: gram.nrows(),
                        found: gram.ncols(),
                    });
                }
                let k = gram.select(Axis(0), rows).select(Axis(1), cols);
                Ok(KernelBlock::from_matrix(k))
            }
        }
    }

    /// The training Gram matrix over every sample.
    pub fn full_block(&self, kernel: &Kernel) -> Result<KernelBlock, KernelError> {
        let all: Vec<usize> = (0..self.n_samples()).collect();
        self.block(kernel, &all, &all)
    }

    /// The cross block between these (test) samples and the training samples
    /// of `train` at `cols`.
    pub fn cross_block(
        &self,
        train: &Samples,
        kernel: &Kernel,
        cols: &[usize],
    ) -> Result<KernelBlock, KernelError> {
        match (self, train) {
            (Samples::Features(xt), Samples::Features(x)) => {
                let xc = x.select(Axis(0), cols);
                kernel.compute(*xt, Some(xc.view()))
            }
            (Samples::Precomputed { gram, .. }, Samples::Precomputed { .. }) => {
                if gram.ncols() != train.n_samples() {
                    return Err(KernelError::BlockMismatch {
                        context: "precomputed test gram (training columns)",
                        expected: train.n_samples(),
                        found: gram.ncols(),
                    });
                }
                Ok(KernelBlock::from_matrix(gram.select(Axis(1), cols)))
            }
            _ => Err(KernelError::SampleKindMismatch),
        }
    }

    /// `k(x, x)` for every sample.
    pub fn self_diagonal(&self, kernel: &Kernel) -> Array1<f64> {
        match self {
            Samples::Features(x) => kernel.diagonal(*x),
            Samples::Precomputed { diag, .. } => diag.to_owned(),
        }
    }
}
