//! Building blocks shared by the two subspace models (PGPDA and NPGPDA):
//! how the signal dimension is chosen, how signal variances are tied across
//! classes, how the per-class projection matrix is formed, and how a centered
//! test block is scored against it.

use crate::kernel::{Kernel, Samples};
use crate::model::{ClassParameters, ClassifierError};
use crate::spectrum::{ClassLayout, EigenSpectrum};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis, s};
use serde::{Deserialize, Serialize};

/// Default shared subspace dimension for the fixed-dimension variants.
pub const DEFAULT_DIMENSION: usize = 2;
/// Default cumulative variance threshold for the threshold variants.
pub const DEFAULT_THRESHOLD: f64 = 0.95;

/// How the signal dimension `di` of each class is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DimensionRule {
    /// One user-supplied dimension for every class, clamped to the smallest class.
    Fixed,
    /// Per-class dimension from the cumulative variance of the spectrum.
    Threshold,
}

/// How the retained signal variances are constrained across classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tying {
    /// Each class keeps its own leading eigenvalues.
    Free,
    /// Each class replaces its variances by their mean.
    ClassIsotropic,
    /// All classes share the prior-weighted, position-wise average profile.
    SharedProfile,
    /// All classes share one prior-weighted scalar variance.
    SharedScalar,
}

/// The second hyperparameter searched next to the kernel parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubspaceParam {
    Threshold(f64),
    Dimension(usize),
}

/// The retained part of one class spectrum, before tying.
#[derive(Debug, Clone)]
pub(crate) struct SignalSubspace {
    pub ni: usize,
    pub prop: f64,
    pub ri: usize,
    pub di: usize,
    pub a: Array1<f64>,
    pub beta: Array2<f64>,
    /// Trace of the class block minus the retained variances.
    pub residual: f64,
}

impl SignalSubspace {
    pub(crate) fn truncate(
        spectrum: &EigenSpectrum,
        layout: &ClassLayout,
        class: usize,
        ri: usize,
        di: usize,
    ) -> Self {
        let di = di.min(spectrum.len());
        let a = spectrum.values.slice(s![..di]).to_owned();
        let beta = spectrum.vectors.slice(s![.., ..di]).to_owned();
        Self {
            ni: layout.size(class),
            prop: layout.prior(class),
            ri,
            di,
            residual: spectrum.trace - a.sum(),
            a,
            beta,
        }
    }
}

pub(crate) fn check_threshold(threshold: f64) -> Result<(), ClassifierError> {
    if threshold > 0.0 && threshold < 1.0 {
        Ok(())
    } else {
        Err(ClassifierError::InvalidThreshold(threshold))
    }
}

pub(crate) fn check_dimension(dc: usize) -> Result<(), ClassifierError> {
    if dc == 0 {
        Err(ClassifierError::InvalidDimension(dc))
    } else {
        Ok(())
    }
}

/// Applies `tying` to the per-class variance vectors in place.
pub(crate) fn tie_signal_variances(tying: Tying, signals: &mut [SignalSubspace]) {
    match tying {
        Tying::Free => {}
        Tying::ClassIsotropic => {
            for signal in signals.iter_mut() {
                if let Some(mean) = signal.a.mean() {
                    signal.a.fill(mean);
                }
            }
        }
        Tying::SharedProfile => {
            let width = signals.iter().map(|sig| sig.a.len()).max().unwrap_or(0);
            let mut profile = Array1::<f64>::zeros(width);
            for signal in signals.iter() {
                profile
                    .slice_mut(s![..signal.a.len()])
                    .scaled_add(signal.prop, &signal.a);
            }
            for signal in signals.iter_mut() {
                let di = signal.a.len();
                signal.a.assign(&profile.slice(s![..di]));
            }
        }
        Tying::SharedScalar => {
            let mass: f64 = signals.iter().map(|sig| sig.prop * sig.a.sum()).sum();
            let dims: f64 = signals.iter().map(|sig| sig.prop * sig.di as f64).sum();
            if dims > 0.0 {
                let shared = mass / dims;
                for signal in signals.iter_mut() {
                    signal.a.fill(shared);
                }
            }
        }
    }
}

/// `beta diag((1/a - ib)/a) beta^T / ni`.
pub(crate) fn projection_matrix(
    beta: ArrayView2<f64>,
    a: ArrayView1<f64>,
    ib: f64,
    ni: usize,
) -> Array2<f64> {
    let weights = a.mapv(|ak| (1.0 / ak - ib) / ak);
    let weighted = &beta * &weights;
    weighted.dot(&beta.t()) / ni as f64
}

/// A test block centered against one training class, with its centered
/// diagonal.
#[derive(Debug, Clone)]
pub struct CenteredTestBlock {
    pub cross: Array2<f64>,
    pub diag: Array1<f64>,
}

/// Centers the test samples against every class of the training set.
///
/// The blocks depend only on the kernel and the data, so a grid search
/// computes them once per (kernel parameter, fold) pair.
pub fn centered_test_blocks(
    test: &Samples,
    train: &Samples,
    layout: &ClassLayout,
    kernel: &Kernel,
) -> Result<Vec<CenteredTestBlock>, ClassifierError> {
    layout.check_samples(train)?;
    let test_diag = test.self_diagonal(kernel);
    (0..layout.n_classes())
        .map(|class| {
            let members = layout.members(class);
            let reference = train.block(kernel, members, members)?;
            let mut cross = test.cross_block(train, kernel, members)?;
            let mut diag = test_diag.clone();
            cross.center_against(&reference, &mut diag)?;
            Ok(CenteredTestBlock {
                cross: cross.k,
                diag,
            })
        })
        .collect()
}

/// The projection of each class is `ni x ni`, so prediction needs the same
/// class sizes the model was trained on.
pub(crate) fn check_training_layout(
    classes: &[ClassParameters],
    layout: &ClassLayout,
) -> Result<(), ClassifierError> {
    if layout.n_classes() != classes.len() {
        return Err(ClassifierError::ClassCountMismatch {
            trained: classes.len(),
            found: layout.n_classes(),
        });
    }
    for (class, params) in classes.iter().enumerate() {
        let found = layout.size(class);
        if found != params.ni {
            return Err(ClassifierError::ClassSizeMismatch {
                label: class + 1,
                trained: params.ni,
                found,
            });
        }
    }
    Ok(())
}

/// Row-wise `Kt A Kt^T + ib * kd + constant` for one class.
pub(crate) fn quadratic_scores(
    block: &CenteredTestBlock,
    projection: &Array2<f64>,
    ib: f64,
    constant: f64,
) -> Array1<f64> {
    let temp = block.cross.dot(projection);
    let mut scores = (&block.cross * &temp).sum_axis(Axis(1));
    scores.scaled_add(ib, &block.diag);
    scores + constant
}
