//! # Class Spectra
//!
//! Everything that depends only on the training set and the kernel
//! hyperparameter lives here: the class layout derived from the labels, the
//! eigen-decomposition of every centered and scaled class block, and the
//! cumulative-variance dimension estimator.
//!
//! A [`SubspaceCache`] is computed once per (kernel parameter, fold) pair in a
//! grid search and shared by every dimension or threshold candidate tried on
//! that pair, since only the truncation of the spectrum changes between them.

use crate::kernel::{Kernel, KernelBlock, Samples};
use crate::model::ClassifierError;
use crate::numeric::floor_eps;
use ndarray::{Array1, Array2, ArrayView1, Axis};
use ndarray_linalg::{Eigh, UPLO};
use std::cmp::Ordering;

/// Class membership of a training set with dense 1-based labels.
#[derive(Debug, Clone)]
pub struct ClassLayout {
    members: Vec<Vec<usize>>,
    n: usize,
}

impl ClassLayout {
    /// Groups sample indices by label. Labels must be dense over `1..=C`:
    /// a zero label or a class with no sample is rejected.
    pub fn from_labels(y: ArrayView1<usize>) -> Result<Self, ClassifierError> {
        if y.is_empty() {
            return Err(ClassifierError::NoSamples);
        }
        if let Some(index) = y.iter().position(|&label| label == 0) {
            return Err(ClassifierError::InvalidLabel { index });
        }

        let n_classes = y.iter().copied().max().unwrap_or(0);
        let mut members = vec![Vec::new(); n_classes];
        for (i, &label) in y.iter().enumerate() {
            members[label - 1].push(i);
        }
        if let Some(empty) = members.iter().position(Vec::is_empty) {
            return Err(ClassifierError::EmptyClass(empty + 1));
        }

        Ok(Self { members, n: y.len() })
    }

    pub fn n_samples(&self) -> usize {
        self.n
    }

    pub fn n_classes(&self) -> usize {
        self.members.len()
    }

    /// Sample indices of the 0-based class `class`, in increasing order.
    pub fn members(&self, class: usize) -> &[usize] {
        &self.members[class]
    }

    pub fn size(&self, class: usize) -> usize {
        self.members[class].len()
    }

    pub fn sizes(&self) -> Vec<usize> {
        self.members.iter().map(Vec::len).collect()
    }

    /// Empirical class prior `ni / n`.
    pub fn prior(&self, class: usize) -> f64 {
        self.size(class) as f64 / self.n as f64
    }

    /// Fails unless `samples` holds exactly one row per label.
    pub fn check_samples(&self, samples: &Samples) -> Result<(), ClassifierError> {
        if samples.n_samples() != self.n {
            return Err(ClassifierError::LabelCountMismatch {
                samples: samples.n_samples(),
                labels: self.n,
            });
        }
        Ok(())
    }

    /// Fails unless every class holds at least `required` samples.
    pub fn require_class_size(&self, required: usize) -> Result<(), ClassifierError> {
        match self.members.iter().position(|m| m.len() < required) {
            Some(class) => Err(ClassifierError::ClassTooSmall {
                label: class + 1,
                found: self.size(class),
                required,
            }),
            None => Ok(()),
        }
    }
}

/// The eigen-decomposition of one centered, scaled class block.
#[derive(Debug, Clone)]
pub struct EigenSpectrum {
    /// Eigenvalues in non-increasing order, floored at epsilon.
    pub values: Array1<f64>,
    /// Eigenvectors as columns, in the order of `values`.
    pub vectors: Array2<f64>,
    /// Trace of the block, equal to the sum of the unfloored eigenvalues.
    pub trace: f64,
    /// Row count of the block the spectrum was taken from.
    pub rank: usize,
}

impl EigenSpectrum {
    /// Decomposes a symmetric block. Eigenvalues come back sorted in
    /// decreasing order with equal values kept in solver order.
    pub fn from_block(block: &KernelBlock) -> Result<Self, ClassifierError> {
        let (raw_values, raw_vectors) = block
            .k
            .eigh(UPLO::Lower)
            .map_err(ClassifierError::EigendecompositionFailed)?;

        let mut order: Vec<usize> = (0..raw_values.len()).collect();
        order.sort_by(|&a, &b| {
            raw_values[b]
                .partial_cmp(&raw_values[a])
                .unwrap_or(Ordering::Equal)
        });

        let values = order.iter().map(|&i| floor_eps(raw_values[i])).collect();
        let vectors = raw_vectors.select(Axis(1), &order);

        Ok(Self {
            values,
            vectors,
            trace: block.trace(),
            rank: block.rank,
        })
    }

    /// Spectrum of the class at `members`: the kernel block is double
    /// centered, divided by the class size, then decomposed.
    pub fn of_class(
        samples: &Samples,
        kernel: &Kernel,
        members: &[usize],
    ) -> Result<Self, ClassifierError> {
        let mut block = samples.block(kernel, members, members)?;
        block.center();
        block.scale(members.len());
        Self::from_block(&block)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Per-class spectra for one training set and one kernel hyperparameter.
#[derive(Debug, Clone)]
pub struct SubspaceCache {
    kernel: Kernel,
    spectra: Vec<EigenSpectrum>,
}

impl SubspaceCache {
    pub fn compute(
        samples: &Samples,
        layout: &ClassLayout,
        kernel: &Kernel,
    ) -> Result<Self, ClassifierError> {
        layout.check_samples(samples)?;
        let spectra = (0..layout.n_classes())
            .map(|c| EigenSpectrum::of_class(samples, kernel, layout.members(c)))
            .collect::<Result<Vec<_>, _>>()?;
        log::debug!(
            "Computed {} class spectra with kernel {:?} (param {:.4e}).",
            spectra.len(),
            kernel.kind,
            kernel.param
        );
        Ok(Self {
            kernel: *kernel,
            spectra,
        })
    }

    /// The kernel the spectra were computed with.
    pub fn kernel(&self) -> Kernel {
        self.kernel
    }

    pub fn n_classes(&self) -> usize {
        self.spectra.len()
    }

    pub fn spectrum(&self, class: usize) -> &EigenSpectrum {
        &self.spectra[class]
    }
}

/// Smallest 1-based `k` such that the first `k` values hold strictly more
/// than `threshold` of the total mass. A spectrum of at most one value
/// yields 1; if no prefix crosses the threshold the full length is returned.
pub fn intrinsic_dimension(values: ArrayView1<f64>, threshold: f64) -> usize {
    if values.len() <= 1 {
        return 1;
    }
    let total = values.sum();
    let mut cumulative = 0.0;
    for (k, value) in values.iter().enumerate() {
        cumulative += value;
        if cumulative / total > threshold {
            return k + 1;
        }
    }
    values.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::numeric::EPS;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array1, array};

    #[test]
    fn dimension_counts_the_first_prefix_above_threshold() {
        let values = array![0.5, 0.3, 0.2];
        assert_eq!(intrinsic_dimension(values.view(), 0.79), 2);
        assert_eq!(intrinsic_dimension(values.view(), 0.81), 3);
        assert_eq!(intrinsic_dimension(values.view(), 0.4), 1);
        assert_eq!(intrinsic_dimension(array![7.0].view(), 0.99), 1);
        assert_eq!(intrinsic_dimension(Array1::<f64>::zeros(0).view(), 0.5), 1);
    }

    #[test]
    fn layout_groups_dense_labels() {
        let y = array![2, 1, 2, 3, 1, 2];
        let layout = ClassLayout::from_labels(y.view()).unwrap();
        assert_eq!(layout.n_classes(), 3);
        assert_eq!(layout.n_samples(), 6);
        assert_eq!(layout.members(1), &[0, 2, 5]);
        assert_eq!(layout.sizes(), vec![2, 3, 1]);
        assert_abs_diff_eq!(layout.prior(1), 0.5);
        assert!(layout.require_class_size(1).is_ok());
        assert!(matches!(
            layout.require_class_size(2),
            Err(ClassifierError::ClassTooSmall { label: 3, found: 1, required: 2 })
        ));
    }

    #[test]
    fn layout_rejects_gaps_and_zero_labels() {
        assert!(matches!(
            ClassLayout::from_labels(array![1, 3, 3].view()),
            Err(ClassifierError::EmptyClass(2))
        ));
        assert!(matches!(
            ClassLayout::from_labels(array![1, 0].view()),
            Err(ClassifierError::InvalidLabel { index: 1 })
        ));
        assert!(matches!(
            ClassLayout::from_labels(Array1::<usize>::zeros(0).view()),
            Err(ClassifierError::NoSamples)
        ));
    }

    #[test]
    fn class_spectra_are_sorted_floored_and_preserve_trace() {
        let x = array![
            [0.0, 0.1],
            [0.4, -0.2],
            [1.0, 0.3],
            [0.2, 0.9],
            [-0.7, 0.5],
            [3.0, 3.0],
            [3.2, 2.9]
        ];
        let y = array![1, 1, 1, 1, 1, 2, 2];
        let samples = Samples::features(x.view());
        let layout = ClassLayout::from_labels(y.view()).unwrap();
        let cache = SubspaceCache::compute(&samples, &layout, &Kernel::rbf(0.5)).unwrap();

        assert_eq!(cache.n_classes(), 2);
        for class in 0..2 {
            let spectrum = cache.spectrum(class);
            assert_eq!(spectrum.len(), layout.size(class));
            assert_eq!(spectrum.rank, layout.size(class));
            assert_eq!(spectrum.vectors.dim(), (layout.size(class), layout.size(class)));
            assert!(spectrum.values.iter().all(|&v| v >= EPS));
            for pair in spectrum.values.windows(2) {
                assert!(pair[0] >= pair[1]);
            }
        }

        // A centered block of rank ni - 1 leaves one eigenvalue at the floor,
        // so the floored sum exceeds the trace by at most a few epsilons.
        let first = cache.spectrum(0);
        assert_abs_diff_eq!(first.values.sum(), first.trace, epsilon = 1e-10);
        assert!(first.values[first.len() - 1] < 1e-12);
    }
}
