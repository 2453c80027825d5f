//! # Fold Splitter
//!
//! Deterministic partitions of sample indices into training and testing sets
//! for k-fold cross-validation. Seeds are fixed (seed 1 for the plain split,
//! seed `i` for the 0-based class `i` in the stratified split) so that a
//! hyperparameter search is reproducible regardless of how the grid is
//! scheduled afterwards.
//!
//! Permuted indices are cut into `v` contiguous blocks of `len / v` entries;
//! the last block absorbs the remainder.
//!
//! A class holding fewer samples than folds cannot contribute a sample to
//! every test fold. Such a class is kept whole on the training side of every
//! fold, never tested, and reported in [`Folds::undersized_classes`].

use ndarray::ArrayView1;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use thiserror::Error;

/// Seed of the plain (non-stratified) split.
pub const PLAIN_SPLIT_SEED: u64 = 1;

#[derive(Error, Debug)]
pub enum FoldError {
    #[error("Cross-validation requires at least 2 folds, but {0} were requested.")]
    TooFewFolds(usize),

    #[error("Cannot split an empty sample set into folds.")]
    NoSamples,

    #[error("Label at position {index} is 0; class labels must start at 1.")]
    ZeroLabel { index: usize },
}

/// The `v` training/testing index sets of one cross-validation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Folds {
    pub train: Vec<Vec<usize>>,
    pub test: Vec<Vec<usize>>,
    /// 1-based labels of the classes that had fewer samples than folds.
    pub undersized_classes: Vec<usize>,
}

impl Folds {
    /// Plain k-fold split of `n` samples, ignoring class membership.
    pub fn kfold(n: usize, v: usize) -> Result<Self, FoldError> {
        check_fold_count(v)?;
        if n == 0 {
            return Err(FoldError::NoSamples);
        }
        if n < v {
            log::warn!("Only {n} samples for {v} folds; all samples land in the last test fold.");
        }

        let order = permutation(n, PLAIN_SPLIT_SEED);
        let blocks = cut_blocks(&order, v);
        let mut folds = Folds {
            train: Vec::with_capacity(v),
            test: Vec::with_capacity(v),
            undersized_classes: Vec::new(),
        };
        for j in 0..v {
            folds.test.push(blocks[j].to_vec());
            folds.train.push(
                blocks
                    .iter()
                    .enumerate()
                    .filter(|(l, _)| *l != j)
                    .flat_map(|(_, block)| block.iter().copied())
                    .collect(),
            );
        }
        Ok(folds)
    }

    /// Stratified k-fold split: each class is permuted and cut independently,
    /// then the per-class pieces of every fold are concatenated in class order.
    pub fn stratified(y: ArrayView1<usize>, v: usize) -> Result<Self, FoldError> {
        check_fold_count(v)?;
        if y.is_empty() {
            return Err(FoldError::NoSamples);
        }
        if let Some(index) = y.iter().position(|&label| label == 0) {
            return Err(FoldError::ZeroLabel { index });
        }
        let n_classes = y.iter().copied().max().unwrap_or(0);

        let mut folds = Folds {
            train: vec![Vec::new(); v],
            test: vec![Vec::new(); v],
            undersized_classes: Vec::new(),
        };

        for class in 0..n_classes {
            let label = class + 1;
            let members: Vec<usize> = y
                .iter()
                .enumerate()
                .filter(|&(_, &yi)| yi == label)
                .map(|(i, _)| i)
                .collect();
            let nc = members.len();

            if nc / v == 0 {
                log::warn!(
                    "Not enough samples to build {v} folds in class {label} ({nc} samples); the class stays in every training set and is never tested."
                );
                folds.undersized_classes.push(label);
                for train in &mut folds.train {
                    train.extend_from_slice(&members);
                }
                continue;
            }

            let shuffled: Vec<usize> = permutation(nc, class as u64)
                .into_iter()
                .map(|p| members[p])
                .collect();
            let blocks = cut_blocks(&shuffled, v);
            for j in 0..v {
                folds.test[j].extend_from_slice(blocks[j]);
                for (l, block) in blocks.iter().enumerate() {
                    if l != j {
                        folds.train[j].extend_from_slice(block);
                    }
                }
            }
        }

        Ok(folds)
    }

    /// Number of folds.
    pub fn len(&self) -> usize {
        self.test.len()
    }

    pub fn is_empty(&self) -> bool {
        self.test.is_empty()
    }
}

fn check_fold_count(v: usize) -> Result<(), FoldError> {
    if v < 2 {
        Err(FoldError::TooFewFolds(v))
    } else {
        Ok(())
    }
}

fn permutation(n: usize, seed: u64) -> Vec<usize> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut order: Vec<usize> = (0..n).collect();
    order.shuffle(&mut rng);
    order
}

fn cut_blocks(order: &[usize], v: usize) -> Vec<&[usize]> {
    let n = order.len();
    let step = n / v;
    (0..v)
        .map(|i| {
            let end = if i + 1 < v { (i + 1) * step } else { n };
            &order[i * step..end]
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array1;

    fn assert_partition(folds: &Folds, n: usize) {
        let mut tested = vec![0usize; n];
        for (train, test) in folds.train.iter().zip(&folds.test) {
            let mut seen = vec![false; n];
            for &i in train.iter().chain(test.iter()) {
                assert!(!seen[i], "index {i} appears twice in one fold");
                seen[i] = true;
            }
            for &i in test {
                tested[i] += 1;
            }
        }
        assert!(tested.iter().all(|&count| count <= 1));
    }

    #[test]
    fn plain_split_covers_every_index_once() {
        let folds = Folds::kfold(23, 5).unwrap();
        assert_eq!(folds.len(), 5);
        assert_partition(&folds, 23);
        let sizes: Vec<usize> = folds.test.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![4, 4, 4, 4, 7]);
        for (train, test) in folds.train.iter().zip(&folds.test) {
            assert_eq!(train.len() + test.len(), 23);
        }
    }

    #[test]
    fn splits_are_deterministic() {
        assert_eq!(Folds::kfold(40, 4).unwrap(), Folds::kfold(40, 4).unwrap());
        let y: Array1<usize> = (0..30).map(|i| 1 + i % 3).collect();
        assert_eq!(
            Folds::stratified(y.view(), 5).unwrap(),
            Folds::stratified(y.view(), 5).unwrap()
        );
    }

    #[test]
    fn stratified_split_preserves_class_proportions() {
        let mut labels = vec![1usize; 20];
        labels.extend(vec![2usize; 10]);
        let y = Array1::from(labels);
        let folds = Folds::stratified(y.view(), 5).unwrap();
        assert_partition(&folds, 30);
        assert!(folds.undersized_classes.is_empty());
        for test in &folds.test {
            let ones = test.iter().filter(|&&i| y[i] == 1).count();
            let twos = test.iter().filter(|&&i| y[i] == 2).count();
            assert_eq!((ones, twos), (4, 2));
        }
    }

    #[test]
    fn undersized_class_stays_in_training() {
        let mut labels = vec![1usize; 15];
        labels.extend([2, 2]);
        let y = Array1::from(labels);
        let folds = Folds::stratified(y.view(), 5).unwrap();
        assert_eq!(folds.undersized_classes, vec![2]);
        for (train, test) in folds.train.iter().zip(&folds.test) {
            assert!(train.contains(&15) && train.contains(&16));
            assert!(test.iter().all(|&i| y[i] == 1));
            assert_eq!(test.len(), 3);
        }
        assert_partition(&folds, 17);
    }

    #[test]
    fn invalid_requests_are_rejected() {
        assert!(matches!(Folds::kfold(10, 1), Err(FoldError::TooFewFolds(1))));
        assert!(matches!(Folds::kfold(0, 3), Err(FoldError::NoSamples)));
        let y = Array1::from(vec![1usize, 0, 2]);
        assert!(matches!(
            Folds::stratified(y.view(), 2),
            Err(FoldError::ZeroLabel { index: 1 })
        ));
    }
}
