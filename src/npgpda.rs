//! # PGPDA with Class-Specific Noise
//!
//! Same signal model as [`crate::pgpda`], except that every class estimates
//! its own noise variance from the residual of its own spectrum. The
//! effective degrees of freedom of a class are `ni - 1` (one is lost to
//! centering), so every class needs at least two samples.

use crate::crossval::{CvOutcome, FoldData, SubspaceGrid, grid_search, misclassification_rate};
use crate::kernel::{Kernel, Samples};
use crate::model::{
    ClassParameters, ClassifierError, PredictOutput, Prediction, finalize_decision, load_toml,
    save_toml,
};
use crate::numeric::NoiseTerm;
use crate::spectrum::{ClassLayout, SubspaceCache, intrinsic_dimension};
use crate::subspace::{
    CenteredTestBlock, DEFAULT_DIMENSION, DEFAULT_THRESHOLD, DimensionRule, SignalSubspace,
    SubspaceParam, Tying, centered_test_blocks, check_dimension, check_threshold,
    check_training_layout, projection_matrix, quadratic_scores, tie_signal_variances,
};
use ndarray::{Array2, ArrayView1, ArrayView2, s};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Minimum class size: one sample is consumed by centering.
const MIN_CLASS_SIZE: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NpgpdaVariant {
    NM0,
    NM1,
    NM2,
    NM3,
    NM4,
}

impl NpgpdaVariant {
    pub const ALL: [NpgpdaVariant; 5] = [
        NpgpdaVariant::NM0,
        NpgpdaVariant::NM1,
        NpgpdaVariant::NM2,
        NpgpdaVariant::NM3,
        NpgpdaVariant::NM4,
    ];

    pub fn dimension_rule(self) -> DimensionRule {
        match self {
            NpgpdaVariant::NM0 | NpgpdaVariant::NM2 => DimensionRule::Threshold,
            NpgpdaVariant::NM1 | NpgpdaVariant::NM3 | NpgpdaVariant::NM4 => DimensionRule::Fixed,
        }
    }

    pub fn tying(self) -> Tying {
        match self {
            NpgpdaVariant::NM0 | NpgpdaVariant::NM1 => Tying::Free,
            NpgpdaVariant::NM2 | NpgpdaVariant::NM3 => Tying::ClassIsotropic,
            NpgpdaVariant::NM4 => Tying::SharedProfile,
        }
    }

    pub fn tag(self) -> &'static str {
        match self {
            NpgpdaVariant::NM0 => "NM0",
            NpgpdaVariant::NM1 => "NM1",
            NpgpdaVariant::NM2 => "NM2",
            NpgpdaVariant::NM3 => "NM3",
            NpgpdaVariant::NM4 => "NM4",
        }
    }
}

impl fmt::Display for NpgpdaVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for NpgpdaVariant {
    type Err = ClassifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NpgpdaVariant::ALL
            .into_iter()
            .find(|variant| variant.tag() == s)
            .ok_or_else(|| ClassifierError::UnknownVariant(s.to_string()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Npgpda {
    pub variant: NpgpdaVariant,
    pub kernel: Kernel,
    pub dc: usize,
    pub threshold: f64,
    pub classes: Vec<ClassParameters>,
}

impl Npgpda {
    pub fn new(variant: NpgpdaVariant, kernel: Kernel) -> Self {
        Self {
            variant,
            kernel,
            dc: DEFAULT_DIMENSION,
            threshold: DEFAULT_THRESHOLD,
            classes: Vec::new(),
        }
    }

    pub fn with_dimension(mut self, dc: usize) -> Self {
        self.dc = dc;
        self
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_subspace_param(mut self, param: SubspaceParam) -> Self {
        self.set_subspace_param(param);
        self
    }

    pub fn set_subspace_param(&mut self, param: SubspaceParam) {
        match param {
            SubspaceParam::Threshold(threshold) => self.threshold = threshold,
            SubspaceParam::Dimension(dc) => self.dc = dc,
        }
    }

    pub fn is_trained(&self) -> bool {
        !self.classes.is_empty() && self.classes.iter().all(|c| c.noise.is_some())
    }

    pub fn train(&mut self, x: &Samples, y: ArrayView1<usize>) -> Result<(), ClassifierError> {
        let layout = ClassLayout::from_labels(y)?;
        layout.check_samples(x)?;
        layout.require_class_size(MIN_CLASS_SIZE)?;
        let cache = SubspaceCache::compute(x, &layout, &self.kernel)?;
        self.train_from_cache(&layout, &cache)
    }

    pub fn train_from_cache(
        &mut self,
        layout: &ClassLayout,
        cache: &SubspaceCache,
    ) -> Result<(), ClassifierError> {
        if cache.n_classes() != layout.n_classes() {
            return Err(ClassifierError::ClassCountMismatch {
                trained: cache.n_classes(),
                found: layout.n_classes(),
            });
        }
        layout.require_class_size(MIN_CLASS_SIZE)?;

        let shared_dc = match self.variant.dimension_rule() {
            DimensionRule::Threshold => {
                check_threshold(self.threshold)?;
                None
            }
            DimensionRule::Fixed => {
                check_dimension(self.dc)?;
                Some(clamp_dimension(self.dc, &layout.sizes()))
            }
        };

        let mut signals: Vec<SignalSubspace> = (0..layout.n_classes())
            .map(|class| {
                let spectrum = cache.spectrum(class);
                let ri = layout.size(class) - 1;
                // The last eigenvalue of a centered block is structurally zero.
                let di = shared_dc.unwrap_or_else(|| {
                    let informative = spectrum.values.slice(s![..ri - 1]);
                    intrinsic_dimension(informative, self.threshold)
                });
                SignalSubspace::truncate(spectrum, layout, class, ri, di)
            })
            .collect();

        // Noise is estimated per class from the untied variances.
        let noises: Vec<NoiseTerm> = signals
            .iter()
            .map(|sig| NoiseTerm::estimate(sig.residual, sig.ri.saturating_sub(sig.di) as f64))
            .collect();

        tie_signal_variances(self.variant.tying(), &mut signals);
        let classes: Vec<ClassParameters> = signals
            .into_iter()
            .zip(noises)
            .map(|(sig, noise)| ClassParameters {
                projection: projection_matrix(sig.beta.view(), sig.a.view(), noise.ib, sig.ni),
                ni: sig.ni,
                prop: sig.prop,
                ri: sig.ri,
                di: sig.di,
                a: sig.a,
                beta: sig.beta,
                noise: Some(noise),
            })
            .collect();

        log::debug!(
            "Trained NPGPDA {} with dimensions {:?}.",
            self.variant,
            classes.iter().map(|c| c.di).collect::<Vec<_>>()
        );

        self.kernel = cache.kernel();
        if let Some(dc) = shared_dc {
            self.dc = dc;
        }
        self.classes = classes;
        Ok(())
    }

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
        check_training_layout(&self.classes, &layout)?;
        let blocks = centered_test_blocks(xt, x, &layout, &self.kernel)?;
        let decision = self.decision(&blocks)?;
        Ok(finalize_decision(decision, output))
    }

    pub(crate) fn decision(
        &self,
        blocks: &[CenteredTestBlock],
    ) -> Result<Array2<f64>, ClassifierError> {
        let n_test = blocks.first().map_or(0, |b| b.cross.nrows());
        let mut decision = Array2::zeros((n_test, self.classes.len()));
        for ((params, block), mut column) in self
            .classes
            .iter()
            .zip(blocks)
            .zip(decision.columns_mut())
        {
            let noise = params.noise.ok_or(ClassifierError::NotTrained)?;
            let constant = params.a.mapv(f64::ln).sum()
                + params.ri.saturating_sub(params.di) as f64 * noise.b.ln()
                - 2.0 * params.prop.ln();
            column.assign(&quadratic_scores(block, &params.projection, noise.ib, constant));
        }
        Ok(decision)
    }

    /// Grid search over the kernel parameter and the threshold or dimension.
    /// The winning pair is written back into the model and any previously
    /// trained parameters are discarded.
    pub fn cross_validation(
        &mut self,
        x: ArrayView2<f64>,
        y: ArrayView1<usize>,
        v: usize,
        grid: &SubspaceGrid,
    ) -> Result<CvOutcome<SubspaceParam>, ClassifierError> {
        let variant = self.variant;
        let base = self.kernel;
        let secondary = grid.secondary(variant.dimension_rule());

        let outcome = grid_search(
            x,
            y,
            v,
            &grid.kernel_params,
            &secondary,
            |fold: &FoldData, kernel_param: f64, params: &[SubspaceParam]| {
                let kernel = base.with_param(kernel_param);
                let train = Samples::features(fold.x_train.view());
                let test = Samples::features(fold.x_test.view());
                let layout = ClassLayout::from_labels(fold.y_train.view())?;
                layout.require_class_size(MIN_CLASS_SIZE)?;
                let cache = SubspaceCache::compute(&train, &layout, &kernel)?;
                let blocks = centered_test_blocks(&test, &train, &layout, &kernel)?;

                Ok(params
                    .iter()
                    .map(|&param| {
                        let mut trial = Npgpda::new(variant, kernel).with_subspace_param(param);
                        trial.train_from_cache(&layout, &cache)?;
                        let prediction =
                            finalize_decision(trial.decision(&blocks)?, PredictOutput::Labels);
                        misclassification_rate(prediction.labels.view(), fold.y_test.view())
                    })
                    .collect())
            },
        )?;

        self.kernel = base.with_param(outcome.kernel_param);
        self.set_subspace_param(outcome.secondary);
        self.classes.clear();
        log::info!(
            "NPGPDA {} cross-validation selected kernel parameter {:.4e} and {:?} (error {:.4}).",
            self.variant,
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

/// A class of `ni` samples supports at most `ni - 2` signal dimensions; the
/// shared dimension drops to `max(ni - 2, 1)` when it would reach `ni - 1`.
fn clamp_dimension(dc: usize, sizes: &[usize]) -> usize {
    sizes.iter().fold(dc, |dc, &ni| {
        if dc + 1 >= ni {
            let clamped = ni.saturating_sub(2).max(1);
            log::warn!(
                "Subspace dimension {dc} too large for a class of {ni} samples; using {clamped}."
            );
            clamped
        } else {
            dc
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array1, Axis, array};

    fn toy() -> (Array2<f64>, Array1<usize>) {
        let x = array![
            [0.0, 0.0],
            [0.3, -0.2],
            [-0.1, 0.4],
            [0.2, 0.1],
            [-0.3, -0.1],
            [0.1, -0.4],
            [4.0, 4.0],
            [4.2, 3.7],
            [3.8, 4.1],
            [4.1, 4.3],
            [3.9, 3.8]
        ];
        let y = array![1, 1, 1, 1, 1, 1, 2, 2, 2, 2, 2];
        (x, y)
    }

    /// Three well separated classes of unequal size.
    fn unbalanced() -> (Array2<f64>, Array1<usize>) {
        let x = array![
            [0.0, 0.0],
            [0.3, -0.2],
            [-0.1, 0.4],
            [0.2, 0.1],
            [-0.3, -0.1],
            [0.1, -0.4],
            [4.0, 4.0],
            [4.2, 3.7],
            [3.8, 4.1],
            [4.1, 4.3],
            [0.0, 4.0],
            [0.3, 4.2],
            [-0.2, 3.8],
            [0.1, 4.3],
            [-0.4, 4.1]
        ];
        let y = array![1, 1, 1, 1, 1, 1, 2, 2, 2, 2, 3, 3, 3, 3, 3];
        (x, y)
    }

    #[test]
    fn variant_tags_round_trip() {
        for variant in NpgpdaVariant::ALL {
            assert_eq!(variant.to_string().parse::<NpgpdaVariant>().unwrap(), variant);
        }
        assert!("NM5".parse::<NpgpdaVariant>().is_err());
        assert!("M0".parse::<NpgpdaVariant>().is_err());
    }

    #[test]
    fn shared_dimension_leaves_room_for_noise() {
        assert_eq!(clamp_dimension(2, &[10, 10]), 2);
        assert_eq!(clamp_dimension(5, &[6, 10]), 4);
        assert_eq!(clamp_dimension(3, &[4]), 2);
        assert_eq!(clamp_dimension(3, &[2]), 1);
    }

    #[test]
    fn every_variant_trains_with_class_noise() {
        let (x, y) = unbalanced();
        let samples = Samples::features(x.view());
        for variant in NpgpdaVariant::ALL {
            let mut model = Npgpda::new(variant, Kernel::rbf(0.5)).with_dimension(2);
            model.train(&samples, y.view()).unwrap();
            assert!(model.is_trained());
            let total: f64 = model.classes.iter().map(|c| c.prop).sum();
            assert_abs_diff_eq!(total, 1.0, epsilon = 1e-12);
            assert_abs_diff_eq!(model.classes[0].prop, 6.0 / 15.0, epsilon = 1e-12);
            for params in &model.classes {
                assert_eq!(params.ri, params.ni - 1);
                assert!(params.di >= 1 && params.di <= params.ri);
                let noise = params.noise.unwrap();
                assert!(noise.b > 0.0 && noise.ib > 0.0);
            }
            let prediction = model
                .predict(&samples, &samples, y.view(), PredictOutput::Posterior)
                .unwrap();
            assert_eq!(prediction.labels, y, "variant {variant}");
            for row in prediction.posterior.unwrap().rows() {
                assert_abs_diff_eq!(row.sum(), 1.0, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn singleton_class_is_rejected() {
        let x = array![[0.0], [1.0], [5.0]];
        let y = array![1, 1, 2];
        let mut model = Npgpda::new(NpgpdaVariant::NM0, Kernel::default());
        assert!(matches!(
            model.train(&Samples::features(x.view()), y.view()),
            Err(ClassifierError::ClassTooSmall { label: 2, found: 1, required: 2 })
        ));
    }

    #[test]
    fn two_sample_classes_fall_back_to_guarded_noise() {
        let x = array![[0.0], [0.5], [5.0], [5.5]];
        let y = array![1, 1, 2, 2];
        let samples = Samples::features(x.view());
        for variant in NpgpdaVariant::ALL {
            let mut model = Npgpda::new(variant, Kernel::rbf(0.5));
            model.train(&samples, y.view()).unwrap();
            for params in &model.classes {
                assert_eq!((params.ri, params.di), (1, 1));
                assert!(params.noise.unwrap().b.ln().is_finite());
            }
            let prediction = model
                .predict(&samples, &samples, y.view(), PredictOutput::Decision)
                .unwrap();
            assert!(prediction.decision.unwrap().iter().all(|d| d.is_finite()));
        }
    }

    #[test]
    fn prediction_requires_the_trained_class_sizes() {
        let (x, y) = toy();
        let samples = Samples::features(x.view());
        let mut model = Npgpda::new(NpgpdaVariant::NM1, Kernel::rbf(0.5)).with_dimension(2);
        model.train(&samples, y.view()).unwrap();

        let fewer = x.select(Axis(0), &[0, 1, 2, 6, 7, 8, 9]);
        let fewer_labels = array![1, 1, 1, 2, 2, 2, 2];
        assert!(matches!(
            model.predict(
                &samples,
                &Samples::features(fewer.view()),
                fewer_labels.view(),
                PredictOutput::Labels
            ),
            Err(ClassifierError::ClassSizeMismatch { label: 1, trained: 6, found: 3 })
        ));
    }
}
