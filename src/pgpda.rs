//! # Parsimonious Gaussian Process Discriminant Analysis
//!
//! Each class is modeled in the kernel feature space by a Gaussian whose
//! covariance is split into a low-dimensional signal subspace, spanned by the
//! leading eigenvectors of the centered class kernel block, and an isotropic
//! noise term shared by all classes.
//!
//! The seven variants differ only in how the signal dimension is chosen and
//! how signal variances are tied:
//!
//! | variant | dimension  | signal variances                     |
//! |---------|------------|--------------------------------------|
//! | M0      | threshold  | free                                 |
//! | M1      | fixed      | free                                 |
//! | M2      | threshold  | class mean                           |
//! | M3      | fixed      | class mean                           |
//! | M4      | fixed      | shared prior-weighted profile        |
//! | M5      | threshold  | one shared scalar                    |
//! | M6      | fixed      | one shared scalar                    |

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
use ndarray::{Array2, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PgpdaVariant {
    M0,
    M1,
    M2,
    M3,
    M4,
    M5,
    M6,
}

impl PgpdaVariant {
    pub const ALL: [PgpdaVariant; 7] = [
        PgpdaVariant::M0,
        PgpdaVariant::M1,
        PgpdaVariant::M2,
        PgpdaVariant::M3,
        PgpdaVariant::M4,
        PgpdaVariant::M5,
        PgpdaVariant::M6,
    ];

    pub fn dimension_rule(self) -> DimensionRule {
        match self {
            PgpdaVariant::M0 | PgpdaVariant::M2 | PgpdaVariant::M5 => DimensionRule::Threshold,
            PgpdaVariant::M1 | PgpdaVariant::M3 | PgpdaVariant::M4 | PgpdaVariant::M6 => {
                DimensionRule::Fixed
            }
        }
    }

    pub fn tying(self) -> Tying {
        match self {
            PgpdaVariant::M0 | PgpdaVariant::M1 => Tying::Free,
            PgpdaVariant::M2 | PgpdaVariant::M3 => Tying::ClassIsotropic,
            PgpdaVariant::M4 => Tying::SharedProfile,
            PgpdaVariant::M5 | PgpdaVariant::M6 => Tying::SharedScalar,
        }
    }

    pub fn tag(self) -> &'static str {
        match self {
            PgpdaVariant::M0 => "M0",
            PgpdaVariant::M1 => "M1",
            PgpdaVariant::M2 => "M2",
            PgpdaVariant::M3 => "M3",
            PgpdaVariant::M4 => "M4",
            PgpdaVariant::M5 => "M5",
            PgpdaVariant::M6 => "M6",
        }
    }
}

impl fmt::Display for PgpdaVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for PgpdaVariant {
    type Err = ClassifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PgpdaVariant::ALL
            .into_iter()
            .find(|variant| variant.tag() == s)
            .ok_or_else(|| ClassifierError::UnknownVariant(s.to_string()))
    }
}

/// A PGPDA classifier: hyperparameters plus, once trained, the per-class
/// parameters and the pooled noise term.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pgpda {
    pub variant: PgpdaVariant,
    pub kernel: Kernel,
    /// Shared subspace dimension for the fixed-dimension variants. Training
    /// overwrites it with the value actually used after clamping.
    pub dc: usize,
    /// Cumulative variance threshold for the threshold variants.
    pub threshold: f64,
    /// Pooled noise term, set by training.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub noise: Option<NoiseTerm>,
    pub classes: Vec<ClassParameters>,
}

impl Pgpda {
    pub fn new(variant: PgpdaVariant, kernel: Kernel) -> Self {
        Self {
            variant,
            kernel,
            dc: DEFAULT_DIMENSION,
            threshold: DEFAULT_THRESHOLD,
            noise: None,
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
        self.noise.is_some() && !self.classes.is_empty()
    }

    /// Fits the model on `x` with dense 1-based labels `y`.
    pub fn train(&mut self, x: &Samples, y: ArrayView1<usize>) -> Result<(), ClassifierError> {
        let layout = ClassLayout::from_labels(y)?;
        layout.check_samples(x)?;
        let cache = SubspaceCache::compute(x, &layout, &self.kernel)?;
        self.train_from_cache(&layout, &cache)
    }

    /// Fits the model from precomputed class spectra. The kernel recorded in
    /// the cache replaces the model's kernel.
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
        let rule = self.variant.dimension_rule();

        // --- 1. Resolve the subspace dimension rule ---
        let shared_dc = match rule {
            DimensionRule::Threshold => {
                check_threshold(self.threshold)?;
                None
            }
            DimensionRule::Fixed => {
                check_dimension(self.dc)?;
                Some(clamp_dimension(self.dc, &layout.sizes()))
            }
        };

        // --- 2. Truncate every class spectrum ---
        let mut signals: Vec<SignalSubspace> = (0..layout.n_classes())
            .map(|class| {
                let spectrum = cache.spectrum(class);
                let ri = layout.size(class);
                let di = shared_dc.unwrap_or_else(|| {
                    intrinsic_dimension(spectrum.values.view(), self.threshold)
                });
                SignalSubspace::truncate(spectrum, layout, class, ri, di)
            })
            .collect();

        // --- 3. Pool the noise over classes, before any tying ---
        let residual: f64 = signals.iter().map(|sig| sig.prop * sig.residual).sum();
        let dof: f64 = signals
            .iter()
            .map(|sig| sig.prop * sig.ri.saturating_sub(sig.di) as f64)
            .sum();
        let noise = NoiseTerm::estimate(residual, dof);

        // --- 4. Tie the signal variances and build the projections ---
        tie_signal_variances(self.variant.tying(), &mut signals);
        let classes = signals
            .into_iter()
            .map(|sig| ClassParameters {
                projection: projection_matrix(sig.beta.view(), sig.a.view(), noise.ib, sig.ni),
                ni: sig.ni,
                prop: sig.prop,
                ri: sig.ri,
                di: sig.di,
                a: sig.a,
                beta: sig.beta,
                noise: None,
            })
            .collect::<Vec<_>>();

        log::debug!(
            "Trained PGPDA {} with dimensions {:?}, noise variance {:.4e}.",
            self.variant,
            classes.iter().map(|c| c.di).collect::<Vec<_>>(),
            noise.b
        );

        self.kernel = cache.kernel();
        if let Some(dc) = shared_dc {
            self.dc = dc;
        }
        self.noise = Some(noise);
        self.classes = classes;
        Ok(())
    }

    /// Classifies `xt` against the training set (`x`, `y`) the model was
    /// trained on.
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

    /// Raw discriminant scores, one column per class.
    pub(crate) fn decision(
        &self,
        blocks: &[CenteredTestBlock],
    ) -> Result<Array2<f64>, ClassifierError> {
        let noise = self.noise.ok_or(ClassifierError::NotTrained)?;
        let n_test = blocks.first().map_or(0, |b| b.cross.nrows());
        let dmax = self.classes.iter().map(|c| c.di).max().unwrap_or(0);

        let mut decision = Array2::zeros((n_test, self.classes.len()));
        for ((params, block), mut column) in self
            .classes
            .iter()
            .zip(blocks)
            .zip(decision.columns_mut())
        {
            let constant = params.a.mapv(f64::ln).sum()
                + (dmax - params.di) as f64 * noise.b.ln()
                - 2.0 * params.prop.ln();
            column.assign(&quadratic_scores(block, &params.projection, noise.ib, constant));
        }
        Ok(decision)
    }

    /// Grid search over the kernel parameter and the threshold or dimension,
    /// depending on the variant. The winning pair is written back into the
    /// model and any previously trained parameters are discarded.
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
                let cache = SubspaceCache::compute(&train, &layout, &kernel)?;
                let blocks = centered_test_blocks(&test, &train, &layout, &kernel)?;

                Ok(params
                    .iter()
                    .map(|&param| {
                        let mut trial = Pgpda::new(variant, kernel).with_subspace_param(param);
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
        self.noise = None;
        self.classes.clear();
        log::info!(
            "PGPDA {} cross-validation selected kernel parameter {:.4e} and {:?} (error {:.4}).",
            self.variant,
            outcome.kernel_param,
            outcome.secondary,
            outcome.best_error()
        );
        Ok(outcome)
    }

    /// Saves the model to a file in human-readable TOML.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ClassifierError> {
        save_toml(self, path)
    }

    /// Loads a model saved with [`Pgpda::save`].
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ClassifierError> {
        load_toml(path)
    }
}

/// Clamps the shared dimension against every class in turn: a class with
/// fewer than `dc` samples lowers it to `max(ni - 1, 1)`.
fn clamp_dimension(dc: usize, sizes: &[usize]) -> usize {
    sizes.iter().fold(dc, |dc, &ni| {
        if dc > ni {
            let clamped = ni.saturating_sub(1).max(1);
            log::warn!("Subspace dimension {dc} exceeds a class of {ni} samples; using {clamped}.");
            clamped
        } else {
            dc
        }
    })
}
