#![deny(dead_code)]
#![deny(unused_imports)]

//! Kernel generative discriminant classifiers.
//!
//! * [`pgpda`]: parsimonious Gaussian process discriminant analysis with a
//!   shared noise term (variants `M0`..`M6`).
//! * [`npgpda`]: the same model with class-specific noise (`NM0`..`NM4`).
//! * [`kda`]: kernel quadratic discriminant analysis.
//!
//! All three share the kernel provider in [`kernel`], the prediction
//! conventions in [`model`] and the grid search in [`crossval`].

pub mod config;
pub mod crossval;
pub mod folds;
pub mod kda;
pub mod kernel;
pub mod model;
pub mod npgpda;
pub mod numeric;
pub mod pgpda;
pub mod preprocess;
pub mod spectrum;
pub mod subspace;

pub use config::{Classifier, ClassifierConfig, Selection};
pub use kda::Kda;
pub use kernel::{Kernel, KernelType, Samples};
pub use model::{ClassifierError, PredictOutput, Prediction};
pub use npgpda::{Npgpda, NpgpdaVariant};
pub use pgpda::{Pgpda, PgpdaVariant};
