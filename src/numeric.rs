//! Machine-epsilon guards shared by every division site in the classifiers.
//!
//! Eigenvalues, noise variances and their reciprocals all pass through the
//! helpers below, so a single degeneracy policy applies everywhere.

use serde::{Deserialize, Serialize};

/// Double precision machine epsilon, the floor used for every variance.
pub const EPS: f64 = f64::EPSILON;

/// Raises `value` to `EPS` when it falls below it.
#[inline]
pub fn floor_eps(value: f64) -> f64 {
    if value < EPS { EPS } else { value }
}

/// Divides `numerator` by `denominator`, flooring the denominator at `EPS`.
#[inline]
pub fn safe_div(numerator: f64, denominator: f64) -> f64 {
    numerator / floor_eps(denominator)
}

/// A noise variance `b` paired with its precision `ib`.
///
/// `ib` is not always `1 / b`: when the degrees of freedom vanish the
/// precision collapses to `EPS` so the isotropic part of the decision rule
/// switches off.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NoiseTerm {
    pub b: f64,
    pub ib: f64,
}

impl NoiseTerm {
    /// Estimates the noise variance from a residual spectrum mass and the
    /// number of degrees of freedom it is spread over.
    pub fn estimate(residual: f64, dof: f64) -> Self {
        if dof < EPS {
            log::warn!(
                "Noise degrees of freedom {dof:.3e} below epsilon; precision set to epsilon."
            );
            Self {
                b: floor_eps(residual) / EPS,
                ib: EPS,
            }
        } else if residual < EPS {
            log::warn!("Residual noise mass {residual:.3e} below epsilon; variance floored.");
            Self {
                b: EPS,
                ib: 1.0 / EPS,
            }
        } else {
            Self {
                b: residual / dof,
                ib: dof / residual,
            }
        }
    }
}
