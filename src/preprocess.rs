//! Column-wise feature scaling fitted on a training set and applied to any
//! later sample set with the same number of features.

use crate::model::ClassifierError;
use ndarray::{Array1, Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

/// Standard deviations at or below this value are treated as zero.
const MIN_SCALE: f64 = 1e-9;

/// Centers every column on its training mean and divides by its training
/// standard deviation (population form). Constant columns keep a unit scale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Standardizer {
    pub mean: Array1<f64>,
    pub scale: Array1<f64>,
}

impl Standardizer {
    pub fn fit(x: ArrayView2<f64>) -> Result<Self, ClassifierError> {
        let mean = x.mean_axis(Axis(0)).ok_or(ClassifierError::NoSamples)?;
        let scale = x
            .std_axis(Axis(0), 0.0)
            .mapv(|s| if s.is_finite() && s > MIN_SCALE { s } else { 1.0 });
        Ok(Self { mean, scale })
    }

    pub fn transform(&self, x: ArrayView2<f64>) -> Result<Array2<f64>, ClassifierError> {
        check_features(self.mean.len(), x)?;
        Ok((&x - &self.mean) / &self.scale)
    }

    pub fn inverse_transform(&self, x: ArrayView2<f64>) -> Result<Array2<f64>, ClassifierError> {
        check_features(self.mean.len(), x)?;
        Ok(&x * &self.scale + &self.mean)
    }
}

/// Maps every column linearly onto `[-1, 1]` using its training minimum and
/// maximum. A constant column maps to `-1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinMaxScaler {
    pub min: Array1<f64>,
    pub max: Array1<f64>,
}

impl MinMaxScaler {
    pub fn fit(x: ArrayView2<f64>) -> Result<Self, ClassifierError> {
        if x.nrows() == 0 {
            return Err(ClassifierError::NoSamples);
        }
        let min = x.fold_axis(Axis(0), f64::INFINITY, |acc, &v| acc.min(v));
        let max = x.fold_axis(Axis(0), f64::NEG_INFINITY, |acc, &v| acc.max(v));
        Ok(Self { min, max })
    }

    fn span(&self) -> Array1<f64> {
        (&self.max - &self.min).mapv(|r| if r > 0.0 { r } else { 1.0 })
    }

    pub fn transform(&self, x: ArrayView2<f64>) -> Result<Array2<f64>, ClassifierError> {
        check_features(self.min.len(), x)?;
        Ok((&x - &self.min) / &self.span() * 2.0 - 1.0)
    }

    pub fn inverse_transform(&self, x: ArrayView2<f64>) -> Result<Array2<f64>, ClassifierError> {
        check_features(self.min.len(), x)?;
        Ok((&x + 1.0) / 2.0 * &self.span() + &self.min)
    }
}

fn check_features(expected: usize, x: ArrayView2<f64>) -> Result<(), ClassifierError> {
    if x.ncols() != expected {
        return Err(ClassifierError::FeatureMismatch {
            expected,
            found: x.ncols(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn standardized_columns_have_zero_mean_and_unit_variance() {
        let x = array![[1.0, 5.0, 2.0], [3.0, 5.0, 4.0], [5.0, 5.0, 9.0]];
        let standardizer = Standardizer::fit(x.view()).unwrap();
        assert_eq!(standardizer.scale[1], 1.0);

        let z = standardizer.transform(x.view()).unwrap();
        for (j, column) in z.columns().into_iter().enumerate() {
            assert_abs_diff_eq!(column.sum(), 0.0, epsilon = 1e-12);
            if j != 1 {
                assert_abs_diff_eq!(column.std(0.0), 1.0, epsilon = 1e-12);
            }
        }

        let back = standardizer.inverse_transform(z.view()).unwrap();
        for (a, b) in back.iter().zip(x.iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-12);
        }
    }

    #[test]
    fn min_max_scaling_spans_minus_one_to_one() {
        let x = array![[0.0, 2.0], [5.0, 2.0], [10.0, 2.0]];
        let scaler = MinMaxScaler::fit(x.view()).unwrap();
        let z = scaler.transform(x.view()).unwrap();
        assert_abs_diff_eq!(z[[0, 0]], -1.0);
        assert_abs_diff_eq!(z[[1, 0]], 0.0);
        assert_abs_diff_eq!(z[[2, 0]], 1.0);
        assert!(z.column(1).iter().all(|&v| v == -1.0));

        let back = scaler.inverse_transform(z.view()).unwrap();
        for (a, b) in back.iter().zip(x.iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-12);
        }
    }

    #[test]
    fn feature_count_must_match() {
        let scaler = MinMaxScaler::fit(array![[0.0, 1.0], [1.0, 0.0]].view()).unwrap();
        assert!(matches!(
            scaler.transform(array![[1.0, 2.0, 3.0]].view()),
            Err(ClassifierError::FeatureMismatch { expected: 2, found: 3 })
        ));
        assert!(matches!(
            Standardizer::fit(Array2::<f64>::zeros((0, 2)).view()),
            Err(ClassifierError::NoSamples)
        ));
    }
}
