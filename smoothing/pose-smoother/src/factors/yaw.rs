use nalgebra::{DMatrix, DVector};

use field_geom::wrap_angle;

use crate::{DiagonalNoise, Factor, Values};

/// Unary heading factor: pins the yaw of one state.
///
/// This is the degenerate form of the gyro delta when both
/// timestamps coincide (a single state observing the integrated
/// yaw).
#[derive(Debug, Clone)]
pub struct YawFactor {
    keys: [i64; 1],
    yaw_rad: f64,
    noise: DiagonalNoise,
}

impl YawFactor {
    pub fn new(key: i64, yaw_rad: f64, sigma_rad: f64) -> Self {
        Self {
            keys: [key],
            yaw_rad,
            noise: DiagonalNoise::from_sigmas(&[sigma_rad]),
        }
    }
}

impl Factor for YawFactor {
    fn keys(&self) -> &[i64] {
        &self.keys
    }

    fn dim(&self) -> usize {
        1
    }

    fn noise(&self) -> &DiagonalNoise {
        &self.noise
    }

    fn error(&self, values: &Values) -> DVector<f64> {
        let theta = values.pose(self.keys[0]).theta();
        DVector::from_column_slice(&[wrap_angle(theta - self.yaw_rad)])
    }

    fn jacobians(&self, _values: &Values) -> Vec<DMatrix<f64>> {
        vec![DMatrix::from_row_slice(1, 3, &[0.0, 0.0, 1.0])]
    }
}
