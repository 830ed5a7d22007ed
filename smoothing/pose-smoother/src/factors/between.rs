use nalgebra::{DMatrix, DVector};

use field_geom::Pose2;

use crate::factors::tangent_block;
use crate::{DiagonalNoise, Factor, Values};

/// Relative-pose factor between two states: the measurement is the
/// pose of `k1` seen from `k0`.
///
/// Odometry uses the full swerve pose delta; the gyro variant passes
/// `(0, 0, dtheta)` with effectively-infinite translation sigmas so
/// only the heading row binds.
#[derive(Debug, Clone)]
pub struct BetweenFactor {
    keys: [i64; 2],
    measured: Pose2,
    noise: DiagonalNoise,
}

impl BetweenFactor {
    pub fn new(k0: i64, k1: i64, measured: Pose2, noise: DiagonalNoise) -> Self {
        assert_eq!(noise.dim(), 3);
        assert_ne!(k0, k1, "between factor needs two distinct states");
        Self {
            keys: [k0, k1],
            measured,
            noise,
        }
    }
}

impl Factor for BetweenFactor {
    fn keys(&self) -> &[i64] {
        &self.keys
    }

    fn dim(&self) -> usize {
        3
    }

    fn noise(&self) -> &DiagonalNoise {
        &self.noise
    }

    fn error(&self, values: &Values) -> DVector<f64> {
        let d = values.pose(self.keys[0]).between(&values.pose(self.keys[1]));
        let e = self.measured.local(&d);
        DVector::from_column_slice(e.as_slice())
    }

    fn jacobians(&self, values: &Values) -> Vec<DMatrix<f64>> {
        let x0 = values.pose(self.keys[0]);
        let x1 = values.pose(self.keys[1]);
        let d = x0.between(&x1);
        let e = self.measured.between(&d);
        let block = tangent_block(e.theta());
        // A perturbation of x0 enters through the conjugation
        // d^-1 dx0 d, which is the adjoint of d^-1.
        let j0 = -block * d.inverse().adjoint();
        let j1 = block;
        vec![
            DMatrix::from_fn(3, 3, |r, c| j0[(r, c)]),
            DMatrix::from_fn(3, 3, |r, c| j1[(r, c)]),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::numerical_jacobians;
    use approx::assert_relative_eq;

    fn noise() -> DiagonalNoise {
        DiagonalNoise::from_sigmas(&[0.02, 0.02, 0.01])
    }

    #[test]
    fn zero_error_at_measurement() {
        let x0 = Pose2::new(1.0, 0.5, 0.3);
        let delta = Pose2::new(0.1, 0.02, 0.05);
        let x1 = x0.compose(&delta);
        let f = BetweenFactor::new(0, 1, delta, noise());
        let mut v = Values::new();
        v.insert(0, x0);
        v.insert(1, x1);
        assert!(f.error(&v).norm() < 1e-12);
    }

    #[test]
    fn analytic_matches_numerical() {
        let f = BetweenFactor::new(0, 1, Pose2::new(0.1, 0.0, 0.02), noise());
        let mut v = Values::new();
        v.insert(0, Pose2::new(1.0, -0.5, 0.7));
        v.insert(1, Pose2::new(1.2, -0.4, 0.9));
        let analytic = f.jacobians(&v);
        let numerical = numerical_jacobians(&f, &v);
        assert_relative_eq!(analytic[0], numerical[0], epsilon = 1e-6);
        assert_relative_eq!(analytic[1], numerical[1], epsilon = 1e-6);
    }
}
