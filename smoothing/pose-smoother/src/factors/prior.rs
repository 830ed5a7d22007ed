use nalgebra::{DMatrix, DVector};

use field_geom::Pose2;

use crate::factors::tangent_block;
use crate::{DiagonalNoise, Factor, Values};

/// Unary factor pinning one state to a measured pose.
#[derive(Debug, Clone)]
pub struct PriorFactor {
    keys: [i64; 1],
    prior: Pose2,
    noise: DiagonalNoise,
}

impl PriorFactor {
    pub fn new(key: i64, prior: Pose2, noise: DiagonalNoise) -> Self {
        assert_eq!(noise.dim(), 3);
        Self {
            keys: [key],
            prior,
            noise,
        }
    }
}

impl Factor for PriorFactor {
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
        let e = self.prior.local(&values.pose(self.keys[0]));
        DVector::from_column_slice(e.as_slice())
    }

    fn jacobians(&self, values: &Values) -> Vec<DMatrix<f64>> {
        let e = self.prior.between(&values.pose(self.keys[0]));
        let block = tangent_block(e.theta());
        vec![DMatrix::from_fn(3, 3, |r, c| block[(r, c)])]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::numerical_jacobians;
    use approx::assert_relative_eq;

    #[test]
    fn zero_error_at_prior() {
        let prior = Pose2::new(1.0, 2.0, 0.5);
        let f = PriorFactor::new(0, prior, DiagonalNoise::from_sigmas(&[0.3, 0.3, 0.1]));
        let mut v = Values::new();
        v.insert(0, prior);
        assert!(f.error(&v).norm() < 1e-12);
    }

    #[test]
    fn analytic_matches_numerical() {
        let f = PriorFactor::new(
            0,
            Pose2::new(1.0, 2.0, 0.5),
            DiagonalNoise::from_sigmas(&[0.3, 0.3, 0.1]),
        );
        let mut v = Values::new();
        v.insert(0, Pose2::new(1.2, 1.9, 0.8));
        let analytic = f.jacobians(&v);
        let numerical = numerical_jacobians(&f, &v);
        assert_relative_eq!(analytic[0], numerical[0], epsilon = 1e-6);
    }
}
