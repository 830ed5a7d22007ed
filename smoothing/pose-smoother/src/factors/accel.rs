use nalgebra::{DVector, Vector2};

use crate::{DiagonalNoise, Factor, Values};

/// Ternary accelerometer factor over three consecutive states.
///
/// For equal steps the second difference of position equals
/// `a * dt^2`; the residual compares body-frame displacements:
/// `(p2 - p1) - (p1 - p0) - a * dt^2`, with the displacements read in
/// the frame of the middle state. Jacobians are numerical; there is
/// no useful closed form over three chained poses.
///
/// Alone this factor is indeterminate (it measures curvature, not
/// position); it needs priors or other factors to anchor the states.
#[derive(Debug, Clone)]
pub struct AccelFactor {
    keys: [i64; 3],
    accel: Vector2<f64>,
    dt_s: f64,
    noise: DiagonalNoise,
}

impl AccelFactor {
    pub fn new(t0_us: i64, t1_us: i64, t2_us: i64, ax: f64, ay: f64, sigma: f64) -> Self {
        Self {
            keys: [t0_us, t1_us, t2_us],
            accel: Vector2::new(ax, ay),
            dt_s: (t2_us - t1_us) as f64 / 1e6,
            noise: DiagonalNoise::from_sigmas(&[sigma, sigma]),
        }
    }
}

impl Factor for AccelFactor {
    fn keys(&self) -> &[i64] {
        &self.keys
    }

    fn dim(&self) -> usize {
        2
    }

    fn noise(&self) -> &DiagonalNoise {
        &self.noise
    }

    fn error(&self, values: &Values) -> DVector<f64> {
        let p0 = values.pose(self.keys[0]);
        let p1 = values.pose(self.keys[1]);
        let p2 = values.pose(self.keys[2]);
        let d12 = p1.local(&p2);
        let d01 = p0.local(&p1);
        let expected = self.accel * (self.dt_s * self.dt_s);
        DVector::from_column_slice(&[
            d12[0] - d01[0] - expected[0],
            d12[1] - d01[1] - expected[1],
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use field_geom::Pose2;

    #[test]
    fn zero_error_on_uniform_acceleration() {
        // x(t) = a t^2 / 2 sampled at 20 ms steps.
        let a = 1.0;
        let dt = 0.02;
        let x = |i: f64| 0.5 * a * (i * dt) * (i * dt);
        let mut v = Values::new();
        v.insert(0, Pose2::new(x(0.0), 0.0, 0.0));
        v.insert(20_000, Pose2::new(x(1.0), 0.0, 0.0));
        v.insert(40_000, Pose2::new(x(2.0), 0.0, 0.0));
        let f = AccelFactor::new(0, 20_000, 40_000, a, 0.0, 0.1);
        assert!(f.error(&v).norm() < 1e-12);
    }

    #[test]
    fn numerical_jacobians_have_expected_structure() {
        let mut v = Values::new();
        v.insert(0, Pose2::new(0.0, 0.0, 0.0));
        v.insert(20_000, Pose2::new(0.1, 0.0, 0.0));
        v.insert(40_000, Pose2::new(0.25, 0.0, 0.0));
        let f = AccelFactor::new(0, 20_000, 40_000, 1.0, 0.0, 0.1);
        let jacs = f.jacobians(&v);
        assert_eq!(jacs.len(), 3);
        // The middle state appears in both displacements, so its
        // x-column carries opposite contributions from each.
        assert!(jacs[1][(0, 0)].abs() > 1.0);
        // p0 only shifts the first displacement.
        assert!((jacs[0][(0, 0)] - 1.0).abs() < 1e-3);
    }
}
