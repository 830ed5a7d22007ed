use nalgebra::{DMatrix, DVector};

use field_geom::Pose2;

use crate::factors::tangent_block;
use crate::{DiagonalNoise, Factor, Values};

/// Gaussian prior left behind by marginalisation.
///
/// The information that marginalised states carried about the
/// surviving boundary states, expressed as an already-whitened linear
/// factor about the linearisation points: the residual is
/// `R * stack(local(lin_i, x_i)) + u` with `R^T R` the marginal
/// information matrix.
pub struct LinearizedPrior {
    keys: Vec<i64>,
    lin_points: Vec<Pose2>,
    sqrt_info: DMatrix<f64>,
    offset: DVector<f64>,
    noise: DiagonalNoise,
}

impl LinearizedPrior {
    pub fn new(
        keys: Vec<i64>,
        lin_points: Vec<Pose2>,
        sqrt_info: DMatrix<f64>,
        offset: DVector<f64>,
    ) -> Self {
        assert_eq!(keys.len(), lin_points.len());
        assert_eq!(sqrt_info.ncols(), 3 * keys.len());
        assert_eq!(sqrt_info.nrows(), offset.len());
        let dim = sqrt_info.nrows();
        Self {
            keys,
            lin_points,
            sqrt_info,
            offset,
            noise: DiagonalNoise::unit(dim),
        }
    }

    fn stacked_local(&self, values: &Values) -> DVector<f64> {
        let mut delta = DVector::zeros(3 * self.keys.len());
        for (i, (&key, lin)) in self.keys.iter().zip(self.lin_points.iter()).enumerate() {
            let d = lin.local(&values.pose(key));
            delta[3 * i] = d[0];
            delta[3 * i + 1] = d[1];
            delta[3 * i + 2] = d[2];
        }
        delta
    }
}

impl Factor for LinearizedPrior {
    fn keys(&self) -> &[i64] {
        &self.keys
    }

    fn dim(&self) -> usize {
        self.sqrt_info.nrows()
    }

    fn noise(&self) -> &DiagonalNoise {
        &self.noise
    }

    fn error(&self, values: &Values) -> DVector<f64> {
        &self.sqrt_info * self.stacked_local(values) + &self.offset
    }

    fn jacobians(&self, values: &Values) -> Vec<DMatrix<f64>> {
        let mut out = Vec::with_capacity(self.keys.len());
        for (i, (&key, lin)) in self.keys.iter().zip(self.lin_points.iter()).enumerate() {
            let e = lin.between(&values.pose(key));
            let block = tangent_block(e.theta());
            let cols = self.sqrt_info.columns(3 * i, 3);
            let mut jac = DMatrix::zeros(self.dim(), 3);
            for r in 0..self.dim() {
                for c in 0..3 {
                    let mut acc = 0.0;
                    for k in 0..3 {
                        acc += cols[(r, k)] * block[(k, c)];
                    }
                    jac[(r, c)] = acc;
                }
            }
            out.push(jac);
        }
        out
    }
}
