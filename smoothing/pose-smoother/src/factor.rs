use nalgebra::{DMatrix, DVector, Vector3};

use crate::{DiagonalNoise, Values};

/// One measurement constraint over one, two or three state keys.
///
/// Factors are pure: evaluation never mutates anything, so they are
/// re-entrant under read-only access to the smoother. `error` is the
/// unwhitened residual; `jacobians` returns one `dim x 3` block per
/// key, taken in the retract tangent of that key. The default
/// implementation differentiates numerically; factors with cheap
/// closed forms override it.
pub trait Factor: Send + Sync {
    fn keys(&self) -> &[i64];
    fn dim(&self) -> usize;
    fn noise(&self) -> &DiagonalNoise;
    fn error(&self, values: &Values) -> DVector<f64>;

    fn jacobians(&self, values: &Values) -> Vec<DMatrix<f64>> {
        numerical_jacobians(self, values)
    }
}

/// Step for symmetric numerical differentiation on the SE(2) tangent.
pub(crate) const NUMERICAL_DELTA: f64 = 1e-5;

/// Symmetric-difference Jacobians on each key's retract tangent.
pub fn numerical_jacobians<F: Factor + ?Sized>(factor: &F, values: &Values) -> Vec<DMatrix<f64>> {
    let mut out = Vec::with_capacity(factor.keys().len());
    for &key in factor.keys() {
        let base = values.pose(key);
        let mut jac = DMatrix::zeros(factor.dim(), 3);
        for j in 0..3 {
            let mut dv = Vector3::zeros();
            dv[j] = NUMERICAL_DELTA;
            let mut perturbed = values.clone();
            perturbed.insert(key, base.retract(&dv));
            let e_plus = factor.error(&perturbed);
            dv[j] = -NUMERICAL_DELTA;
            perturbed.insert(key, base.retract(&dv));
            let e_minus = factor.error(&perturbed);
            let col = (e_plus - e_minus) / (2.0 * NUMERICAL_DELTA);
            jac.set_column(j, &col);
        }
        out.push(jac);
    }
    out
}
