use nalgebra::{DMatrix, DVector};

/// Diagonal Gaussian noise model given as per-row sigmas.
///
/// An effectively-infinite sigma (e.g. 1e6) leaves that residual row
/// unconstrained; the gyro between factor uses this for its
/// translation rows.
#[derive(Debug, Clone)]
pub struct DiagonalNoise {
    sigmas: DVector<f64>,
}

impl DiagonalNoise {
    pub fn from_sigmas(sigmas: &[f64]) -> Self {
        assert!(
            sigmas.iter().all(|s| *s > 0.0),
            "noise sigmas must be positive"
        );
        Self {
            sigmas: DVector::from_row_slice(sigmas),
        }
    }

    /// Unit noise: residuals are already whitened.
    pub fn unit(dim: usize) -> Self {
        Self {
            sigmas: DVector::from_element(dim, 1.0),
        }
    }

    pub fn dim(&self) -> usize {
        self.sigmas.len()
    }

    pub fn whiten_vec(&self, r: &DVector<f64>) -> DVector<f64> {
        let mut out = r.clone();
        for i in 0..out.len() {
            out[i] /= self.sigmas[i];
        }
        out
    }

    pub fn whiten_mat(&self, j: &DMatrix<f64>) -> DMatrix<f64> {
        let mut out = j.clone();
        for i in 0..out.nrows() {
            for c in 0..out.ncols() {
                out[(i, c)] /= self.sigmas[i];
            }
        }
        out
    }

    /// Squared Mahalanobis norm of a residual.
    pub fn chi2(&self, r: &DVector<f64>) -> f64 {
        self.whiten_vec(r).norm_squared()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whitening() {
        let noise = DiagonalNoise::from_sigmas(&[0.5, 2.0]);
        let r = DVector::from_row_slice(&[1.0, 1.0]);
        let w = noise.whiten_vec(&r);
        assert_eq!(w[0], 2.0);
        assert_eq!(w[1], 0.5);
        assert_eq!(noise.chi2(&r), 4.25);
    }

    #[test]
    #[should_panic]
    fn zero_sigma_rejected() {
        let _ = DiagonalNoise::from_sigmas(&[0.0, 1.0]);
    }
}
