//! The measurement factors.

use nalgebra::Matrix3;

mod prior;
pub use prior::PriorFactor;

mod between;
pub use between::BetweenFactor;

mod yaw;
pub use yaw::YawFactor;

mod accel;
pub use accel::AccelFactor;

mod apriltag;
pub use apriltag::AprilTagFactor;

mod linear_prior;
pub use linear_prior::LinearizedPrior;

/// Derivative of `xyz-theta coordinates of (p compose small-delta)`
/// with respect to the delta, for a pose whose rotation is `theta`:
/// the translation rows rotate with the frame, the angle row is
/// direct.
pub(crate) fn tangent_block(theta: f64) -> Matrix3<f64> {
    let (s, c) = theta.sin_cos();
    Matrix3::new(c, -s, 0.0, s, c, 0.0, 0.0, 0.0, 1.0)
}
