use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

/// Wrap an angle to the half-open interval `[-pi, pi)`.
pub fn wrap_angle(a: f64) -> f64 {
    use std::f64::consts::{PI, TAU};
    (a + PI).rem_euclid(TAU) - PI
}

/// A body-frame planar displacement `(dx, dy, dtheta)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Twist2 {
    pub dx: f64,
    pub dy: f64,
    pub dtheta: f64,
}

impl Twist2 {
    pub fn new(dx: f64, dy: f64, dtheta: f64) -> Self {
        Self { dx, dy, dtheta }
    }

    pub fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }
}

/// An SE(2) pose in the WPI field frame.
///
/// `retract`/`local` operate in the canonical `(dx, dy, dtheta)`
/// tangent: `retract(p, d)` composes `p` with the small pose built
/// directly from `d`, and `local(a, b)` reads the coordinates of
/// `a.between(b)`. The two are exact inverses of each other, which is
/// what the optimizer relies on. The true exponential map lives in
/// [`Pose2::exp`] and is used for twist integration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose2 {
    x: f64,
    y: f64,
    theta: f64,
}

impl Pose2 {
    pub fn new(x: f64, y: f64, theta: f64) -> Self {
        Self {
            x,
            y,
            theta: wrap_angle(theta),
        }
    }

    pub fn identity() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    pub fn x(&self) -> f64 {
        self.x
    }

    pub fn y(&self) -> f64 {
        self.y
    }

    pub fn theta(&self) -> f64 {
        self.theta
    }

    /// `self * other`: interpret `other` in the frame of `self`.
    pub fn compose(&self, other: &Pose2) -> Pose2 {
        let (s, c) = self.theta.sin_cos();
        Pose2::new(
            self.x + c * other.x - s * other.y,
            self.y + s * other.x + c * other.y,
            self.theta + other.theta,
        )
    }

    pub fn inverse(&self) -> Pose2 {
        let (s, c) = self.theta.sin_cos();
        Pose2::new(-(c * self.x + s * self.y), s * self.x - c * self.y, -self.theta)
    }

    /// `self^-1 * other`: the pose of `other` seen from `self`.
    pub fn between(&self, other: &Pose2) -> Pose2 {
        self.inverse().compose(other)
    }

    /// First-order retraction in the canonical tangent.
    pub fn retract(&self, delta: &Vector3<f64>) -> Pose2 {
        self.compose(&Pose2::new(delta[0], delta[1], delta[2]))
    }

    /// Inverse of [`Pose2::retract`]: the tangent that carries `self`
    /// onto `other`.
    pub fn local(&self, other: &Pose2) -> Vector3<f64> {
        let d = self.between(other);
        Vector3::new(d.x, d.y, d.theta)
    }

    /// SE(2) exponential map of a body twist.
    pub fn exp(twist: &Twist2) -> Pose2 {
        let w = twist.dtheta;
        let (s, c) = if w.abs() < 1e-9 {
            // Small-angle limit of sin(w)/w and (1-cos(w))/w.
            (1.0 - w * w / 6.0, w / 2.0 - w * w * w / 24.0)
        } else {
            (w.sin() / w, (1.0 - w.cos()) / w)
        };
        Pose2::new(twist.dx * s - twist.dy * c, twist.dx * c + twist.dy * s, w)
    }

    /// SE(2) logarithm: the body twist whose exponential is `self`.
    pub fn log(&self) -> Twist2 {
        let w = self.theta;
        let (a, b) = if w.abs() < 1e-9 {
            (1.0 - w * w / 6.0, w / 2.0)
        } else {
            (w.sin() / w, (1.0 - w.cos()) / w)
        };
        // Invert the 2x2 V matrix of the exponential.
        let det = a * a + b * b;
        Twist2::new(
            (a * self.x + b * self.y) / det,
            (-b * self.x + a * self.y) / det,
            w,
        )
    }

    /// Adjoint map carrying tangent vectors between frames:
    /// `Ad(T) * xi_b = xi_a` for `T = a^-1 * b`.
    pub fn adjoint(&self) -> Matrix3<f64> {
        let (s, c) = self.theta.sin_cos();
        Matrix3::new(c, -s, self.y, s, c, -self.x, 0.0, 0.0, 1.0)
    }

    /// Embed into SE(3): z = 0, roll = pitch = 0.
    pub fn to_isometry3(&self) -> nalgebra::Isometry3<f64> {
        nalgebra::Isometry3::from_parts(
            nalgebra::Translation3::new(self.x, self.y, 0.0),
            nalgebra::UnitQuaternion::from_axis_angle(&nalgebra::Vector3::z_axis(), self.theta),
        )
    }
}
