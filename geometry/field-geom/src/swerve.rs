use nalgebra::{Matrix3, OMatrix, Point2, U3, U8};
use serde::{Deserialize, Serialize};

use crate::{GeomError, Pose2, Result, Twist2};

/// One swerve module: accumulated wheel distance and steering angle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SwerveModulePosition {
    pub distance_m: f64,
    pub angle_rad: f64,
}

impl SwerveModulePosition {
    pub fn new(distance_m: f64, angle_rad: f64) -> Self {
        Self {
            distance_m,
            angle_rad,
        }
    }
}

/// The four module positions at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SwerveModulePositions {
    pub front_left: SwerveModulePosition,
    pub front_right: SwerveModulePosition,
    pub rear_left: SwerveModulePosition,
    pub rear_right: SwerveModulePosition,
}

impl SwerveModulePositions {
    pub fn as_array(&self) -> [SwerveModulePosition; 4] {
        [
            self.front_left,
            self.front_right,
            self.rear_left,
            self.rear_right,
        ]
    }
}

/// Forward kinematics for a four-module swerve drive.
///
/// The body twist is recovered from the stacked module constraint
/// rows by least squares: each module at `(x_i, y_i)` observes the
/// displacement `[dx - dtheta * y_i, dy + dtheta * x_i]`.
#[derive(Debug, Clone)]
pub struct SwerveKinematics {
    locations: [Point2<f64>; 4],
    // Precomputed (A^T A)^-1 A^T for the constant 8x3 constraint matrix.
    pinv: OMatrix<f64, U3, U8>,
}

impl SwerveKinematics {
    pub fn new(locations: [Point2<f64>; 4]) -> Result<Self> {
        let mut a = OMatrix::<f64, U8, U3>::zeros();
        for (i, loc) in locations.iter().enumerate() {
            a[(2 * i, 0)] = 1.0;
            a[(2 * i, 2)] = -loc.y;
            a[(2 * i + 1, 1)] = 1.0;
            a[(2 * i + 1, 2)] = loc.x;
        }
        let ata: Matrix3<f64> = a.transpose() * a;
        let ata_inv = ata
            .try_inverse()
            .ok_or(GeomError::DegenerateKinematics)?;
        let pinv = ata_inv * a.transpose();
        Ok(Self { locations, pinv })
    }

    /// Modules at the corners of a `track_width` x `wheel_base`
    /// rectangle centered on the robot origin.
    pub fn rectangular(track_width_m: f64, wheel_base_m: f64) -> Result<Self> {
        let hx = wheel_base_m / 2.0;
        let hy = track_width_m / 2.0;
        Self::new([
            Point2::new(hx, hy),
            Point2::new(hx, -hy),
            Point2::new(-hx, hy),
            Point2::new(-hx, -hy),
        ])
    }

    pub fn locations(&self) -> &[Point2<f64>; 4] {
        &self.locations
    }

    /// The body twist implied by the module motion between two
    /// position snapshots. Each module contributes the chord
    /// `delta_distance` along its end-snapshot steering angle.
    pub fn twist_between(
        &self,
        start: &SwerveModulePositions,
        end: &SwerveModulePositions,
    ) -> Twist2 {
        let mut b = OMatrix::<f64, U8, nalgebra::U1>::zeros();
        for (i, (s, e)) in start
            .as_array()
            .iter()
            .zip(end.as_array().iter())
            .enumerate()
        {
            let dd = e.distance_m - s.distance_m;
            b[2 * i] = dd * e.angle_rad.cos();
            b[2 * i + 1] = dd * e.angle_rad.sin();
        }
        let x = self.pinv * b;
        Twist2::new(x[0], x[1], x[2])
    }

    /// The SE(2) pose delta between two snapshots.
    pub fn pose_delta(&self, start: &SwerveModulePositions, end: &SwerveModulePositions) -> Pose2 {
        Pose2::exp(&self.twist_between(start, end))
    }
}
