//! Shared geometry and data model for the fieldpose system.
//!
//! Everything here uses the WPI field frame: x-forward, y-left, theta
//! counter-clockwise-positive. SE(3) transforms appear only at the
//! boundary (camera extrinsics and per-tag detections); the smoother
//! state itself is planar.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum GeomError {
    #[error("wire payload truncated: expected {expected} bytes, got {got}")]
    WireTruncated { expected: usize, got: usize },
    #[error("wire payload size {got} is not a multiple of the {item} element size")]
    WireBadArrayLength { item: &'static str, got: usize },
    #[error("degenerate swerve module layout")]
    DegenerateKinematics,
}

pub type Result<M> = std::result::Result<M, GeomError>;

mod pose2;
pub use crate::pose2::{wrap_angle, Pose2, Twist2};

mod swerve;
pub use crate::swerve::{SwerveKinematics, SwerveModulePosition, SwerveModulePositions};

mod calibration;
pub use crate::calibration::{forward_camera_pose, CameraCalibration};

mod field_map;
pub use crate::field_map::{FieldMap, Landmark};

mod blips;
pub use crate::blips::{Blip24, Blip25, PoseEstimate};

mod identity;
pub use crate::identity::Identity;

pub mod wire;
