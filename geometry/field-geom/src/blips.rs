use nalgebra::{Isometry3, Point2};
use serde::{Deserialize, Serialize};

/// A fiducial observation: tag id and the camera-to-tag SE(3)
/// transform estimated from a single frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Blip24 {
    pub id: i32,
    pub pose: Isometry3<f64>,
}

impl Blip24 {
    pub fn new(id: i32, pose: Isometry3<f64>) -> Self {
        Self { id, pose }
    }
}

/// A raw pixel-level fiducial observation, used upstream of pose
/// estimation by the smoother.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Blip25 {
    pub id: i32,
    pub pixel: Point2<f64>,
    pub cam_id: i32,
}

impl Blip25 {
    pub fn new(id: i32, pixel: Point2<f64>, cam_id: i32) -> Self {
        Self { id, pixel, cam_id }
    }
}

/// The smoother's published planar estimate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PoseEstimate {
    pub x: f64,
    pub y: f64,
    pub theta: f64,
}

impl PoseEstimate {
    pub fn new(x: f64, y: f64, theta: f64) -> Self {
        Self { x, y, theta }
    }
}

impl From<crate::Pose2> for PoseEstimate {
    fn from(p: crate::Pose2) -> Self {
        Self::new(p.x(), p.y(), p.theta())
    }
}
