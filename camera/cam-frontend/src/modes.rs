use field_geom::CameraCalibration;
use nalgebra::{Isometry3, Vector5};
use opencv_ros_camera::{Distortion, RosOpenCvIntrinsics};

use crate::{CamError, Result};

/// Supported sensor models, keyed by the driver's model id string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorModel {
    /// Camera Module 3 Wide.
    Imx708Wide,
    /// Camera Module 2.
    Imx219,
    /// Global Shutter camera.
    Imx296,
}

/// Resolutions for one sensor model: the full (2x2 binned) sensor
/// mode that selects the widest field of view, and the working
/// detection resolution trading speed against range.
#[derive(Debug, Clone, Copy)]
pub struct SensorMode {
    pub full_width: usize,
    pub full_height: usize,
    pub width: usize,
    pub height: usize,
}

impl SensorModel {
    pub fn from_model_id(model: &str) -> Result<SensorModel> {
        match model {
            "imx708_wide" => Ok(SensorModel::Imx708Wide),
            "imx219" => Ok(SensorModel::Imx219),
            "imx296" => Ok(SensorModel::Imx296),
            other => Err(CamError::UnknownModel {
                model: other.to_string(),
            }),
        }
    }

    pub fn mode(&self) -> SensorMode {
        match self {
            SensorModel::Imx708Wide => SensorMode {
                full_width: 2304,
                full_height: 1296,
                width: 1152,
                height: 648,
            },
            SensorModel::Imx219 => SensorMode {
                // Slightly larger than the detector, to match stride.
                full_width: 1664,
                full_height: 1232,
                width: 832,
                height: 616,
            },
            SensorModel::Imx296 => SensorMode {
                full_width: 1408,
                full_height: 1088,
                width: 1408,
                height: 1088,
            },
        }
    }

    /// Measured intrinsics at the working resolution.
    pub fn intrinsics(&self) -> RosOpenCvIntrinsics<f64> {
        let (fx, fy, cx, cy, k1, k2) = match self {
            SensorModel::Imx708Wide => (498.0, 498.0, 584.0, 316.0, 0.01, -0.0365),
            SensorModel::Imx219 => (660.0, 660.0, 426.0, 303.0, -0.003, 0.04),
            // TODO: measure distortion for the global shutter camera.
            SensorModel::Imx296 => (1680.0, 1680.0, 728.0, 544.0, 0.0, 0.0),
        };
        let distortion = Distortion::from_opencv_vec(Vector5::new(k1, k2, 0.0, 0.0, 0.0));
        RosOpenCvIntrinsics::from_params_with_distortion(fx, 0.0, fy, cx, cy, distortion)
    }

    /// The full calibration for a camera of this model mounted at
    /// `camera_pose` (optical frame in robot coordinates).
    pub fn calibration(&self, camera_pose: Isometry3<f64>) -> CameraCalibration {
        let mode = self.mode();
        CameraCalibration::new(self.intrinsics(), camera_pose, mode.width, mode.height)
    }
}
