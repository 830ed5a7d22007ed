use nalgebra::{DVector, Point2, Point3};

use field_geom::CameraCalibration;

use crate::{DiagonalNoise, Factor, Values};

/// Bearing-only tag observation: one observed pixel constrains the
/// robot pose at one instant, given the fixed landmark world
/// position, camera mount and calibration.
///
/// The residual is `observed - project(world -> robot -> camera)`,
/// distortion included, so raw detector pixels can be used directly.
/// The 2x3 Jacobian is numerical.
///
/// This factor has a mirror-image local minimum; the caller must
/// warm-start new states from the previous estimate rather than the
/// origin.
pub struct AprilTagFactor {
    keys: [i64; 1],
    landmark: Point3<f64>,
    observed: Point2<f64>,
    calib: CameraCalibration,
    noise: DiagonalNoise,
}

impl AprilTagFactor {
    pub fn new(
        key: i64,
        landmark: Point3<f64>,
        observed: Point2<f64>,
        calib: CameraCalibration,
        pixel_sigma: f64,
    ) -> Self {
        Self {
            keys: [key],
            landmark,
            observed,
            calib,
            noise: DiagonalNoise::from_sigmas(&[pixel_sigma, pixel_sigma]),
        }
    }
}

impl Factor for AprilTagFactor {
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
        let pose = values.pose(self.keys[0]);
        match self.calib.project_world_point(&pose, &self.landmark) {
            Some(predicted) => DVector::from_column_slice(&[
                self.observed.x - predicted.x,
                self.observed.y - predicted.y,
            ]),
            // Landmark behind the image plane at this estimate: the
            // factor goes inert rather than injecting garbage.
            None => DVector::zeros(2),
        }
    }
}
