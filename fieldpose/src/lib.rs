//! Node runtime: wires cameras, gyro, telemetry and the smoother
//! into the running process.
//!
//! Scheduling model: one thread per camera for the
//! capture-detect-emit path, a single-threaded fusion loop owning the
//! smoother, and the bus client delivering subscription samples in
//! the background. Measurements funnel through one lock-guarded
//! mailbox in arrival order and are drained at the head of each
//! fusion tick.

use std::sync::Arc;

use field_geom::{CameraCalibration, SwerveModulePositions};
use nalgebra::Point2;

mod mailbox;
pub use crate::mailbox::Mailbox;

mod shutdown;
pub use crate::shutdown::Shutdown;

mod runtime;
pub use crate::runtime::{
    spawn_camera_worker, spawn_gyro_worker, spawn_piece_worker, FusionLoop, VisionPublisher,
};

mod logging;
pub use crate::logging::init_logging;

/// One measurement on its way into the smoother.
pub enum Measurement {
    OdometryDelta {
        t0_us: i64,
        t1_us: i64,
        start: SwerveModulePositions,
        end: SwerveModulePositions,
    },
    GyroDelta {
        t0_us: i64,
        t1_us: i64,
        dtheta: f64,
    },
    AccelTriple {
        t0_us: i64,
        t1_us: i64,
        t2_us: i64,
        ax: f64,
        ay: f64,
    },
    TagPixel {
        landmark_id: i32,
        pixel: Point2<f64>,
        t_us: i64,
        calib: Arc<CameraCalibration>,
    },
}
