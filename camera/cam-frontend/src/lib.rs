//! Camera acquisition frontend.
//!
//! The actual sensor driver is an external collaborator, reached
//! through the [`FrameSource`] trait. This crate owns what the rest
//! of the pipeline needs from it: the sensor mode table with
//! per-model intrinsics, frame timing metadata, the zero-copy
//! luminance view over a mapped YUV420 buffer, and the per-identity
//! crop policy.

use field_geom::Identity;

pub type Result<M> = std::result::Result<M, CamError>;

#[derive(thiserror::Error, Debug)]
pub enum CamError {
    /// Fatal at startup; no default calibration is invented.
    #[error("unknown camera model: {model}")]
    UnknownModel { model: String },
    /// Reported, then the node idles so tests can run without
    /// hardware.
    #[error("no cameras detected")]
    NoCamerasDetected,
    #[error("camera backend error: {0}")]
    Backend(String),
}

mod modes;
pub use crate::modes::{SensorMode, SensorModel};

mod frame;
pub use crate::frame::LumaView;

/// Frame timing as reported by the sensor driver.
///
/// `sensor_timestamp_ns` is the boot-referenced time the first byte
/// was received from the sensor; `frame_duration_ns` covers all rows.
#[derive(Debug, Clone, Copy)]
pub struct FrameMeta {
    pub sensor_timestamp_ns: i64,
    pub frame_duration_ns: i64,
}

impl FrameMeta {
    /// Sensor time of the middle image row.
    ///
    /// Assumes a continuously rolling shutter; a global-shutter
    /// sensor should use the frame start instead.
    /// TODO: global shutter case.
    pub fn sensor_midpoint_ns(&self) -> i64 {
        self.sensor_timestamp_ns + self.frame_duration_ns / 2
    }
}

/// One mapped frame, exclusively owned between capture and release.
///
/// Dropping the frame returns the buffer to the driver; holding it
/// for longer than one analysis pass stalls the capture queue.
pub trait CapturedFrame {
    fn meta(&self) -> FrameMeta;
    /// The full planar YUV420 buffer.
    fn data(&self) -> &[u8];
}

/// The external camera driver boundary.
///
/// `capture` blocks until the next frame is ready. The returned
/// guard borrows the source, which enforces the single
/// capture-analyze-release cycle per camera.
pub trait FrameSource: Send {
    /// Driver-reported sensor model id, e.g. `"imx219"`.
    fn model_id(&self) -> &str;
    fn capture(&mut self) -> Result<Box<dyn CapturedFrame + '_>>;
}

/// Rows kept by each camera identity. The shooter camera never sees
/// targets outside this band; everyone else scans the full frame.
pub fn crop_rows_for(identity: Identity) -> Option<(usize, usize)> {
    match identity {
        Identity::Shooter => Some((62, 554)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shooter_crop() {
        assert_eq!(crop_rows_for(Identity::Shooter), Some((62, 554)));
        assert_eq!(crop_rows_for(Identity::BetaFront), None);
        assert_eq!(crop_rows_for(Identity::Unknown), None);
    }

    #[test]
    fn midpoint() {
        let meta = FrameMeta {
            sensor_timestamp_ns: 1_000_000,
            frame_duration_ns: 20_000,
        };
        assert_eq!(meta.sensor_midpoint_ns(), 1_010_000);
    }
}
