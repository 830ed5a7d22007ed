//! Tag detection frontend: everything between the raw fiducial
//! decoder and the telemetry payloads.
//!
//! The decoder itself is an external collaborator behind
//! [`TagDecoder`]. This crate filters its detections, undistorts
//! only the corner points (an order of magnitude cheaper than
//! undistorting the frame), recomputes each tag pose from the
//! undistorted corners, and keeps the timing discipline that lets
//! measurements land at the right instant on the smoother timeline.

use cam_frontend::{FrameMeta, LumaView};
use field_geom::{Blip24, Blip25, CameraCalibration};
use machine_vision_formats::{pixel_format::Mono8, AsImageStride};
use nalgebra::{Matrix3, Point2};
use tracing::warn;

pub type Result<M> = std::result::Result<M, TagError>;

#[derive(thiserror::Error, Debug)]
pub enum TagError {
    #[error("corner geometry is degenerate")]
    DegenerateCorners,
    #[error("intrinsic matrix is singular")]
    SingularIntrinsics,
}

mod homography;
pub use crate::homography::{homography_from_corners, pose_from_homography, tag_corners};

/// Physical edge length of the deployed 36h11 tags (6.5 in).
pub const TAG_SIZE_M: f64 = 0.1651;

/// Decoder configuration handed to the external fiducial decoder.
#[derive(Debug, Clone)]
pub struct DecoderConfig {
    pub family: TagFamily,
    pub n_threads: usize,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            family: TagFamily::Tag36h11,
            n_threads: 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagFamily {
    Tag36h11,
}

impl TagFamily {
    pub fn name(&self) -> &'static str {
        match self {
            TagFamily::Tag36h11 => "tag36h11",
        }
    }
}

/// One detection as reported by the decoder, in view coordinates.
#[derive(Debug, Clone)]
pub struct RawDetection {
    pub id: i32,
    pub hamming: i32,
    pub decision_margin: f32,
    pub center: Point2<f64>,
    /// Corner order: bottom-left, bottom-right, top-right, top-left
    /// in image coordinates (y down).
    pub corners: [Point2<f64>; 4],
}

/// The external fiducial decoder boundary.
pub trait TagDecoder: Send {
    fn detect(&mut self, im: &dyn AsImageStride<Mono8>) -> Vec<RawDetection>;
}

/// Pipeline timings for one frame, for the health topics.
#[derive(Debug, Clone, Copy)]
pub struct FrameTimings {
    /// Time since the previous frame finished.
    pub total_ms: f64,
    /// Age of the frame when we received it.
    pub image_age_ms: f64,
    pub undistort_ms: f64,
    pub detect_ms: f64,
    pub estimate_ms: f64,
    /// Publishing delay relative to the sensor-time midpoint of the
    /// frame; senders subtract this so consumers see sensor time.
    pub delay_us: i64,
}

/// Everything produced from one frame.
#[derive(Debug, Clone)]
pub struct FrameAnalysis {
    pub blips: Vec<Blip24>,
    pub blips25: Vec<Blip25>,
    pub timings: FrameTimings,
}

/// Per-camera tag pipeline.
pub struct TagFrontend {
    decoder: Box<dyn TagDecoder>,
    calib: CameraCalibration,
    cam_id: i32,
    crop_rows: Option<(usize, usize)>,
    tag_size_m: f64,
    last_frame_ns: i64,
}

impl TagFrontend {
    pub fn new(
        decoder: Box<dyn TagDecoder>,
        calib: CameraCalibration,
        cam_id: i32,
        crop_rows: Option<(usize, usize)>,
    ) -> Self {
        Self {
            decoder,
            calib,
            cam_id,
            crop_rows,
            tag_size_m: TAG_SIZE_M,
            last_frame_ns: boot_clock::now_ns(),
        }
    }

    /// Undistorted pinhole matrix of the calibration.
    fn camera_matrix(&self) -> Matrix3<f64> {
        let i = &self.calib.intrinsics;
        Matrix3::new(
            i.fx(),
            i.skew(),
            i.cx(),
            0.0,
            i.fy(),
            i.cy(),
            0.0,
            0.0,
            1.0,
        )
    }

    /// Run one capture-analyze pass over a mapped YUV420 buffer.
    pub fn analyze(&mut self, meta: &FrameMeta, yuv: &[u8]) -> FrameAnalysis {
        let received_ns = boot_clock::now_ns();

        let full = LumaView::from_yuv420(yuv, self.calib.width, self.calib.height);
        let (view, row_offset) = match self.crop_rows {
            Some((r0, r1)) => (full.crop_rows(r0, r1), r0 as f64),
            None => (full, 0.0),
        };
        let undistort_ns = boot_clock::now_ns();

        let detections = self.decoder.detect(&view);
        let detect_ns = boot_clock::now_ns();

        let mut blips = Vec::new();
        let mut blips25 = Vec::new();
        let object = tag_corners(self.tag_size_m);
        let k = self.camera_matrix();
        for det in &detections {
            // A non-zero Hamming distance means bits were corrected;
            // those detections are skipped, not reported.
            if det.hamming > 0 {
                continue;
            }

            // Lift view coordinates back into the full frame, then
            // undistort only these eight values.
            let mut corners = [Point2::new(0.0, 0.0); 4];
            for (dst, src) in corners.iter_mut().zip(det.corners.iter()) {
                let full_px = Point2::new(src.x, src.y + row_offset);
                *dst = self.calib.undistort_pixel(&full_px);
            }

            let pose = homography_from_corners(&object, &corners)
                .and_then(|h| pose_from_homography(&k, &h));
            match pose {
                Ok(pose) => {
                    blips.push(Blip24::new(det.id, pose));
                    blips25.push(Blip25::new(
                        det.id,
                        Point2::new(det.center.x, det.center.y + row_offset),
                        self.cam_id,
                    ));
                }
                Err(e) => {
                    warn!("tag {} pose estimation failed: {e}", det.id);
                }
            }
        }
        let estimate_ns = boot_clock::now_ns();

        let total_ms = (estimate_ns - self.last_frame_ns) as f64 / 1e6;
        self.last_frame_ns = estimate_ns;

        // The effective sensor time of a rolling-shutter frame is the
        // middle row.
        let midpoint_ns = meta.sensor_midpoint_ns();
        let delay_us = (boot_clock::now_ns() - midpoint_ns) / 1000;

        FrameAnalysis {
            blips,
            blips25,
            timings: FrameTimings {
                total_ms,
                image_age_ms: (received_ns - meta.sensor_timestamp_ns) as f64 / 1e6,
                undistort_ms: (undistort_ns - received_ns) as f64 / 1e6,
                detect_ms: (detect_ns - undistort_ns) as f64 / 1e6,
                estimate_ms: (estimate_ns - detect_ns) as f64 / 1e6,
                delay_us,
            },
        }
    }
}
