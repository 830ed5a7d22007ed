//! Colored game-piece finder.
//!
//! Thresholds a YUV420 frame in HSV, closes bright interiors, smooths
//! speckle, extracts candidate regions, and turns each surviving
//! region into a camera-frame translation using the known physical
//! height of the piece: an object of height `h` metres filling `H`
//! pixels sits at range `h * cos(pitch) / H`.

use nalgebra::{Point2, Point3};
use serde::Serialize;

pub mod ops;

/// Static tuning for the finder. Compiled constants, immutable for a
/// run.
#[derive(Debug, Clone)]
pub struct PieceConfig {
    pub hsv_low: [u8; 3],
    pub hsv_high: [u8; 3],
    /// Physical height of the game piece in metres.
    pub object_height_m: f64,
    /// Camera pitch; 0 for a level camera.
    pub camera_pitch_rad: f64,
    /// Contours shorter than this are noise.
    pub min_height_px: usize,
    /// Accepted height/width band.
    pub min_aspect: f64,
    pub max_aspect: f64,
}

impl Default for PieceConfig {
    fn default() -> Self {
        Self {
            hsv_low: [0, 0, 200],
            hsv_high: [255, 170, 255],
            object_height_m: 0.105,
            camera_pitch_rad: 0.0,
            min_height_px: 50,
            min_aspect: 2.0,
            max_aspect: 5.0,
        }
    }
}

/// One found piece: pixel centroid and camera-frame translation.
#[derive(Debug, Clone, Copy)]
pub struct PieceDetection {
    pub centroid: Point2<f64>,
    pub translation: Point3<f64>,
}

/// Wire shape of one piece on the msgpack topic.
#[derive(Debug, Clone, Serialize)]
pub struct PieceMsg {
    pub pose_t: [f64; 3],
}

/// The per-frame batch published under the piece topic.
#[derive(Debug, Clone, Serialize)]
pub struct PieceBatch {
    pub objects: Vec<PieceMsg>,
}

impl From<&[PieceDetection]> for PieceBatch {
    fn from(detections: &[PieceDetection]) -> Self {
        PieceBatch {
            objects: detections
                .iter()
                .map(|d| PieceMsg {
                    pose_t: [d.translation.x, d.translation.y, d.translation.z],
                })
                .collect(),
        }
    }
}

pub struct PieceDetector {
    config: PieceConfig,
}

impl PieceDetector {
    pub fn new(config: PieceConfig) -> Self {
        Self { config }
    }

    /// Analyze one planar YUV420 frame.
    pub fn analyze(&self, yuv: &[u8], width: usize, height: usize) -> Vec<PieceDetection> {
        let cfg = &self.config;
        let mask = ops::hsv_in_range_yuv420(yuv, width, height, cfg.hsv_low, cfg.hsv_high);
        let filled = ops::fill_holes(&mask, width, height);
        let smoothed = ops::median5(&filled, width, height);
        let regions = ops::connected_regions(&smoothed, width, height);

        let mut out = Vec::new();
        for region in regions {
            let h_px = region.height_px();
            let w_px = region.width_px();
            if h_px < cfg.min_height_px {
                continue;
            }
            let aspect = h_px as f64 / w_px as f64;
            if !(cfg.min_aspect..=cfg.max_aspect).contains(&aspect) {
                continue;
            }
            if region.m00 == 0.0 {
                continue;
            }
            let (cx, cy) = region.centroid();
            // Range from the known physical height filling h_px rows.
            let tz = cfg.object_height_m * cfg.camera_pitch_rad.cos() / h_px as f64;
            let tx = (cx - width as f64 / 2.0) * tz;
            let ty = (cy - height as f64 / 2.0) * tz;
            out.push(PieceDetection {
                centroid: Point2::new(cx, cy),
                translation: Point3::new(tx, ty, tz),
            });
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const W: usize = 320;
    const H: usize = 240;

    /// Planar YUV420 frame, dark background.
    fn dark_frame() -> Vec<u8> {
        let mut yuv = vec![16u8; W * H];
        yuv.extend(std::iter::repeat(128u8).take(2 * (W / 2) * (H / 2)));
        yuv
    }

    fn paint_rect(yuv: &mut [u8], c0: usize, r0: usize, w: usize, h: usize) {
        for r in r0..r0 + h {
            for c in c0..c0 + w {
                yuv[r * W + c] = 235;
            }
        }
    }

    #[test]
    fn centered_piece_range_from_height() {
        let mut yuv = dark_frame();
        // 100 px tall, 40 px wide, centered.
        let (rect_w, rect_h) = (40, 100);
        paint_rect(&mut yuv, W / 2 - rect_w / 2, H / 2 - rect_h / 2, rect_w, rect_h);

        let det = PieceDetector::new(PieceConfig::default());
        let found = det.analyze(&yuv, W, H);
        assert_eq!(found.len(), 1);
        let piece = &found[0];
        let expected_tz = 0.105 / rect_h as f64;
        assert_relative_eq!(piece.translation.z, expected_tz, max_relative = 0.05);
        // Centered: centroid offset is sub-pixel, so tx and ty are
        // tiny compared to tz.
        assert!(piece.translation.x.abs() < 2.0 * expected_tz);
        assert!(piece.translation.y.abs() < 2.0 * expected_tz);
    }

    #[test]
    fn short_region_filtered() {
        let mut yuv = dark_frame();
        paint_rect(&mut yuv, 100, 100, 10, 30); // under min height
        let det = PieceDetector::new(PieceConfig::default());
        assert!(det.analyze(&yuv, W, H).is_empty());
    }

    #[test]
    fn wrong_aspect_filtered() {
        let mut yuv = dark_frame();
        paint_rect(&mut yuv, 50, 60, 100, 60); // wider than tall
        let det = PieceDetector::new(PieceConfig::default());
        assert!(det.analyze(&yuv, W, H).is_empty());
    }

    #[test]
    fn batch_serialization_shape() {
        let detections = [PieceDetection {
            centroid: Point2::new(10.0, 20.0),
            translation: Point3::new(0.1, 0.2, 0.3),
        }];
        let batch = PieceBatch::from(&detections[..]);
        assert_eq!(batch.objects.len(), 1);
        assert_eq!(batch.objects[0].pose_t, [0.1, 0.2, 0.3]);
    }
}
