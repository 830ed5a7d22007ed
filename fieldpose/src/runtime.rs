use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use eyre::WrapErr;
use tracing::{debug, error, info, warn};

use cam_frontend::FrameSource;
use field_geom::{wrap_angle, CameraCalibration, FieldMap, Pose2, PoseEstimate};
use gyro_frontend::Gyro;
use pose_smoother::{Smoother, SmootherConfig};
use tag_frontend::{FrameAnalysis, TagFrontend};
use telemetry_bus::{
    Blip25Receiver, Blip25Sender, BlipSender, Bus, BusError, DoubleSender, GyroReceiver,
    OdometryReceiver, PoseSender,
};

use crate::{Mailbox, Measurement, Shutdown};

/// All senders one camera worker publishes through.
pub struct VisionPublisher {
    bus: Bus,
    blips: BlipSender,
    blips25: Blip25Sender,
    fps: DoubleSender,
    latency: DoubleSender,
    capture_time_ms: DoubleSender,
    image_age_ms: DoubleSender,
    total_time_ms: DoubleSender,
    detect_time_ms: DoubleSender,
}

impl VisionPublisher {
    /// Topics live under `vision/<serial>`; pixel observations are
    /// published under the fusion node's name.
    pub fn new(bus: &Bus, serial: &str, cam_id: i32, fusion_name: &str) -> Self {
        let base = format!("vision/{serial}");
        Self {
            bus: bus.clone(),
            blips: bus.blip_sender(&format!("{base}/blips")),
            blips25: bus.blip25_sender(&format!("{fusion_name}/blips25")),
            fps: bus.double_sender(&format!("{base}/{cam_id}/fps")),
            latency: bus.double_sender(&format!("{base}/{cam_id}/latency")),
            capture_time_ms: bus.double_sender(&format!("{base}/capture_time_ms")),
            image_age_ms: bus.double_sender(&format!("{base}/image_age_ms")),
            total_time_ms: bus.double_sender(&format!("{base}/total_time_ms")),
            detect_time_ms: bus.double_sender(&format!("{base}/detect_time_ms")),
        }
    }

    pub fn publish(&self, analysis: &FrameAnalysis) {
        let t = &analysis.timings;
        // Samples carry the sensor-time midpoint of the frame, not
        // the publish instant.
        let delay = t.delay_us.max(0);
        self.blips.send(&analysis.blips, delay);
        self.blips25.send(&analysis.blips25, delay);

        if t.total_ms > 0.0 {
            self.fps.send(1000.0 / t.total_ms, 0);
        }
        self.latency.send(t.image_age_ms, 0);
        // The capture instant itself, on the shared time base.
        self.capture_time_ms
            .send((boot_clock::now_us() - delay) as f64 / 1000.0, 0);
        self.image_age_ms.send(t.image_age_ms, 0);
        self.total_time_ms.send(t.total_ms, 0);
        self.detect_time_ms.send(t.detect_ms, 0);

        // Without the flush the fabric coalesces for 100 ms.
        self.bus.flush();
    }
}

/// Run one camera's capture-detect-emit path until shutdown.
///
/// The capture guard owns the mapped buffer for exactly the analyze
/// call; it is dropped (released) before publishing, on every path.
pub fn spawn_camera_worker(
    mut source: Box<dyn FrameSource>,
    mut frontend: TagFrontend,
    publisher: VisionPublisher,
    shutdown: Shutdown,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        info!("camera worker started for {}", source.model_id());
        while !shutdown.is_triggered() {
            let analysis = match source.capture() {
                Ok(frame) => {
                    let meta = frame.meta();
                    frontend.analyze(&meta, frame.data())
                }
                Err(e) => {
                    // Hardware absent is not fatal; report and idle
                    // so the rest of the node keeps running.
                    warn!("camera capture failed: {e}");
                    std::thread::sleep(Duration::from_millis(100));
                    continue;
                }
            };
            publisher.publish(&analysis);
        }
        info!("camera worker stopped");
    })
}

/// Run one camera's piece-finding path until shutdown. Used by the
/// intake camera identity instead of the tag pipeline.
pub fn spawn_piece_worker(
    mut source: Box<dyn FrameSource>,
    detector: piece_detector::PieceDetector,
    width: usize,
    height: usize,
    sender: telemetry_bus::PieceSender,
    bus: Bus,
    shutdown: Shutdown,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        while !shutdown.is_triggered() {
            let detections = match source.capture() {
                Ok(frame) => detector.analyze(frame.data(), width, height),
                Err(e) => {
                    warn!("piece camera capture failed: {e}");
                    std::thread::sleep(Duration::from_millis(100));
                    continue;
                }
            };
            let batch = piece_detector::PieceBatch::from(&detections[..]);
            if let Err(e) = sender.send(&batch, 0) {
                warn!("piece batch publish failed: {e}");
            }
            bus.flush();
        }
    })
}

/// Run the gyro sampling loop at the IMU output data rate.
pub fn spawn_gyro_worker(
    mut gyro: Box<dyn Gyro>,
    shutdown: Shutdown,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        while !shutdown.is_triggered() {
            if let Err(e) = gyro.sample() {
                warn!("gyro sample failed: {e}");
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    })
}

/// The fusion side: drains bus subscriptions into the mailbox,
/// commits each tick's measurements as factors, solves, and publishes
/// the newest estimate.
pub struct FusionLoop {
    smoother: Smoother,
    field_map: Arc<FieldMap>,
    /// Calibration (with mount extrinsic) per camera id.
    cameras: BTreeMap<i32, Arc<CameraCalibration>>,
    mailbox: Arc<Mailbox>,
    odometry_rx: OdometryReceiver,
    gyro_rx: GyroReceiver,
    blips_rx: Blip25Receiver,
    pose_tx: PoseSender,
    bus: Bus,
    prev_odometry: Option<(i64, field_geom::SwerveModulePositions)>,
    prev_gyro: Option<(i64, f64)>,
    odometry_anchored: bool,
    gyro_anchored: bool,
    last_estimate: Pose2,
}

impl FusionLoop {
    pub fn new(
        bus: &Bus,
        name: &str,
        field_map: Arc<FieldMap>,
        cameras: BTreeMap<i32, Arc<CameraCalibration>>,
        config: SmootherConfig,
        initial_pose: Pose2,
    ) -> Self {
        let mut smoother = Smoother::new(config);
        smoother.init(initial_pose);
        Self {
            smoother,
            field_map,
            cameras,
            mailbox: Arc::new(Mailbox::new()),
            odometry_rx: bus.odometry_receiver("odometry"),
            gyro_rx: bus.gyro_receiver("gyro"),
            blips_rx: bus.blip25_receiver(&format!("{name}/blips25")),
            pose_tx: bus.pose_sender(&format!("{name}/pose")),
            bus: bus.clone(),
            prev_odometry: None,
            prev_gyro: None,
            odometry_anchored: false,
            gyro_anchored: false,
            last_estimate: initial_pose,
        }
    }

    /// Noise for the prior that pins the start of a dead-reckoning
    /// chain at the estimate current when the chain begins. Without
    /// it a chain of pure between factors has a free gauge.
    fn anchor_noise() -> pose_smoother::DiagonalNoise {
        pose_smoother::DiagonalNoise::from_sigmas(&[0.3, 0.3, 0.1])
    }

    /// Producers (in-process camera workers) push here directly.
    pub fn mailbox(&self) -> Arc<Mailbox> {
        self.mailbox.clone()
    }

    pub fn latest_estimate(&self) -> Pose2 {
        self.last_estimate
    }

    /// Convert queued subscription samples into measurements.
    ///
    /// Overflow is reported per topic and the loop proceeds with what
    /// it has; the queued samples survive to the next poll.
    pub fn poll(&mut self) {
        match self.odometry_rx.get() {
            Ok(samples) => {
                for (t, positions) in samples {
                    if let Some((t0, start)) = self.prev_odometry {
                        if t > t0 {
                            self.mailbox.push(Measurement::OdometryDelta {
                                t0_us: t0,
                                t1_us: t,
                                start,
                                end: positions,
                            });
                        }
                    }
                    self.prev_odometry = Some((t, positions));
                }
            }
            Err(e) => report_overflow("odometry", e),
        }

        match self.gyro_rx.get() {
            Ok(samples) => {
                for (t, yaw) in samples {
                    if let Some((t0, yaw0)) = self.prev_gyro {
                        if t > t0 {
                            self.mailbox.push(Measurement::GyroDelta {
                                t0_us: t0,
                                t1_us: t,
                                dtheta: wrap_angle(yaw - yaw0),
                            });
                        }
                    }
                    self.prev_gyro = Some((t, yaw));
                }
            }
            Err(e) => report_overflow("gyro", e),
        }

        match self.blips_rx.get() {
            Ok(samples) => {
                for (t, blips) in samples {
                    for blip in blips {
                        let calib = match self.cameras.get(&blip.cam_id) {
                            Some(c) => c.clone(),
                            None => {
                                warn!("blip from unknown camera {}", blip.cam_id);
                                continue;
                            }
                        };
                        self.mailbox.push(Measurement::TagPixel {
                            landmark_id: blip.id,
                            pixel: blip.pixel,
                            t_us: t,
                            calib,
                        });
                    }
                }
            }
            Err(e) => report_overflow("blips25", e),
        }
    }

    /// Commit one batch of measurements as factors. All-or-nothing
    /// per tick: key errors are programmer errors and abort the run.
    fn commit(&mut self, batch: Vec<Measurement>) -> eyre::Result<()> {
        let warm = self.last_estimate;
        for m in batch {
            match m {
                Measurement::OdometryDelta {
                    t0_us,
                    t1_us,
                    start,
                    end,
                } => {
                    self.smoother.add_state(t0_us, warm);
                    self.smoother.add_state(t1_us, warm);
                    if !self.odometry_anchored {
                        self.smoother
                            .prior(t0_us, warm, Self::anchor_noise())
                            .wrap_err("odometry anchor")?;
                        self.odometry_anchored = true;
                    }
                    self.smoother
                        .odometry(t0_us, t1_us, &start, &end)
                        .wrap_err("odometry factor")?;
                }
                Measurement::GyroDelta { t0_us, t1_us, dtheta } => {
                    self.smoother.add_state(t0_us, warm);
                    self.smoother.add_state(t1_us, warm);
                    if !self.gyro_anchored {
                        self.smoother
                            .prior(t0_us, warm, Self::anchor_noise())
                            .wrap_err("gyro anchor")?;
                        self.gyro_anchored = true;
                    }
                    self.smoother
                        .gyro(t0_us, t1_us, dtheta)
                        .wrap_err("gyro factor")?;
                }
                Measurement::AccelTriple {
                    t0_us,
                    t1_us,
                    t2_us,
                    ax,
                    ay,
                } => {
                    self.smoother.add_state(t0_us, warm);
                    self.smoother.add_state(t1_us, warm);
                    self.smoother.add_state(t2_us, warm);
                    self.smoother
                        .accelerometer(t0_us, t1_us, t2_us, ax, ay)
                        .wrap_err("accelerometer factor")?;
                }
                Measurement::TagPixel {
                    landmark_id,
                    pixel,
                    t_us,
                    calib,
                } => {
                    let landmark = match self.field_map.get(landmark_id) {
                        Some(lm) => lm.clone(),
                        None => {
                            debug!("tag {landmark_id} not in field map");
                            continue;
                        }
                    };
                    self.smoother.add_state(t_us, warm);
                    self.smoother
                        .apriltag_for_smoothing(
                            &landmark,
                            pixel,
                            t_us,
                            &calib.camera_pose,
                            &calib,
                        )
                        .wrap_err("apriltag factor")?;
                }
            }
        }
        Ok(())
    }

    /// One fusion tick: drain, commit, solve, publish.
    pub fn tick(&mut self, wait: Duration) -> eyre::Result<()> {
        self.poll();
        let batch = self.mailbox.drain_timeout(wait);
        if batch.is_empty() {
            return Ok(());
        }
        self.commit(batch)?;
        let report = self.smoother.update().wrap_err("smoother update")?;
        if !report.converged {
            // The last converged estimate stays on the bus.
            warn!(
                "update did not converge after {} iterations",
                report.iterations
            );
        }
        if let Some(newest) = self.smoother.result().newest_key() {
            if let Some(pose) = self.smoother.pose(newest) {
                self.last_estimate = pose;
                let age_us = (boot_clock::now_us() - newest).max(0);
                self.pose_tx.send(&PoseEstimate::from(pose), age_us);
            }
        }
        self.bus.flush();
        Ok(())
    }

    /// Run until shutdown. Pending mailbox measurements at shutdown
    /// are dropped, not drained.
    pub fn run(&mut self, shutdown: &Shutdown) -> eyre::Result<()> {
        info!("fusion loop running");
        while !shutdown.is_triggered() {
            if let Err(e) = self.tick(Duration::from_millis(20)) {
                error!("fusion tick failed: {e:#}");
                return Err(e);
            }
        }
        info!("fusion loop stopped");
        Ok(())
    }
}

fn report_overflow(topic: &str, e: BusError) {
    match e {
        BusError::QueueOverflow { dropped, .. } => {
            warn!("{topic} subscription overflowed, dropped {dropped} samples");
        }
        other => warn!("{topic} subscription error: {other}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use field_geom::{
        forward_camera_pose, Landmark, SwerveKinematics, SwerveModulePosition,
        SwerveModulePositions, Twist2,
    };
    use nalgebra::Isometry3;
    use opencv_ros_camera::RosOpenCvIntrinsics;

    fn zero_positions() -> SwerveModulePositions {
        let z = SwerveModulePosition::new(0.0, 0.0);
        SwerveModulePositions {
            front_left: z,
            front_right: z,
            rear_left: z,
            rear_right: z,
        }
    }

    fn test_calib() -> CameraCalibration {
        CameraCalibration::new(
            RosOpenCvIntrinsics::from_params(600.0, 0.0, 600.0, 400.0, 300.0),
            forward_camera_pose(nalgebra::Vector3::zeros()),
            800,
            600,
        )
    }

    fn fusion_over_loopback(bus: &Bus) -> FusionLoop {
        let kin = SwerveKinematics::rectangular(0.5, 0.5).unwrap();
        let map = Arc::new(FieldMap::new(vec![Landmark::new(
            1,
            Isometry3::translation(4.0, 0.0, 0.5),
        )]));
        let mut cameras = BTreeMap::new();
        cameras.insert(0, Arc::new(test_calib()));
        FusionLoop::new(
            bus,
            "fusion",
            map,
            cameras,
            SmootherConfig::new(kin),
            Pose2::identity(),
        )
    }

    #[test]
    fn odometry_over_the_bus_moves_the_estimate() {
        let bus = Bus::loopback();
        let mut fusion = fusion_over_loopback(&bus);
        let odo_tx = bus.positions_sender("odometry");

        // Drive straight ahead 0.1 m per sample.
        let mut positions = zero_positions();
        odo_tx.send(&positions, 0);
        for _ in 0..5 {
            std::thread::sleep(Duration::from_millis(2));
            for m in [
                &mut positions.front_left,
                &mut positions.front_right,
                &mut positions.rear_left,
                &mut positions.rear_right,
            ] {
                m.distance_m += 0.1;
            }
            odo_tx.send(&positions, 0);
        }

        fusion.tick(Duration::from_millis(1)).unwrap();
        let p = fusion.latest_estimate();
        assert_relative_eq!(p.x(), 0.5, epsilon = 1e-6);
        assert_relative_eq!(p.y(), 0.0, epsilon = 1e-6);
    }

    #[test]
    fn gyro_over_the_bus_turns_the_estimate() {
        let bus = Bus::loopback();
        let mut fusion = fusion_over_loopback(&bus);
        let gyro_tx = bus.rotation_sender("gyro");

        gyro_tx.send(0.0, 0);
        std::thread::sleep(Duration::from_millis(2));
        gyro_tx.send(0.25, 0);

        fusion.tick(Duration::from_millis(1)).unwrap();
        let p = fusion.latest_estimate();
        assert_relative_eq!(p.theta(), 0.25, epsilon = 1e-3);
    }

    #[test]
    fn tag_pixels_anchor_the_estimate() {
        let bus = Bus::loopback();
        let mut fusion = fusion_over_loopback(&bus);
        let blip_tx = bus.blip25_sender("fusion/blips25");

        let calib = test_calib();
        let truth = Pose2::new(0.1, 0.05, 0.02);
        let landmark = nalgebra::Point3::new(4.0, 0.0, 0.5);
        let px = calib.project_world_point(&truth, &landmark).unwrap();
        blip_tx.send(&[field_geom::Blip25::new(1, px, 0)], 0);

        fusion.tick(Duration::from_millis(1)).unwrap();
        // One bearing observation cannot fully determine the pose,
        // but the estimate must move off the origin toward
        // consistency with the pixel.
        let p = fusion.latest_estimate();
        let pred = calib.project_world_point(&p, &landmark).unwrap();
        assert!((pred.x - px.x).abs() < 1.0);
        assert!((pred.y - px.y).abs() < 1.0);
    }

    #[test]
    fn unknown_tag_is_skipped() {
        let bus = Bus::loopback();
        let mut fusion = fusion_over_loopback(&bus);
        let blip_tx = bus.blip25_sender("fusion/blips25");
        blip_tx.send(
            &[field_geom::Blip25::new(77, nalgebra::Point2::new(10.0, 10.0), 0)],
            0,
        );
        // No factor lands, the tick is a no-op on an otherwise empty
        // batch.
        fusion.tick(Duration::from_millis(1)).unwrap();
        let p = fusion.latest_estimate();
        assert_relative_eq!(p.x(), 0.0);
    }

    #[test]
    fn straight_line_drive_with_gyro_and_odometry() {
        let bus = Bus::loopback();
        let mut fusion = fusion_over_loopback(&bus);
        let odo_tx = bus.positions_sender("odometry");
        let gyro_tx = bus.rotation_sender("gyro");

        let kin = SwerveKinematics::rectangular(0.5, 0.5).unwrap();
        let twist = Twist2::new(0.5, 0.0, 0.0);
        let mut gt = Pose2::identity();
        let mut positions = zero_positions();
        odo_tx.send(&positions, 0);
        gyro_tx.send(0.0, 0);

        for _ in 0..10 {
            std::thread::sleep(Duration::from_millis(2));
            let dt = 0.02;
            let locations = *kin.locations();
            let mut modules = positions.as_array();
            for (m, loc) in modules.iter_mut().zip(locations.iter()) {
                let vx = twist.dx - twist.dtheta * loc.y;
                let vy = twist.dy + twist.dtheta * loc.x;
                m.distance_m += (vx * vx + vy * vy).sqrt() * dt;
                m.angle_rad = vy.atan2(vx);
            }
            positions = SwerveModulePositions {
                front_left: modules[0],
                front_right: modules[1],
                rear_left: modules[2],
                rear_right: modules[3],
            };
            gt = gt.compose(&Pose2::exp(&Twist2::new(
                twist.dx * dt,
                twist.dy * dt,
                twist.dtheta * dt,
            )));
            odo_tx.send(&positions, 0);
            gyro_tx.send(gt.theta(), 0);
            fusion.tick(Duration::from_millis(1)).unwrap();
        }

        // Odometry and gyro samples carry their own (nearby but not
        // identical) timestamps, so the newest state may lag the
        // other source by up to one 20 ms step.
        let p = fusion.latest_estimate();
        assert_relative_eq!(p.x(), gt.x(), epsilon = 0.02);
        assert_relative_eq!(p.y(), gt.y(), epsilon = 0.02);
        assert_relative_eq!(p.theta(), gt.theta(), epsilon = 1e-3);
    }
}
