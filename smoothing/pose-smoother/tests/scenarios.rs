//! End-to-end estimator scenarios against closed-form simulators.

use approx::assert_relative_eq;
use field_geom::{
    forward_camera_pose, CameraCalibration, Landmark, Pose2, SwerveKinematics, SwerveModulePosition,
    SwerveModulePositions, Twist2,
};
use nalgebra::{Isometry3, Point2};
use opencv_ros_camera::RosOpenCvIntrinsics;
use pose_smoother::{Smoother, SmootherConfig, SmootherError};

const STEP_US: i64 = 20_000;
const STEP_S: f64 = 0.02;

fn kinematics() -> SwerveKinematics {
    SwerveKinematics::rectangular(0.5, 0.5).unwrap()
}

fn config() -> SmootherConfig {
    SmootherConfig::new(kinematics())
}

mod sim {
    use super::*;

    pub fn sim_calibration() -> CameraCalibration {
        CameraCalibration::new(
            RosOpenCvIntrinsics::from_params(600.0, 0.0, 600.0, 400.0, 300.0),
            forward_camera_pose(nalgebra::Vector3::zeros()),
            800,
            600,
        )
    }

    pub fn wall_tags() -> Vec<Landmark> {
        vec![
            Landmark::new(0, Isometry3::translation(4.0, -1.0, 0.5)),
            Landmark::new(1, Isometry3::translation(4.0, -0.3, 0.8)),
            Landmark::new(2, Isometry3::translation(4.0, 0.3, 0.5)),
            Landmark::new(3, Isometry3::translation(4.0, 1.0, 0.8)),
        ]
    }

    /// Robot driving a gentle arc in front of a wall of four tags,
    /// with a constant body twist. Module odometry, gyro and tag
    /// pixels are all derived in closed form from the same ground
    /// truth.
    pub struct CircleSimulator {
        pub kinematics: SwerveKinematics,
        pub twist: Twist2,
        pub pose: Pose2,
        pub positions: SwerveModulePositions,
        pub landmarks: Vec<Landmark>,
        pub calib: CameraCalibration,
        pub camera_extrinsic: Isometry3<f64>,
    }

    impl CircleSimulator {
        pub fn new() -> Self {
            let calib = sim_calibration();
            let camera_extrinsic = calib.camera_pose;
            Self {
                kinematics: kinematics(),
                twist: Twist2::new(0.5, 0.0, 0.1),
                pose: Pose2::identity(),
                positions: zero_positions(),
                landmarks: wall_tags(),
                calib,
                camera_extrinsic,
            }
        }

        /// Advance ground truth and odometry by `dt` seconds.
        pub fn step(&mut self, dt: f64) {
            let locations = *self.kinematics.locations();
            let mut modules = self.positions.as_array();
            for (m, loc) in modules.iter_mut().zip(locations.iter()) {
                let vx = self.twist.dx - self.twist.dtheta * loc.y;
                let vy = self.twist.dy + self.twist.dtheta * loc.x;
                let speed = (vx * vx + vy * vy).sqrt();
                m.distance_m += speed * dt;
                m.angle_rad = vy.atan2(vx);
            }
            self.positions = SwerveModulePositions {
                front_left: modules[0],
                front_right: modules[1],
                rear_left: modules[2],
                rear_right: modules[3],
            };
            let scaled = Twist2::new(
                self.twist.dx * dt,
                self.twist.dy * dt,
                self.twist.dtheta * dt,
            );
            self.pose = self.pose.compose(&Pose2::exp(&scaled));
        }

        /// Ground-truth pixel for each landmark at the current pose.
        pub fn pixels(&self) -> Vec<Point2<f64>> {
            self.landmarks
                .iter()
                .map(|lm| {
                    self.calib
                        .project_world_point(&self.pose, &lm.position())
                        .expect("tag visible")
                })
                .collect()
        }
    }

    /// Straight-line run at constant body acceleration from rest.
    pub struct LineSimulator {
        pub accel: f64,
        pub t_s: f64,
        pub pose: Pose2,
    }

    impl LineSimulator {
        pub fn new(accel: f64) -> Self {
            Self {
                accel,
                t_s: 0.0,
                pose: Pose2::identity(),
            }
        }

        pub fn step(&mut self, dt: f64) {
            self.t_s += dt;
            self.pose = Pose2::new(0.5 * self.accel * self.t_s * self.t_s, 0.0, 0.0);
        }
    }

    pub fn zero_positions() -> SwerveModulePositions {
        let z = SwerveModulePosition::new(0.0, 0.0);
        SwerveModulePositions {
            front_left: z,
            front_right: z,
            rear_left: z,
            rear_right: z,
        }
    }
}

use sim::{CircleSimulator, LineSimulator};

#[test]
fn gyro_only_motionless() {
    let mut est = Smoother::new(config());
    est.init(Pose2::identity());
    est.gyro(0, 0, 0.0).unwrap();
    let report = est.update().unwrap();
    assert!(report.converged);
    let p = est.pose(0).unwrap();
    assert_relative_eq!(p.x(), 0.0, epsilon = 1e-5);
    assert_relative_eq!(p.y(), 0.0, epsilon = 1e-5);
    assert_relative_eq!(p.theta(), 0.0, epsilon = 1e-5);
}

#[test]
fn gyro_only_rotating() {
    let mut est = Smoother::new(config());
    est.init(Pose2::identity());
    est.gyro(0, 0, 1.0).unwrap();
    est.update().unwrap();
    let p = est.pose(0).unwrap();
    assert_relative_eq!(p.x(), 0.0, epsilon = 1e-3);
    assert_relative_eq!(p.y(), 0.0, epsilon = 1e-3);
    assert_relative_eq!(p.theta(), 1.0, epsilon = 1e-5);
}

#[test]
fn odometry_only_circle() {
    let mut sim = CircleSimulator::new();
    let mut est = Smoother::new(config());
    est.init(sim.pose);
    let mut state = Pose2::identity();
    let mut prev_positions = sim.positions;

    for i in 1..100i64 {
        let t0 = STEP_US * (i - 1);
        let t1 = STEP_US * i;
        sim.step(STEP_S);
        est.add_state(t1, state);
        est.odometry(t0, t1, &prev_positions, &sim.positions).unwrap();
        prev_positions = sim.positions;
        let report = est.update().unwrap();
        assert!(report.converged, "diverged at step {i}");

        let p = est.pose(t1).unwrap();
        state = p;
        // Noise-free odometry tracks the path to well under a
        // millimetre.
        let dx = p.x() - sim.pose.x();
        let dy = p.y() - sim.pose.y();
        assert!(
            (dx * dx + dy * dy).sqrt() < 1e-3,
            "position error at step {i}: ({dx}, {dy})"
        );
    }
}

#[test]
fn accelerometer_line_with_priors() {
    let mut sim = LineSimulator::new(1.0);
    let mut est = Smoother::new(config());
    est.init(sim.pose);
    let mut state = Pose2::identity();

    // The accel factor needs a second anchored state to be
    // determinate.
    sim.step(STEP_S);
    est.add_state(STEP_US, state);
    est.prior(
        STEP_US,
        sim.pose,
        pose_smoother::DiagonalNoise::from_sigmas(&[0.3, 0.3, 0.1]),
    )
    .unwrap();

    for i in 2..100i64 {
        let t0 = STEP_US * (i - 2);
        let t1 = STEP_US * (i - 1);
        let t2 = STEP_US * i;
        sim.step(STEP_S);
        est.add_state(t2, state);
        est.prior(
            t2,
            sim.pose,
            pose_smoother::DiagonalNoise::from_sigmas(&[0.3, 0.3, 0.1]),
        )
        .unwrap();
        est.accelerometer(t0, t1, t2, sim.accel, 0.0).unwrap();
        let report = est.update().unwrap();
        assert!(report.converged, "diverged at step {i}");
        let p = est.pose(t2).unwrap();
        state = p;
        if sim.pose.x() > 0.1 {
            assert_relative_eq!(p.x(), sim.pose.x(), max_relative = 0.01);
        }
    }
}

#[test]
fn camera_only_with_warm_start() {
    let mut sim = CircleSimulator::new();
    let mut est = Smoother::new(config());
    est.init(sim.pose);
    let mut state = Pose2::identity();

    for i in 1..100i64 {
        let t = STEP_US * i;
        sim.step(STEP_S);
        // Warm start from the previous estimate; a cold start at the
        // origin falls into the mirror-image minimum.
        est.add_state(t, state);
        let pixels = sim.pixels();
        for (lm, px) in sim.landmarks.iter().zip(pixels.iter()) {
            est.apriltag_for_smoothing(lm, *px, t, &sim.camera_extrinsic, &sim.calib)
                .unwrap();
        }
        let report = est.update().unwrap();
        assert!(report.converged, "diverged at step {i}");
        let p = est.pose(t).unwrap();
        state = p;
        let dx = p.x() - sim.pose.x();
        let dy = p.y() - sim.pose.y();
        assert!(
            (dx * dx + dy * dy).sqrt() < 1e-2,
            "position error at step {i}: ({dx}, {dy})"
        );
    }
}

#[test]
fn camera_odometry_gyro_fused() {
    let mut sim = CircleSimulator::new();
    let mut est = Smoother::new(config());
    est.init(sim.pose);
    let mut state = Pose2::identity();
    let mut prev_positions = sim.positions;
    let mut prev_theta = sim.pose.theta();

    for i in 1..100i64 {
        let t0 = STEP_US * (i - 1);
        let t1 = STEP_US * i;
        sim.step(STEP_S);
        est.add_state(t1, state);
        est.odometry(t0, t1, &prev_positions, &sim.positions).unwrap();
        prev_positions = sim.positions;
        let dtheta = field_geom::wrap_angle(sim.pose.theta() - prev_theta);
        est.gyro(t0, t1, dtheta).unwrap();
        prev_theta = sim.pose.theta();
        let pixels = sim.pixels();
        for (lm, px) in sim.landmarks.iter().zip(pixels.iter()) {
            est.apriltag_for_smoothing(lm, *px, t1, &sim.camera_extrinsic, &sim.calib)
                .unwrap();
        }
        let report = est.update().unwrap();
        assert!(report.converged, "diverged at step {i}");
        let p = est.pose(t1).unwrap();
        state = p;
        let dx = p.x() - sim.pose.x();
        let dy = p.y() - sim.pose.y();
        assert!(
            (dx * dx + dy * dy).sqrt() < 5e-3,
            "position error at step {i}: ({dx}, {dy})"
        );
        assert!((p.theta() - sim.pose.theta()).abs() < 5e-3);
    }
}

#[test]
fn window_evicts_old_states() {
    let mut sim = CircleSimulator::new();
    let mut est = Smoother::new(config());
    est.init(sim.pose);
    let mut state = Pose2::identity();
    let mut prev_positions = sim.positions;

    for i in 1..20i64 {
        let t0 = STEP_US * (i - 1);
        let t1 = STEP_US * i;
        sim.step(STEP_S);
        est.add_state(t1, state);
        est.odometry(t0, t1, &prev_positions, &sim.positions).unwrap();
        prev_positions = sim.positions;
        est.update().unwrap();
        state = est.pose(t1).unwrap();
    }
    // Lag is 100 ms = 5 steps; everything older is gone, the recent
    // window is intact.
    let newest = STEP_US * 19;
    assert!(est.pose(0).is_none());
    assert!(est.pose(STEP_US * 5).is_none());
    for k in 0..=5 {
        assert!(est.pose(newest - STEP_US * k).is_some(), "missing state {k} back");
    }
    // Eviction did not bend the surviving trajectory.
    let p = est.pose(newest).unwrap();
    assert_relative_eq!(p.x(), sim.pose.x(), epsilon = 1e-6);
}

#[test]
fn residuals_within_noise_envelope_at_map() {
    // Chi-square sanity: with noise-free measurements the whitened
    // residual at the MAP estimate is far inside the 3-sigma
    // envelope.
    let mut sim = CircleSimulator::new();
    let mut est = Smoother::new(config());
    est.init(sim.pose);
    let mut state = Pose2::identity();
    let mut prev_positions = sim.positions;
    let kin = kinematics();

    for i in 1..30i64 {
        let t0 = STEP_US * (i - 1);
        let t1 = STEP_US * i;
        sim.step(STEP_S);
        est.add_state(t1, state);
        let measured = kin.pose_delta(&prev_positions, &sim.positions);
        est.odometry(t0, t1, &prev_positions, &sim.positions).unwrap();
        prev_positions = sim.positions;
        est.update().unwrap();
        state = est.pose(t1).unwrap();

        if let (Some(p0), Some(p1)) = (est.pose(t0), est.pose(t1)) {
            let implied = p0.between(&p1);
            let r = measured.local(&implied);
            // sigmas (0.02, 0.02, 0.01)
            assert!(r[0].abs() < 3.0 * 0.02);
            assert!(r[1].abs() < 3.0 * 0.02);
            assert!(r[2].abs() < 3.0 * 0.01);
        }
    }
}

#[test]
fn unknown_key_is_fatal() {
    let mut est = Smoother::new(config());
    est.init(Pose2::identity());
    match est.gyro(123, 456, 0.1) {
        Err(SmootherError::InvalidKey { key }) => assert_eq!(key, 123),
        other => panic!("expected InvalidKey, got {other:?}"),
    }
}

#[test]
fn re_adding_a_state_is_a_no_op() {
    let mut est = Smoother::new(config());
    est.init(Pose2::identity());
    let guess = Pose2::new(1.0, 2.0, 0.0);
    est.add_state(STEP_US, guess);
    est.add_state(STEP_US, Pose2::new(9.0, 9.0, 1.0));
    est.gyro(STEP_US, STEP_US, 0.0).unwrap();
    est.update().unwrap();
    let p = est.pose(STEP_US).unwrap();
    // The first guess survives; the second insert was ignored.
    assert_relative_eq!(p.x(), 1.0, epsilon = 1e-9);
    assert_relative_eq!(p.y(), 2.0, epsilon = 1e-9);
}

#[test]
fn update_before_init_is_an_error() {
    let mut est = Smoother::new(config());
    assert!(matches!(est.update(), Err(SmootherError::Uninitialized)));
}
