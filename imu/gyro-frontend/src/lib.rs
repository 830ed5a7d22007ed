//! Gyro integration frontend.
//!
//! Reads the z-axis rate from the IMU driver every cycle, integrates
//! yaw with the midpoint rule, and publishes both yaw and rate. At a
//! 100 Hz output data rate each sample is the average over the
//! previous 10 ms window, so publications carry a fixed 5 ms delay to
//! place them at the window midpoint.
//!
//! The uncorrected drift of this part is high; the offset below is
//! measured at rest.
//! TODO: automatic offset calibration at startup.

use telemetry_bus::DoubleSender;
use tracing::debug;

pub type Result<M> = std::result::Result<M, GyroError>;

#[derive(thiserror::Error, Debug)]
pub enum GyroError {
    #[error("imu read failed: {0}")]
    ImuRead(String),
}

/// The IMU hardware boundary: z-axis angular rate in rad/s, NWU
/// (counter-clockwise positive).
pub trait ImuDriver: Send {
    fn rate_z(&mut self) -> Result<f64>;
}

/// Per-hardware correction and timing constants.
#[derive(Debug, Clone)]
pub struct GyroConfig {
    pub offset_rad_s: f64,
    pub scale: f64,
    /// Half the 10 ms sample window.
    pub delay_us: i64,
}

impl Default for GyroConfig {
    fn default() -> Self {
        Self {
            offset_rad_s: -0.014935,
            scale: 1.0,
            delay_us: 5000,
        }
    }
}

/// A sampled yaw source publishing to the bus.
pub trait Gyro: Send {
    fn sample(&mut self) -> Result<()>;
    fn yaw_rad(&self) -> f64;
}

/// Integrating gyro over a real IMU driver.
pub struct RealGyro {
    driver: Box<dyn ImuDriver>,
    config: GyroConfig,
    yaw_sender: DoubleSender,
    rate_sender: DoubleSender,
    yaw_rad: f64,
    prev_time_ns: i64,
    prev_rate_rad_s: Option<f64>,
}

impl RealGyro {
    pub fn new(
        driver: Box<dyn ImuDriver>,
        config: GyroConfig,
        yaw_sender: DoubleSender,
        rate_sender: DoubleSender,
    ) -> Self {
        Self {
            driver,
            config,
            yaw_sender,
            rate_sender,
            yaw_rad: 0.0,
            prev_time_ns: boot_clock::now_ns(),
            prev_rate_rad_s: None,
        }
    }
}

impl Gyro for RealGyro {
    fn sample(&mut self) -> Result<()> {
        let rate_rad_s = (self.driver.rate_z()? - self.config.offset_rad_s) * self.config.scale;
        // Seed from the first sample so the first interval does not
        // half-count.
        let prev_rate = self.prev_rate_rad_s.unwrap_or(rate_rad_s);

        let end_ns = boot_clock::now_ns();
        let duration_ns = end_ns - self.prev_time_ns;
        self.prev_time_ns = end_ns;

        // Midpoint-rule Riemann sum between consecutive samples.
        let mid_rate = 0.5 * (rate_rad_s + prev_rate);
        self.yaw_rad += mid_rate * duration_ns as f64 / 1e9;
        self.prev_rate_rad_s = Some(rate_rad_s);

        self.yaw_sender.send(self.yaw_rad, self.config.delay_us);
        self.rate_sender.send(rate_rad_s, self.config.delay_us);
        Ok(())
    }

    fn yaw_rad(&self) -> f64 {
        self.yaw_rad
    }
}

/// Constant-zero gyro for platforms without the IMU.
pub struct FakeGyro {
    yaw_sender: DoubleSender,
    rate_sender: DoubleSender,
    delay_us: i64,
}

impl FakeGyro {
    pub fn new(yaw_sender: DoubleSender, rate_sender: DoubleSender, delay_us: i64) -> Self {
        Self {
            yaw_sender,
            rate_sender,
            delay_us,
        }
    }
}

impl Gyro for FakeGyro {
    fn sample(&mut self) -> Result<()> {
        self.yaw_sender.send(0.0, self.delay_us);
        self.rate_sender.send(0.0, self.delay_us);
        Ok(())
    }

    fn yaw_rad(&self) -> f64 {
        0.0
    }
}

/// Select the gyro implementation for this identity: hardware when a
/// driver is present on a known board, otherwise the fake.
pub fn make_gyro(
    identity: field_geom::Identity,
    driver: Option<Box<dyn ImuDriver>>,
    yaw_sender: DoubleSender,
    rate_sender: DoubleSender,
) -> Box<dyn Gyro> {
    let config = GyroConfig::default();
    match (identity, driver) {
        (field_geom::Identity::Unknown, _) | (_, None) => {
            debug!("using fake gyro");
            Box::new(FakeGyro::new(yaw_sender, rate_sender, config.delay_us))
        }
        (_, Some(driver)) => Box::new(RealGyro::new(driver, config, yaw_sender, rate_sender)),
    }
}
