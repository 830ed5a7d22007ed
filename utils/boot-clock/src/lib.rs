//! Monotonic boot-referenced clock.
//!
//! Every timestamp in the system lives in this domain: camera sensor
//! timestamps, telemetry sample times and smoother state keys. The
//! nanosecond count is referenced to boot so that it can be compared
//! directly with the sensor timestamps reported by the camera driver.

use std::sync::OnceLock;

static ORIGIN_US: OnceLock<i64> = OnceLock::new();

/// Nanoseconds since boot.
#[cfg(target_os = "linux")]
pub fn now_ns() -> i64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // CLOCK_BOOTTIME keeps counting across suspend, which matches the
    // timestamp domain of the camera sensor metadata.
    let rc = unsafe { libc::clock_gettime(libc::CLOCK_BOOTTIME, &mut ts) };
    assert_eq!(rc, 0, "clock_gettime(CLOCK_BOOTTIME) failed");
    ts.tv_sec * 1_000_000_000 + ts.tv_nsec
}

/// Nanoseconds since process start (non-Linux fallback).
#[cfg(not(target_os = "linux"))]
pub fn now_ns() -> i64 {
    static START: OnceLock<std::time::Instant> = OnceLock::new();
    let start = START.get_or_init(std::time::Instant::now);
    i64::try_from(start.elapsed().as_nanos()).unwrap_or(i64::MAX)
}

/// Initialise the per-run origin used by [`now_us`].
///
/// Must run before the first timestamped send or receive. Later calls
/// are no-ops; reads after initialisation are lock-free.
pub fn init_origin() {
    ORIGIN_US.get_or_init(|| now_ns() / 1000);
}

/// Microseconds since the per-run origin.
///
/// Subtracting the origin keeps values small enough to stay in a
/// positive 32-bit-friendly range for downstream consumers.
pub fn now_us() -> i64 {
    let origin = ORIGIN_US.get_or_init(|| now_ns() / 1000);
    now_ns() / 1000 - origin
}
