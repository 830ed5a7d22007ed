//! Timestamp-preserving pub/sub adapters over the robot telemetry
//! fabric.
//!
//! Every publication carries an explicit timestamp `now_us() -
//! delay_us`, so consumers index samples by *sensor* time rather than
//! by arrival time. Receivers drain ordered, duplicate-preserving
//! queues; a queue overflow is a reported error kind, never silent
//! loss.
//!
//! The bus owns all subscription state in an arena; callers hold
//! opaque handles wrapped in the typed receiver structs.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use field_geom::{Blip24, Blip25, CameraCalibration, Identity, PoseEstimate, SwerveModulePositions};
use tracing::warn;

mod payload;
pub use crate::payload::{Payload, PayloadKind};

mod codec;
pub use crate::codec::{Frame, FrameCodec, Sample};

mod client;
use crate::client::ClientCmd;

pub type Result<M> = std::result::Result<M, BusError>;

#[derive(thiserror::Error, Debug)]
pub enum BusError {
    #[error("queue overflow on {topic}: dropped {dropped} samples")]
    QueueOverflow { topic: String, dropped: usize },
    #[error("wire error: {source}")]
    Wire { source: field_geom::GeomError },
    #[error("encode error: {0}")]
    Encode(String),
    #[error("io error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

/// Production telemetry server (the robot controller).
pub const SERVER_ADDR: &str = "10.1.0.2:5810";
/// Server used under [`Identity::Unknown`] for bench testing.
pub const LOCAL_ADDR: &str = "localhost:5810";

const QUEUE_CAPACITY: usize = 1024;

struct SubSlot {
    topic: String,
    queue: VecDeque<(i64, Payload)>,
    dropped: usize,
}

enum Outgoing {
    /// Samples route straight into local subscription queues.
    Loopback,
    /// Samples go to the client task; inbound samples come back from
    /// the socket reader.
    Client {
        tx: tokio::sync::mpsc::UnboundedSender<ClientCmd>,
    },
}

pub(crate) struct BusInner {
    subs: Mutex<Vec<SubSlot>>,
    outgoing: Outgoing,
}

impl BusInner {
    pub(crate) fn deliver(&self, topic: &str, timestamp_us: i64, payload: Payload) {
        let mut subs = self.subs.lock().expect("bus poisoned");
        let mut remaining = Some(payload);
        // More than one slot may watch the same topic; clone for all
        // but the last match.
        let n_matches = subs.iter().filter(|s| s.topic == topic).count();
        let mut seen = 0;
        for slot in subs.iter_mut().filter(|s| s.topic == topic) {
            seen += 1;
            let value = if seen == n_matches {
                remaining.take().expect("payload consumed early")
            } else {
                remaining.clone().expect("payload consumed early")
            };
            if slot.queue.len() >= QUEUE_CAPACITY {
                slot.queue.pop_front();
                slot.dropped += 1;
            }
            slot.queue.push_back((timestamp_us, value));
        }
    }
}

/// Opaque handle to one subscription slot.
#[derive(Debug, Clone, Copy)]
pub struct SubHandle(usize);

/// The telemetry bus endpoint for this process.
#[derive(Clone)]
pub struct Bus {
    inner: Arc<BusInner>,
}

impl Bus {
    /// An in-process bus: every publication is visible to local
    /// subscribers. Used by tests and simulation.
    pub fn loopback() -> Bus {
        boot_clock::init_origin();
        Bus {
            inner: Arc::new(BusInner {
                subs: Mutex::new(Vec::new()),
                outgoing: Outgoing::Loopback,
            }),
        }
    }

    /// Connect to the telemetry server selected by `identity` and
    /// spawn the background client task.
    pub fn connect(identity: Identity) -> Result<Bus> {
        let addr = if identity == Identity::Unknown {
            LOCAL_ADDR
        } else {
            SERVER_ADDR
        };
        Bus::connect_to(addr)
    }

    pub fn connect_to(addr: &str) -> Result<Bus> {
        boot_clock::init_origin();
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let inner = Arc::new(BusInner {
            subs: Mutex::new(Vec::new()),
            outgoing: Outgoing::Client { tx },
        });
        let inner2 = inner.clone();
        let addr = addr.to_string();
        std::thread::Builder::new()
            .name("telemetry-bus".to_string())
            .spawn(move || {
                let rt = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        warn!("telemetry runtime failed to start: {e}");
                        return;
                    }
                };
                rt.block_on(client::run(addr, rx, inner2));
            })?;
        Ok(Bus { inner })
    }

    fn publish(&self, topic: &str, payload: Payload, delay_us: i64) {
        // A negative delay would claim the sample comes from the
        // future; that is a bug at the call site, not a runtime
        // condition.
        debug_assert!(delay_us >= 0, "negative publish delay");
        let timestamp_us = boot_clock::now_us() - delay_us;
        match &self.inner.outgoing {
            Outgoing::Loopback => self.inner.deliver(topic, timestamp_us, payload),
            Outgoing::Client { tx } => {
                let _ = tx.send(ClientCmd::Send(Frame::Sample(Sample {
                    topic: topic.to_string(),
                    timestamp_us,
                    payload,
                })));
            }
        }
    }

    fn subscribe(&self, topic: &str) -> SubHandle {
        let mut subs = self.inner.subs.lock().expect("bus poisoned");
        subs.push(SubSlot {
            topic: topic.to_string(),
            queue: VecDeque::new(),
            dropped: 0,
        });
        if let Outgoing::Client { tx } = &self.inner.outgoing {
            let _ = tx.send(ClientCmd::Subscribe(topic.to_string()));
        }
        SubHandle(subs.len() - 1)
    }

    fn drain(&self, handle: SubHandle) -> Result<Vec<(i64, Payload)>> {
        let mut subs = self.inner.subs.lock().expect("bus poisoned");
        let slot = &mut subs[handle.0];
        if slot.dropped > 0 {
            let dropped = std::mem::take(&mut slot.dropped);
            return Err(BusError::QueueOverflow {
                topic: slot.topic.clone(),
                dropped,
            });
        }
        Ok(slot.queue.drain(..).collect())
    }

    /// Push buffered frames to the server immediately instead of
    /// waiting for the coalescing interval.
    pub fn flush(&self) {
        if let Outgoing::Client { tx } = &self.inner.outgoing {
            let _ = tx.send(ClientCmd::Flush);
        }
    }

    // Typed adapter factories ----------------------------------------

    pub fn double_sender(&self, name: &str) -> DoubleSender {
        DoubleSender {
            bus: self.clone(),
            topic: name.to_string(),
        }
    }

    pub fn blip_sender(&self, name: &str) -> BlipSender {
        BlipSender {
            bus: self.clone(),
            topic: name.to_string(),
        }
    }

    pub fn blip25_sender(&self, name: &str) -> Blip25Sender {
        Blip25Sender {
            bus: self.clone(),
            topic: name.to_string(),
        }
    }

    pub fn pose_sender(&self, name: &str) -> PoseSender {
        PoseSender {
            bus: self.clone(),
            topic: name.to_string(),
        }
    }

    pub fn calib_sender(&self, name: &str) -> CalibSender {
        CalibSender {
            bus: self.clone(),
            topic: name.to_string(),
        }
    }

    pub fn piece_sender(&self, name: &str) -> PieceSender {
        PieceSender {
            bus: self.clone(),
            topic: name.to_string(),
        }
    }

    pub fn rotation_sender(&self, name: &str) -> RotationSender {
        RotationSender {
            bus: self.clone(),
            topic: name.to_string(),
        }
    }

    pub fn positions_sender(&self, name: &str) -> PositionsSender {
        PositionsSender {
            bus: self.clone(),
            topic: name.to_string(),
        }
    }

    pub fn blip25_receiver(&self, name: &str) -> Blip25Receiver {
        Blip25Receiver {
            bus: self.clone(),
            handle: self.subscribe(name),
        }
    }

    pub fn odometry_receiver(&self, name: &str) -> OdometryReceiver {
        OdometryReceiver {
            bus: self.clone(),
            handle: self.subscribe(name),
        }
    }

    pub fn gyro_receiver(&self, name: &str) -> GyroReceiver {
        GyroReceiver {
            bus: self.clone(),
            handle: self.subscribe(name),
        }
    }
}

macro_rules! typed_sender {
    ($(#[$meta:meta])* $name:ident, $value:ty, $build:expr) => {
        $(#[$meta])*
        #[derive(Clone)]
        pub struct $name {
            bus: Bus,
            topic: String,
        }

        impl $name {
            pub fn send(&self, val: $value, delay_us: i64) {
                #[allow(clippy::redundant_closure_call)]
                self.bus.publish(&self.topic, ($build)(val), delay_us);
            }
        }
    };
}

typed_sender!(
    /// Scalar topics: fps, latency, pipeline health.
    DoubleSender,
    f64,
    Payload::Double
);
typed_sender!(
    /// Per-tag pose detections for one frame.
    BlipSender,
    &[Blip24],
    |v: &[Blip24]| Payload::Blips(v.to_vec())
);
typed_sender!(
    /// Pixel-level observations for upstream smoothing.
    Blip25Sender,
    &[Blip25],
    |v: &[Blip25]| Payload::Blips25(v.to_vec())
);
typed_sender!(PoseSender, &PoseEstimate, |v: &PoseEstimate| {
    Payload::Pose(*v)
});
typed_sender!(CalibSender, &CameraCalibration, |v: &CameraCalibration| {
    Payload::Calib(Box::new(v.clone()))
});
typed_sender!(
    /// Rotation2d struct topics (gyro yaw on the controller side).
    RotationSender,
    f64,
    Payload::Yaw
);
typed_sender!(
    /// Swerve module position snapshots (controller side; used here
    /// by simulation and tests).
    PositionsSender,
    &SwerveModulePositions,
    |v: &SwerveModulePositions| Payload::Positions(*v)
);

/// Raw msgpack topic for game-piece batches.
#[derive(Clone)]
pub struct PieceSender {
    bus: Bus,
    topic: String,
}

impl PieceSender {
    pub fn send<T: serde::Serialize>(&self, val: &T, delay_us: i64) -> Result<()> {
        let bytes = rmp_serde::to_vec_named(val).map_err(|e| BusError::Encode(e.to_string()))?;
        self.bus.publish(&self.topic, Payload::Raw(bytes), delay_us);
        Ok(())
    }
}

macro_rules! typed_receiver {
    ($(#[$meta:meta])* $name:ident, $value:ty, $variant:ident) => {
        $(#[$meta])*
        pub struct $name {
            bus: Bus,
            handle: SubHandle,
        }

        impl $name {
            /// Drain queued samples in arrival order as
            /// `(timestamp_us, value)` pairs.
            pub fn get(&self) -> Result<Vec<(i64, $value)>> {
                let raw = self.bus.drain(self.handle)?;
                let mut out = Vec::with_capacity(raw.len());
                for (ts, payload) in raw {
                    match payload {
                        Payload::$variant(v) => out.push((ts, v)),
                        other => {
                            warn!(
                                "unexpected {:?} payload on {} subscription",
                                other.kind(),
                                stringify!($name)
                            );
                        }
                    }
                }
                Ok(out)
            }
        }
    };
}

typed_receiver!(
    /// Pixel observations published by the camera nodes.
    Blip25Receiver,
    Vec<Blip25>,
    Blips25
);
typed_receiver!(
    /// Swerve module position snapshots from the controller.
    OdometryReceiver,
    SwerveModulePositions,
    Positions
);
typed_receiver!(
    /// Integrated gyro yaw from the controller.
    GyroReceiver,
    f64,
    Yaw
);

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Point2;

    #[test]
    fn roundtrip_preserves_sensor_timestamp() {
        let bus = Bus::loopback();
        let rx = bus.gyro_receiver("gyro");
        let tx = bus.rotation_sender("gyro");

        let delay = 5000;
        let before = boot_clock::now_us();
        tx.send(0.25, delay);
        let after = boot_clock::now_us();

        let samples = rx.get().unwrap();
        assert_eq!(samples.len(), 1);
        let (ts, yaw) = samples[0];
        assert_eq!(yaw, 0.25);
        assert!(ts >= before - delay);
        assert!(ts <= after - delay);
    }

    #[test]
    fn duplicates_preserved_in_order() {
        let bus = Bus::loopback();
        let rx = bus.odometry_receiver("odometry");
        let tx = bus.positions_sender("odometry");
        let pos = SwerveModulePositions {
            front_left: field_geom::SwerveModulePosition::new(1.0, 0.0),
            front_right: field_geom::SwerveModulePosition::new(1.0, 0.0),
            rear_left: field_geom::SwerveModulePosition::new(1.0, 0.0),
            rear_right: field_geom::SwerveModulePosition::new(1.0, 0.0),
        };
        tx.send(&pos, 0);
        tx.send(&pos, 0);
        tx.send(&pos, 0);
        let samples = rx.get().unwrap();
        assert_eq!(samples.len(), 3);
        assert!(samples.windows(2).all(|w| w[0].0 <= w[1].0));
        // Drained: the next call sees nothing.
        assert!(rx.get().unwrap().is_empty());
    }

    #[test]
    fn overflow_is_reported_not_silent() {
        let bus = Bus::loopback();
        let rx = bus.blip25_receiver("blips25");
        let tx = bus.blip25_sender("blips25");
        let blip = Blip25::new(1, Point2::new(0.0, 0.0), 0);
        for _ in 0..(QUEUE_CAPACITY + 3) {
            tx.send(&[blip], 0);
        }
        match rx.get() {
            Err(BusError::QueueOverflow { dropped, .. }) => assert_eq!(dropped, 3),
            other => panic!("expected overflow, got {other:?}"),
        }
        // The surviving samples are still there afterwards.
        let samples = rx.get().unwrap();
        assert_eq!(samples.len(), QUEUE_CAPACITY);
    }

    #[test]
    fn two_receivers_same_topic() {
        let bus = Bus::loopback();
        let a = bus.gyro_receiver("gyro");
        let b = bus.gyro_receiver("gyro");
        bus.rotation_sender("gyro").send(1.0, 0);
        assert_eq!(a.get().unwrap().len(), 1);
        assert_eq!(b.get().unwrap().len(), 1);
    }
}
