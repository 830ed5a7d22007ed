use field_geom::{wire, Blip24, Blip25, CameraCalibration, PoseEstimate, SwerveModulePositions};

use crate::{BusError, Result};

/// Discriminant for the closed set of payload types carried by the
/// bus. The numeric value is the wire tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PayloadKind {
    Double = 0,
    Blips = 1,
    Blips25 = 2,
    Pose = 3,
    Calib = 4,
    Positions = 5,
    Yaw = 6,
    Raw = 7,
}

impl PayloadKind {
    pub fn from_u8(v: u8) -> Option<PayloadKind> {
        match v {
            0 => Some(PayloadKind::Double),
            1 => Some(PayloadKind::Blips),
            2 => Some(PayloadKind::Blips25),
            3 => Some(PayloadKind::Pose),
            4 => Some(PayloadKind::Calib),
            5 => Some(PayloadKind::Positions),
            6 => Some(PayloadKind::Yaw),
            7 => Some(PayloadKind::Raw),
            _ => None,
        }
    }
}

/// A tagged sample value. The dispatch table between typed
/// senders/receivers and the wire lives here, at the bus boundary.
#[derive(Debug, Clone)]
pub enum Payload {
    Double(f64),
    Blips(Vec<Blip24>),
    Blips25(Vec<Blip25>),
    Pose(PoseEstimate),
    Calib(Box<CameraCalibration>),
    Positions(SwerveModulePositions),
    Yaw(f64),
    Raw(Vec<u8>),
}

impl Payload {
    pub fn kind(&self) -> PayloadKind {
        match self {
            Payload::Double(_) => PayloadKind::Double,
            Payload::Blips(_) => PayloadKind::Blips,
            Payload::Blips25(_) => PayloadKind::Blips25,
            Payload::Pose(_) => PayloadKind::Pose,
            Payload::Calib(_) => PayloadKind::Calib,
            Payload::Positions(_) => PayloadKind::Positions,
            Payload::Yaw(_) => PayloadKind::Yaw,
            Payload::Raw(_) => PayloadKind::Raw,
        }
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Payload::Double(v) | Payload::Yaw(v) => wire::encode_rotation2(*v, out),
            Payload::Blips(b) => wire::encode_blip24_array(b, out),
            Payload::Blips25(b) => wire::encode_blip25_array(b, out),
            Payload::Pose(p) => wire::encode_pose_estimate(p, out),
            Payload::Calib(c) => wire::encode_calibration(c, out),
            Payload::Positions(p) => wire::encode_positions(p, out),
            Payload::Raw(bytes) => out.extend_from_slice(bytes),
        }
    }

    pub fn decode(kind: PayloadKind, buf: &[u8]) -> Result<Payload> {
        Ok(match kind {
            PayloadKind::Double => Payload::Double(wire::decode_rotation2(buf)?),
            PayloadKind::Yaw => Payload::Yaw(wire::decode_rotation2(buf)?),
            PayloadKind::Blips => Payload::Blips(wire::decode_blip24_array(buf)?),
            PayloadKind::Blips25 => Payload::Blips25(wire::decode_blip25_array(buf)?),
            PayloadKind::Pose => Payload::Pose(wire::decode_pose_estimate(buf)?),
            PayloadKind::Calib => Payload::Calib(Box::new(wire::decode_calibration(buf)?)),
            PayloadKind::Positions => Payload::Positions(wire::decode_positions(buf)?),
            PayloadKind::Raw => Payload::Raw(buf.to_vec()),
        })
    }
}

impl From<field_geom::GeomError> for BusError {
    fn from(source: field_geom::GeomError) -> BusError {
        BusError::Wire { source }
    }
}
