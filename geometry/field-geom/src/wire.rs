//! Fixed little-endian wire layouts for the telemetry bus.
//!
//! Every numeric struct crossing the bus is packed field by field in
//! declaration order with no padding, byte-compatible with the
//! on-robot struct decoder. Array topics are flat concatenations of
//! the element layout.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use nalgebra::{Isometry3, Point2, Quaternion, Translation3, UnitQuaternion};
use opencv_ros_camera::{Distortion, RosOpenCvIntrinsics};

use crate::{
    Blip24, Blip25, CameraCalibration, GeomError, PoseEstimate, Result, SwerveModulePosition,
    SwerveModulePositions,
};

pub const BLIP24_SIZE: usize = 60;
pub const BLIP25_SIZE: usize = 16;
pub const POSITIONS_SIZE: usize = 64;
pub const ROTATION2_SIZE: usize = 8;
pub const POSE_ESTIMATE_SIZE: usize = 24;
pub const CALIBRATION_SIZE: usize = 144;

fn check_len(buf: &[u8], expected: usize) -> Result<()> {
    if buf.len() < expected {
        return Err(GeomError::WireTruncated {
            expected,
            got: buf.len(),
        });
    }
    Ok(())
}

fn put_isometry(out: &mut Vec<u8>, iso: &Isometry3<f64>) {
    let t = iso.translation.vector;
    // Quaternion coords are stored [i, j, k, w]; the wire layout is
    // w-first.
    let q = iso.rotation.quaternion().coords;
    for v in [t.x, t.y, t.z, q[3], q[0], q[1], q[2]] {
        out.write_f64::<LittleEndian>(v).expect("vec write");
    }
}

fn get_isometry(rd: &mut &[u8]) -> std::io::Result<Isometry3<f64>> {
    let tx = rd.read_f64::<LittleEndian>()?;
    let ty = rd.read_f64::<LittleEndian>()?;
    let tz = rd.read_f64::<LittleEndian>()?;
    let qw = rd.read_f64::<LittleEndian>()?;
    let qx = rd.read_f64::<LittleEndian>()?;
    let qy = rd.read_f64::<LittleEndian>()?;
    let qz = rd.read_f64::<LittleEndian>()?;
    Ok(Isometry3::from_parts(
        Translation3::new(tx, ty, tz),
        UnitQuaternion::from_quaternion(Quaternion::new(qw, qx, qy, qz)),
    ))
}

pub fn encode_blip24(blip: &Blip24, out: &mut Vec<u8>) {
    out.write_i32::<LittleEndian>(blip.id).expect("vec write");
    put_isometry(out, &blip.pose);
}

pub fn decode_blip24(buf: &[u8]) -> Result<Blip24> {
    check_len(buf, BLIP24_SIZE)?;
    let mut rd = buf;
    let id = rd.read_i32::<LittleEndian>().expect("length checked");
    let pose = get_isometry(&mut rd).expect("length checked");
    Ok(Blip24::new(id, pose))
}

pub fn encode_blip25(blip: &Blip25, out: &mut Vec<u8>) {
    out.write_i32::<LittleEndian>(blip.id).expect("vec write");
    out.write_f32::<LittleEndian>(blip.pixel.x as f32)
        .expect("vec write");
    out.write_f32::<LittleEndian>(blip.pixel.y as f32)
        .expect("vec write");
    out.write_i32::<LittleEndian>(blip.cam_id).expect("vec write");
}

pub fn decode_blip25(buf: &[u8]) -> Result<Blip25> {
    check_len(buf, BLIP25_SIZE)?;
    let mut rd = buf;
    let id = rd.read_i32::<LittleEndian>().expect("length checked");
    let px = rd.read_f32::<LittleEndian>().expect("length checked");
    let py = rd.read_f32::<LittleEndian>().expect("length checked");
    let cam_id = rd.read_i32::<LittleEndian>().expect("length checked");
    Ok(Blip25::new(id, Point2::new(px as f64, py as f64), cam_id))
}

pub fn encode_blip24_array(blips: &[Blip24], out: &mut Vec<u8>) {
    for b in blips {
        encode_blip24(b, out);
    }
}

pub fn decode_blip24_array(buf: &[u8]) -> Result<Vec<Blip24>> {
    if buf.len() % BLIP24_SIZE != 0 {
        return Err(GeomError::WireBadArrayLength {
            item: "Blip24",
            got: buf.len(),
        });
    }
    buf.chunks_exact(BLIP24_SIZE).map(decode_blip24).collect()
}

pub fn encode_blip25_array(blips: &[Blip25], out: &mut Vec<u8>) {
    for b in blips {
        encode_blip25(b, out);
    }
}

pub fn decode_blip25_array(buf: &[u8]) -> Result<Vec<Blip25>> {
    if buf.len() % BLIP25_SIZE != 0 {
        return Err(GeomError::WireBadArrayLength {
            item: "Blip25",
            got: buf.len(),
        });
    }
    buf.chunks_exact(BLIP25_SIZE).map(decode_blip25).collect()
}

pub fn encode_positions(pos: &SwerveModulePositions, out: &mut Vec<u8>) {
    for m in pos.as_array() {
        out.write_f64::<LittleEndian>(m.distance_m).expect("vec write");
        out.write_f64::<LittleEndian>(m.angle_rad).expect("vec write");
    }
}

pub fn decode_positions(buf: &[u8]) -> Result<SwerveModulePositions> {
    check_len(buf, POSITIONS_SIZE)?;
    let mut rd = buf;
    let mut modules = [SwerveModulePosition::new(0.0, 0.0); 4];
    for m in modules.iter_mut() {
        let d = rd.read_f64::<LittleEndian>().expect("length checked");
        let a = rd.read_f64::<LittleEndian>().expect("length checked");
        *m = SwerveModulePosition::new(d, a);
    }
    Ok(SwerveModulePositions {
        front_left: modules[0],
        front_right: modules[1],
        rear_left: modules[2],
        rear_right: modules[3],
    })
}

pub fn encode_rotation2(radians: f64, out: &mut Vec<u8>) {
    out.write_f64::<LittleEndian>(radians).expect("vec write");
}

pub fn decode_rotation2(buf: &[u8]) -> Result<f64> {
    check_len(buf, ROTATION2_SIZE)?;
    let mut rd = buf;
    Ok(rd.read_f64::<LittleEndian>().expect("length checked"))
}

pub fn encode_pose_estimate(pose: &PoseEstimate, out: &mut Vec<u8>) {
    for v in [pose.x, pose.y, pose.theta] {
        out.write_f64::<LittleEndian>(v).expect("vec write");
    }
}

pub fn decode_pose_estimate(buf: &[u8]) -> Result<PoseEstimate> {
    check_len(buf, POSE_ESTIMATE_SIZE)?;
    let mut rd = buf;
    let x = rd.read_f64::<LittleEndian>().expect("length checked");
    let y = rd.read_f64::<LittleEndian>().expect("length checked");
    let theta = rd.read_f64::<LittleEndian>().expect("length checked");
    Ok(PoseEstimate::new(x, y, theta))
}

pub fn encode_calibration(cal: &CameraCalibration, out: &mut Vec<u8>) {
    let i = &cal.intrinsics;
    for v in [i.fx(), i.fy(), i.cx(), i.cy(), i.skew()] {
        out.write_f64::<LittleEndian>(v).expect("vec write");
    }
    let d = i.distortion.opencv_vec();
    for k in 0..5 {
        out.write_f64::<LittleEndian>(d[k]).expect("vec write");
    }
    put_isometry(out, &cal.camera_pose);
    out.write_u32::<LittleEndian>(cal.width as u32).expect("vec write");
    out.write_u32::<LittleEndian>(cal.height as u32).expect("vec write");
}

pub fn decode_calibration(buf: &[u8]) -> Result<CameraCalibration> {
    check_len(buf, CALIBRATION_SIZE)?;
    let mut rd = buf;
    let fx = rd.read_f64::<LittleEndian>().expect("length checked");
    let fy = rd.read_f64::<LittleEndian>().expect("length checked");
    let cx = rd.read_f64::<LittleEndian>().expect("length checked");
    let cy = rd.read_f64::<LittleEndian>().expect("length checked");
    let skew = rd.read_f64::<LittleEndian>().expect("length checked");
    let mut d = [0.0f64; 5];
    for k in d.iter_mut() {
        *k = rd.read_f64::<LittleEndian>().expect("length checked");
    }
    let camera_pose = get_isometry(&mut rd).expect("length checked");
    let width = rd.read_u32::<LittleEndian>().expect("length checked") as usize;
    let height = rd.read_u32::<LittleEndian>().expect("length checked") as usize;
    let distortion =
        Distortion::from_opencv_vec(nalgebra::Vector5::new(d[0], d[1], d[2], d[3], d[4]));
    let intrinsics = RosOpenCvIntrinsics::from_params_with_distortion(fx, skew, fy, cx, cy, distortion);
    Ok(CameraCalibration::new(intrinsics, camera_pose, width, height))
}
