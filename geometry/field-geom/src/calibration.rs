use nalgebra::{Isometry3, Point2, Point3, Vector2};
use opencv_ros_camera::{RosOpenCvIntrinsics, UndistortedPixels};

use crate::Pose2;

/// A calibrated, robot-mounted camera.
///
/// Intrinsics and the OpenCV distortion model come from
/// `opencv-ros-camera`; `camera_pose` is the fixed pose of the camera
/// optical frame (x-right, y-down, z-forward) in robot coordinates
/// (x-forward, y-left, z-up). Both are compiled constants per camera
/// identity, immutable for a run.
#[derive(Clone)]
pub struct CameraCalibration {
    pub intrinsics: RosOpenCvIntrinsics<f64>,
    pub camera_pose: Isometry3<f64>,
    pub width: usize,
    pub height: usize,
}

impl CameraCalibration {
    pub fn new(
        intrinsics: RosOpenCvIntrinsics<f64>,
        camera_pose: Isometry3<f64>,
        width: usize,
        height: usize,
    ) -> Self {
        Self {
            intrinsics,
            camera_pose,
            width,
            height,
        }
    }

    /// Undistort a single raw pixel coordinate.
    pub fn undistort_pixel(&self, distorted: &Point2<f64>) -> Point2<f64> {
        let d = cam_geom::Pixels::new(Vector2::new(distorted.x, distorted.y).transpose());
        let u = self.intrinsics.undistort(&d);
        Point2::new(u.data[(0, 0)], u.data[(0, 1)])
    }

    /// Project a camera-frame point to raw (distorted) pixel
    /// coordinates. `None` if the point is at or behind the image
    /// plane.
    pub fn project_camera_point(&self, p: &Point3<f64>) -> Option<Point2<f64>> {
        if p.z <= 1e-9 {
            return None;
        }
        let xn = p.x / p.z;
        let yn = p.y / p.z;
        let u = self.intrinsics.fx() * xn + self.intrinsics.skew() * yn + self.intrinsics.cx();
        let v = self.intrinsics.fy() * yn + self.intrinsics.cy();
        let ud = UndistortedPixels {
            data: nalgebra::OMatrix::<f64, nalgebra::U1, nalgebra::U2>::new(u, v),
        };
        let d = self.intrinsics.distort(&ud);
        Some(Point2::new(d.data[(0, 0)], d.data[(0, 1)]))
    }

    /// Project a world point through a robot pose and this camera,
    /// yielding raw pixel coordinates.
    pub fn project_world_point(
        &self,
        robot_pose: &Pose2,
        world: &Point3<f64>,
    ) -> Option<Point2<f64>> {
        let world_to_camera = (robot_pose.to_isometry3() * self.camera_pose).inverse();
        self.project_camera_point(&world_to_camera.transform_point(world))
    }
}

impl std::fmt::Debug for CameraCalibration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CameraCalibration")
            .field("fx", &self.intrinsics.fx())
            .field("fy", &self.intrinsics.fy())
            .field("cx", &self.intrinsics.cx())
            .field("cy", &self.intrinsics.cy())
            .field("camera_pose", &self.camera_pose)
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

/// The optical frame of a camera looking along robot +x.
///
/// Rotation columns are the camera axes expressed in robot
/// coordinates: x-right = -y_robot, y-down = -z_robot, z-forward =
/// +x_robot.
pub fn forward_camera_pose(translation: nalgebra::Vector3<f64>) -> Isometry3<f64> {
    let r = nalgebra::Rotation3::from_matrix_unchecked(nalgebra::Matrix3::new(
        0.0, 0.0, 1.0, //
        -1.0, 0.0, 0.0, //
        0.0, -1.0, 0.0,
    ));
    Isometry3::from_parts(
        nalgebra::Translation3::from(translation),
        nalgebra::UnitQuaternion::from_rotation_matrix(&r),
    )
}
