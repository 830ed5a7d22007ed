use nalgebra::{Isometry3, Matrix3, Point2, Rotation3, SMatrix, SVector, Translation3, UnitQuaternion, Vector3};

use crate::{Result, TagError};

/// Tag-frame corner coordinates for a tag of the given edge length,
/// in the detector's corner order (bottom-left, bottom-right,
/// top-right, top-left in image coordinates, y down). The tag plane
/// is z = 0.
pub fn tag_corners(size_m: f64) -> [Point2<f64>; 4] {
    let h = size_m / 2.0;
    [
        Point2::new(-h, h),
        Point2::new(h, h),
        Point2::new(h, -h),
        Point2::new(-h, -h),
    ]
}

/// The exact homography mapping four object points to four image
/// points, normalized so `h33 = 1`.
pub fn homography_from_corners(
    object: &[Point2<f64>; 4],
    image: &[Point2<f64>; 4],
) -> Result<Matrix3<f64>> {
    let mut a = SMatrix::<f64, 8, 8>::zeros();
    let mut b = SVector::<f64, 8>::zeros();
    for i in 0..4 {
        let (x, y) = (object[i].x, object[i].y);
        let (u, v) = (image[i].x, image[i].y);
        a[(2 * i, 0)] = x;
        a[(2 * i, 1)] = y;
        a[(2 * i, 2)] = 1.0;
        a[(2 * i, 6)] = -u * x;
        a[(2 * i, 7)] = -u * y;
        b[2 * i] = u;
        a[(2 * i + 1, 3)] = x;
        a[(2 * i + 1, 4)] = y;
        a[(2 * i + 1, 5)] = 1.0;
        a[(2 * i + 1, 6)] = -v * x;
        a[(2 * i + 1, 7)] = -v * y;
        b[2 * i + 1] = v;
    }
    let h = a.lu().solve(&b).ok_or(TagError::DegenerateCorners)?;
    Ok(Matrix3::new(
        h[0], h[1], h[2], //
        h[3], h[4], h[5], //
        h[6], h[7], 1.0,
    ))
}

/// Recover the camera-to-tag transform from a homography computed on
/// undistorted pixel coordinates.
///
/// `K^-1 H` is proportional to `[r1 r2 t]`; the scale comes from the
/// unit length of the rotation columns and the rotation is
/// orthonormalized by SVD.
pub fn pose_from_homography(k: &Matrix3<f64>, h: &Matrix3<f64>) -> Result<Isometry3<f64>> {
    let k_inv = k.try_inverse().ok_or(TagError::SingularIntrinsics)?;
    let mut m = k_inv * h;

    // The tag must sit in front of the camera.
    if m[(2, 2)] < 0.0 {
        m = -m;
    }

    let m1 = m.column(0);
    let m2 = m.column(1);
    let norm = 0.5 * (m1.norm() + m2.norm());
    if norm < 1e-12 {
        return Err(TagError::DegenerateCorners);
    }
    let r1: Vector3<f64> = m1 / norm;
    let r2: Vector3<f64> = m2 / norm;
    let t: Vector3<f64> = m.column(2) / norm;
    let r3 = r1.cross(&r2);
    let r_approx = Matrix3::from_columns(&[r1, r2, r3]);

    let svd = r_approx.svd(true, true);
    let (u, v_t) = match (svd.u, svd.v_t) {
        (Some(u), Some(v_t)) => (u, v_t),
        _ => return Err(TagError::DegenerateCorners),
    };
    let d = (u * v_t).determinant();
    let r = u * Matrix3::from_diagonal(&Vector3::new(1.0, 1.0, d.signum())) * v_t;

    Ok(Isometry3::from_parts(
        Translation3::from(t),
        UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(r)),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn project(k: &Matrix3<f64>, pose: &Isometry3<f64>, p: &Point2<f64>) -> Point2<f64> {
        let cam = pose.transform_point(&nalgebra::Point3::new(p.x, p.y, 0.0));
        Point2::new(
            k[(0, 0)] * cam.x / cam.z + k[(0, 2)],
            k[(1, 1)] * cam.y / cam.z + k[(1, 2)],
        )
    }

    fn camera_matrix() -> Matrix3<f64> {
        Matrix3::new(600.0, 0.0, 400.0, 0.0, 600.0, 300.0, 0.0, 0.0, 1.0)
    }

    #[test]
    fn homography_reprojects_corners() {
        let object = tag_corners(0.1651);
        let image = [
            Point2::new(350.0, 340.0),
            Point2::new(452.0, 338.0),
            Point2::new(450.0, 246.0),
            Point2::new(352.0, 250.0),
        ];
        let h = homography_from_corners(&object, &image).unwrap();
        for i in 0..4 {
            let p = h * Vector3::new(object[i].x, object[i].y, 1.0);
            assert_relative_eq!(p[0] / p[2], image[i].x, epsilon = 1e-8);
            assert_relative_eq!(p[1] / p[2], image[i].y, epsilon = 1e-8);
        }
    }

    #[test]
    fn recovers_known_pose() {
        let k = camera_matrix();
        // Tag 2 m ahead, slightly off-axis and yawed.
        let truth = Isometry3::from_parts(
            Translation3::new(0.2, -0.1, 2.0),
            UnitQuaternion::from_euler_angles(0.05, 0.3, 0.02),
        );
        let object = tag_corners(0.1651);
        let image: Vec<Point2<f64>> = object.iter().map(|p| project(&k, &truth, p)).collect();
        let image: [Point2<f64>; 4] = [image[0], image[1], image[2], image[3]];

        let h = homography_from_corners(&object, &image).unwrap();
        let pose = pose_from_homography(&k, &h).unwrap();

        assert_relative_eq!(
            pose.translation.vector,
            truth.translation.vector,
            epsilon = 1e-6
        );
        let dq = pose.rotation.angle_to(&truth.rotation);
        assert!(dq < 1e-6, "rotation error {dq}");
    }

    #[test]
    fn straight_on_tag() {
        let k = camera_matrix();
        let truth = Isometry3::translation(0.0, 0.0, 1.5);
        let object = tag_corners(0.1651);
        let image: Vec<Point2<f64>> = object.iter().map(|p| project(&k, &truth, p)).collect();
        let image: [Point2<f64>; 4] = [image[0], image[1], image[2], image[3]];
        let pose =
            pose_from_homography(&k, &homography_from_corners(&object, &image).unwrap()).unwrap();
        assert_relative_eq!(pose.translation.vector.z, 1.5, epsilon = 1e-9);
        assert!(pose.rotation.angle() < 1e-9);
    }

    #[test]
    fn degenerate_homography_rejected() {
        let k = camera_matrix();
        let h = Matrix3::new(0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0);
        assert!(pose_from_homography(&k, &h).is_err());
    }
}
