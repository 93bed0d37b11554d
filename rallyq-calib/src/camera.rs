use nalgebra::{Matrix3, Point2, Point3, Rotation3, Vector3};
use serde::{Deserialize, Serialize};

use rallyq_common::Resolution;

/// Iterations of the inverse distortion fixed point
const UNDISTORT_ITERATIONS: usize = 10;

/// Pinhole camera with radial/tangential distortion, posed relative to the board.
/// Board units are centimeters, image units are pixels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraModel {
    /// Intrinsic matrix K, row major
    pub intrinsic_matrix: [f64; 9],
    /// k1, k2, p1, p2, k3
    pub dist_coeffs: [f64; 5],
    /// Board to camera rotation, axis-angle
    pub rvec: [f64; 3],
    /// Board to camera translation
    pub tvec: [f64; 3],
    pub width: u32,
    pub height: u32,
    /// RMS reprojection error of the calibration corners, pixels
    pub reprojection_error: f64,
}

impl CameraModel {
    /// Undistorted camera with square pixels and a centered principal point
    pub fn new(focal: f64, width: u32, height: u32, rotation: Rotation3<f64>, translation: Vector3<f64>) -> Self {
        let (cx, cy) = (width as f64 / 2.0, height as f64 / 2.0);
        let rvec = rotation.scaled_axis();
        Self {
            intrinsic_matrix: [focal, 0.0, cx, 0.0, focal, cy, 0.0, 0.0, 1.0],
            dist_coeffs: [0.0; 5],
            rvec: [rvec.x, rvec.y, rvec.z],
            tvec: [translation.x, translation.y, translation.z],
            width,
            height,
            reprojection_error: 0.0,
        }
    }

    pub fn intrinsics(&self) -> Matrix3<f64> {
        Matrix3::from_row_slice(&self.intrinsic_matrix)
    }

    pub fn rotation(&self) -> Rotation3<f64> {
        Rotation3::from_scaled_axis(Vector3::from(self.rvec))
    }

    pub fn translation(&self) -> Vector3<f64> {
        Vector3::from(self.tvec)
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width as usize, self.height as usize)
    }

    /// Camera center in board coordinates
    pub fn center(&self) -> Point3<f64> {
        Point3::from(-(self.rotation().inverse() * self.translation()))
    }

    /// Depth of a board point along the optical axis
    pub fn depth(&self, point: &Point3<f64>) -> f64 {
        (self.rotation() * point.coords + self.translation()).z
    }

    /// Project a board point to pixels
    pub fn project(&self, point: &Point3<f64>) -> Point2<f64> {
        let cam = self.rotation() * point.coords + self.translation();
        let (x, y) = self.distort(cam.x / cam.z, cam.y / cam.z);
        self.to_pixel(x, y)
    }

    /// Project a board point to coordinates normalized by the image size
    pub fn project_normalized(&self, point: &Point3<f64>) -> glam::Vec2 {
        let pixel = self.project(point);
        glam::Vec2::new(
            (pixel.x / self.width as f64) as f32,
            (pixel.y / self.height as f64) as f32,
        )
    }

    /// Remove lens distortion from a pixel, the result is still in pixels
    pub fn undistort(&self, pixel: &Point2<f64>) -> Point2<f64> {
        let (xd, yd) = self.from_pixel(pixel);
        let [k1, k2, p1, p2, k3] = self.dist_coeffs;

        let (mut x, mut y) = (xd, yd);
        for _ in 0..UNDISTORT_ITERATIONS {
            let r2 = x * x + y * y;
            let radial = 1.0 + r2 * (k1 + r2 * (k2 + r2 * k3));
            let dx = 2.0 * p1 * x * y + p2 * (r2 + 2.0 * x * x);
            let dy = p1 * (r2 + 2.0 * y * y) + 2.0 * p2 * x * y;
            x = (xd - dx) / radial;
            y = (yd - dy) / radial;
        }
        self.to_pixel(x, y)
    }

    /// Approximate board position of a pixel.
    /// The viewing ray is taken at the depth of the board origin, which
    /// is only good enough for displacements between nearby points.
    pub fn back_project(&self, pixel: &Point2<f64>) -> Point3<f64> {
        let (x, y) = self.from_pixel(&self.undistort(pixel));
        let t = self.translation();
        let cam = Vector3::new(x, y, 1.0) * t.norm();
        Point3::from(self.rotation().inverse() * (cam - t))
    }

    fn distort(&self, x: f64, y: f64) -> (f64, f64) {
        let [k1, k2, p1, p2, k3] = self.dist_coeffs;
        let r2 = x * x + y * y;
        let radial = 1.0 + r2 * (k1 + r2 * (k2 + r2 * k3));
        (
            x * radial + 2.0 * p1 * x * y + p2 * (r2 + 2.0 * x * x),
            y * radial + p1 * (r2 + 2.0 * y * y) + 2.0 * p2 * x * y,
        )
    }

    fn to_pixel(&self, x: f64, y: f64) -> Point2<f64> {
        let k = &self.intrinsic_matrix;
        Point2::new(k[0] * x + k[1] * y + k[2], k[4] * y + k[5])
    }

    fn from_pixel(&self, pixel: &Point2<f64>) -> (f64, f64) {
        let k = &self.intrinsic_matrix;
        let y = (pixel.y - k[5]) / k[4];
        let x = (pixel.x - k[2] - k[1] * y) / k[0];
        (x, y)
    }
}
