use nalgebra::{DMatrix, DVector, Matrix3, Point2, Point3, Rotation3, Vector3};

use crate::camera::CameraModel;
use crate::CalibrationError;

/// Levenberg-Marquardt iterations of the pose refinement
const REFINE_ITERATIONS: usize = 50;

/// Similarity moving the centroid to the origin with a mean distance of sqrt(2)
fn normalizing_transform(points: &[Point2<f64>]) -> Matrix3<f64> {
    let n = points.len() as f64;
    let centroid = points.iter().fold(Vector3::zeros(), |acc, p| acc + Vector3::new(p.x, p.y, 0.0)) / n;
    let spread = points
        .iter()
        .map(|p| ((p.x - centroid.x).powi(2) + (p.y - centroid.y).powi(2)).sqrt())
        .sum::<f64>()
        / n;
    let s = if spread > f64::EPSILON { std::f64::consts::SQRT_2 / spread } else { 1.0 };
    Matrix3::new(s, 0.0, -s * centroid.x, 0.0, s, -s * centroid.y, 0.0, 0.0, 1.0)
}

/// Map a point through a homography
pub(crate) fn transform(h: &Matrix3<f64>, p: &Point2<f64>) -> Point2<f64> {
    let v = h * Vector3::new(p.x, p.y, 1.0);
    Point2::new(v.x / v.z, v.y / v.z)
}

/// Plane to plane homography from at least four correspondences (normalized DLT)
pub fn find_homography(src: &[Point2<f64>], dst: &[Point2<f64>]) -> Result<Matrix3<f64>, CalibrationError> {
    if src.len() != dst.len() || src.len() < 4 {
        return Err(CalibrationError::Degenerate("homography needs 4 correspondences"));
    }

    let t_src = normalizing_transform(src);
    let t_dst = normalizing_transform(dst);

    // Zero rows keep the system square when only four points are given
    let rows = (2 * src.len()).max(9);
    let mut a = DMatrix::<f64>::zeros(rows, 9);
    for (i, (s, d)) in src.iter().zip(dst).enumerate() {
        let s = transform(&t_src, s);
        let d = transform(&t_dst, d);
        let (r0, r1) = (2 * i, 2 * i + 1);

        a[(r0, 0)] = -s.x;
        a[(r0, 1)] = -s.y;
        a[(r0, 2)] = -1.0;
        a[(r0, 6)] = d.x * s.x;
        a[(r0, 7)] = d.x * s.y;
        a[(r0, 8)] = d.x;

        a[(r1, 3)] = -s.x;
        a[(r1, 4)] = -s.y;
        a[(r1, 5)] = -1.0;
        a[(r1, 6)] = d.y * s.x;
        a[(r1, 7)] = d.y * s.y;
        a[(r1, 8)] = d.y;
    }

    let svd = a.svd(false, true);
    let vt = svd
        .v_t
        .ok_or(CalibrationError::Degenerate("SVD failed in homography"))?;
    let null = vt.row(svd.singular_values.imin());
    let h = Matrix3::from_row_slice(null.transpose().as_slice());

    let t_dst_inv = t_dst
        .try_inverse()
        .ok_or(CalibrationError::Degenerate("singular normalization"))?;
    let h = t_dst_inv * h * t_src;
    if h[(2, 2)].abs() > f64::EPSILON {
        Ok(h / h[(2, 2)])
    } else {
        Ok(h / h.norm())
    }
}

/// Focal length from the two orthogonality constraints of a board homography,
/// assuming square pixels and the principal point at `center`.
fn focal_from_homography(h: &Matrix3<f64>, center: &Point2<f64>) -> Option<f64> {
    let shift = Matrix3::new(1.0, 0.0, -center.x, 0.0, 1.0, -center.y, 0.0, 0.0, 1.0);
    let h = shift * h;
    let (h1, h2) = (h.column(0).into_owned(), h.column(1).into_owned());

    // a * A + B = 0 with a = 1 / f^2
    let a = [
        h1.x * h2.x + h1.y * h2.y,
        h1.x * h1.x + h1.y * h1.y - h2.x * h2.x - h2.y * h2.y,
    ];
    let b = [h1.z * h2.z, h1.z * h1.z - h2.z * h2.z];
    let denom = a[0] * a[0] + a[1] * a[1];
    let scale = (h1.x * h1.x + h1.y * h1.y + h2.x * h2.x + h2.y * h2.y).powi(2);
    if denom <= 1e-12 * scale {
        return None;
    }

    let inv_f2 = -(a[0] * b[0] + a[1] * b[1]) / denom;
    (inv_f2 > 0.0).then(|| 1.0 / inv_f2.sqrt())
}

/// Board pose from a homography and intrinsics, camera in front of the board
fn pose_from_homography(h: &Matrix3<f64>, k: &Matrix3<f64>) -> Result<(Rotation3<f64>, Vector3<f64>), CalibrationError> {
    let k_inv = k
        .try_inverse()
        .ok_or(CalibrationError::Degenerate("singular intrinsics"))?;
    let m = k_inv * h;
    let (m1, m2, m3) = (m.column(0).into_owned(), m.column(1).into_owned(), m.column(2).into_owned());

    let mut lambda = 2.0 / (m1.norm() + m2.norm());
    if (m3 * lambda).z < 0.0 {
        lambda = -lambda;
    }

    let r1 = m1 * lambda;
    let r2 = m2 * lambda;
    let r3 = r1.cross(&r2);
    let t = m3 * lambda;

    // Closest rotation to the estimated columns
    let approx = Matrix3::from_columns(&[r1, r2, r3]);
    let svd = approx.svd(true, true);
    let (u, vt) = match (svd.u, svd.v_t) {
        (Some(u), Some(vt)) => (u, vt),
        _ => return Err(CalibrationError::Degenerate("SVD failed in pose")),
    };
    let mut r = u * vt;
    if r.determinant() < 0.0 {
        let mut u = u;
        u.column_mut(2).neg_mut();
        r = u * vt;
    }

    Ok((Rotation3::from_matrix_unchecked(r), t))
}

/// Pinhole parameters refined by the least squares
#[derive(Debug, Clone, Copy)]
struct Params([f64; 7]);

impl Params {
    fn new(focal: f64, rotation: &Rotation3<f64>, t: &Vector3<f64>) -> Self {
        let r = rotation.scaled_axis();
        Self([focal, r.x, r.y, r.z, t.x, t.y, t.z])
    }

    fn camera(&self, width: u32, height: u32) -> CameraModel {
        let [f, rx, ry, rz, tx, ty, tz] = self.0;
        let rotation = Rotation3::from_scaled_axis(Vector3::new(rx, ry, rz));
        CameraModel::new(f, width, height, rotation, Vector3::new(tx, ty, tz))
    }
}

fn residuals(camera: &CameraModel, object: &[Point3<f64>], image: &[Point2<f64>]) -> DVector<f64> {
    let mut r = DVector::zeros(2 * object.len());
    for (i, (o, p)) in object.iter().zip(image).enumerate() {
        let q = camera.project(o);
        r[2 * i] = q.x - p.x;
        r[2 * i + 1] = q.y - p.y;
    }
    r
}

fn refine(params: Params, object: &[Point3<f64>], image: &[Point2<f64>], width: u32, height: u32) -> Params {
    let mut params = params;
    let mut r = residuals(&params.camera(width, height), object, image);
    let mut cost = r.norm_squared();
    let mut mu = 1e-3;

    for _ in 0..REFINE_ITERATIONS {
        let mut jacobian = DMatrix::<f64>::zeros(r.len(), 7);
        for j in 0..7 {
            let step = 1e-6 * params.0[j].abs().max(1.0);
            let mut plus = params;
            let mut minus = params;
            plus.0[j] += step;
            minus.0[j] -= step;
            let d = (residuals(&plus.camera(width, height), object, image)
                - residuals(&minus.camera(width, height), object, image))
                / (2.0 * step);
            jacobian.set_column(j, &d);
        }

        let jt = jacobian.transpose();
        let jtj = &jt * &jacobian;
        let gradient = &jt * &r;

        let mut improved = false;
        while mu < 1e10 {
            let mut damped = jtj.clone();
            for d in 0..7 {
                damped[(d, d)] += mu * jtj[(d, d)].max(1e-12);
            }
            let Some(delta) = damped.lu().solve(&(-&gradient)) else {
                mu *= 10.0;
                continue;
            };

            let mut candidate = params;
            for (p, d) in candidate.0.iter_mut().zip(delta.iter()) {
                *p += d;
            }
            let candidate_r = residuals(&candidate.camera(width, height), object, image);
            let candidate_cost = candidate_r.norm_squared();
            if candidate_cost < cost {
                let gain = cost - candidate_cost;
                params = candidate;
                r = candidate_r;
                cost = candidate_cost;
                mu = (mu / 10.0).max(1e-12);
                improved = gain > 1e-12 * cost.max(1e-12);
                break;
            }
            mu *= 10.0;
        }

        if !improved {
            break;
        }
    }
    params
}

/// Single view calibration from planar correspondences.
/// `object` are board coordinates on the z = 0 plane, `image` the matching pixels.
#[tracing::instrument(skip_all, fields(points = object.len()))]
pub fn calibrate_planar(
    object: &[Point2<f64>],
    image: &[Point2<f64>],
    width: u32,
    height: u32,
) -> Result<CameraModel, CalibrationError> {
    if object.len() != image.len() || object.len() < 6 {
        return Err(CalibrationError::Degenerate("calibration needs 6 correspondences"));
    }

    let h = find_homography(object, image)?;
    let center = Point2::new(width as f64 / 2.0, height as f64 / 2.0);
    let fallback = width.max(height) as f64;
    let focal = match focal_from_homography(&h, &center) {
        Some(f) if f > 0.1 * fallback && f < 20.0 * fallback => f,
        other => {
            tracing::warn!("focal length not observable ({:?}), using {}", other, fallback);
            fallback
        }
    };

    let k = Matrix3::new(focal, 0.0, center.x, 0.0, focal, center.y, 0.0, 0.0, 1.0);
    let (rotation, t) = pose_from_homography(&h, &k)?;

    let object3: Vec<Point3<f64>> = object.iter().map(|p| Point3::new(p.x, p.y, 0.0)).collect();
    let params = refine(Params::new(focal, &rotation, &t), &object3, image, width, height);

    let mut camera = params.camera(width, height);
    let r = residuals(&camera, &object3, image);
    camera.reprojection_error = (r.norm_squared() / object.len() as f64).sqrt();
    tracing::info!(
        focal = camera.intrinsic_matrix[0],
        error = camera.reprojection_error,
        "camera calibrated"
    );
    Ok(camera)
}
