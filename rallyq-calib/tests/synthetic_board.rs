use image::{Rgb, RgbImage};
use nalgebra::{Matrix3, Point3, Rotation3, Vector3};

use rallyq_calib::{Calibration, CameraModel, GridSpec};

const WIDTH: u32 = 1280;
const HEIGHT: u32 = 720;
const FOCAL: f64 = 950.0;
const SAMPLES: u32 = 4;

/// Camera 4 m above the floor behind the board, looking down the grid
fn ground_truth() -> CameraModel {
    let center = Vector3::new(120.0, 250.0, -400.0);
    let target = Vector3::new(150.0, -100.0, 0.0);

    let z = (target - center).normalize();
    let x = (Vector3::x() - z * z.x).normalize();
    let y = z.cross(&x);
    let rotation = Rotation3::from_matrix_unchecked(Matrix3::from_rows(&[
        x.transpose(),
        y.transpose(),
        z.transpose(),
    ]));
    CameraModel::new(FOCAL, WIDTH, HEIGHT, rotation, -(rotation * center))
}

/// Render the floor with a checkerboard lying at the board origin
fn render(camera: &CameraModel, spec: &GridSpec) -> RgbImage {
    let (cols, rows) = (spec.pattern_cols as f64, spec.pattern_rows as f64);
    let sq = spec.square_size;
    let center = camera.center();
    let to_board = camera.rotation().inverse();

    // Only pixels around the board need sampling
    let outline = [(-sq, -sq), (cols * sq, -sq), (cols * sq, rows * sq), (-sq, rows * sq)]
        .map(|(x, y)| camera.project(&Point3::new(x, y, 0.0)));
    let min_x = outline.iter().map(|p| p.x).fold(f64::INFINITY, f64::min) - 2.0;
    let max_x = outline.iter().map(|p| p.x).fold(f64::NEG_INFINITY, f64::max) + 2.0;
    let min_y = outline.iter().map(|p| p.y).fold(f64::INFINITY, f64::min) - 2.0;
    let max_y = outline.iter().map(|p| p.y).fold(f64::NEG_INFINITY, f64::max) + 2.0;

    RgbImage::from_fn(WIDTH, HEIGHT, |px, py| {
        let (u0, v0) = (px as f64, py as f64);
        if u0 < min_x || u0 > max_x || v0 < min_y || v0 > max_y {
            return Rgb([230, 230, 230]);
        }

        let mut dark = 0;
        for sy in 0..SAMPLES {
            for sx in 0..SAMPLES {
                let u = u0 - 0.5 + (sx as f64 + 0.5) / SAMPLES as f64;
                let v = v0 - 0.5 + (sy as f64 + 0.5) / SAMPLES as f64;
                let ray = Vector3::new((u - WIDTH as f64 / 2.0) / FOCAL, (v - HEIGHT as f64 / 2.0) / FOCAL, 1.0);
                let d = to_board * ray;
                if d.z <= 0.0 {
                    continue;
                }
                let s = -center.z / d.z;
                let (bx, by) = (center.x + s * d.x, center.y + s * d.y);
                let (i, j) = ((bx / sq + 1.0).floor(), (by / sq + 1.0).floor());
                if i >= 0.0 && j >= 0.0 && i <= cols && j <= rows && (i + j) as i64 % 2 == 0 {
                    dark += 1;
                }
            }
        }
        let level = (230.0 - dark as f64 / (SAMPLES * SAMPLES) as f64 * 200.0).round() as u8;
        Rgb([level, level, level])
    })
}

#[test]
fn calibrates_from_a_synthetic_frame() {
    let truth = ground_truth();
    let spec = GridSpec::default();
    let frame = render(&truth, &spec);

    let calibration = Calibration::from_frame(&frame, &spec).unwrap();
    let camera = &calibration.camera;
    assert!(camera.reprojection_error < 0.5, "error {}", camera.reprojection_error);
    assert!((camera.intrinsic_matrix[0] - FOCAL).abs() < 0.05 * FOCAL);

    let offset = (camera.center() - truth.center()).norm();
    assert!(offset < 0.05 * truth.center().coords.norm(), "camera off by {offset} cm");
}

#[test]
fn projected_cells_match_the_floor() {
    let truth = ground_truth();
    let spec = GridSpec::default();
    let calibration = Calibration::from_frame(&render(&truth, &spec), &spec).unwrap();

    assert_eq!(calibration.cells.len(), 18);
    for (k, cell) in calibration.cells.iter().enumerate() {
        assert_eq!(cell.index, k);
        let center = Point3::new(
            (cell.col as f64 + 0.5) * spec.cell_width,
            -(cell.row as f64 + 0.5) * spec.cell_height - spec.vertical_offset,
            0.0,
        );
        let on_screen = truth.project_normalized(&center);
        let found = calibration.cell_at(on_screen).map(|c| c.index);
        assert_eq!(found, Some(k), "center of {} at {on_screen}", cell.label);
    }
}

#[test]
fn blank_floor_is_not_calibrated() {
    let frame = RgbImage::from_pixel(WIDTH, HEIGHT, Rgb([200, 200, 200]));
    assert!(Calibration::from_frame(&frame, &GridSpec::default()).is_err());
}
