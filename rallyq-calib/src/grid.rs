use glam::{Vec2, Vec3};
use image::RgbImage;
use nalgebra::{Point2, Point3, Vector3};
use serde::{Deserialize, Serialize};

use crate::camera::CameraModel;
use crate::chessboard::find_chessboard_corners;
use crate::quad::{point_in_quad, Quad};
use crate::solve::calibrate_planar;
use crate::CalibrationError;

/// Checkerboard and floor grid geometry, lengths in centimeters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridSpec {
    /// Inner corners along a checkerboard row
    pub pattern_cols: usize,
    /// Inner corners along a checkerboard column
    pub pattern_rows: usize,
    pub square_size: f64,
    /// Grid cells along the board x axis
    pub cols: usize,
    /// Grid cells along the board y axis
    pub rows: usize,
    pub cell_width: f64,
    pub cell_height: f64,
    /// Distance of the first grid row from the board origin, along -y
    pub vertical_offset: f64,
    /// Height of the reference post and half length of its bar
    pub reference_height: f64,
    /// Empirical scale applied to the reference post on screen
    pub reference_ratio: f64,
}

impl Default for GridSpec {
    fn default() -> Self {
        Self {
            pattern_cols: 8,
            pattern_rows: 8,
            square_size: 10.0,
            cols: 3,
            rows: 6,
            cell_width: 100.0,
            cell_height: 75.0,
            vertical_offset: -15.0,
            reference_height: 76.0,
            reference_ratio: 0.8,
        }
    }
}

impl GridSpec {
    /// Board position of the grid vertex at row `i`, column `j`
    pub fn vertex(&self, i: usize, j: usize) -> Point3<f64> {
        Point3::new(
            j as f64 * self.cell_width,
            -(i as f64) * self.cell_height - self.vertical_offset,
            0.0,
        )
    }

    /// Board positions of the checkerboard inner corners, row major
    pub fn pattern_points(&self) -> Vec<Point2<f64>> {
        (0..self.pattern_rows)
            .flat_map(|r| {
                (0..self.pattern_cols)
                    .map(move |c| Point2::new(c as f64 * self.square_size, r as f64 * self.square_size))
            })
            .collect()
    }

    /// Physical area of one cell, square meters
    pub fn cell_area(&self) -> f64 {
        self.cell_width * self.cell_height / 10_000.0
    }

    /// Display name of a cell, rows before the middle are the right side.
    /// The digits count columns and rows away from the middle of the grid.
    pub fn label(&self, row: usize, col: usize) -> String {
        let half = self.rows / 2;
        let across = self.cols - 1 - col;
        if row < half {
            format!("R{}{}", across, half - 1 - row)
        } else {
            format!("L{}{}", across, row - half)
        }
    }

    /// Project every cell through a calibrated camera
    pub fn project_cells(&self, camera: &CameraModel) -> Vec<GridCell> {
        let mut cells = Vec::with_capacity(self.rows * self.cols);
        for i in 0..self.rows {
            for j in 0..self.cols {
                let corners = [(i, j), (i, j + 1), (i + 1, j + 1), (i + 1, j)]
                    .map(|(i, j)| camera.project_normalized(&self.vertex(i, j)));
                cells.push(GridCell {
                    index: i * self.cols + j,
                    row: i,
                    col: j,
                    label: self.label(i, j),
                    corners,
                });
            }
        }
        cells
    }

    /// Table height reference standing on the middle vertex of the far grid edge
    pub fn reference_lines(&self, camera: &CameraModel) -> ReferenceLines {
        let base = self.vertex(self.rows / 2, self.cols);
        let towards_camera = if camera.center().z < 0.0 { -1.0 } else { 1.0 };
        let up = Vector3::new(0.0, 0.0, towards_camera * self.reference_height * self.reference_ratio);
        let across = Vector3::new(0.0, self.reference_height, 0.0);

        let top = base + up;
        let ends = [top - across, top + across];
        let project = |p: Point3<f64>| camera.project_normalized(&p);

        ReferenceLines {
            post: [project(base), project(top)],
            bar: [project(ends[0]), project(ends[1])],
            drops: ends.map(|e| [project(e), project(e - up)]),
        }
    }
}

/// One floor region on screen
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridCell {
    pub index: usize,
    pub row: usize,
    pub col: usize,
    pub label: String,
    /// Normalized corners, around the cell starting at its (row, col) vertex
    pub corners: Quad,
}

impl GridCell {
    pub fn contains(&self, point: Vec2) -> bool {
        point_in_quad(point, &self.corners)
    }

    pub fn is_left(&self) -> bool {
        self.label.starts_with('L')
    }
}

/// Normalized segments of the height reference
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceLines {
    pub post: [Vec2; 2],
    pub bar: [Vec2; 2],
    pub drops: [[Vec2; 2]; 2],
}

/// Camera and projected grid, always replaced together
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    pub board: GridSpec,
    pub camera: CameraModel,
    pub cells: Vec<GridCell>,
    pub reference: ReferenceLines,
}

impl Calibration {
    pub fn from_camera(camera: CameraModel, board: GridSpec) -> Self {
        let cells = board.project_cells(&camera);
        let reference = board.reference_lines(&camera);
        Self {
            board,
            camera,
            cells,
            reference,
        }
    }

    /// Calibrate from a frame showing the checkerboard
    #[tracing::instrument(skip_all, fields(w = frame.width(), h = frame.height()))]
    pub fn from_frame(frame: &RgbImage, board: &GridSpec) -> Result<Self, CalibrationError> {
        let gray = image::imageops::grayscale(frame);
        let corners = find_chessboard_corners(&gray, board.pattern_cols, board.pattern_rows)?;
        let camera = calibrate_planar(&board.pattern_points(), &corners, frame.width(), frame.height())?;
        Ok(Self::from_camera(camera, board.clone()))
    }

    /// Calibrate from a packed RGB8 buffer
    pub fn from_rgb(width: u32, height: u32, pixels: Vec<u8>, board: &GridSpec) -> Result<Self, CalibrationError> {
        let frame = RgbImage::from_raw(width, height, pixels).ok_or(CalibrationError::InvalidFrame { width, height })?;
        Self::from_frame(&frame, board)
    }

    /// First cell containing a normalized point
    pub fn cell_at(&self, point: Vec2) -> Option<&GridCell> {
        self.cells.iter().find(|cell| cell.contains(point))
    }

    /// Cells as laid out on the coverage chart, from the far left to the far right
    pub fn chart_order(&self) -> Vec<&GridCell> {
        let mut left: Vec<&GridCell> = self.cells.iter().filter(|c| c.is_left()).collect();
        let mut right: Vec<&GridCell> = self.cells.iter().filter(|c| !c.is_left()).collect();
        left.sort_by(|a, b| b.label.cmp(&a.label));
        right.sort_by(|a, b| a.label.cmp(&b.label));
        left.extend(right);
        left
    }

    /// Approximate board position of a normalized image point, centimeters
    pub fn back_project(&self, point: Vec2) -> Vec3 {
        let resolution = self.camera.resolution();
        let pixel = resolution.denormalize(point);
        let p = self.camera.back_project(&Point2::new(pixel.x as f64, pixel.y as f64));
        Vec3::new(p.x as f32, p.y as f32, p.z as f32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::tests::tilted_camera;

    #[test]
    fn vertices_follow_the_board_axes() {
        let spec = GridSpec::default();
        assert_eq!(spec.vertex(0, 0), Point3::new(0.0, 15.0, 0.0));
        assert_eq!(spec.vertex(6, 3), Point3::new(300.0, -435.0, 0.0));
        assert_eq!(spec.pattern_points().len(), 64);
        assert_eq!(spec.pattern_points()[9], Point2::new(10.0, 10.0));
    }

    #[test]
    fn labels_mirror_around_the_middle() {
        let spec = GridSpec::default();
        let labels: Vec<String> = (0..6)
            .flat_map(|i| (0..3).map(move |j| (i, j)))
            .map(|(i, j)| spec.label(i, j))
            .collect();
        assert_eq!(
            labels,
            [
                "R22", "R12", "R02", "R21", "R11", "R01", "R20", "R10", "R00",
                "L20", "L10", "L00", "L21", "L11", "L01", "L22", "L12", "L02",
            ]
        );
    }

    #[test]
    fn cells_are_projected_in_order() {
        let calibration = Calibration::from_camera(tilted_camera(), GridSpec::default());
        assert_eq!(calibration.cells.len(), 18);
        for (k, cell) in calibration.cells.iter().enumerate() {
            assert_eq!(cell.index, k);
            assert_eq!(cell.index, cell.row * 3 + cell.col);
        }

        // Adjacent cells share their edge
        let (a, b) = (&calibration.cells[0], &calibration.cells[1]);
        assert_eq!(a.corners[1], b.corners[0]);
        assert_eq!(a.corners[2], b.corners[3]);
    }

    #[test]
    fn cell_lookup_uses_projected_centers() {
        let camera = tilted_camera();
        let spec = GridSpec::default();
        let calibration = Calibration::from_camera(camera.clone(), spec.clone());

        for cell in &calibration.cells {
            let center = Point3::new(
                (cell.col as f64 + 0.5) * spec.cell_width,
                -(cell.row as f64 + 0.5) * spec.cell_height - spec.vertical_offset,
                0.0,
            );
            let found = calibration.cell_at(camera.project_normalized(&center)).unwrap();
            assert_eq!(found.index, cell.index);
        }
        assert!(calibration.cell_at(Vec2::new(-1.0, -1.0)).is_none());
    }

    #[test]
    fn chart_runs_from_left_to_right() {
        let calibration = Calibration::from_camera(tilted_camera(), GridSpec::default());
        let labels: Vec<&str> = calibration.chart_order().iter().map(|c| c.label.as_str()).collect();
        assert_eq!(
            labels,
            [
                "L22", "L21", "L20", "L12", "L11", "L10", "L02", "L01", "L00",
                "R00", "R01", "R02", "R10", "R11", "R12", "R20", "R21", "R22",
            ]
        );
    }

    #[test]
    fn reference_post_rises_towards_the_camera() {
        let camera = tilted_camera();
        let spec = GridSpec::default();
        let reference = spec.reference_lines(&camera);

        // The post leaves the floor upwards on screen
        assert!(reference.post[1].y < reference.post[0].y);
        assert_eq!(reference.drops[0][0], reference.bar[0]);
        assert_eq!(reference.drops[1][0], reference.bar[1]);
        assert_eq!(reference.post[0], camera.project_normalized(&spec.vertex(3, 3)));
    }

    #[test]
    fn back_projection_recovers_floor_distances() {
        let calibration = Calibration::from_camera(tilted_camera(), GridSpec::default());
        let a = calibration.back_project(calibration.cells[0].corners[0]);
        let b = calibration.back_project(calibration.cells[0].corners[1]);
        // One cell width, scaled by the depth approximation
        let d = a.distance(b);
        assert!(d > 50.0 && d < 200.0, "{d}");
    }
}
