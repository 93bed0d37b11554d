use egui::{Align2, Color32, FontId, Painter, Pos2, Rect, Shape, Stroke};
use glam::Vec2;

use crate::charts::hot;
use rallyq_calib::{Calibration, ReferenceLines};
use rallyq_common::{PoseFrame, POSE_CONNECTIONS};

const GRID: Color32 = Color32::from_rgb(0, 255, 0);
const FOOT: Color32 = Color32::from_rgb(255, 255, 0);
const COVERED: Color32 = Color32::from_rgb(255, 0, 0);

/// Screen position of a normalized point inside `rect`
pub fn to_screen(rect: Rect, point: Vec2) -> Pos2 {
    Pos2::new(
        rect.left() + point.x * rect.width(),
        rect.top() + point.y * rect.height(),
    )
}

/// Largest rect of the given aspect ratio centered in `outer`
pub fn fit_rect(outer: Rect, aspect: f32) -> Rect {
    if aspect <= 0.0 || outer.height() <= 0.0 {
        return outer;
    }
    let size = if outer.width() / outer.height() > aspect {
        egui::vec2(outer.height() * aspect, outer.height())
    } else {
        egui::vec2(outer.width(), outer.width() / aspect)
    };
    Rect::from_center_size(outer.center(), size)
}

/// Cells of the floor grid.
/// With `coverage` the cells are filled with their heat, covered ones outlined in red.
/// Cells under a foot are outlined in yellow.
pub fn draw_grid(painter: &Painter, rect: Rect, calibration: &Calibration, coverage: Option<&[f32]>, foot_cells: &[usize]) {
    let font = FontId::proportional(12.0);

    for cell in &calibration.cells {
        let points: Vec<Pos2> = cell.corners.iter().map(|&c| to_screen(rect, c)).collect();
        let ratio = coverage.and_then(|c| c.get(cell.index)).copied();

        if let Some(ratio) = ratio {
            painter.add(Shape::convex_polygon(points.clone(), hot(ratio / 100.0), Stroke::NONE));
        }

        let outline = if foot_cells.contains(&cell.index) {
            Stroke::new(3.0, FOOT)
        } else if ratio.is_some_and(|r| r > 0.0) {
            Stroke::new(2.0, COVERED)
        } else {
            Stroke::new(1.5, GRID)
        };
        painter.add(Shape::closed_line(points, outline));

        let center = to_screen(rect, rallyq_calib::quad_center(&cell.corners));
        painter.text(center, Align2::CENTER_CENTER, &cell.label, font.clone(), Color32::WHITE);
    }
}

/// Height reference post and bar
pub fn draw_reference(painter: &Painter, rect: Rect, reference: &ReferenceLines) {
    let stroke = Stroke::new(2.0, Color32::WHITE);
    let segments = [reference.post, reference.bar, reference.drops[0], reference.drops[1]];
    for [a, b] in segments {
        painter.line_segment([to_screen(rect, a), to_screen(rect, b)], stroke);
    }
}

/// Bones and joints of a pose
pub fn draw_skeleton(painter: &Painter, rect: Rect, pose: &PoseFrame, color: Color32) {
    let stroke = Stroke::new(2.0, color);
    for &(a, b) in POSE_CONNECTIONS.iter() {
        if let (Some(a), Some(b)) = (pose.point2(a), pose.point2(b)) {
            painter.line_segment([to_screen(rect, a), to_screen(rect, b)], stroke);
        }
    }
    for landmark in pose.landmarks() {
        painter.circle_filled(to_screen(rect, landmark.truncate()), 3.0, color);
    }
}
