//! Single view calibration of a camera looking at the floor, and the
//! floor grid it projects on screen.
//!
//! Board coordinates are centimeters with the origin on the first inner
//! corner of the checkerboard, x along its rows, y along its columns and
//! z = x * y pointing away from the camera. Screen coordinates handed out
//! to the rest of the application are normalized by the frame size.

mod camera;
mod chessboard;
mod grid;
mod quad;
mod solve;
mod store;

pub use camera::CameraModel;
pub use chessboard::{find_chessboard_corners, refine_corner};
pub use grid::{Calibration, GridCell, GridSpec, ReferenceLines};
pub use quad::{point_in_quad, quad_center, Quad};
pub use solve::{calibrate_planar, find_homography};

#[derive(Debug, thiserror::Error)]
pub enum CalibrationError {
    #[error("checkerboard not found, {found} of {expected} inner corners")]
    PatternNotFound { found: usize, expected: usize },
    #[error("degenerate calibration: {0}")]
    Degenerate(&'static str),
    #[error("frame buffer does not hold a {width}x{height} RGB image")]
    InvalidFrame { width: u32, height: u32 },
    #[error("calibration holds {found} grid cells, expected {expected}")]
    CellCount { found: usize, expected: usize },
    #[error("unable to access calibration file: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed calibration file: {0}")]
    Json(#[from] serde_json::Error),
}
