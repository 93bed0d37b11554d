//! Inner corner detection of a black and white checkerboard.
//!
//! Dark squares are separated from each other by a local threshold and a
//! small erosion, each one is fitted with a quadrilateral and the corners shared by
//! two diagonal squares become the inner corners of the pattern. The corners
//! are then put in lattice order and refined to sub-pixel accuracy.
//!
//! Pixel centers sit on integer coordinates.

use image::{GrayImage, Luma};
use imageproc::contrast::{adaptive_threshold, otsu_level};
use imageproc::distance_transform::Norm;
use imageproc::geometry::convex_hull;
use imageproc::morphology::erode;
use imageproc::point::Point;
use imageproc::region_labelling::{connected_components, Connectivity};
use nalgebra::{Matrix2, Point2, Vector2};

use crate::solve::{find_homography, transform};
use crate::CalibrationError;

/// Farthest distance between the corners of two squares meeting at the same
/// inner corner, relative to the side of the smaller square
const PAIRING_DISTANCE: f64 = 0.5;

/// Largest distance from an integer lattice position accepted while ordering
const LATTICE_TOLERANCE: f64 = 0.3;

const REFINE_ITERATIONS: usize = 20;

/// Fixed point scale of inner corners while taking their hull
const CORNER_SCALE: f64 = 64.0;

/// Adaptive block radii as divisors of the shorter frame side, in the order tried
const BLOCK_DIVISORS: [u32; 3] = [10, 20, 5];

/// How dark squares are told apart from the rest of the frame
#[derive(Debug, Clone, Copy, PartialEq)]
enum Binarization {
    /// Darker than the mean of the surrounding block
    Adaptive { radius: u32 },
    /// Below a single level for the whole frame
    Otsu,
}

impl Binarization {
    fn attempts(gray: &GrayImage) -> Vec<Self> {
        let side = gray.width().min(gray.height());
        let mut attempts: Vec<Self> = vec![];
        for radius in BLOCK_DIVISORS.map(|d| side / d) {
            let attempt = Self::Adaptive { radius };
            if radius >= 2 && !attempts.contains(&attempt) {
                attempts.push(attempt);
            }
        }
        attempts.push(Self::Otsu);
        attempts
    }

    /// Dark pixels white, everything else black
    fn dark_mask(self, gray: &GrayImage) -> GrayImage {
        match self {
            Self::Adaptive { radius } => {
                let mut mask = adaptive_threshold(gray, radius);
                image::imageops::invert(&mut mask);
                mask
            }
            Self::Otsu => {
                let level = otsu_level(gray);
                let mut mask = gray.clone();
                for p in mask.pixels_mut() {
                    p.0[0] = if p.0[0] <= level { 255 } else { 0 };
                }
                mask
            }
        }
    }
}

fn cross(o: &Point2<f64>, a: &Point2<f64>, b: &Point2<f64>) -> f64 {
    (a.x - o.x) * (b.y - o.y) - (a.y - o.y) * (b.x - o.x)
}

fn triangle_area(a: &Point2<f64>, b: &Point2<f64>, c: &Point2<f64>) -> f64 {
    cross(a, b, c).abs() / 2.0
}

/// Hull vertices divided by `scale`, without repeated or collinear ones
fn hull(points: &[Point<i64>], scale: f64) -> Vec<Point2<f64>> {
    let mut hull: Vec<Point2<f64>> = convex_hull(points)
        .into_iter()
        .map(|p| Point2::new(p.x as f64 / scale, p.y as f64 / scale))
        .collect();
    hull.dedup();
    if hull.len() > 1 && hull.first() == hull.last() {
        hull.pop();
    }

    let n = hull.len();
    if n < 3 {
        return hull;
    }
    (0..n)
        .filter(|&i| cross(&hull[(i + n - 1) % n], &hull[i], &hull[(i + 1) % n]).abs() > f64::EPSILON)
        .map(|i| hull[i])
        .collect()
}

/// Largest quadrilateral with its corners on the hull, in hull order
fn max_area_quad(hull: &[Point2<f64>]) -> Option<[Point2<f64>; 4]> {
    let n = hull.len();
    if n < 4 {
        return None;
    }

    let mut best: Option<(f64, [usize; 4])> = None;
    for i in 0..n {
        for k in i + 2..n {
            if n - (k - i) < 2 {
                continue;
            }
            let (j, left) = (i + 1..k)
                .map(|j| (j, triangle_area(&hull[i], &hull[j], &hull[k])))
                .max_by(|a, b| a.1.total_cmp(&b.1))?;
            let (l, right) = (k + 1..i + n)
                .map(|l| (l % n, triangle_area(&hull[k], &hull[l % n], &hull[i])))
                .max_by(|a, b| a.1.total_cmp(&b.1))?;

            let area = left + right;
            if best.map_or(true, |(a, _)| area > a) {
                best = Some((area, [i, j, k, l]));
            }
        }
    }
    best.map(|(_, idx)| idx.map(|i| hull[i]))
}

fn quad_area(quad: &[Point2<f64>; 4]) -> f64 {
    triangle_area(&quad[0], &quad[1], &quad[2]) + triangle_area(&quad[2], &quad[3], &quad[0])
}

/// Connected region of the dark mask
#[derive(Debug, Default)]
struct Blob {
    area: usize,
    touches_border: bool,
    /// First and last pixel of every row, enough for the hull
    outline: Vec<Point<i64>>,
    row: Option<u32>,
    row_start: usize,
}

impl Blob {
    /// Pixels must come in row major order
    fn add(&mut self, x: u32, y: u32, on_border: bool) {
        self.area += 1;
        self.touches_border |= on_border;

        let p = Point::new(x as i64, y as i64);
        if self.row != Some(y) {
            self.row = Some(y);
            self.row_start = self.outline.len();
            self.outline.push(p);
        } else if self.outline.len() == self.row_start + 1 {
            self.outline.push(p);
        } else if let Some(last) = self.outline.last_mut() {
            *last = p;
        }
    }

    fn fit_square(&self) -> Option<Square> {
        let corners = max_area_quad(&hull(&self.outline, 1.0))?;
        let area = quad_area(&corners);
        let fill = area / self.area as f64;
        if !(0.5..=1.5).contains(&fill) {
            return None;
        }
        let shortest = (0..4)
            .map(|i| (corners[(i + 1) % 4] - corners[i]).norm())
            .fold(f64::INFINITY, f64::min);
        (shortest >= 2.0).then(|| Square {
            corners,
            side: area.sqrt(),
        })
    }
}

/// A dark square fitted with a quadrilateral
#[derive(Debug)]
struct Square {
    corners: [Point2<f64>; 4],
    side: f64,
}

/// Dark regions of the mask shaped like a square, once a 3x3 erosion has
/// split the squares touching at their corners. Regions on the frame border
/// are dropped.
fn dark_squares(mask: &GrayImage, max_area: usize) -> Vec<Square> {
    let eroded = erode(mask, Norm::LInf, 1);
    let labels = connected_components(&eroded, Connectivity::Four, Luma([0u8]));
    let (w, h) = labels.dimensions();

    let mut blobs: Vec<Blob> = vec![];
    for (x, y, label) in labels.enumerate_pixels() {
        let label = label.0[0] as usize;
        if label == 0 {
            continue;
        }
        if blobs.len() <= label {
            blobs.resize_with(label + 1, Blob::default);
        }
        blobs[label].add(x, y, x == 0 || y == 0 || x + 1 == w || y + 1 == h);
    }

    blobs
        .iter()
        .filter(|b| !b.touches_border && (9..=max_area).contains(&b.area))
        .filter_map(Blob::fit_square)
        .collect()
}

/// Corners shared by two squares, taken as the midpoint of the pair
fn pair_corners(squares: &[Square]) -> Vec<Point2<f64>> {
    let mut candidates = vec![];
    for (a, sa) in squares.iter().enumerate() {
        for (b, sb) in squares.iter().enumerate().skip(a + 1) {
            let limit = PAIRING_DISTANCE * sa.side.min(sb.side);
            for (ca, pa) in sa.corners.iter().enumerate() {
                for (cb, pb) in sb.corners.iter().enumerate() {
                    let distance = (pa - pb).norm();
                    if distance < limit {
                        candidates.push((distance, (a, ca), (b, cb)));
                    }
                }
            }
        }
    }
    candidates.sort_by(|x, y| x.0.total_cmp(&y.0));

    let mut used = vec![[false; 4]; squares.len()];
    let mut corners = vec![];
    for (_, (a, ca), (b, cb)) in candidates {
        if used[a][ca] || used[b][cb] {
            continue;
        }
        used[a][ca] = true;
        used[b][cb] = true;
        corners.push(Point2::from((squares[a].corners[ca].coords + squares[b].corners[cb].coords) / 2.0));
    }
    corners
}

/// Sort corners row by row, starting from the outer corner closest to the
/// image top-left. Rows run towards the neighbouring outer corner for which
/// the pattern turns clockwise on screen.
fn order_lattice(corners: &[Point2<f64>], cols: usize, rows: usize) -> Option<Vec<Point2<f64>>> {
    let scaled: Vec<Point<i64>> = corners
        .iter()
        .map(|c| Point::new((c.x * CORNER_SCALE).round() as i64, (c.y * CORNER_SCALE).round() as i64))
        .collect();
    let outer = max_area_quad(&hull(&scaled, CORNER_SCALE))?;

    let mut origins: Vec<usize> = (0..4).collect();
    origins.sort_by(|a, b| (outer[*a].x + outer[*a].y).total_cmp(&(outer[*b].x + outer[*b].y)));

    let ideal = [
        Point2::new(0.0, 0.0),
        Point2::new((cols - 1) as f64, 0.0),
        Point2::new((cols - 1) as f64, (rows - 1) as f64),
        Point2::new(0.0, (rows - 1) as f64),
    ];

    for o in origins {
        let origin = outer[o];
        let (mut along_row, mut along_col) = (outer[(o + 1) % 4], outer[(o + 3) % 4]);
        if cross(&origin, &along_row, &along_col) < 0.0 {
            std::mem::swap(&mut along_row, &mut along_col);
        }
        let observed = [origin, along_row, outer[(o + 2) % 4], along_col];

        let Ok(h) = find_homography(&observed, &ideal) else {
            continue;
        };
        if let Some(ordered) = assign_lattice(&h, corners, cols, rows) {
            return Some(ordered);
        }
    }
    None
}

fn assign_lattice(h: &nalgebra::Matrix3<f64>, corners: &[Point2<f64>], cols: usize, rows: usize) -> Option<Vec<Point2<f64>>> {
    let mut ordered: Vec<Option<Point2<f64>>> = vec![None; cols * rows];
    for corner in corners {
        let p = transform(h, corner);
        let (c, r) = (p.x.round(), p.y.round());
        if (p.x - c).abs() > LATTICE_TOLERANCE || (p.y - r).abs() > LATTICE_TOLERANCE {
            return None;
        }
        if c < 0.0 || r < 0.0 || c >= cols as f64 || r >= rows as f64 {
            return None;
        }
        let slot = &mut ordered[r as usize * cols + c as usize];
        if slot.is_some() {
            return None;
        }
        *slot = Some(*corner);
    }
    ordered.into_iter().collect()
}

/// Move a corner to the point where the surrounding edges meet.
/// Every gradient in the window is orthogonal to the segment joining its
/// pixel to the corner.
pub fn refine_corner(gray: &GrayImage, corner: Point2<f64>, radius: i64) -> Point2<f64> {
    let (w, h) = (gray.width() as i64, gray.height() as i64);
    let at = |x: i64, y: i64| gray.get_pixel(x as u32, y as u32).0[0] as f64;

    let mut current = corner;
    for _ in 0..REFINE_ITERATIONS {
        let (cx, cy) = (current.x.round() as i64, current.y.round() as i64);
        if cx - radius < 1 || cy - radius < 1 || cx + radius >= w - 1 || cy + radius >= h - 1 {
            return current;
        }

        let mut a = Matrix2::zeros();
        let mut b = Vector2::zeros();
        for y in cy - radius..=cy + radius {
            for x in cx - radius..=cx + radius {
                let g = Vector2::new(
                    (at(x + 1, y) - at(x - 1, y)) / 2.0,
                    (at(x, y + 1) - at(x, y - 1)) / 2.0,
                );
                let ggt = g * g.transpose();
                a += ggt;
                b += ggt * Vector2::new(x as f64, y as f64);
            }
        }

        let Some(next) = a.try_inverse().map(|inv| Point2::from(inv * b)) else {
            return current;
        };
        if (next - corner).norm() > radius as f64 {
            return corner;
        }
        let step = (next - current).norm();
        current = next;
        if step < 0.01 {
            break;
        }
    }
    current
}

/// Inner corners of a checkerboard with `cols` x `rows` inner corners, row major.
/// Adaptive thresholds at a few block sizes are tried before a global one.
#[tracing::instrument(skip(gray), fields(w = gray.width(), h = gray.height()))]
pub fn find_chessboard_corners(gray: &GrayImage, cols: usize, rows: usize) -> Result<Vec<Point2<f64>>, CalibrationError> {
    let expected = cols * rows;
    let not_found = |found| CalibrationError::PatternNotFound { found, expected };
    if cols < 2 || rows < 2 {
        return Err(not_found(0));
    }

    let max_area = (gray.width() * gray.height()) as usize / 16;
    let mut most = 0;
    for binarization in Binarization::attempts(gray) {
        let squares = dark_squares(&binarization.dark_mask(gray), max_area);
        let corners = pair_corners(&squares);
        tracing::trace!(?binarization, squares = squares.len(), corners = corners.len(), "dark squares");
        most = most.max(corners.len());
        if corners.len() != expected {
            continue;
        }
        let Some(ordered) = order_lattice(&corners, cols, rows) else {
            continue;
        };

        let mut sides: Vec<f64> = squares.iter().map(|s| s.side).collect();
        sides.sort_by(f64::total_cmp);
        let radius = (sides[sides.len() / 2] * 0.25).round().clamp(2.0, 6.0) as i64;

        return Ok(ordered
            .into_iter()
            .map(|c| refine_corner(gray, c, radius))
            .collect());
    }

    tracing::debug!("found at most {} inner corners, expected {}", most, expected);
    Err(not_found(most))
}
