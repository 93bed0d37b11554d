use glam::Vec2;

/// Four corners of a convex region, in drawing order
pub type Quad = [Vec2; 4];

/// True if `point` lies strictly on the same side of all four edges.
/// Works for both windings, points on an edge may go either way.
pub fn point_in_quad(point: Vec2, quad: &Quad) -> bool {
    let mut signs = [0.0f32; 4];
    for (i, sign) in signs.iter_mut().enumerate() {
        let a = quad[i];
        let b = quad[(i + 1) % 4];
        *sign = (b - a).perp_dot(point - a);
    }
    signs.iter().all(|s| *s > 0.0) || signs.iter().all(|s| *s < 0.0)
}

/// Mean of the corners
pub fn quad_center(quad: &Quad) -> Vec2 {
    (quad[0] + quad[1] + quad[2] + quad[3]) * 0.25
}

#[cfg(test)]
mod tests {
    use super::*;

    const SQUARE: Quad = [
        Vec2::new(0.0, 0.0),
        Vec2::new(1.0, 0.0),
        Vec2::new(1.0, 1.0),
        Vec2::new(0.0, 1.0),
    ];

    #[test]
    fn inside_and_outside() {
        assert!(point_in_quad(Vec2::new(0.5, 0.5), &SQUARE));
        assert!(point_in_quad(Vec2::new(0.01, 0.99), &SQUARE));
        assert!(!point_in_quad(Vec2::new(1.5, 0.5), &SQUARE));
        assert!(!point_in_quad(Vec2::new(-0.1, -0.1), &SQUARE));
    }

    #[test]
    fn winding_does_not_matter() {
        let mut reversed = SQUARE;
        reversed.reverse();
        assert!(point_in_quad(Vec2::new(0.3, 0.6), &reversed));
        assert!(!point_in_quad(Vec2::new(0.3, 1.6), &reversed));
    }

    #[test]
    fn perspective_trapezoid() {
        // Far edge shorter than the near one, as a floor cell looks on screen
        let cell = [
            Vec2::new(0.40, 0.30),
            Vec2::new(0.55, 0.30),
            Vec2::new(0.70, 0.60),
            Vec2::new(0.20, 0.60),
        ];
        assert!(point_in_quad(Vec2::new(0.25, 0.58), &cell));
        assert!(!point_in_quad(Vec2::new(0.25, 0.35), &cell));
        assert!(point_in_quad(quad_center(&cell), &cell));
    }
}
