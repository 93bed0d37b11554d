use glam::Vec3;

/// Angle in degrees at `m` between the segments `m -> a` and `m -> b`.
///
/// Degenerate segments (a point on top of `m`) give 0.
pub fn inner_angle(a: Vec3, m: Vec3, b: Vec3) -> f32 {
    let ma = a - m;
    let mb = b - m;
    if ma.length_squared() == 0.0 || mb.length_squared() == 0.0 {
        return 0.0;
    }
    let dot = ma.dot(mb);
    let crs = ma.cross(mb);
    crs.length().atan2(dot).to_degrees()
}
