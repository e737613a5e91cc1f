use crate::Point2D;

pub fn centroid(points: &[Point2D]) -> Option<Point2D> {
    let count = points.len();
    points
        .iter()
        .cloned()
        .reduce(|acc, el| (acc.0 + el.0, acc.1 + el.1))
        .map(|(x, y)| (x / count as f32, y / count as f32))
}

/// Pick the coordinate that moves "across" a line with the given
/// orientation: x for a vertical line, y for a horizontal one.
pub fn axis_value(p: &Point2D, use_x: bool) -> f32 {
    if use_x { p.0 } else { p.1 }
}

/// Convert a fraction of a frame dimension (0.0 = left/top, 1.0 = right/bottom)
/// into an absolute pixel coordinate. Fractions outside [0;1] are clamped.
pub fn fraction_to_pixel(fraction: f32, dimension: u32) -> f32 {
    (dimension as f32 * fraction.clamp(0., 1.)).floor()
}
