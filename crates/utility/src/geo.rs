pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

fn to_radians(degrees: f64) -> f64 {
    degrees * std::f64::consts::PI / 180.0
}

fn to_degrees(radians: f64) -> f64 {
    radians * 180.0 / std::f64::consts::PI
}

/// Great-circle distance between two points in meters.
pub fn haversine_distance_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let dlat = to_radians(lat2 - lat1);
    let dlon = to_radians(lon2 - lon1);

    let a = (dlat / 2.0).sin().powi(2)
        + to_radians(lat1).cos() * to_radians(lat2).cos() * (dlon / 2.0).sin().powi(2);

    2.0 * EARTH_RADIUS_M * a.sqrt().asin()
}

/// Initial bearing from point 1 to point 2, normalized to [0, 360).
pub fn bearing_deg(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let lat1_rad = to_radians(lat1);
    let lat2_rad = to_radians(lat2);
    let dlon = to_radians(lon2 - lon1);

    let y = dlon.sin() * lat2_rad.cos();
    let x = lat1_rad.cos() * lat2_rad.sin() - lat1_rad.sin() * lat2_rad.cos() * dlon.cos();

    normalize_heading(to_degrees(y.atan2(x)))
}

/// Normalize a heading in degrees to [0, 360).
pub fn normalize_heading(heading: f64) -> f64 {
    let wrapped = heading % 360.0;
    if wrapped < 0.0 {
        wrapped + 360.0
    } else {
        wrapped
    }
}

/// Smallest absolute angle between two headings, in [0, 180].
pub fn heading_diff_deg(a: f64, b: f64) -> f64 {
    let diff = (normalize_heading(a) - normalize_heading(b)).abs();
    if diff > 180.0 {
        360.0 - diff
    } else {
        diff
    }
}

/// Convert a lat/lon point into meters east/north of a reference point,
/// using a local tangent-plane approximation. Only valid over short ranges,
/// which covers projecting a vehicle onto a nearby route segment.
pub fn local_xy_m(ref_lat: f64, ref_lon: f64, lat: f64, lon: f64) -> (f64, f64) {
    let x = to_radians(lon - ref_lon) * to_radians(ref_lat).cos() * EARTH_RADIUS_M;
    let y = to_radians(lat - ref_lat) * EARTH_RADIUS_M;
    (x, y)
}

/// Result of projecting a point onto one polyline segment.
#[derive(Debug, Clone, Copy)]
pub struct SegmentProjection {
    /// Clamped parametric position along the segment, in [0, 1].
    pub t: f64,
    /// Squared perpendicular distance from the point to the projection, m^2.
    pub dist_sq_m: f64,
}

/// Project `(lat, lon)` onto the segment `a -> b` in a local tangent plane
/// centered on the point being projected.
pub fn project_onto_segment(
    lat: f64,
    lon: f64,
    a: (f64, f64),
    b: (f64, f64),
) -> SegmentProjection {
    let (ax, ay) = local_xy_m(lat, lon, a.0, a.1);
    let (bx, by) = local_xy_m(lat, lon, b.0, b.1);

    let dx = bx - ax;
    let dy = by - ay;
    let len_sq = dx * dx + dy * dy;

    // Degenerate segment: both endpoints coincide.
    if len_sq <= f64::EPSILON {
        return SegmentProjection {
            t: 0.0,
            dist_sq_m: ax * ax + ay * ay,
        };
    }

    // The point sits at the local origin, so project -a onto (b - a).
    let t = ((-ax) * dx + (-ay) * dy) / len_sq;
    let t = t.clamp(0.0, 1.0);

    let px = ax + t * dx;
    let py = ay + t * dy;

    SegmentProjection {
        t,
        dist_sq_m: px * px + py * py,
    }
}

/// Axis-aligned bounding box around a set of points, padded by `padding_m`
/// meters on every side. Returns `(south, west, north, east)`.
pub fn padded_bounding_box(points: &[(f64, f64)], padding_m: f64) -> Option<(f64, f64, f64, f64)> {
    let first = points.first()?;
    let mut south = first.0;
    let mut north = first.0;
    let mut west = first.1;
    let mut east = first.1;
    for &(lat, lon) in points.iter().skip(1) {
        south = south.min(lat);
        north = north.max(lat);
        west = west.min(lon);
        east = east.max(lon);
    }

    let lat_pad = to_degrees(padding_m / EARTH_RADIUS_M);
    let mid_lat = to_radians((south + north) / 2.0);
    let lon_pad = to_degrees(padding_m / (EARTH_RADIUS_M * mid_lat.cos()));

    Some((south - lat_pad, west - lon_pad, north + lat_pad, east + lon_pad))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn haversine_equator_degree() {
        // One degree of longitude at the equator is roughly 111.2 km.
        let d = haversine_distance_m(0.0, 0.0, 0.0, 1.0);
        assert!((d - 111_195.0).abs() < 100.0, "got {d}");
    }

    #[test]
    fn haversine_zero_distance() {
        assert_eq!(haversine_distance_m(38.03, -78.5, 38.03, -78.5), 0.0);
    }

    #[test]
    fn bearing_cardinal_directions() {
        assert!((bearing_deg(0.0, 0.0, 1.0, 0.0) - 0.0).abs() < 0.01);
        assert!((bearing_deg(0.0, 0.0, 0.0, 1.0) - 90.0).abs() < 0.01);
        assert!((bearing_deg(1.0, 0.0, 0.0, 0.0) - 180.0).abs() < 0.01);
        assert!((bearing_deg(0.0, 1.0, 0.0, 0.0) - 270.0).abs() < 0.01);
    }

    #[test]
    fn heading_diff_wraps_around() {
        assert_eq!(heading_diff_deg(350.0, 10.0), 20.0);
        assert_eq!(heading_diff_deg(10.0, 350.0), 20.0);
        assert_eq!(heading_diff_deg(90.0, 270.0), 180.0);
        assert_eq!(heading_diff_deg(-10.0, 10.0), 20.0);
    }

    #[test]
    fn projection_clamps_to_endpoints() {
        // Segment running east along the equator; point behind the start.
        let proj = project_onto_segment(0.0, -0.001, (0.0, 0.0), (0.0, 0.001));
        assert_eq!(proj.t, 0.0);

        // Point beyond the end.
        let proj = project_onto_segment(0.0, 0.002, (0.0, 0.0), (0.0, 0.001));
        assert_eq!(proj.t, 1.0);
    }

    #[test]
    fn projection_midpoint() {
        let proj = project_onto_segment(0.0005, 0.0005, (0.0, 0.0), (0.0, 0.001));
        assert!((proj.t - 0.5).abs() < 1e-6);
        // Perpendicular offset of ~55.6 m.
        let dist = proj.dist_sq_m.sqrt();
        assert!((dist - 55.6).abs() < 1.0, "got {dist}");
    }
}
