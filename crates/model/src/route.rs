use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use utility::geo::haversine_distance_m;

/// A route with its decoded shape and per-segment road metadata.
///
/// `cumulative_distances_m` has one entry per polyline point and is
/// non-decreasing; the per-segment vectors (`segment_speed_caps_mps`,
/// `segment_road_names`) have one entry per segment when populated.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Route {
    pub route_id: i64,
    pub description: String,
    pub info_text: String,
    pub color: Option<String>,
    pub encoded_polyline: String,
    pub polyline: Vec<(f64, f64)>,
    pub cumulative_distances_m: Vec<f64>,
    pub total_length_m: f64,
    pub segment_speed_caps_mps: Vec<f64>,
    pub segment_road_names: Vec<String>,
}

impl Route {
    /// Build a route from a decoded polyline, precomputing cumulative
    /// haversine distances. Speed caps and road names are stamped later by
    /// the road-metadata fetch.
    pub fn from_polyline(
        route_id: i64,
        description: String,
        info_text: String,
        color: Option<String>,
        encoded_polyline: String,
        polyline: Vec<(f64, f64)>,
    ) -> Self {
        let mut cumulative = Vec::with_capacity(polyline.len());
        let mut total = 0.0;
        for (index, point) in polyline.iter().enumerate() {
            if index > 0 {
                let prev = polyline[index - 1];
                total += haversine_distance_m(prev.0, prev.1, point.0, point.1);
            }
            cumulative.push(total);
        }

        Self {
            route_id,
            description,
            info_text,
            color,
            encoded_polyline,
            polyline,
            cumulative_distances_m: cumulative,
            total_length_m: total,
            segment_speed_caps_mps: Vec::new(),
            segment_road_names: Vec::new(),
        }
    }

    /// Display name used by dashboards: the description, suffixed with the
    /// info text when one is set.
    pub fn display_name(&self) -> String {
        let info = self.info_text.trim();
        if info.is_empty() {
            self.description.clone()
        } else {
            format!("{} {}", self.description, info)
        }
    }

    pub fn segment_count(&self) -> usize {
        self.polyline.len().saturating_sub(1)
    }

    /// Length of segment `index` in meters.
    pub fn segment_length_m(&self, index: usize) -> f64 {
        match (
            self.cumulative_distances_m.get(index),
            self.cumulative_distances_m.get(index + 1),
        ) {
            (Some(a), Some(b)) => b - a,
            _ => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Route {
        Route::from_polyline(
            1,
            "Blue Line".into(),
            "".into(),
            Some("#0000ff".into()),
            "abc".into(),
            vec![(0.0, 0.0), (0.0, 0.001), (0.001, 0.001)],
        )
    }

    #[test]
    fn cumulative_distances_are_non_decreasing() {
        let route = sample();
        assert_eq!(route.cumulative_distances_m.len(), route.polyline.len());
        assert_eq!(route.cumulative_distances_m[0], 0.0);
        for pair in route.cumulative_distances_m.windows(2) {
            assert!(pair[1] >= pair[0]);
        }
        assert_eq!(
            route.total_length_m,
            *route.cumulative_distances_m.last().unwrap()
        );
    }

    #[test]
    fn display_name_includes_info_text() {
        let mut route = sample();
        assert_eq!(route.display_name(), "Blue Line");
        route.info_text = "Express".into();
        assert_eq!(route.display_name(), "Blue Line Express");
    }
}
