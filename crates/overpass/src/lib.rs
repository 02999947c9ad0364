use std::error;
use std::fmt;
use std::sync::Arc;

use serde::Deserialize;
use utility::geo::{haversine_distance_m, padded_bounding_box};

/// Bounding-box padding around a route when querying for speed data.
const BBOX_PADDING_M: f64 = 100.0;
/// A segment matches a way node only within this distance.
const NODE_MATCH_DISTANCE_M: f64 = 50.0;
/// Cap applied to segments with no matched way.
pub const DEFAULT_SPEED_CAP_MPH: f64 = 25.0;

const MPH_TO_MPS: f64 = 0.44704;
const KMH_PER_MPH: f64 = 1.609344;

#[derive(Debug, Clone)]
pub enum ApiError {
    RequestError(Arc<reqwest::Error>),
    JsonError(Arc<serde_json::Error>),
    InvalidResponse {
        status_code: reqwest::StatusCode,
        response: Option<String>,
    },
    EmptyPolyline,
}

impl error::Error for ApiError {}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ApiError::RequestError(e) => write!(f, "HTTP request error: {}", e),
            ApiError::JsonError(e) => write!(f, "JSON parse error: {}", e),
            ApiError::InvalidResponse {
                status_code,
                response,
            } => match response {
                Some(text) => write!(f, "Invalid Response ({}): {}", status_code, text),
                None => write!(f, "Invalid Response ({})", status_code),
            },
            ApiError::EmptyPolyline => write!(f, "polyline has no segments"),
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        ApiError::RequestError(Arc::new(e))
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(e: serde_json::Error) -> Self {
        ApiError::JsonError(Arc::new(e))
    }
}

/// Per-segment speed caps and road names for one route polyline.
#[derive(Debug, Clone, Default)]
pub struct SpeedProfile {
    pub segment_speed_caps_mps: Vec<f64>,
    pub segment_road_names: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct OverpassResponse {
    #[serde(default)]
    elements: Vec<OverpassElement>,
}

#[derive(Debug, Deserialize)]
struct OverpassElement {
    #[serde(default)]
    tags: OverpassTags,
    #[serde(default)]
    geometry: Vec<OverpassPoint>,
}

#[derive(Debug, Default, Deserialize)]
struct OverpassTags {
    #[serde(default)]
    maxspeed: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OverpassPoint {
    lat: f64,
    lon: f64,
}

/// Client for the Overpass road-metadata endpoint.
#[derive(Clone)]
pub struct OverpassClient {
    endpoint: String,
    http: reqwest::Client,
}

impl OverpassClient {
    pub fn new(endpoint: impl Into<String>, http: reqwest::Client) -> Self {
        Self {
            endpoint: endpoint.into(),
            http,
        }
    }

    /// Fetch speed caps and road names for every segment of a polyline by
    /// querying ways with a `maxspeed` tag inside the padded route bbox and
    /// matching each segment midpoint to the nearest way node.
    pub async fn speed_profile(&self, polyline: &[(f64, f64)]) -> Result<SpeedProfile, ApiError> {
        if polyline.len() < 2 {
            return Err(ApiError::EmptyPolyline);
        }
        let (south, west, north, east) =
            padded_bounding_box(polyline, BBOX_PADDING_M).ok_or(ApiError::EmptyPolyline)?;

        let query = format!(
            "[out:json][timeout:25];way[\"maxspeed\"]({south},{west},{north},{east});out geom;"
        );

        let response = self
            .http
            .post(&self.endpoint)
            .body(query)
            .send()
            .await?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(ApiError::InvalidResponse {
                status_code: status,
                response: response.text().await.ok(),
            });
        }

        let parsed: OverpassResponse = response.json().await?;
        Ok(build_profile(polyline, &parsed))
    }
}

fn build_profile(polyline: &[(f64, f64)], response: &OverpassResponse) -> SpeedProfile {
    // Flatten way geometry into one node list carrying its way's metadata.
    let mut nodes: Vec<(f64, f64, f64, &str)> = Vec::new();
    for way in &response.elements {
        let mph = way
            .tags
            .maxspeed
            .as_deref()
            .and_then(parse_maxspeed_mph)
            .unwrap_or(DEFAULT_SPEED_CAP_MPH);
        let name = way.tags.name.as_deref().unwrap_or("");
        for point in &way.geometry {
            nodes.push((point.lat, point.lon, mph, name));
        }
    }

    let segment_count = polyline.len() - 1;
    let mut caps = Vec::with_capacity(segment_count);
    let mut names = Vec::with_capacity(segment_count);

    for segment in polyline.windows(2) {
        let mid_lat = (segment[0].0 + segment[1].0) / 2.0;
        let mid_lon = (segment[0].1 + segment[1].1) / 2.0;

        let mut best: Option<(f64, f64, &str)> = None;
        for &(lat, lon, mph, name) in &nodes {
            let dist = haversine_distance_m(mid_lat, mid_lon, lat, lon);
            if dist <= NODE_MATCH_DISTANCE_M
                && best.map_or(true, |(best_dist, _, _)| dist < best_dist)
            {
                best = Some((dist, mph, name));
            }
        }

        match best {
            Some((_, mph, name)) => {
                caps.push(mph * MPH_TO_MPS);
                names.push(name.to_owned());
            }
            None => {
                caps.push(DEFAULT_SPEED_CAP_MPH * MPH_TO_MPS);
                names.push(String::new());
            }
        }
    }

    SpeedProfile {
        segment_speed_caps_mps: caps,
        segment_road_names: names,
    }
}

/// Parse an OSM `maxspeed` value as miles per hour. Plain numbers are mph;
/// a `km/h` (or `kmh`) suffix is converted.
pub fn parse_maxspeed_mph(raw: &str) -> Option<f64> {
    let text = raw.trim().to_lowercase();
    let digits: String = text
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    let value: f64 = digits.parse().ok()?;
    if text.contains("km/h") || text.contains("kmh") || text.contains("kph") {
        Some(value / KMH_PER_MPH)
    } else {
        Some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maxspeed_plain_and_suffixed() {
        assert_eq!(parse_maxspeed_mph("25"), Some(25.0));
        assert_eq!(parse_maxspeed_mph("25 mph"), Some(25.0));
        let kmh = parse_maxspeed_mph("40 km/h").unwrap();
        assert!((kmh - 24.85).abs() < 0.1, "got {kmh}");
        assert_eq!(parse_maxspeed_mph("signals"), None);
    }

    #[test]
    fn unmatched_segments_get_default_cap() {
        let polyline = vec![(0.0, 0.0), (0.0, 0.001), (0.0, 0.002)];
        let response = OverpassResponse { elements: vec![] };
        let profile = build_profile(&polyline, &response);
        assert_eq!(profile.segment_speed_caps_mps.len(), 2);
        for cap in &profile.segment_speed_caps_mps {
            assert!((cap - DEFAULT_SPEED_CAP_MPH * MPH_TO_MPS).abs() < 1e-9);
        }
    }

    #[test]
    fn nearby_way_node_stamps_segment() {
        let polyline = vec![(0.0, 0.0), (0.0, 0.0008)];
        let response = OverpassResponse {
            elements: vec![OverpassElement {
                tags: OverpassTags {
                    maxspeed: Some("40 mph".into()),
                    name: Some("University Ave".into()),
                },
                geometry: vec![OverpassPoint {
                    lat: 0.0,
                    lon: 0.0004,
                }],
            }],
        };
        let profile = build_profile(&polyline, &response);
        assert!((profile.segment_speed_caps_mps[0] - 40.0 * MPH_TO_MPS).abs() < 1e-9);
        assert_eq!(profile.segment_road_names[0], "University Ave");
    }
}
