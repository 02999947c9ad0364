use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;

use model::stop::{ApproachSet, Bubble};
use serde::Deserialize;

pub const HEADWAY_CONFIG_FILE: &str = "headway_config.json";
pub const STOP_APPROACH_CONFIG_FILE: &str = "stop_approach.json";

const DEFAULT_BUBBLE_RADIUS_M: f64 = 25.0;

/// `headway_config.json`: which routes and stops the tracker watches.
/// Empty sets mean "all".
#[derive(Debug, Default, Deserialize)]
pub struct HeadwayConfig {
    #[serde(default)]
    pub route_ids: BTreeSet<String>,
    #[serde(default)]
    pub stop_ids: BTreeSet<String>,
}

#[derive(Debug, Deserialize)]
struct StopApproachEntry {
    #[serde(default)]
    approach_sets: Vec<ApproachSetConfig>,
}

#[derive(Debug, Deserialize)]
struct ApproachSetConfig {
    #[serde(default)]
    name: String,
    #[serde(default)]
    bubbles: Vec<BubbleConfig>,
}

#[derive(Debug, Deserialize)]
struct BubbleConfig {
    lat: Option<f64>,
    lng: Option<f64>,
    radius_m: Option<f64>,
    order: Option<u32>,
}

pub async fn load_headway_config(dirs: &[PathBuf]) -> HeadwayConfig {
    crate::persist::read_json_any(dirs, HEADWAY_CONFIG_FILE)
        .await
        .unwrap_or_default()
}

/// Load the approach-bubble configuration, keyed by stop id. Bubbles with
/// no coordinates are dropped; missing radii default to 25 m and missing
/// orders to their position in the list.
pub async fn load_approach_sets(dirs: &[PathBuf]) -> HashMap<String, Vec<ApproachSet>> {
    let raw: HashMap<String, StopApproachEntry> =
        match crate::persist::read_json_any(dirs, STOP_APPROACH_CONFIG_FILE).await {
            Some(raw) => raw,
            None => return HashMap::new(),
        };

    let mut config = HashMap::new();
    for (stop_id, entry) in raw {
        let sets = parse_approach_sets(entry.approach_sets);
        if !sets.is_empty() {
            config.insert(stop_id, sets);
        }
    }
    config
}

fn parse_approach_sets(raw_sets: Vec<ApproachSetConfig>) -> Vec<ApproachSet> {
    let mut sets = Vec::new();
    for raw_set in raw_sets {
        let mut bubbles = Vec::new();
        for raw_bubble in raw_set.bubbles {
            let (Some(lat), Some(lng)) = (raw_bubble.lat, raw_bubble.lng) else {
                continue;
            };
            bubbles.push(Bubble {
                lat,
                lon: lng,
                radius_m: raw_bubble.radius_m.unwrap_or(DEFAULT_BUBBLE_RADIUS_M),
                order: raw_bubble.order.unwrap_or(bubbles.len() as u32 + 1),
            });
        }
        if !bubbles.is_empty() {
            bubbles.sort_by_key(|b| b.order);
            sets.push(ApproachSet {
                name: raw_set.name,
                bubbles,
            });
        }
    }
    sets
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn approach_config_parses_and_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let body = serde_json::json!({
            "4235114": {
                "approach_sets": [
                    {
                        "name": "northbound",
                        "bubbles": [
                            {"lat": 38.03, "lng": -78.51, "radius_m": 70.0, "order": 1},
                            {"lat": 38.031, "lng": -78.511},
                            {"lat": null, "lng": -78.512}
                        ]
                    },
                    {"name": "empty", "bubbles": []}
                ]
            }
        });
        std::fs::write(
            dir.path().join(STOP_APPROACH_CONFIG_FILE),
            serde_json::to_vec(&body).unwrap(),
        )
        .unwrap();

        let config = load_approach_sets(&[dir.path().to_path_buf()]).await;
        let sets = config.get("4235114").unwrap();
        assert_eq!(sets.len(), 1);
        assert_eq!(sets[0].bubbles.len(), 2);
        assert_eq!(sets[0].bubbles[1].radius_m, DEFAULT_BUBBLE_RADIUS_M);
        assert_eq!(sets[0].bubbles[1].order, 2);
    }

    #[tokio::test]
    async fn missing_configs_default_to_track_everything() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_headway_config(&[dir.path().to_path_buf()]).await;
        assert!(config.route_ids.is_empty());
        assert!(config.stop_ids.is_empty());
        assert!(load_approach_sets(&[dir.path().to_path_buf()]).await.is_empty());
    }
}
