use std::collections::BTreeSet;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Radius bounds for approach bubbles, meters.
pub const MIN_BUBBLE_RADIUS_M: f64 = 5.0;
pub const MAX_BUBBLE_RADIUS_M: f64 = 200.0;

/// A circular geofence that is part of an approach corridor into a stop.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Bubble {
    pub lat: f64,
    pub lon: f64,
    pub radius_m: f64,
    pub order: u32,
}

/// An ordered corridor of bubbles; the highest order is the stop bubble.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ApproachSet {
    pub name: String,
    pub bubbles: Vec<Bubble>,
}

impl ApproachSet {
    pub fn max_order(&self) -> u32 {
        self.bubbles.iter().map(|b| b.order).max().unwrap_or(0)
    }

    pub fn final_bubble(&self) -> Option<&Bubble> {
        let max = self.max_order();
        self.bubbles.iter().find(|b| b.order == max)
    }
}

/// A physical stop. Raw stop entries sharing an address id are merged into
/// one `StopPoint`: route sets are unioned and approach sets deduped by name.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StopPoint {
    pub stop_id: String,
    pub address_id: Option<String>,
    pub lat: f64,
    pub lon: f64,
    pub name: Option<String>,
    pub serves_route_ids: BTreeSet<String>,
    pub approach_sets: Vec<ApproachSet>,
}

impl StopPoint {
    pub fn serves_route(&self, route_id: &str) -> bool {
        self.serves_route_ids.is_empty() || self.serves_route_ids.contains(route_id)
    }
}
