use std::collections::BTreeSet;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub const METERS_PER_MILE: f64 = 1609.34;

/// Odometer record for one bus over one service day. `day_miles` resets at
/// the 02:30 boundary; `reset_miles` is a crew-settable baseline so displayed
/// miles are `total_miles - reset_miles`.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct BusDay {
    pub total_miles: f64,
    pub reset_miles: f64,
    pub day_miles: f64,
    #[serde(default)]
    pub blocks: BTreeSet<String>,
    pub last_lat: Option<f64>,
    pub last_lon: Option<f64>,
}

impl BusDay {
    pub fn display_miles(&self) -> f64 {
        self.total_miles - self.reset_miles
    }
}

/// Keep only the digits of a vehicle name; buses are bucketed by fleet
/// number regardless of prefix decorations in the feed.
pub fn normalize_bus_name(name: &str) -> String {
    name.chars().filter(|c| c.is_ascii_digit()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bus_name_keeps_digits_only() {
        assert_eq!(normalize_bus_name("Bus 1234"), "1234");
        assert_eq!(normalize_bus_name("17-B"), "17");
        assert_eq!(normalize_bus_name("spare"), "");
    }
}
