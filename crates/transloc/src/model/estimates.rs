use serde::Deserialize;

/// Per-vehicle stop estimates. The estimate entries are passed through to
/// clients untouched, so they stay as raw JSON.
#[derive(Debug, Clone, Deserialize)]
pub struct VehicleEstimates {
    #[serde(rename = "VehicleID")]
    pub vehicle_id: i64,
    #[serde(rename = "Estimates", default)]
    pub estimates: serde_json::Value,
}
