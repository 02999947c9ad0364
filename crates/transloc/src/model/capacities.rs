use serde::Deserialize;

/// One entry from the vehicle capacities feed.
#[derive(Debug, Clone, Deserialize)]
pub struct VehicleCapacityRecord {
    #[serde(rename = "VehicleID")]
    pub vehicle_id: i64,
    #[serde(rename = "Capacity", default)]
    pub capacity: Option<i64>,
    #[serde(rename = "CurrentOccupation", default)]
    pub current_occupation: Option<i64>,
    #[serde(rename = "Percentage", default)]
    pub percentage: Option<f64>,
}
