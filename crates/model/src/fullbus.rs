use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A closed episode during which a vehicle reported occupancy at or above
/// its capacity.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FullBusEvent {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub vehicle_id: String,
    pub vehicle_name: String,
    pub block: String,
    pub route_id: String,
    pub route_name: String,
    pub nearest_stop_id: String,
    pub nearest_stop_name: String,
    pub lat: f64,
    pub lon: f64,
    pub capacity: Option<i64>,
    pub peak_occupation: Option<i64>,
}
