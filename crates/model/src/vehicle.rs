use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A position report as it arrives from the AVL provider, after parsing.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RawVehicle {
    pub vehicle_id: i64,
    pub name: String,
    pub route_id: Option<i64>,
    pub lat: f64,
    pub lon: f64,
    pub heading_deg: f64,
    pub ground_speed_mps: f64,
    pub report_age_s: f64,
    pub provider_timestamp_ms: Option<i64>,
}

impl RawVehicle {
    /// Whether the vehicle is assigned to a real route. The provider uses
    /// route 0 for unassigned vehicles.
    pub fn assigned_route_id(&self) -> Option<i64> {
        match self.route_id {
            Some(0) | None => None,
            other => other,
        }
    }
}

/// A vehicle enriched during the fusion tick with along-route derivations.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FusedVehicle {
    pub vehicle_id: i64,
    pub name: String,
    pub route_id: Option<i64>,
    pub lat: f64,
    pub lon: f64,
    pub heading_deg: f64,
    pub ground_speed_mps: f64,
    pub report_age_s: f64,
    pub provider_timestamp_ms: Option<i64>,
    pub arc_length_m: f64,
    pub segment_index: usize,
    /// +1 with the polyline direction, -1 against it, 0 unknown.
    pub direction_sign: i8,
    pub ema_speed_mps: f64,
    pub along_route_speed_mps: f64,
    pub is_stale: bool,
    pub is_very_stale: bool,
}

/// Occupancy data for one vehicle.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct VehicleCapacity {
    pub capacity: Option<i64>,
    pub current_occupation: Option<i64>,
    pub percentage: Option<f64>,
}

/// A persisted last-known heading, used to keep markers pointed sensibly
/// across restarts and while a vehicle sits still.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema)]
pub struct PersistedHeading {
    pub heading: f64,
    pub updated_at: i64,
}
