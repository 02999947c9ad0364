use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A single position report handed to the headway tracker. The timestamp is
/// the fusion tick's fetch start, never the provider's embedded timestamp.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct VehicleSnapshot {
    pub vehicle_id: Option<String>,
    pub vehicle_name: Option<String>,
    pub lat: f64,
    pub lon: f64,
    pub route_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub heading_deg: Option<f64>,
    pub block: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Arrival,
    Departure,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Arrival => "arrival",
            EventType::Departure => "departure",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "arrival" => Some(EventType::Arrival),
            "departure" => Some(EventType::Departure),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ArrivalType {
    /// The bus came to rest inside the final bubble.
    Stopped,
    /// The bus crossed the final bubble without stopping.
    Passthrough,
}

/// An arrival or departure inferred from geofence crossings. Immutable once
/// written to the day-partitioned log.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct HeadwayEvent {
    pub timestamp: DateTime<Utc>,
    pub route_id: Option<String>,
    pub stop_id: Option<String>,
    pub vehicle_id: Option<String>,
    pub vehicle_name: Option<String>,
    pub event_type: EventType,
    pub headway_arrival_arrival_s: Option<f64>,
    pub headway_departure_arrival_s: Option<f64>,
    pub dwell_s: Option<f64>,
    pub route_name: Option<String>,
    pub address_id: Option<String>,
    pub stop_name: Option<String>,
    pub block: Option<String>,
    pub arrival_type: Option<ArrivalType>,
}
