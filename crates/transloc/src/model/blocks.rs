use serde::Deserialize;

/// One row from the schedule calendar lookup; only the id is chained into
/// the dispatch block-group request.
#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleVehicleCalendarEntry {
    #[serde(rename = "ScheduleVehicleCalendarID")]
    pub schedule_vehicle_calendar_id: i64,
}

/// A dispatch block group: one crew assignment, possibly interlined across
/// several blocks.
#[derive(Debug, Clone, Deserialize)]
pub struct BlockGroup {
    #[serde(rename = "BlockGroupId", alias = "BlockGroupID", default)]
    pub block_group_id: Option<String>,
    #[serde(rename = "VehicleId", alias = "VehicleID", default)]
    pub vehicle_id: Option<i64>,
    #[serde(rename = "VehicleName", default)]
    pub vehicle_name: Option<String>,
    #[serde(rename = "Blocks", default)]
    pub blocks: Vec<BlockTrips>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlockTrips {
    #[serde(rename = "BlockId", alias = "BlockID", default)]
    pub block_id: Option<String>,
    #[serde(rename = "Trips", default)]
    pub trips: Vec<Trip>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Trip {
    #[serde(rename = "StartTimeUtc", default)]
    pub start_time_utc: Option<i64>,
    #[serde(rename = "EndTimeUtc", default)]
    pub end_time_utc: Option<i64>,
    #[serde(rename = "RouteID", alias = "RouteId", default)]
    pub route_id: Option<i64>,
    #[serde(rename = "RouteDescription", default)]
    pub route_description: Option<String>,
}
