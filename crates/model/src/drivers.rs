use std::collections::HashMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Which half of the day a shift assignment belongs to. Blocks without
/// split shifts carry `Any`, which matches at every hour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Period {
    Am,
    Pm,
    Any,
}

/// One driver shift pulled from the scheduling feed, keyed under a two-digit
/// block number (or an on-demand position name).
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ShiftEntry {
    pub name: String,
    pub start_ts: i64,
    pub end_ts: i64,
    pub start_label: String,
    pub end_label: String,
    pub color_id: Option<String>,
    pub position_name: Option<String>,
}

/// Shift assignments grouped by block number, then by period.
pub type AssignmentsByBlock = HashMap<String, HashMap<Period, Vec<ShiftEntry>>>;

/// Driver fields surfaced to dashboards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DriverInfo {
    pub name: String,
    pub shift_start: i64,
    pub shift_start_label: String,
    pub shift_end: i64,
    pub shift_end_label: String,
}

impl DriverInfo {
    pub fn from_shift(shift: &ShiftEntry) -> Self {
        Self {
            name: shift.name.clone(),
            shift_start: shift.start_ts,
            shift_start_label: shift.start_label.clone(),
            shift_end: shift.end_ts,
            shift_end_label: shift.end_label.clone(),
        }
    }
}

/// A resolved vehicle-to-block-to-drivers mapping entry.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct VehicleDriverEntry {
    pub vehicle_id: String,
    pub block: String,
    pub drivers: Vec<DriverInfo>,
    pub vehicle_name: Option<String>,
}

/// Output of one resolver pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct VehicleDriversResult {
    pub fetched_at: i64,
    pub vehicle_drivers: HashMap<String, VehicleDriverEntry>,
}

/// Cached block selection for a vehicle, kept so a bus staged between trips
/// holds its block until the shift backing it ends.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CachedBlockSelection {
    pub block_number: String,
    pub position_name: Option<String>,
    pub shift_end_ts: i64,
}

/// One block-group trip window attributed to a vehicle. For interlined
/// groups the window also carries the specific sub-block it was matched to.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct BlockWindow {
    pub block_label: String,
    pub sub_block: Option<String>,
    pub start_ts: i64,
    pub end_ts: i64,
}

/// A display row for the plain-language block listing.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct BlockGroupEntry {
    pub block_id: String,
    pub block_group_id: String,
    pub vehicle_id: Option<String>,
    pub vehicle_name: Option<String>,
    pub route_id: Option<String>,
    pub route_name: Option<String>,
    pub route_color: Option<String>,
}
