use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use model::drivers::{BlockWindow, CachedBlockSelection, VehicleDriversResult};
use model::mileage::BusDay;
use model::route::Route;
use model::vehicle::{FusedVehicle, PersistedHeading, RawVehicle, VehicleCapacity};
use serde::Serialize;
use tokio::sync::RwLock;
use transloc::model::{RouteWithShape, TranslocStop};

/// Per-vehicle carry-over between fusion ticks.
#[derive(Debug, Clone)]
pub struct VehicleTrack {
    pub lat: f64,
    pub lon: f64,
    pub heading_deg: f64,
    pub arc_length_m: f64,
    pub segment_index: usize,
    pub direction_sign: i8,
    pub ema_speed_mps: f64,
    pub updated_at: DateTime<Utc>,
}

/// One row of the pre-materialized dashboard payload.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
pub struct TestmapVehicle {
    pub vehicle_id: i64,
    pub name: String,
    pub route_id: Option<i64>,
    pub route_name: Option<String>,
    pub lat: f64,
    pub lon: f64,
    pub heading_deg: f64,
    pub ground_speed_mps: f64,
    pub ema_speed_mps: f64,
    pub along_route_speed_mps: f64,
    pub arc_length_m: f64,
    pub segment_index: usize,
    pub direction_sign: i8,
    pub is_stale: bool,
    pub is_very_stale: bool,
    pub block: Option<String>,
    pub capacity: Option<i64>,
    pub current_occupation: Option<i64>,
    pub percentage: Option<f64>,
    pub estimates: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TestmapPayload {
    pub generated_at: Option<DateTime<Utc>>,
    pub vehicles: Vec<TestmapVehicle>,
}

/// All fused state, guarded by one lock. The fusion tick is the sole
/// writer; request handlers take shared access and copy out what they need.
/// Nothing here is held across a suspension point.
#[derive(Default)]
pub struct AppState {
    // Raw upstream snapshots, replaced wholesale each tick.
    pub routes_raw: Vec<RouteWithShape>,
    pub vehicles_raw: Vec<RawVehicle>,
    pub stops_raw: Vec<TranslocStop>,
    pub vehicle_capacities: HashMap<i64, VehicleCapacity>,
    pub stop_estimates: HashMap<i64, serde_json::Value>,

    // Derived route state.
    pub routes: HashMap<i64, Route>,
    pub route_id_to_name: HashMap<i64, String>,
    pub active_route_ids: BTreeSet<i64>,
    pub route_last_seen: HashMap<i64, DateTime<Utc>>,

    // Derived vehicle state.
    pub vehicles_by_route: HashMap<i64, Vec<FusedVehicle>>,
    pub vehicle_tracks: HashMap<i64, VehicleTrack>,
    pub last_headings: HashMap<i64, PersistedHeading>,
    pub headings_dirty: bool,

    // Mileage.
    pub bus_days: BTreeMap<NaiveDate, BTreeMap<String, BusDay>>,

    // Block and driver resolution.
    pub vehicle_drivers: VehicleDriversResult,
    pub vehicle_block_cache: HashMap<String, CachedBlockSelection>,
    pub plain_language_blocks: HashMap<String, String>,
    pub block_windows: HashMap<String, Vec<BlockWindow>>,

    // Pre-materialized client payload.
    pub testmap_payload: TestmapPayload,

    // Health.
    pub last_error: Option<String>,
    pub last_error_ts: Option<DateTime<Utc>>,
    pub last_tick_at: Option<DateTime<Utc>>,
}

impl AppState {
    pub fn note_error(&mut self, why: impl std::fmt::Display) {
        self.last_error = Some(why.to_string());
        self.last_error_ts = Some(Utc::now());
    }

    /// Vehicle id -> display name, for the driver resolver and tracker.
    pub fn vehicle_names(&self) -> HashMap<String, String> {
        self.vehicles_raw
            .iter()
            .filter(|v| !v.name.is_empty())
            .map(|v| (v.vehicle_id.to_string(), v.name.clone()))
            .collect()
    }

    /// Vehicle id -> current route display name.
    pub fn vehicle_routes(&self) -> HashMap<String, String> {
        self.vehicles_raw
            .iter()
            .filter_map(|v| {
                let rid = v.assigned_route_id()?;
                let name = self.route_id_to_name.get(&rid)?;
                Some((v.vehicle_id.to_string(), name.clone()))
            })
            .collect()
    }

    /// Vehicle id -> display block, preferring the resolver output and
    /// falling back to the raw window labels.
    pub fn vehicle_blocks(&self) -> HashMap<String, String> {
        let mut blocks: HashMap<String, String> = self
            .plain_language_blocks
            .iter()
            .map(|(vid, block)| (vid.clone(), block.clone()))
            .collect();
        for (vid, entry) in &self.vehicle_drivers.vehicle_drivers {
            blocks.insert(vid.clone(), entry.block.clone());
        }
        blocks
    }
}

pub type SharedState = Arc<RwLock<AppState>>;

pub fn new_shared_state() -> SharedState {
    Arc::new(RwLock::new(AppState::default()))
}
