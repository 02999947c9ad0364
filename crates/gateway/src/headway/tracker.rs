use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use model::headway::{ArrivalType, EventType, HeadwayEvent, VehicleSnapshot};
use model::stop::{ApproachSet, StopPoint, MAX_BUBBLE_RADIUS_M, MIN_BUBBLE_RADIUS_M};
use utility::geo::haversine_distance_m;

use super::storage::HeadwayStorage;

/// Below this speed the bus counts as stopped.
pub const STOP_SPEED_THRESHOLD_MPS: f64 = 0.5;
/// Tracking state not seen for this long is dropped.
pub const BUBBLE_PROGRESS_STALE_SECONDS: f64 = 120.0;
/// Beyond this distance from the final bubble, an approach is abandoned.
/// Closer than this, a bus may drift out of the bubbles and re-enter.
pub const APPROACH_ABANDONMENT_DISTANCE_M: f64 = 400.0;
/// Distance used for stop-association diagnostics.
pub const STOP_ASSOCIATION_DISTANCE_M: f64 = 60.0;

const DIAG_FAILURE_CAP: usize = 25;
const DIAG_SNAPSHOT_CAP: usize = 50;
const DIAG_ACTIVATION_CAP: usize = 100;

/// Raw stop input before physical-stop merging.
#[derive(Debug, Clone)]
pub struct StopSeed {
    pub stop_id: String,
    pub name: Option<String>,
    pub lat: f64,
    pub lon: f64,
    pub address_id: Option<String>,
    pub route_ids: BTreeSet<String>,
    pub approach_sets: Vec<ApproachSet>,
}

/// A vehicle's progress through one approach set.
///
/// Tracking starts only when the vehicle enters bubble 1, advances strictly
/// in order, and tolerates brief exits (GPS drift) while the vehicle stays
/// within the abandonment distance of the final bubble. An arrival is logged
/// when the bus stops in the final bubble, or on exit when it passed through
/// without stopping; the departure follows on exit.
#[derive(Debug, Clone)]
pub struct BubbleProgressState {
    pub stop_id: String,
    pub set_index: usize,
    pub set_name: String,
    pub max_bubble_order: u32,
    pub route_id: Option<String>,
    pub entered_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub highest_bubble_reached: u32,
    pub next_expected_order: u32,
    pub final_bubble_lat: Option<f64>,
    pub final_bubble_lon: Option<f64>,
    pub in_final_bubble: bool,
    pub entered_final_at: Option<DateTime<Utc>>,
    pub stopped_in_final: bool,
    pub arrival_logged: bool,
    pub arrival_time: Option<DateTime<Utc>>,
    pub departure_logged: bool,
}

/// Display lookups injected per batch so events carry route and block names.
#[derive(Default)]
pub struct LookupContext {
    pub route_names: HashMap<String, String>,
    pub vehicle_blocks: HashMap<String, String>,
}

pub struct HeadwayTracker {
    storage: HeadwayStorage,
    tracked_route_ids: BTreeSet<String>,
    tracked_stop_ids: BTreeSet<String>,

    stops: Vec<StopPoint>,
    stop_index: HashMap<String, usize>,
    address_index: HashMap<String, usize>,

    /// vehicle -> stop -> set index -> progress.
    progress: HashMap<String, HashMap<String, BTreeMap<usize, BubbleProgressState>>>,
    last_snapshots: HashMap<String, VehicleSnapshot>,

    last_arrival: HashMap<(Option<String>, String), DateTime<Utc>>,
    last_departure: HashMap<(Option<String>, String), DateTime<Utc>>,
    last_vehicle_arrival: HashMap<(String, String, Option<String>), DateTime<Utc>>,
    last_vehicle_departure: HashMap<(String, String, Option<String>), DateTime<Utc>>,

    recent_stop_association_failures: VecDeque<serde_json::Value>,
    recent_snapshot_diagnostics: VecDeque<serde_json::Value>,
    recent_bubble_activations: VecDeque<serde_json::Value>,
}

impl HeadwayTracker {
    pub fn new(
        storage: HeadwayStorage,
        tracked_route_ids: BTreeSet<String>,
        tracked_stop_ids: BTreeSet<String>,
    ) -> Self {
        log::info!(
            "[headway] tracker initialized routes={:?} stops={:?}",
            if tracked_route_ids.is_empty() {
                "all".to_owned()
            } else {
                format!("{tracked_route_ids:?}")
            },
            if tracked_stop_ids.is_empty() {
                "all".to_owned()
            } else {
                format!("{tracked_stop_ids:?}")
            },
        );
        Self {
            storage,
            tracked_route_ids,
            tracked_stop_ids,
            stops: Vec::new(),
            stop_index: HashMap::new(),
            address_index: HashMap::new(),
            progress: HashMap::new(),
            last_snapshots: HashMap::new(),
            last_arrival: HashMap::new(),
            last_departure: HashMap::new(),
            last_vehicle_arrival: HashMap::new(),
            last_vehicle_departure: HashMap::new(),
            recent_stop_association_failures: VecDeque::new(),
            recent_snapshot_diagnostics: VecDeque::new(),
            recent_bubble_activations: VecDeque::new(),
        }
    }

    /// Replace the stop set. Entries sharing an address id collapse into one
    /// physical stop: route sets are unioned, approach sets deduped by name,
    /// the first seen id/name/coordinates win.
    pub fn update_stops(&mut self, seeds: Vec<StopSeed>) {
        let seed_count = seeds.len();
        let mut groups: IndexMap<String, StopPoint> = IndexMap::new();

        for seed in seeds {
            if seed.stop_id.is_empty() || !seed.lat.is_finite() || !seed.lon.is_finite() {
                continue;
            }
            let key = seed
                .address_id
                .clone()
                .unwrap_or_else(|| seed.stop_id.clone());

            match groups.get_mut(&key) {
                Some(existing) => {
                    if existing.name.is_none() {
                        existing.name = seed.name.filter(|n| !n.trim().is_empty());
                    }
                    existing.serves_route_ids.extend(seed.route_ids);
                    for set in seed.approach_sets {
                        if !existing.approach_sets.iter().any(|s| s.name == set.name) {
                            existing.approach_sets.push(set);
                        }
                    }
                }
                None => {
                    groups.insert(
                        key,
                        StopPoint {
                            stop_id: seed.stop_id,
                            address_id: seed.address_id,
                            lat: seed.lat,
                            lon: seed.lon,
                            name: seed.name.filter(|n| !n.trim().is_empty()),
                            serves_route_ids: seed.route_ids,
                            approach_sets: seed.approach_sets,
                        },
                    );
                }
            }
        }

        let mut stops: Vec<StopPoint> = groups.into_values().collect();
        for stop in &mut stops {
            for set in &mut stop.approach_sets {
                for bubble in &mut set.bubbles {
                    bubble.radius_m = bubble
                        .radius_m
                        .clamp(MIN_BUBBLE_RADIUS_M, MAX_BUBBLE_RADIUS_M);
                }
                set.bubbles.sort_by_key(|b| b.order);
            }
            stop.approach_sets.retain(|set| !set.bubbles.is_empty());
        }

        self.stop_index = stops
            .iter()
            .enumerate()
            .map(|(index, stop)| (stop.stop_id.clone(), index))
            .collect();
        self.address_index = stops
            .iter()
            .enumerate()
            .filter_map(|(index, stop)| {
                stop.address_id.clone().map(|address| (address, index))
            })
            .collect();

        if stops.is_empty() {
            log::warn!("[headway] stop update received no stops; tracker inputs unavailable");
        } else {
            log::info!(
                "[headway] loaded {} physical stops from {} stop entries",
                stops.len(),
                seed_count
            );
        }
        self.stops = stops;
    }

    pub fn stop_by_id(&self, stop_id: &str) -> Option<&StopPoint> {
        self.stop_index.get(stop_id).map(|&index| &self.stops[index])
    }

    pub fn stop_by_address(&self, address_id: &str) -> Option<&StopPoint> {
        self.address_index
            .get(address_id)
            .map(|&index| &self.stops[index])
    }

    pub fn stops(&self) -> &[StopPoint] {
        &self.stops
    }

    /// Run one batch of snapshots through the state machine, writing the
    /// produced events to storage and returning them. Duplicated vehicles in
    /// one batch (a bus listed on two routes) are processed once.
    pub fn process_snapshots(
        &mut self,
        snapshots: &[VehicleSnapshot],
        ctx: &LookupContext,
    ) -> Vec<HeadwayEvent> {
        if self.stops.is_empty() {
            return Vec::new();
        }

        if let Some(batch_ts) = snapshots.iter().map(|s| s.timestamp).max() {
            self.sweep_stale(batch_ts);
        }

        let stops = std::mem::take(&mut self.stops);
        let mut events = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        for snap in snapshots {
            if !snap.lat.is_finite() || !snap.lon.is_finite() {
                continue;
            }
            let Some(vid) = normalize_id(snap.vehicle_id.as_deref()) else {
                continue;
            };
            if !seen.insert(vid.clone()) {
                continue;
            }
            let route_id = normalize_id(snap.route_id.as_deref());
            if !self.tracked_route_ids.is_empty()
                && !route_id
                    .as_ref()
                    .map_or(false, |rid| self.tracked_route_ids.contains(rid))
            {
                continue;
            }

            let speed_mps = self.calculate_speed(&vid, snap);
            events.extend(self.process_bubble_tracking(
                &stops,
                &vid,
                snap,
                route_id.as_ref(),
                speed_mps,
                ctx,
            ));
            self.log_diagnostics(&stops, &vid, snap, route_id.as_deref(), speed_mps);
            self.last_snapshots.insert(vid, snap.clone());
        }

        self.stops = stops;

        if !events.is_empty() {
            match self.storage.write_events(&events) {
                Ok(()) => log::info!("[headway] recorded {} events", events.len()),
                Err(why) => log::warn!("[headway] failed to write events: {why}"),
            }
        }
        events
    }

    fn sweep_stale(&mut self, now: DateTime<Utc>) {
        for stop_map in self.progress.values_mut() {
            for set_map in stop_map.values_mut() {
                set_map.retain(|_, state| {
                    (now - state.last_seen).num_seconds() as f64 <= BUBBLE_PROGRESS_STALE_SECONDS
                });
            }
            stop_map.retain(|_, set_map| !set_map.is_empty());
        }
        self.progress.retain(|_, stop_map| !stop_map.is_empty());
    }

    fn calculate_speed(&self, vid: &str, snap: &VehicleSnapshot) -> Option<f64> {
        let prev = self.last_snapshots.get(vid)?;
        let delta_seconds = (snap.timestamp - prev.timestamp).num_milliseconds() as f64 / 1000.0;
        if delta_seconds <= 0.0 {
            return None;
        }
        let distance = haversine_distance_m(prev.lat, prev.lon, snap.lat, snap.lon);
        Some(distance / delta_seconds)
    }

    #[allow(clippy::too_many_arguments)]
    fn process_bubble_tracking(
        &mut self,
        stops: &[StopPoint],
        vid: &str,
        snap: &VehicleSnapshot,
        route_id: Option<&String>,
        speed_mps: Option<f64>,
        ctx: &LookupContext,
    ) -> Vec<HeadwayEvent> {
        let timestamp = snap.timestamp;
        let mut events = Vec::new();
        let mut vehicle_progress = self.progress.remove(vid).unwrap_or_default();

        // Within one cycle a stop logs at most one arrival and one
        // departure, no matter how many approach sets fire.
        let mut arrivals_this_cycle: HashSet<String> = HashSet::new();
        let mut departures_this_cycle: HashSet<String> = HashSet::new();

        for stop in stops {
            if stop.approach_sets.is_empty() {
                continue;
            }
            if !self.tracked_stop_ids.is_empty() && !self.tracked_stop_ids.contains(&stop.stop_id)
            {
                continue;
            }
            // A bus only produces events at stops its route serves.
            if let Some(rid) = route_id {
                if !stop.serves_route(rid) {
                    continue;
                }
            }

            let mut stop_progress = vehicle_progress
                .remove(&stop.stop_id)
                .unwrap_or_default();

            for (set_index, set) in stop.approach_sets.iter().enumerate() {
                if set.bubbles.is_empty() {
                    continue;
                }
                let max_order = set.max_order();
                let bubbles_in = bubbles_vehicle_is_in(snap, set);
                let final_bubble = set.final_bubble();
                let mut drop_state = false;

                if !bubbles_in.is_empty() {
                    if !stop_progress.contains_key(&set_index) {
                        // Tracking starts only from bubble 1.
                        if bubbles_in.contains(&1) {
                            stop_progress.insert(
                                set_index,
                                BubbleProgressState {
                                    stop_id: stop.stop_id.clone(),
                                    set_index,
                                    set_name: set.name.clone(),
                                    max_bubble_order: max_order,
                                    route_id: route_id.cloned(),
                                    entered_at: timestamp,
                                    last_seen: timestamp,
                                    highest_bubble_reached: 1,
                                    next_expected_order: 2,
                                    final_bubble_lat: final_bubble.map(|b| b.lat),
                                    final_bubble_lon: final_bubble.map(|b| b.lon),
                                    in_final_bubble: false,
                                    entered_final_at: None,
                                    stopped_in_final: false,
                                    arrival_logged: false,
                                    arrival_time: None,
                                    departure_logged: false,
                                },
                            );
                            self.log_activation(vid, snap, stop, set_index, &set.name, 1, "entered");
                        }
                    } else {
                        let mut arrival: Option<(ArrivalType, Option<String>)> = None;
                        let mut departure: Option<(Option<DateTime<Utc>>, Option<String>)> = None;
                        let mut pending_logs: Vec<(u32, &'static str)> = Vec::new();

                        if let Some(state) = stop_progress.get_mut(&set_index) {
                            state.last_seen = timestamp;

                            while bubbles_in.contains(&state.next_expected_order)
                                && state.next_expected_order <= max_order
                            {
                                state.highest_bubble_reached = state.next_expected_order;
                                pending_logs.push((state.highest_bubble_reached, "progressed"));
                                state.next_expected_order += 1;
                            }

                            let in_final = bubbles_in.contains(&max_order)
                                && state.highest_bubble_reached == max_order;

                            if in_final {
                                if !state.in_final_bubble {
                                    state.in_final_bubble = true;
                                    state.entered_final_at = Some(timestamp);
                                    pending_logs.push((max_order, "entered_final"));
                                }
                                if speed_mps
                                    .map_or(false, |speed| speed <= STOP_SPEED_THRESHOLD_MPS)
                                    && !state.stopped_in_final
                                {
                                    state.stopped_in_final = true;
                                    if !state.arrival_logged
                                        && !arrivals_this_cycle.contains(&stop.stop_id)
                                    {
                                        state.arrival_logged = true;
                                        state.arrival_time = Some(timestamp);
                                        arrival =
                                            Some((ArrivalType::Stopped, state.route_id.clone()));
                                    }
                                }
                            } else if state.in_final_bubble {
                                // Left the final bubble but still inside the
                                // corridor.
                                if !state.arrival_logged
                                    && !arrivals_this_cycle.contains(&stop.stop_id)
                                {
                                    state.arrival_logged = true;
                                    state.arrival_time = Some(timestamp);
                                    arrival =
                                        Some((ArrivalType::Passthrough, state.route_id.clone()));
                                }
                                if state.arrival_logged
                                    && !state.departure_logged
                                    && !departures_this_cycle.contains(&stop.stop_id)
                                {
                                    state.departure_logged = true;
                                    departure = Some((state.arrival_time, state.route_id.clone()));
                                }
                                state.in_final_bubble = false;
                            }
                        }

                        for (order, kind) in pending_logs {
                            self.log_activation(vid, snap, stop, set_index, &set.name, order, kind);
                        }

                        if let Some((arrival_type, state_route)) = arrival {
                            arrivals_this_cycle.insert(stop.stop_id.clone());
                            let rid = route_id.cloned().or(state_route);
                            events.push(self.create_arrival_event(
                                stop,
                                vid,
                                snap,
                                rid.as_deref(),
                                timestamp,
                                arrival_type,
                                ctx,
                            ));
                            self.log_activation(
                                vid,
                                snap,
                                stop,
                                set_index,
                                &set.name,
                                max_order,
                                match arrival_type {
                                    ArrivalType::Stopped => "arrival_stopped",
                                    ArrivalType::Passthrough => "arrival_passthrough",
                                },
                            );
                        }
                        if let Some((arrival_time, state_route)) = departure {
                            departures_this_cycle.insert(stop.stop_id.clone());
                            let dwell = arrival_time
                                .map(|at| ((timestamp - at).num_milliseconds() as f64 / 1000.0).max(0.0));
                            events.push(self.create_departure_event(
                                stop,
                                vid,
                                snap,
                                state_route.as_deref(),
                                timestamp,
                                dwell,
                                ctx,
                            ));
                            self.log_activation(
                                vid, snap, stop, set_index, &set.name, max_order, "departure",
                            );
                        }
                    }
                } else if stop_progress.contains_key(&set_index) {
                    let mut arrival: Option<(ArrivalType, Option<String>)> = None;
                    let mut departure: Option<(Option<DateTime<Utc>>, Option<String>)> = None;
                    let mut exited = false;
                    let mut abandoned = false;

                    if let Some(state) = stop_progress.get_mut(&set_index) {
                        let distance_to_final = match (state.final_bubble_lat, state.final_bubble_lon)
                        {
                            (Some(lat), Some(lon)) => {
                                Some(haversine_distance_m(snap.lat, snap.lon, lat, lon))
                            }
                            _ => None,
                        };
                        let should_abandon = distance_to_final
                            .map_or(false, |d| d > APPROACH_ABANDONMENT_DISTANCE_M);

                        if state.in_final_bubble {
                            if !state.arrival_logged
                                && !arrivals_this_cycle.contains(&stop.stop_id)
                            {
                                state.arrival_logged = true;
                                state.arrival_time = Some(timestamp);
                                arrival = Some((ArrivalType::Passthrough, state.route_id.clone()));
                            }
                            if state.arrival_logged
                                && !state.departure_logged
                                && !departures_this_cycle.contains(&stop.stop_id)
                            {
                                state.departure_logged = true;
                                departure = Some((state.arrival_time, state.route_id.clone()));
                            }
                            state.in_final_bubble = false;

                            if (state.arrival_logged && state.departure_logged) || should_abandon {
                                exited = true;
                                drop_state = true;
                            }
                        } else if should_abandon {
                            abandoned = true;
                            drop_state = true;
                        }
                        // Otherwise the bus is briefly outside the bubbles but
                        // still near the stop; keep tracking.
                    }

                    if let Some((arrival_type, state_route)) = arrival {
                        arrivals_this_cycle.insert(stop.stop_id.clone());
                        let rid = route_id.cloned().or(state_route);
                        events.push(self.create_arrival_event(
                            stop,
                            vid,
                            snap,
                            rid.as_deref(),
                            timestamp,
                            arrival_type,
                            ctx,
                        ));
                        self.log_activation(
                            vid,
                            snap,
                            stop,
                            set_index,
                            &set.name,
                            max_order,
                            "arrival_passthrough",
                        );
                    }
                    if let Some((arrival_time, state_route)) = departure {
                        departures_this_cycle.insert(stop.stop_id.clone());
                        let dwell = arrival_time
                            .map(|at| ((timestamp - at).num_milliseconds() as f64 / 1000.0).max(0.0));
                        events.push(self.create_departure_event(
                            stop,
                            vid,
                            snap,
                            state_route.as_deref(),
                            timestamp,
                            dwell,
                            ctx,
                        ));
                        self.log_activation(
                            vid, snap, stop, set_index, &set.name, max_order, "departure",
                        );
                    }
                    if exited {
                        self.log_activation(vid, snap, stop, set_index, &set.name, 0, "exited");
                    }
                    if abandoned {
                        self.log_activation(vid, snap, stop, set_index, &set.name, 0, "abandoned");
                    }
                }

                if drop_state {
                    stop_progress.remove(&set_index);
                }
            }

            if !stop_progress.is_empty() {
                vehicle_progress.insert(stop.stop_id.clone(), stop_progress);
            }
        }

        if !vehicle_progress.is_empty() {
            self.progress.insert(vid.to_owned(), vehicle_progress);
        }

        events
    }

    #[allow(clippy::too_many_arguments)]
    fn create_arrival_event(
        &mut self,
        stop: &StopPoint,
        vid: &str,
        snap: &VehicleSnapshot,
        route_id: Option<&str>,
        timestamp: DateTime<Utc>,
        arrival_type: ArrivalType,
        ctx: &LookupContext,
    ) -> HeadwayEvent {
        let (headway_aa, headway_da) = self.calculate_headways(route_id, &stop.stop_id, timestamp);
        self.update_arrival_tracking(vid, &stop.stop_id, route_id, timestamp);

        let route_name = route_id.and_then(|rid| ctx.route_names.get(rid)).cloned();
        let block = snap
            .block
            .clone()
            .or_else(|| ctx.vehicle_blocks.get(vid).cloned());

        log::info!(
            "[headway] arrival: vehicle={vid} stop={} route={route_id:?} block={block:?} type={arrival_type:?}",
            stop.stop_id
        );

        HeadwayEvent {
            timestamp,
            route_id: route_id.map(str::to_owned),
            stop_id: Some(stop.stop_id.clone()),
            vehicle_id: Some(vid.to_owned()),
            vehicle_name: snap.vehicle_name.clone(),
            event_type: EventType::Arrival,
            headway_arrival_arrival_s: headway_aa,
            headway_departure_arrival_s: headway_da,
            dwell_s: None,
            route_name,
            address_id: stop.address_id.clone(),
            stop_name: stop.name.clone(),
            block,
            arrival_type: Some(arrival_type),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn create_departure_event(
        &mut self,
        stop: &StopPoint,
        vid: &str,
        snap: &VehicleSnapshot,
        route_id: Option<&str>,
        timestamp: DateTime<Utc>,
        dwell_s: Option<f64>,
        ctx: &LookupContext,
    ) -> HeadwayEvent {
        self.update_departure_tracking(vid, &stop.stop_id, route_id, timestamp);

        let route_name = route_id.and_then(|rid| ctx.route_names.get(rid)).cloned();
        let block = snap
            .block
            .clone()
            .or_else(|| ctx.vehicle_blocks.get(vid).cloned());

        log::info!(
            "[headway] departure: vehicle={vid} stop={} dwell={dwell_s:?} block={block:?}",
            stop.stop_id
        );

        HeadwayEvent {
            timestamp,
            route_id: route_id.map(str::to_owned),
            stop_id: Some(stop.stop_id.clone()),
            vehicle_id: Some(vid.to_owned()),
            vehicle_name: snap.vehicle_name.clone(),
            event_type: EventType::Departure,
            headway_arrival_arrival_s: None,
            headway_departure_arrival_s: None,
            dwell_s,
            route_name,
            address_id: stop.address_id.clone(),
            stop_name: stop.name.clone(),
            block,
            arrival_type: None,
        }
    }

    /// Previous arrival/departure at this stop, preferring the route-scoped
    /// key and falling back to the route-less one, then to storage for the
    /// current UTC day.
    fn calculate_headways(
        &self,
        route_id: Option<&str>,
        stop_id: &str,
        timestamp: DateTime<Utc>,
    ) -> (Option<f64>, Option<f64>) {
        let mut keys: Vec<(Option<String>, String)> = Vec::new();
        if let Some(rid) = route_id {
            keys.push((Some(rid.to_owned()), stop_id.to_owned()));
        }
        keys.push((None, stop_id.to_owned()));

        let mut prev_arrival = None;
        let mut prev_departure = None;
        for key in &keys {
            if prev_arrival.is_none() {
                prev_arrival = self.last_arrival.get(key).copied();
            }
            if prev_departure.is_none() {
                prev_departure = self.last_departure.get(key).copied();
            }
        }

        if prev_arrival.is_none() || prev_departure.is_none() {
            let day_start = timestamp
                .date_naive()
                .and_hms_opt(0, 0, 0)
                .map(|naive| DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc));
            if let Some(day_start) = day_start {
                let route_filter: Option<BTreeSet<String>> =
                    route_id.map(|rid| [rid.to_owned()].into());
                let stop_filter: BTreeSet<String> = [stop_id.to_owned()].into();
                let history = self.storage.query_events(
                    day_start,
                    timestamp,
                    route_filter.as_ref(),
                    Some(&stop_filter),
                );
                for event in history.iter().rev() {
                    if prev_arrival.is_none() && event.event_type == EventType::Arrival {
                        prev_arrival = Some(event.timestamp);
                    }
                    if prev_departure.is_none() && event.event_type == EventType::Departure {
                        prev_departure = Some(event.timestamp);
                    }
                    if prev_arrival.is_some() && prev_departure.is_some() {
                        break;
                    }
                }
            }
        }

        let headway_aa = prev_arrival
            .map(|prev| ((timestamp - prev).num_milliseconds() as f64 / 1000.0).max(0.0));
        let headway_da = prev_departure
            .map(|prev| ((timestamp - prev).num_milliseconds() as f64 / 1000.0).max(0.0));
        (headway_aa, headway_da)
    }

    fn update_arrival_tracking(
        &mut self,
        vid: &str,
        stop_id: &str,
        route_id: Option<&str>,
        timestamp: DateTime<Utc>,
    ) {
        if let Some(rid) = route_id {
            self.last_arrival
                .insert((Some(rid.to_owned()), stop_id.to_owned()), timestamp);
        }
        self.last_arrival
            .insert((None, stop_id.to_owned()), timestamp);
        self.last_vehicle_arrival.insert(
            (
                vid.to_owned(),
                stop_id.to_owned(),
                route_id.map(str::to_owned),
            ),
            timestamp,
        );
    }

    fn update_departure_tracking(
        &mut self,
        vid: &str,
        stop_id: &str,
        route_id: Option<&str>,
        timestamp: DateTime<Utc>,
    ) {
        if let Some(rid) = route_id {
            self.last_departure
                .insert((Some(rid.to_owned()), stop_id.to_owned()), timestamp);
        }
        self.last_departure
            .insert((None, stop_id.to_owned()), timestamp);
        self.last_vehicle_departure.insert(
            (
                vid.to_owned(),
                stop_id.to_owned(),
                route_id.map(str::to_owned),
            ),
            timestamp,
        );

        // Mirror onto every route variant this vehicle has arrived under.
        let variants: Vec<(String, String, Option<String>)> = self
            .last_vehicle_arrival
            .keys()
            .filter(|(v, s, _)| v == vid && s == stop_id)
            .cloned()
            .collect();
        for key in variants {
            self.last_vehicle_departure.insert(key, timestamp);
        }
    }

    fn log_activation(
        &mut self,
        vid: &str,
        snap: &VehicleSnapshot,
        stop: &StopPoint,
        set_index: usize,
        set_name: &str,
        bubble_order: u32,
        event_type: &str,
    ) {
        push_bounded(
            &mut self.recent_bubble_activations,
            DIAG_ACTIVATION_CAP,
            serde_json::json!({
                "timestamp": utility::time::format_iso_utc(snap.timestamp),
                "vehicle_id": vid,
                "vehicle_name": snap.vehicle_name,
                "stop_id": stop.stop_id,
                "stop_name": stop.name,
                "set_index": set_index,
                "set_name": set_name,
                "bubble_order": bubble_order,
                "event_type": event_type,
                "lat": snap.lat,
                "lon": snap.lon,
            }),
        );
    }

    fn log_diagnostics(
        &mut self,
        stops: &[StopPoint],
        vid: &str,
        snap: &VehicleSnapshot,
        route_id: Option<&str>,
        speed_mps: Option<f64>,
    ) {
        let nearest = nearest_stop(stops, &self.tracked_stop_ids, snap.lat, snap.lon, route_id);

        push_bounded(
            &mut self.recent_snapshot_diagnostics,
            DIAG_SNAPSHOT_CAP,
            serde_json::json!({
                "timestamp": utility::time::format_iso_utc(snap.timestamp),
                "vehicle_id": vid,
                "vehicle_name": snap.vehicle_name,
                "route_id": route_id,
                "heading_deg": snap.heading_deg,
                "speed_mps": speed_mps,
                "nearest_stop_id": nearest.as_ref().map(|(id, _)| id),
                "nearest_stop_distance": nearest.as_ref().map(|(_, d)| d),
                "lat": snap.lat,
                "lon": snap.lon,
            }),
        );

        let far = nearest
            .as_ref()
            .map_or(true, |(_, distance)| *distance > STOP_ASSOCIATION_DISTANCE_M);
        if far {
            let diagnosis = diagnose_stop_association(
                stops,
                &self.tracked_stop_ids,
                snap.lat,
                snap.lon,
                route_id,
            );
            push_bounded(
                &mut self.recent_stop_association_failures,
                DIAG_FAILURE_CAP,
                serde_json::json!({
                    "timestamp": utility::time::format_iso_utc(snap.timestamp),
                    "vehicle_id": vid,
                    "vehicle_name": snap.vehicle_name,
                    "route_id": route_id,
                    "lat": snap.lat,
                    "lon": snap.lon,
                    "heading_deg": snap.heading_deg,
                    "diagnosis": diagnosis,
                }),
            );
        }
    }

    /// Current bubble progress for every vehicle, for the diagnostics view.
    pub fn active_bubble_states(&self) -> Vec<serde_json::Value> {
        let mut states = Vec::new();
        for (vid, stop_map) in &self.progress {
            for (stop_id, set_map) in stop_map {
                let stop = self.stop_by_id(stop_id);
                for state in set_map.values() {
                    let bubbles = stop
                        .and_then(|s| s.approach_sets.get(state.set_index))
                        .map(|set| {
                            set.bubbles
                                .iter()
                                .map(|b| {
                                    serde_json::json!({
                                        "lat": b.lat,
                                        "lon": b.lon,
                                        "radius_m": b.radius_m,
                                        "order": b.order,
                                    })
                                })
                                .collect::<Vec<_>>()
                        })
                        .unwrap_or_default();
                    let arrival_type = state.arrival_logged.then(|| {
                        if state.stopped_in_final {
                            "stopped"
                        } else {
                            "passthrough"
                        }
                    });
                    states.push(serde_json::json!({
                        "vehicle_id": vid,
                        "stop_id": stop_id,
                        "set_index": state.set_index,
                        "set_name": state.set_name,
                        "highest_bubble_reached": state.highest_bubble_reached,
                        "max_bubble_order": state.max_bubble_order,
                        "in_final_bubble": state.in_final_bubble,
                        "stopped_in_final": state.stopped_in_final,
                        "arrival_logged": state.arrival_logged,
                        "arrival_type": arrival_type,
                        "last_seen": utility::time::format_iso_utc(state.last_seen),
                        "entered_at": utility::time::format_iso_utc(state.entered_at),
                        "bubbles": bubbles,
                    }));
                }
            }
        }
        states
    }

    pub fn snapshot_diagnostics(&self) -> Vec<serde_json::Value> {
        self.recent_snapshot_diagnostics.iter().cloned().collect()
    }

    pub fn stop_association_failures(&self) -> Vec<serde_json::Value> {
        self.recent_stop_association_failures
            .iter()
            .cloned()
            .collect()
    }

    pub fn bubble_activations(&self) -> Vec<serde_json::Value> {
        self.recent_bubble_activations.iter().cloned().collect()
    }
}

fn push_bounded(deque: &mut VecDeque<serde_json::Value>, cap: usize, value: serde_json::Value) {
    if deque.len() == cap {
        deque.pop_front();
    }
    deque.push_back(value);
}

fn normalize_id(value: Option<&str>) -> Option<String> {
    let text = value?.trim();
    if text.is_empty() {
        None
    } else {
        Some(text.to_owned())
    }
}

fn bubbles_vehicle_is_in(snap: &VehicleSnapshot, set: &ApproachSet) -> BTreeSet<u32> {
    set.bubbles
        .iter()
        .filter(|bubble| {
            haversine_distance_m(snap.lat, snap.lon, bubble.lat, bubble.lon) <= bubble.radius_m
        })
        .map(|bubble| bubble.order)
        .collect()
}

fn nearest_stop(
    stops: &[StopPoint],
    tracked_stop_ids: &BTreeSet<String>,
    lat: f64,
    lon: f64,
    route_id: Option<&str>,
) -> Option<(String, f64)> {
    let mut nearest: Option<(String, f64)> = None;
    for stop in stops {
        if !tracked_stop_ids.is_empty() && !tracked_stop_ids.contains(&stop.stop_id) {
            continue;
        }
        if let Some(rid) = route_id {
            if !stop.serves_route(rid) {
                continue;
            }
        }
        let distance = haversine_distance_m(lat, lon, stop.lat, stop.lon);
        if nearest.as_ref().map_or(true, |(_, best)| distance < *best) {
            nearest = Some((stop.stop_id.clone(), distance));
        }
    }
    nearest
}

fn diagnose_stop_association(
    stops: &[StopPoint],
    tracked_stop_ids: &BTreeSet<String>,
    lat: f64,
    lon: f64,
    route_id: Option<&str>,
) -> serde_json::Value {
    if stops.is_empty() {
        return serde_json::json!({ "reason": "no_stops" });
    }

    let mut nearest_any: Option<(&StopPoint, f64)> = None;
    let mut nearest_route_mismatch: Option<(&StopPoint, f64)> = None;

    for stop in stops {
        if !tracked_stop_ids.is_empty() && !tracked_stop_ids.contains(&stop.stop_id) {
            continue;
        }
        let distance = haversine_distance_m(lat, lon, stop.lat, stop.lon);
        if nearest_any.map_or(true, |(_, best)| distance < best) {
            nearest_any = Some((stop, distance));
        }
        if let Some(rid) = route_id {
            if !stop.serves_route_ids.is_empty()
                && !stop.serves_route_ids.contains(rid)
                && distance <= STOP_ASSOCIATION_DISTANCE_M
                && nearest_route_mismatch.map_or(true, |(_, best)| distance < best)
            {
                nearest_route_mismatch = Some((stop, distance));
            }
        }
    }

    if let Some((stop, distance)) = nearest_route_mismatch {
        return serde_json::json!({
            "reason": "route_mismatch",
            "nearest_stop_id": stop.stop_id,
            "nearest_stop_route_ids": stop.serves_route_ids,
            "distance_m": distance,
            "threshold_m": STOP_ASSOCIATION_DISTANCE_M,
        });
    }
    if let Some((stop, distance)) = nearest_any {
        return serde_json::json!({
            "reason": "beyond_distance",
            "nearest_stop_id": stop.stop_id,
            "nearest_stop_route_ids": stop.serves_route_ids,
            "distance_m": distance,
            "threshold_m": STOP_ASSOCIATION_DISTANCE_M,
        });
    }
    serde_json::json!({ "reason": "unknown" })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use model::stop::Bubble;

    fn storage() -> (tempfile::TempDir, HeadwayStorage) {
        let dir = tempfile::tempdir().unwrap();
        let storage = HeadwayStorage::new(vec![dir.path().to_path_buf()]);
        (dir, storage)
    }

    fn tracker(storage: HeadwayStorage) -> HeadwayTracker {
        HeadwayTracker::new(storage, BTreeSet::new(), BTreeSet::new())
    }

    fn approach_set() -> ApproachSet {
        ApproachSet {
            name: "main".to_owned(),
            bubbles: vec![
                Bubble {
                    lat: 0.0,
                    lon: -0.0006,
                    radius_m: 70.0,
                    order: 1,
                },
                Bubble {
                    lat: 0.0,
                    lon: 0.0,
                    radius_m: 30.0,
                    order: 2,
                },
            ],
        }
    }

    fn basic_stop() -> StopSeed {
        StopSeed {
            stop_id: "STOP".to_owned(),
            name: Some("Main & First".to_owned()),
            lat: 0.0,
            lon: 0.0,
            address_id: None,
            route_ids: ["R1".to_owned()].into(),
            approach_sets: vec![approach_set()],
        }
    }

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn snap(lon: f64, at: DateTime<Utc>) -> VehicleSnapshot {
        VehicleSnapshot {
            vehicle_id: Some("bus".to_owned()),
            vehicle_name: None,
            lat: 0.0,
            lon,
            route_id: Some("R1".to_owned()),
            timestamp: at,
            heading_deg: None,
            block: None,
        }
    }

    fn feed(tracker: &mut HeadwayTracker, points: &[(f64, i64)]) -> Vec<HeadwayEvent> {
        let ctx = LookupContext::default();
        let mut events = Vec::new();
        for (lon, offset) in points {
            events.extend(tracker.process_snapshots(
                &[snap(*lon, base() + Duration::seconds(*offset))],
                &ctx,
            ));
        }
        events
    }

    #[test]
    fn stopped_arrival_then_departure_with_dwell() {
        let (_dir, storage) = storage();
        let mut tracker = tracker(storage);
        tracker.update_stops(vec![basic_stop()]);

        let events = feed(
            &mut tracker,
            &[(-0.0006, 0), (0.0, 20), (0.0, 40), (0.0005, 70)],
        );

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, EventType::Arrival);
        assert_eq!(events[0].arrival_type, Some(ArrivalType::Stopped));
        assert_eq!(events[0].timestamp, base() + Duration::seconds(40));
        assert_eq!(events[1].event_type, EventType::Departure);
        assert_eq!(events[1].timestamp, base() + Duration::seconds(70));
        assert_eq!(events[1].dwell_s, Some(30.0));
    }

    #[test]
    fn passthrough_arrival_and_departure_share_exit_time() {
        let (_dir, storage) = storage();
        let mut tracker = tracker(storage);
        tracker.update_stops(vec![basic_stop()]);

        let events = feed(
            &mut tracker,
            &[(-0.0010, 0), (-0.0006, 10), (0.0, 20), (0.0004, 30), (0.0010, 40)],
        );

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, EventType::Arrival);
        assert_eq!(events[0].arrival_type, Some(ArrivalType::Passthrough));
        assert_eq!(events[0].timestamp, base() + Duration::seconds(30));
        assert_eq!(events[1].event_type, EventType::Departure);
        assert_eq!(events[1].timestamp, base() + Duration::seconds(30));
        assert_eq!(events[1].dwell_s, Some(0.0));
    }

    #[test]
    fn skipping_the_outer_bubble_never_arrives() {
        let (_dir, storage) = storage();
        let mut tracker = tracker(storage);
        tracker.update_stops(vec![basic_stop()]);

        // Straight into bubble 2 without ever touching bubble 1.
        let events = feed(&mut tracker, &[(0.00025, 0), (0.0006, 20)]);
        assert!(events.is_empty());
    }

    #[test]
    fn route_mismatch_suppresses_all_events() {
        let (_dir, storage) = storage();
        let mut tracker = tracker(storage);
        let mut stop = basic_stop();
        stop.route_ids = ["R2".to_owned()].into();
        tracker.update_stops(vec![stop]);

        let events = feed(&mut tracker, &[(-0.0010, 0), (-0.0006, 20), (0.0, 40)]);
        assert!(events.is_empty());
    }

    #[test]
    fn two_approach_sets_log_one_arrival_and_one_departure() {
        let (_dir, storage) = storage();
        let mut tracker = tracker(storage);
        let mut stop = basic_stop();
        let mut second = approach_set();
        second.name = "alternate".to_owned();
        stop.approach_sets.push(second);
        tracker.update_stops(vec![stop]);

        let events = feed(
            &mut tracker,
            &[(-0.0006, 0), (0.0, 20), (0.0, 40), (0.0005, 70)],
        );

        let arrivals = events
            .iter()
            .filter(|e| e.event_type == EventType::Arrival)
            .count();
        let departures = events
            .iter()
            .filter(|e| e.event_type == EventType::Departure)
            .count();
        assert_eq!(arrivals, 1);
        assert_eq!(departures, 1);
    }

    #[test]
    fn second_arrival_carries_arrival_arrival_headway() {
        let (_dir, storage) = storage();
        let mut tracker = tracker(storage);
        tracker.update_stops(vec![basic_stop()]);

        // First bus through.
        feed(
            &mut tracker,
            &[(-0.0006, 0), (0.0, 20), (0.0, 40), (0.0005, 70)],
        );

        // Second pass ten minutes later.
        let ctx = LookupContext::default();
        let mut events = Vec::new();
        for (lon, offset) in [(-0.0006, 600), (0.0, 620), (0.0, 640)] {
            events.extend(tracker.process_snapshots(
                &[snap(lon, base() + Duration::seconds(offset))],
                &ctx,
            ));
        }

        let arrival = events
            .iter()
            .find(|e| e.event_type == EventType::Arrival)
            .unwrap();
        // 640s arrival minus 40s prior arrival.
        assert_eq!(arrival.headway_arrival_arrival_s, Some(600.0));
        assert_eq!(arrival.headway_departure_arrival_s, Some(570.0));
    }

    #[test]
    fn headway_backfills_from_storage_across_restart() {
        let (dir, storage) = storage();
        {
            let mut tracker = tracker(storage);
            tracker.update_stops(vec![basic_stop()]);
            feed(
                &mut tracker,
                &[(-0.0006, 0), (0.0, 20), (0.0, 40), (0.0005, 70)],
            );
        }

        // Fresh tracker over the same files: in-memory headway state is
        // gone, storage supplies the previous arrival.
        let mut tracker = tracker(HeadwayStorage::new(vec![dir.path().to_path_buf()]));
        tracker.update_stops(vec![basic_stop()]);
        let ctx = LookupContext::default();
        let mut events = Vec::new();
        for (lon, offset) in [(-0.0006, 600), (0.0, 620), (0.0, 640)] {
            events.extend(tracker.process_snapshots(
                &[snap(lon, base() + Duration::seconds(offset))],
                &ctx,
            ));
        }
        let arrival = events
            .iter()
            .find(|e| e.event_type == EventType::Arrival)
            .unwrap();
        assert_eq!(arrival.headway_arrival_arrival_s, Some(600.0));
    }

    #[test]
    fn duplicate_vehicle_in_batch_is_processed_once() {
        let (_dir, storage) = storage();
        let mut tracker = tracker(storage);
        tracker.update_stops(vec![basic_stop()]);

        // The same vehicle reported on two routes in one batch.
        let ctx = LookupContext::default();
        let mut first = snap(-0.0006, base());
        first.route_id = Some("R1".to_owned());
        let mut second = snap(-0.0006, base());
        second.route_id = Some("R9".to_owned());
        tracker.process_snapshots(&[first, second], &ctx);

        let states = tracker.active_bubble_states();
        assert_eq!(states.len(), 1);
    }

    #[test]
    fn stale_progress_is_swept() {
        let (_dir, storage) = storage();
        let mut tracker = tracker(storage);
        tracker.update_stops(vec![basic_stop()]);

        feed(&mut tracker, &[(-0.0006, 0)]);
        assert_eq!(tracker.active_bubble_states().len(), 1);

        // Nothing seen for three minutes; next batch sweeps the state.
        feed(&mut tracker, &[(-0.0100, 200)]);
        assert!(tracker.active_bubble_states().is_empty());
    }

    #[test]
    fn gps_drift_outside_bubbles_keeps_tracking() {
        let (_dir, storage) = storage();
        let mut tracker = tracker(storage);
        tracker.update_stops(vec![basic_stop()]);

        // Enter bubble 1, drift just outside every bubble (still well inside
        // 400 m of the final bubble), then proceed to the stop.
        let events = feed(
            &mut tracker,
            &[(-0.0006, 0), (-0.0015, 10), (0.0, 30), (0.0, 50), (0.0005, 80)],
        );

        let arrival = events
            .iter()
            .find(|e| e.event_type == EventType::Arrival)
            .unwrap();
        assert_eq!(arrival.arrival_type, Some(ArrivalType::Stopped));
    }

    #[test]
    fn far_drift_abandons_tracking() {
        let (_dir, storage) = storage();
        let mut tracker = tracker(storage);
        tracker.update_stops(vec![basic_stop()]);

        feed(&mut tracker, &[(-0.0006, 0)]);
        // 0.01 degrees of longitude is over a kilometer out.
        feed(&mut tracker, &[(0.0100, 10)]);
        assert!(tracker.active_bubble_states().is_empty());
    }

    #[test]
    fn stops_sharing_address_id_merge() {
        let (_dir, storage) = storage();
        let mut tracker = tracker(storage);

        let mut stop_a = basic_stop();
        stop_a.stop_id = "A".to_owned();
        stop_a.address_id = Some("100".to_owned());
        stop_a.route_ids = ["R1".to_owned()].into();
        let mut stop_b = basic_stop();
        stop_b.stop_id = "B".to_owned();
        stop_b.address_id = Some("100".to_owned());
        stop_b.route_ids = ["R2".to_owned()].into();
        let mut renamed = approach_set();
        renamed.name = "east".to_owned();
        stop_b.approach_sets = vec![renamed, approach_set()];

        tracker.update_stops(vec![stop_a, stop_b]);

        assert_eq!(tracker.stops().len(), 1);
        let merged = &tracker.stops()[0];
        assert_eq!(merged.stop_id, "A");
        assert!(merged.serves_route_ids.contains("R1"));
        assert!(merged.serves_route_ids.contains("R2"));
        // "main" deduped by name, "east" added.
        assert_eq!(merged.approach_sets.len(), 2);
        assert!(tracker.stop_by_address("100").is_some());
    }

    #[test]
    fn bubble_radii_are_clamped() {
        let (_dir, storage) = storage();
        let mut tracker = tracker(storage);
        let mut stop = basic_stop();
        stop.approach_sets[0].bubbles[0].radius_m = 1.0;
        stop.approach_sets[0].bubbles[1].radius_m = 5000.0;
        tracker.update_stops(vec![stop]);

        let bubbles = &tracker.stops()[0].approach_sets[0].bubbles;
        assert_eq!(bubbles[0].radius_m, MIN_BUBBLE_RADIUS_M);
        assert_eq!(bubbles[1].radius_m, MAX_BUBBLE_RADIUS_M);
    }
}
