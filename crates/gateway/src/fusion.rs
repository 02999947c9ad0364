use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local, Utc};
use model::headway::VehicleSnapshot;
use model::route::Route;
use model::stop::ApproachSet;
use model::vehicle::{FusedVehicle, PersistedHeading, RawVehicle, VehicleCapacity};
use transloc::model::{RouteWithShape, TranslocStop, VehiclePoint};
use utility::geo::{bearing_deg, haversine_distance_m, heading_diff_deg, project_onto_segment};
use utility::polyline;
use utility::time::service_day;

use crate::cache::FetchError;
use crate::core::{Core, EstimatesById, HEADINGS_FILE};
use crate::drivers::{self, ResolverInputs};
use crate::fullbus::tracker::StopRef;
use crate::headway::tracker::LookupContext;
use crate::headway::StopSeed;
use crate::mileage::{self, MILEAGE_FILE};
use crate::persist;
use crate::state::{AppState, TestmapPayload, TestmapVehicle, VehicleTrack};

/// Along-route speeds inside this deadband do not change the direction sign.
pub const DIR_EPS_MPS: f64 = 0.5;

/// Segment projections within this margin of the best score are considered
/// tied and broken by heading, then by segment continuity.
const PROJECTION_TIE_M: f64 = 2.0;

#[derive(Debug, Clone, Copy)]
pub struct FusionParams {
    pub ema_alpha: f64,
    pub min_speed_floor: f64,
    pub max_speed_ceil: f64,
    pub heading_jitter_m: f64,
    pub stale_fix_s: f64,
    pub vehicle_stale_threshold_s: f64,
}

impl FusionParams {
    fn from_config(config: &crate::config::Config) -> Self {
        Self {
            ema_alpha: config.ema_alpha,
            min_speed_floor: config.min_speed_floor,
            max_speed_ceil: config.max_speed_ceil,
            heading_jitter_m: config.heading_jitter_m,
            stale_fix_s: config.stale_fix_s,
            vehicle_stale_threshold_s: config.vehicle_stale_threshold_s,
        }
    }
}

/// The AVL-driven main loop: fetch vehicles, run one fusion tick, sleep out
/// the remainder of the interval. Any tick failure is recorded and the next
/// tick proceeds without backoff.
pub async fn run(core: Arc<Core>) {
    let interval = core.config.veh_refresh_s.max(0.5);
    loop {
        let started = Instant::now();
        let fetch_started_at = Utc::now();
        match core.transloc.vehicle_points().await {
            Ok(points) => tick(&core, points, fetch_started_at).await,
            Err(why) => {
                log::warn!("[fusion] vehicle fetch failed: {why}");
                core.state.write().await.note_error(&why);
            }
        }
        let remaining = (interval - started.elapsed().as_secs_f64()).max(0.5);
        tokio::time::sleep(Duration::from_secs_f64(remaining)).await;
    }
}

async fn tick(core: &Arc<Core>, points: Vec<VehiclePoint>, fetch_started_at: DateTime<Utc>) {
    let config = &core.config;
    let params = FusionParams::from_config(config);

    let raw: Vec<RawVehicle> = points.iter().filter_map(VehiclePoint::to_raw).collect();

    // Latest cached upstream snapshots; pollers own the refresh cycles.
    let routes_payload = core.routes_cache.peek().await.unwrap_or_default();
    let stops_raw = core.stops_cache.peek().await.unwrap_or_default();
    let capacities = core.capacities_cache.peek().await.unwrap_or_default();
    let block_groups = core.blocks_cache.peek().await.unwrap_or_default();
    let assignments = core.shifts_cache.peek().await.unwrap_or_default();
    let ondemand_vehicles = core.ondemand_cache.peek().await.unwrap_or_default();

    let fresh_rids: BTreeSet<i64> = raw
        .iter()
        .filter(|v| v.report_age_s <= params.stale_fix_s)
        .filter_map(|v| v.assigned_route_id())
        .collect();

    let estimates = fetch_estimates(core, &raw, params.stale_fix_s).await;

    // Decode new or changed polylines and stamp their road metadata before
    // taking the write lock; nothing below the lock touches the network.
    let new_routes = prepare_routes(core, &routes_payload.with_shapes, &fresh_rids).await;

    let seeds = build_stop_seeds(&stops_raw, &routes_payload.with_shapes, &core.approach_config);
    let service_date = service_day(Local::now());

    let (payload, snapshots, route_names, vehicle_blocks, bus_days, headings, capacities_map) = {
        let mut state = core.state.write().await;

        state.routes_raw = routes_payload.with_shapes.clone();
        state.stops_raw = stops_raw.clone();
        state.vehicles_raw = raw.clone();
        state.vehicle_capacities = capacities
            .iter()
            .map(|c| {
                (
                    c.vehicle_id,
                    VehicleCapacity {
                        capacity: c.capacity,
                        current_occupation: c.current_occupation,
                        percentage: c.percentage,
                    },
                )
            })
            .collect();
        state.stop_estimates = estimates;

        let mut names: HashMap<i64, String> = HashMap::new();
        for entry in &routes_payload.catalog {
            names.insert(entry.route_id, route_display_name(&entry.description, &entry.info_text));
        }
        for route in &routes_payload.with_shapes {
            names.insert(
                route.route_id,
                route_display_name(&route.description, &route.info_text),
            );
        }
        state.route_id_to_name = names;

        for route in new_routes {
            state.routes.insert(route.route_id, route);
        }

        for rid in &fresh_rids {
            state.route_last_seen.insert(*rid, fetch_started_at);
        }
        let grace = chrono::Duration::milliseconds((config.route_grace_s * 1000.0) as i64);
        state.active_route_ids = state
            .route_last_seen
            .iter()
            .filter(|(_, seen)| fetch_started_at - **seen <= grace)
            .map(|(rid, _)| *rid)
            .collect();

        fuse_fresh_vehicles(&mut state, &raw, fetch_started_at, &params);

        // Mileage counts every recently-heard vehicle, with or without a
        // route assignment.
        let fresh_all: Vec<RawVehicle> = raw
            .iter()
            .filter(|v| v.report_age_s <= params.stale_fix_s)
            .cloned()
            .collect();
        mileage::record_positions(&mut state.bus_days, &fresh_all, service_date);

        let windows = drivers::build_block_windows(&block_groups, &state.route_id_to_name);
        let now_ts = fetch_started_at.timestamp_millis();
        state.plain_language_blocks = drivers::plain_language_blocks(&windows, now_ts);

        let vehicle_names = state.vehicle_names();
        let vehicle_routes = state.vehicle_routes();
        let inputs = ResolverInputs {
            block_windows: &windows,
            assignments: &assignments,
            vehicle_names: &vehicle_names,
            vehicle_routes: &vehicle_routes,
            ondemand_vehicles: &ondemand_vehicles,
            now_ts,
        };
        let mut block_cache = std::mem::take(&mut state.vehicle_block_cache);
        state.vehicle_drivers = drivers::resolve_vehicle_drivers(&inputs, &mut block_cache);
        state.vehicle_block_cache = block_cache;
        state.block_windows = windows;

        let vehicle_blocks = state.vehicle_blocks();

        let mut snapshots = Vec::new();
        for (rid, vehicles) in &state.vehicles_by_route {
            for vehicle in vehicles {
                let vid = vehicle.vehicle_id.to_string();
                snapshots.push(VehicleSnapshot {
                    vehicle_id: Some(vid.clone()),
                    vehicle_name: Some(vehicle.name.clone()).filter(|n| !n.is_empty()),
                    lat: vehicle.lat,
                    lon: vehicle.lon,
                    route_id: Some(rid.to_string()),
                    // Always the fetch start, never the provider's clock.
                    timestamp: fetch_started_at,
                    heading_deg: Some(vehicle.heading_deg),
                    block: vehicle_blocks.get(&vid).cloned(),
                });
            }
        }

        let payload = build_testmap_payload(&state, &vehicle_blocks, fetch_started_at);
        state.testmap_payload = payload;
        state.last_tick_at = Some(fetch_started_at);

        let route_names: HashMap<String, String> = state
            .route_id_to_name
            .iter()
            .map(|(rid, name)| (rid.to_string(), name.clone()))
            .collect();
        let headings = if state.headings_dirty {
            state.headings_dirty = false;
            let map: HashMap<String, PersistedHeading> = state
                .last_headings
                .iter()
                .map(|(vid, heading)| (vid.to_string(), *heading))
                .collect();
            Some(map)
        } else {
            None
        };

        (
            state.testmap_payload.clone(),
            snapshots,
            route_names,
            vehicle_blocks,
            state.bus_days.clone(),
            headings,
            state.vehicle_capacities.clone(),
        )
    };

    persist::write_json_all(&config.data_dirs, MILEAGE_FILE, &bus_days).await;
    if let Some(headings) = headings {
        persist::write_json_all(&config.data_dirs, HEADINGS_FILE, &headings).await;
    }

    core.vehicles_broadcast.publish_json(&payload);

    // Tracker work is best-effort; a failure here must not poison fusion.
    {
        let mut tracker = core.headway.lock().await;
        if !seeds.is_empty() {
            tracker.update_stops(seeds);
        }
        let ctx = LookupContext {
            route_names: route_names.clone(),
            vehicle_blocks: vehicle_blocks.clone(),
        };
        tracker.process_snapshots(&snapshots, &ctx);
    }
    {
        let stop_fields: Vec<(String, String, f64, f64)> = stops_raw
            .iter()
            .filter_map(|stop| {
                let id = stop.stop_id?;
                let lat = stop.latitude?;
                let lon = stop.longitude?;
                let name = stop
                    .stop_name
                    .clone()
                    .or_else(|| stop.description.clone())
                    .unwrap_or_default();
                Some((id.to_string(), name, lat, lon))
            })
            .collect();
        let stop_refs: Vec<StopRef> = stop_fields
            .iter()
            .map(|(id, name, lat, lon)| StopRef {
                stop_id: id,
                name,
                lat: *lat,
                lon: *lon,
            })
            .collect();
        let mut fullbus = core.fullbus.lock().await;
        fullbus.process_cycle(
            &capacities_map,
            &raw,
            &stop_refs,
            &route_names,
            &vehicle_blocks,
            fetch_started_at,
        );
    }
}

async fn fetch_estimates(core: &Arc<Core>, raw: &[RawVehicle], stale_fix_s: f64) -> EstimatesById {
    let mut ids: Vec<i64> = raw
        .iter()
        .filter(|v| v.report_age_s <= stale_fix_s && v.assigned_route_id().is_some())
        .map(|v| v.vehicle_id)
        .collect();
    ids.sort_unstable();
    ids.dedup();
    if ids.is_empty() {
        return EstimatesById::new();
    }

    let key = ids
        .iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(",");
    let fetch_core = core.clone();
    let fetch_ids = ids.clone();
    let (estimates, _) = core
        .estimates_cache
        .get(key, async move {
            let list = fetch_core
                .transloc
                .stop_estimates(&fetch_ids)
                .await
                .map_err(FetchError::new)?;
            Ok(list
                .into_iter()
                .map(|entry| (entry.vehicle_id, entry.estimates))
                .collect())
        })
        .await;
    estimates
}

/// Decode polylines for active routes that are new or whose shape changed,
/// stamping segment speed caps and road names. Profiles are fetched once per
/// encoded polyline and cached.
async fn prepare_routes(
    core: &Arc<Core>,
    with_shapes: &[RouteWithShape],
    fresh_rids: &BTreeSet<i64>,
) -> Vec<Route> {
    let existing: HashMap<i64, String> = {
        let state = core.state.read().await;
        state
            .routes
            .iter()
            .map(|(rid, route)| (*rid, route.encoded_polyline.clone()))
            .collect()
    };

    let mut new_routes = Vec::new();
    for shape in with_shapes {
        if !fresh_rids.contains(&shape.route_id) || shape.encoded_polyline.is_empty() {
            continue;
        }
        let changed = existing
            .get(&shape.route_id)
            .map_or(true, |encoded| encoded != &shape.encoded_polyline);
        if !changed {
            continue;
        }

        let decoded = polyline::decode(&shape.encoded_polyline);
        if decoded.len() < 2 {
            log::warn!(
                "[fusion] route {} has an undecodable polyline; skipping",
                shape.route_id
            );
            continue;
        }
        let mut route = Route::from_polyline(
            shape.route_id,
            shape.description.clone(),
            shape.info_text.clone(),
            shape.map_line_color.clone(),
            shape.encoded_polyline.clone(),
            decoded,
        );

        let cached = {
            let profiles = core.speed_profiles.lock().await;
            profiles.get(&shape.encoded_polyline).cloned()
        };
        let profile = match cached {
            Some(profile) => Some(profile),
            None => match core.overpass.speed_profile(&route.polyline).await {
                Ok(profile) => {
                    core.speed_profiles
                        .lock()
                        .await
                        .insert(shape.encoded_polyline.clone(), profile.clone());
                    Some(profile)
                }
                Err(why) => {
                    log::warn!(
                        "[fusion] speed profile fetch failed for route {}: {why}",
                        shape.route_id
                    );
                    None
                }
            },
        };
        if let Some(profile) = profile {
            route.segment_speed_caps_mps = profile.segment_speed_caps_mps;
            route.segment_road_names = profile.segment_road_names;
        }
        new_routes.push(route);
    }
    new_routes
}

fn route_display_name(description: &str, info_text: &str) -> String {
    let info = info_text.trim();
    if info.is_empty() {
        description.trim().to_owned()
    } else {
        format!("{} {}", description.trim(), info)
    }
}

/// Rebuild `vehicles_by_route` from this tick's fresh vehicles only;
/// vehicles absent from the feed drop out immediately.
fn fuse_fresh_vehicles(
    state: &mut AppState,
    raw: &[RawVehicle],
    now: DateTime<Utc>,
    params: &FusionParams,
) {
    let mut by_route: HashMap<i64, Vec<FusedVehicle>> = HashMap::new();

    for vehicle in raw {
        if vehicle.report_age_s > params.stale_fix_s {
            continue;
        }
        let Some(rid) = vehicle.assigned_route_id() else {
            continue;
        };
        let Some(route) = state.routes.get(&rid) else {
            continue;
        };

        let prior = state.vehicle_tracks.get(&vehicle.vehicle_id).cloned();
        let persisted = state.last_headings.get(&vehicle.vehicle_id).copied();
        let (fused, track) = fuse_vehicle(vehicle, route, prior.as_ref(), persisted, now, params);

        let heading_changed = persisted.map_or(true, |p| p.heading != track.heading_deg);
        if heading_changed {
            state.last_headings.insert(
                vehicle.vehicle_id,
                PersistedHeading {
                    heading: track.heading_deg,
                    updated_at: now.timestamp_millis(),
                },
            );
            state.headings_dirty = true;
        }
        state.vehicle_tracks.insert(vehicle.vehicle_id, track);
        by_route.entry(rid).or_default().push(fused);
    }

    state.vehicles_by_route = by_route;
}

/// Derive one vehicle's along-route state for this tick.
pub fn fuse_vehicle(
    vehicle: &RawVehicle,
    route: &Route,
    prior: Option<&VehicleTrack>,
    persisted_heading: Option<PersistedHeading>,
    now: DateTime<Utc>,
    params: &FusionParams,
) -> (FusedVehicle, VehicleTrack) {
    let heading = derive_heading(
        prior,
        persisted_heading,
        vehicle.lat,
        vehicle.lon,
        params.heading_jitter_m,
    );

    let (segment_index, arc_length_m) = project_to_route(
        route,
        vehicle.lat,
        vehicle.lon,
        heading,
        prior.map(|t| t.segment_index),
    );

    let delta_t = prior
        .map(|t| (now - t.updated_at).num_milliseconds() as f64 / 1000.0)
        .unwrap_or(0.0);
    let delta_s = prior
        .map(|t| wrap_delta(arc_length_m - t.arc_length_m, route.total_length_m))
        .unwrap_or(0.0);
    let along_route_speed_mps = if delta_t > 0.0 { delta_s / delta_t } else { 0.0 };

    let direction_sign = if along_route_speed_mps > DIR_EPS_MPS {
        1
    } else if along_route_speed_mps < -DIR_EPS_MPS {
        -1
    } else if let Some(track) = prior {
        track.direction_sign
    } else {
        direction_from_heading(route, segment_index, heading)
    };

    let abs_along = along_route_speed_mps.abs();
    let measured = if vehicle.ground_speed_mps > 0.0 {
        0.5 * vehicle.ground_speed_mps + 0.5 * abs_along
    } else {
        abs_along
    };
    let ema_raw = match prior {
        Some(track) => params.ema_alpha * measured + (1.0 - params.ema_alpha) * track.ema_speed_mps,
        None => measured,
    };
    let ema_speed_mps = ema_raw.clamp(params.min_speed_floor, params.max_speed_ceil);

    let fused = FusedVehicle {
        vehicle_id: vehicle.vehicle_id,
        name: vehicle.name.clone(),
        route_id: vehicle.route_id,
        lat: vehicle.lat,
        lon: vehicle.lon,
        heading_deg: heading,
        ground_speed_mps: vehicle.ground_speed_mps,
        report_age_s: vehicle.report_age_s,
        provider_timestamp_ms: vehicle.provider_timestamp_ms,
        arc_length_m,
        segment_index,
        direction_sign,
        ema_speed_mps,
        along_route_speed_mps,
        is_stale: vehicle.report_age_s > params.stale_fix_s,
        is_very_stale: vehicle.report_age_s >= params.vehicle_stale_threshold_s,
    };
    let track = VehicleTrack {
        lat: vehicle.lat,
        lon: vehicle.lon,
        heading_deg: heading,
        arc_length_m,
        segment_index,
        direction_sign,
        ema_speed_mps,
        updated_at: now,
    };
    (fused, track)
}

/// Heading rules: a real displacement gives a fresh bearing; tiny moves keep
/// the prior heading; with no prior track the persisted heading is reused;
/// failing all that, north.
pub fn derive_heading(
    prior: Option<&VehicleTrack>,
    persisted: Option<PersistedHeading>,
    lat: f64,
    lon: f64,
    jitter_m: f64,
) -> f64 {
    let heading = match prior {
        Some(track) => {
            let moved = haversine_distance_m(track.lat, track.lon, lat, lon);
            if moved >= jitter_m {
                bearing_deg(track.lat, track.lon, lat, lon)
            } else {
                track.heading_deg
            }
        }
        None => match persisted {
            Some(persisted) => persisted.heading,
            None => 0.0,
        },
    };
    utility::geo::normalize_heading(heading)
}

/// Project onto the closest polyline segment. Near-ties are resolved by the
/// segment bearing closest to the vehicle heading, then by circular
/// proximity to the previous segment index.
pub fn project_to_route(
    route: &Route,
    lat: f64,
    lon: f64,
    heading: f64,
    prior_segment: Option<usize>,
) -> (usize, f64) {
    let segment_count = route.segment_count();
    if segment_count == 0 {
        return (0, 0.0);
    }

    let mut scored: Vec<(usize, f64, f64)> = Vec::with_capacity(segment_count);
    for index in 0..segment_count {
        let a = route.polyline[index];
        let b = route.polyline[index + 1];
        let projection = project_onto_segment(lat, lon, a, b);
        scored.push((index, projection.t, projection.dist_sq_m));
    }

    let best_dist = scored
        .iter()
        .map(|(_, _, dist_sq)| dist_sq.sqrt())
        .fold(f64::INFINITY, f64::min);

    let candidates: Vec<(usize, f64, f64)> = scored
        .into_iter()
        .filter(|(_, _, dist_sq)| dist_sq.sqrt() <= best_dist + PROJECTION_TIE_M)
        .collect();

    let chosen = if candidates.len() == 1 {
        candidates[0]
    } else {
        let mut ranked: Vec<((usize, f64, f64), f64)> = candidates
            .iter()
            .map(|candidate| {
                (
                    *candidate,
                    heading_diff_deg(segment_bearing(route, candidate.0), heading),
                )
            })
            .collect();
        ranked.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

        // Heading decides the tie unless it too is ambiguous, in which case
        // stay close to where the vehicle was last projected.
        let heading_ambiguous = ranked.len() > 1 && (ranked[1].1 - ranked[0].1).abs() < 1.0;
        match (heading_ambiguous, prior_segment) {
            (true, Some(prior)) => candidates
                .iter()
                .min_by_key(|(index, _, _)| circular_distance(*index, prior, segment_count))
                .copied()
                .unwrap_or(ranked[0].0),
            _ => ranked[0].0,
        }
    };

    let (index, t, _) = chosen;
    let arc = route.cumulative_distances_m[index] + t * route.segment_length_m(index);
    (index, arc.clamp(0.0, route.total_length_m))
}

fn segment_bearing(route: &Route, index: usize) -> f64 {
    let a = route.polyline[index];
    let b = route.polyline[index + 1];
    bearing_deg(a.0, a.1, b.0, b.1)
}

fn circular_distance(a: usize, b: usize, len: usize) -> usize {
    let diff = a.abs_diff(b);
    diff.min(len - diff)
}

fn direction_from_heading(route: &Route, segment_index: usize, heading: f64) -> i8 {
    if route.segment_count() == 0 {
        return 0;
    }
    if heading_diff_deg(heading, segment_bearing(route, segment_index)) <= 90.0 {
        1
    } else {
        -1
    }
}

/// Along-route displacement on a loop: shifts by the route length so that a
/// vehicle crossing the start line reads as a small forward step rather than
/// a full lap backwards.
pub fn wrap_delta(delta: f64, total: f64) -> f64 {
    if total <= 0.0 {
        return delta;
    }
    let mut wrapped = delta;
    if wrapped > total / 2.0 {
        wrapped -= total;
    } else if wrapped < -total / 2.0 {
        wrapped += total;
    }
    wrapped
}

fn build_testmap_payload(
    state: &AppState,
    vehicle_blocks: &HashMap<String, String>,
    generated_at: DateTime<Utc>,
) -> TestmapPayload {
    let mut vehicles = Vec::new();
    for fused in state.vehicles_by_route.values().flatten() {
        let vid = fused.vehicle_id.to_string();
        let capacity = state.vehicle_capacities.get(&fused.vehicle_id);
        vehicles.push(TestmapVehicle {
            vehicle_id: fused.vehicle_id,
            name: fused.name.clone(),
            route_id: fused.route_id,
            route_name: fused
                .route_id
                .and_then(|rid| state.route_id_to_name.get(&rid))
                .cloned(),
            lat: fused.lat,
            lon: fused.lon,
            heading_deg: fused.heading_deg,
            ground_speed_mps: fused.ground_speed_mps,
            ema_speed_mps: fused.ema_speed_mps,
            along_route_speed_mps: fused.along_route_speed_mps,
            arc_length_m: fused.arc_length_m,
            segment_index: fused.segment_index,
            direction_sign: fused.direction_sign,
            is_stale: fused.is_stale,
            is_very_stale: fused.is_very_stale,
            block: vehicle_blocks.get(&vid).cloned(),
            capacity: capacity.and_then(|c| c.capacity),
            current_occupation: capacity.and_then(|c| c.current_occupation),
            percentage: capacity.and_then(|c| c.percentage),
            estimates: state.stop_estimates.get(&fused.vehicle_id).cloned(),
        });
    }
    vehicles.sort_by_key(|v| v.vehicle_id);
    TestmapPayload {
        generated_at: Some(generated_at),
        vehicles,
    }
}

/// Union the stop feed with the stops embedded in route payloads, attaching
/// configured approach sets by stop id.
pub fn build_stop_seeds(
    stops_raw: &[TranslocStop],
    with_shapes: &[RouteWithShape],
    approach_config: &HashMap<String, Vec<ApproachSet>>,
) -> Vec<StopSeed> {
    let mut seeds = Vec::new();

    for stop in stops_raw {
        let Some(stop_id) = stop.stop_id else {
            continue;
        };
        let (Some(lat), Some(lon)) = (stop.latitude, stop.longitude) else {
            continue;
        };
        let stop_id = stop_id.to_string();
        let mut route_ids: BTreeSet<String> =
            stop.route_ids.iter().map(|rid| rid.to_string()).collect();
        if let Some(rid) = stop.route_id {
            route_ids.insert(rid.to_string());
        }
        seeds.push(StopSeed {
            approach_sets: approach_config.get(&stop_id).cloned().unwrap_or_default(),
            name: stop
                .stop_name
                .clone()
                .or_else(|| stop.description.clone())
                .map(|n| n.trim().to_owned()),
            lat,
            lon,
            address_id: stop.address_id.map(|id| id.to_string()),
            route_ids,
            stop_id,
        });
    }

    for route in with_shapes {
        for stop in &route.stops {
            let Some(stop_id) = stop.stop_id.or(stop.route_stop_id) else {
                continue;
            };
            let (Some(lat), Some(lon)) = (stop.latitude, stop.longitude) else {
                continue;
            };
            let stop_id = stop_id.to_string();
            let mut route_ids = BTreeSet::new();
            route_ids.insert(route.route_id.to_string());
            if let Some(rid) = stop.route_id {
                route_ids.insert(rid.to_string());
            }
            seeds.push(StopSeed {
                approach_sets: approach_config.get(&stop_id).cloned().unwrap_or_default(),
                name: stop
                    .name
                    .clone()
                    .or_else(|| stop.description.clone())
                    .map(|n| n.trim().to_owned()),
                lat,
                lon,
                address_id: stop.address_id.map(|id| id.to_string()),
                route_ids,
                stop_id,
            });
        }
    }

    seeds
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn params() -> FusionParams {
        FusionParams {
            ema_alpha: 0.4,
            min_speed_floor: 1.2,
            max_speed_ceil: 22.0,
            heading_jitter_m: 3.0,
            stale_fix_s: 90.0,
            vehicle_stale_threshold_s: 3600.0,
        }
    }

    fn straight_route() -> Route {
        // Runs east along the equator, ~111 m per segment.
        Route::from_polyline(
            1,
            "Test".into(),
            "".into(),
            None,
            "enc".into(),
            vec![(0.0, 0.0), (0.0, 0.001), (0.0, 0.002), (0.0, 0.003)],
        )
    }

    fn raw(lat: f64, lon: f64, ground: f64) -> RawVehicle {
        RawVehicle {
            vehicle_id: 9,
            name: "1701".into(),
            route_id: Some(1),
            lat,
            lon,
            heading_deg: 0.0,
            ground_speed_mps: ground,
            report_age_s: 2.0,
            provider_timestamp_ms: None,
        }
    }

    #[test]
    fn wrap_delta_handles_loop_crossover() {
        assert_eq!(wrap_delta(10.0, 1000.0), 10.0);
        assert_eq!(wrap_delta(-990.0, 1000.0), 10.0);
        assert_eq!(wrap_delta(990.0, 1000.0), -10.0);
        assert_eq!(wrap_delta(42.0, 0.0), 42.0);
    }

    #[test]
    fn projection_lands_on_correct_segment() {
        let route = straight_route();
        let (index, arc) = project_to_route(&route, 0.0001, 0.0015, 90.0, None);
        assert_eq!(index, 1);
        let expected = route.cumulative_distances_m[1] + route.segment_length_m(1) / 2.0;
        assert!((arc - expected).abs() < 1.0, "arc {arc} vs {expected}");
    }

    #[test]
    fn projection_tie_prefers_heading() {
        // A route going east then doubling back west on the same line: every
        // point ties between the two directions.
        let route = Route::from_polyline(
            2,
            "Loop".into(),
            "".into(),
            None,
            "enc".into(),
            vec![(0.0, 0.0), (0.0, 0.002), (0.0, 0.0)],
        );
        let (east_index, _) = project_to_route(&route, 0.0, 0.001, 90.0, None);
        assert_eq!(east_index, 0);
        let (west_index, _) = project_to_route(&route, 0.0, 0.001, 270.0, None);
        assert_eq!(west_index, 1);
    }

    #[test]
    fn projection_tie_with_prior_prefers_continuity() {
        let route = Route::from_polyline(
            2,
            "Loop".into(),
            "".into(),
            None,
            "enc".into(),
            vec![(0.0, 0.0), (0.0, 0.002), (0.0, 0.0)],
        );
        // Heading due north is equally wrong for both directions of travel,
        // so the previous segment breaks the tie.
        let (index, _) = project_to_route(&route, 0.0, 0.001, 0.0, Some(1));
        assert_eq!(index, 1);
        let (index, _) = project_to_route(&route, 0.0, 0.001, 0.0, Some(0));
        assert_eq!(index, 0);
    }

    #[test]
    fn heading_updates_only_past_jitter() {
        let now = Utc.with_ymd_and_hms(2025, 12, 18, 12, 0, 0).unwrap();
        let track = VehicleTrack {
            lat: 0.0,
            lon: 0.0,
            heading_deg: 45.0,
            arc_length_m: 0.0,
            segment_index: 0,
            direction_sign: 1,
            ema_speed_mps: 5.0,
            updated_at: now,
        };
        // ~1.1 m east: below jitter, heading carried.
        assert_eq!(derive_heading(Some(&track), None, 0.0, 0.00001, 3.0), 45.0);
        // ~111 m east: fresh bearing.
        let fresh = derive_heading(Some(&track), None, 0.0, 0.001, 3.0);
        assert!((fresh - 90.0).abs() < 0.5);
        // No track: persisted heading, else north.
        let persisted = PersistedHeading {
            heading: 200.0,
            updated_at: 0,
        };
        assert_eq!(derive_heading(None, Some(persisted), 0.0, 0.0, 3.0), 200.0);
        assert_eq!(derive_heading(None, None, 0.0, 0.0, 3.0), 0.0);
    }

    #[test]
    fn ema_blends_and_clamps() {
        let now = Utc.with_ymd_and_hms(2025, 12, 18, 12, 0, 0).unwrap();
        let route = straight_route();
        let p = params();

        // First fix: no prior, EMA starts at the measured value (clamped).
        let (fused, track) = fuse_vehicle(&raw(0.0, 0.0, 8.0), &route, None, None, now, &p);
        assert!((fused.ema_speed_mps - 4.0).abs() < 1e-9);
        assert_eq!(fused.direction_sign, 1);

        // Ten seconds later, one segment further east (~11 m/s along-route).
        let later = now + chrono::Duration::seconds(10);
        let (fused, _) = fuse_vehicle(&raw(0.0, 0.001, 12.0), &route, Some(&track), None, later, &p);
        assert!(fused.along_route_speed_mps > 10.0);
        assert_eq!(fused.direction_sign, 1);
        assert!(fused.ema_speed_mps <= p.max_speed_ceil);
        assert!(fused.ema_speed_mps >= p.min_speed_floor);

        // Crawling: EMA is floored.
        let (slow, _) = fuse_vehicle(&raw(0.0, 0.0, 0.0), &route, None, None, now, &p);
        assert_eq!(slow.ema_speed_mps, p.min_speed_floor);
    }

    #[test]
    fn backwards_motion_flips_direction() {
        let now = Utc.with_ymd_and_hms(2025, 12, 18, 12, 0, 0).unwrap();
        let route = straight_route();
        let p = params();

        let (_, track) = fuse_vehicle(&raw(0.0, 0.002, 5.0), &route, None, None, now, &p);
        let later = now + chrono::Duration::seconds(10);
        let (fused, _) = fuse_vehicle(&raw(0.0, 0.001, 5.0), &route, Some(&track), None, later, &p);
        assert_eq!(fused.direction_sign, -1);
        assert!(fused.along_route_speed_mps < -DIR_EPS_MPS);
    }

    #[test]
    fn stop_seeds_union_feed_and_route_stops() {
        let stops_raw: Vec<TranslocStop> = serde_json::from_value(serde_json::json!([
            {"StopID": 10, "StopName": "Chapel", "Latitude": 38.03, "Longitude": -78.5,
             "AddressID": 555, "RouteIDs": [1, 2]},
            {"StopID": null, "Latitude": 1.0, "Longitude": 1.0}
        ]))
        .unwrap();
        let with_shapes: Vec<RouteWithShape> = serde_json::from_value(serde_json::json!([
            {"RouteID": 3, "Description": "Silver", "EncodedPolyline": "",
             "Stops": [{"StopID": 11, "Name": "Gym", "Latitude": 38.04, "Longitude": -78.51}]}
        ]))
        .unwrap();

        let mut approach = HashMap::new();
        approach.insert(
            "10".to_owned(),
            vec![ApproachSet {
                name: "nb".into(),
                bubbles: vec![],
            }],
        );

        let seeds = build_stop_seeds(&stops_raw, &with_shapes, &approach);
        assert_eq!(seeds.len(), 2);
        assert_eq!(seeds[0].stop_id, "10");
        assert_eq!(seeds[0].address_id.as_deref(), Some("555"));
        assert!(seeds[0].route_ids.contains("1"));
        assert_eq!(seeds[0].approach_sets.len(), 1);
        assert_eq!(seeds[1].stop_id, "11");
        assert!(seeds[1].route_ids.contains("3"));
    }
}
