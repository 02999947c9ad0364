use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use model::fullbus::FullBusEvent;
use model::vehicle::{RawVehicle, VehicleCapacity};
use serde::Serialize;
use utility::geo::haversine_distance_m;

use super::storage::FullBusStorage;

/// Close an episode when the vehicle has been absent from the feed this long.
pub const STALE_EPISODE_TIMEOUT_S: f64 = 180.0;

#[derive(Debug, Clone, Serialize)]
pub struct ActiveEpisode {
    pub start_time: DateTime<Utc>,
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
    pub last_seen: DateTime<Utc>,
}

/// Stop fields the tracker needs when opening an episode.
pub struct StopRef<'a> {
    pub stop_id: &'a str,
    pub name: &'a str,
    pub lat: f64,
    pub lon: f64,
}

/// Tracks periods during which a vehicle reports occupancy at or above its
/// capacity. An episode opens when a bus first reports full and closes (and
/// is persisted) when it stops being full or disappears from the feed.
pub struct FullBusTracker {
    storage: FullBusStorage,
    active: HashMap<String, ActiveEpisode>,
}

impl FullBusTracker {
    pub fn new(storage: FullBusStorage) -> Self {
        Self {
            storage,
            active: HashMap::new(),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn process_cycle(
        &mut self,
        capacities: &HashMap<i64, VehicleCapacity>,
        vehicles: &[RawVehicle],
        stops: &[StopRef<'_>],
        route_names: &HashMap<String, String>,
        vehicle_blocks: &HashMap<String, String>,
        now: DateTime<Utc>,
    ) {
        let vehicle_by_id: HashMap<i64, &RawVehicle> =
            vehicles.iter().map(|v| (v.vehicle_id, v)).collect();

        let mut seen: HashSet<String> = HashSet::new();

        for (vehicle_id, capacity_info) in capacities {
            let (Some(capacity), Some(occupation)) =
                (capacity_info.capacity, capacity_info.current_occupation)
            else {
                continue;
            };
            if capacity <= 0 {
                continue;
            }

            let vid = vehicle_id.to_string();
            seen.insert(vid.clone());
            let is_full = occupation >= capacity;

            if is_full {
                if let Some(episode) = self.active.get_mut(&vid) {
                    if Some(occupation) > episode.peak_occupation {
                        episode.peak_occupation = Some(occupation);
                    }
                    episode.last_seen = now;
                    continue;
                }

                let vehicle = vehicle_by_id.get(vehicle_id);
                if vehicle.is_none() {
                    log::warn!(
                        "[fullbus] vehicle {vehicle_id} has capacity data but no position fix"
                    );
                }

                let (lat, lon) = vehicle.map(|v| (v.lat, v.lon)).unwrap_or((0.0, 0.0));
                let route_id = vehicle.and_then(|v| v.assigned_route_id());
                let route_id_str = route_id.map(|rid| rid.to_string()).unwrap_or_default();
                let route_name = route_id
                    .and_then(|rid| route_names.get(&rid.to_string()))
                    .cloned()
                    .unwrap_or_default();
                let vehicle_name = vehicle.map(|v| v.name.clone()).unwrap_or_default();
                let block = vehicle_blocks.get(&vid).cloned().unwrap_or_default();

                let nearest = vehicle.and_then(|v| nearest_stop(stops, v.lat, v.lon));

                log::info!(
                    "[fullbus] new episode: vehicle={} route={} occ={occupation}/{capacity}",
                    if vehicle_name.is_empty() { &vid } else { &vehicle_name },
                    if route_name.is_empty() { &route_id_str } else { &route_name },
                );

                self.active.insert(
                    vid.clone(),
                    ActiveEpisode {
                        start_time: now,
                        vehicle_id: vid,
                        vehicle_name,
                        block,
                        route_id: route_id_str,
                        route_name,
                        nearest_stop_id: nearest
                            .map(|(id, _, _)| id.to_owned())
                            .unwrap_or_default(),
                        nearest_stop_name: nearest
                            .map(|(_, name, _)| name.to_owned())
                            .unwrap_or_default(),
                        lat,
                        lon,
                        capacity: Some(capacity),
                        peak_occupation: Some(occupation),
                        last_seen: now,
                    },
                );
            } else if self.active.contains_key(&vid) {
                self.close_episode(&vid, now);
            }
        }

        // Vehicles that vanished from the feed.
        let stale: Vec<(String, DateTime<Utc>)> = self
            .active
            .iter()
            .filter(|(vid, episode)| {
                !seen.contains(*vid)
                    && (now - episode.last_seen).num_seconds() as f64 > STALE_EPISODE_TIMEOUT_S
            })
            .map(|(vid, episode)| (vid.clone(), episode.last_seen))
            .collect();
        for (vid, last_seen) in stale {
            log::info!("[fullbus] closing stale episode for vehicle {vid}");
            self.close_episode(&vid, last_seen);
        }
    }

    fn close_episode(&mut self, vehicle_id: &str, end_time: DateTime<Utc>) {
        let Some(episode) = self.active.remove(vehicle_id) else {
            return;
        };
        let event = FullBusEvent {
            start_time: episode.start_time,
            end_time,
            vehicle_id: episode.vehicle_id,
            vehicle_name: episode.vehicle_name,
            block: episode.block,
            route_id: episode.route_id,
            route_name: episode.route_name,
            nearest_stop_id: episode.nearest_stop_id,
            nearest_stop_name: episode.nearest_stop_name,
            lat: episode.lat,
            lon: episode.lon,
            capacity: episode.capacity,
            peak_occupation: episode.peak_occupation,
        };
        match self.storage.write_event(&event) {
            Ok(()) => {
                let duration = (end_time - event.start_time).num_seconds();
                log::info!(
                    "[fullbus] closed episode: vehicle={} duration={duration}s peak={:?}/{:?}",
                    event.vehicle_id,
                    event.peak_occupation,
                    event.capacity
                );
            }
            Err(why) => log::warn!("[fullbus] failed to write event: {why}"),
        }
    }

    pub fn active_episodes(&self) -> Vec<ActiveEpisode> {
        let mut episodes: Vec<ActiveEpisode> = self.active.values().cloned().collect();
        episodes.sort_by_key(|episode| episode.start_time);
        episodes
    }
}

fn nearest_stop<'a>(stops: &'a [StopRef<'a>], lat: f64, lon: f64) -> Option<(&'a str, &'a str, f64)> {
    let mut best: Option<(&str, &str, f64)> = None;
    for stop in stops {
        let distance = haversine_distance_m(lat, lon, stop.lat, stop.lon);
        if best.map_or(true, |(_, _, d)| distance < d) {
            best = Some((stop.stop_id, stop.name, distance));
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn vehicle(id: i64, name: &str) -> RawVehicle {
        RawVehicle {
            vehicle_id: id,
            name: name.to_owned(),
            route_id: Some(7),
            lat: 38.03,
            lon: -78.5,
            heading_deg: 0.0,
            ground_speed_mps: 5.0,
            report_age_s: 1.0,
            provider_timestamp_ms: None,
        }
    }

    fn capacity(cap: i64, occ: i64) -> VehicleCapacity {
        VehicleCapacity {
            capacity: Some(cap),
            current_occupation: Some(occ),
            percentage: None,
        }
    }

    #[test]
    fn episode_opens_tracks_peak_and_closes() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FullBusStorage::new(vec![dir.path().to_path_buf()]);
        let mut tracker = FullBusTracker::new(storage.clone());

        let t0 = Utc.with_ymd_and_hms(2025, 12, 18, 8, 0, 0).unwrap();
        let vehicles = vec![vehicle(42, "1701")];
        let mut route_names = HashMap::new();
        route_names.insert("7".to_owned(), "Orange Line".to_owned());
        let blocks = HashMap::new();
        let stops = [StopRef {
            stop_id: "S1",
            name: "Chapel",
            lat: 38.0301,
            lon: -78.5001,
        }];

        let mut caps = HashMap::new();
        caps.insert(42, capacity(40, 40));
        tracker.process_cycle(&caps, &vehicles, &stops, &route_names, &blocks, t0);
        assert_eq!(tracker.active_episodes().len(), 1);

        // Peak rises while the bus stays full.
        caps.insert(42, capacity(40, 44));
        tracker.process_cycle(
            &caps,
            &vehicles,
            &stops,
            &route_names,
            &blocks,
            t0 + Duration::seconds(30),
        );

        // Bus empties out; episode closes and persists.
        caps.insert(42, capacity(40, 20));
        tracker.process_cycle(
            &caps,
            &vehicles,
            &stops,
            &route_names,
            &blocks,
            t0 + Duration::seconds(60),
        );
        assert!(tracker.active_episodes().is_empty());

        let events = storage.query_events(t0 - Duration::hours(1), t0 + Duration::hours(1), None, None);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].peak_occupation, Some(44));
        assert_eq!(events[0].route_name, "Orange Line");
        assert_eq!(events[0].nearest_stop_id, "S1");
        assert_eq!(events[0].end_time, t0 + Duration::seconds(60));
    }

    #[test]
    fn vanished_vehicle_closes_after_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FullBusStorage::new(vec![dir.path().to_path_buf()]);
        let mut tracker = FullBusTracker::new(storage.clone());

        let t0 = Utc.with_ymd_and_hms(2025, 12, 18, 8, 0, 0).unwrap();
        let vehicles = vec![vehicle(42, "1701")];
        let names = HashMap::new();
        let blocks = HashMap::new();

        let mut caps = HashMap::new();
        caps.insert(42, capacity(40, 41));
        tracker.process_cycle(&caps, &vehicles, &[], &names, &blocks, t0);

        // Feed loses the vehicle entirely for four minutes.
        let empty_caps = HashMap::new();
        tracker.process_cycle(
            &empty_caps,
            &[],
            &[],
            &names,
            &blocks,
            t0 + Duration::seconds(240),
        );
        assert!(tracker.active_episodes().is_empty());

        let events = storage.query_events(t0 - Duration::hours(1), t0 + Duration::hours(1), None, None);
        assert_eq!(events.len(), 1);
        // Closed at last_seen, not at sweep time.
        assert_eq!(events[0].end_time, t0);
    }

    #[test]
    fn zero_capacity_records_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FullBusStorage::new(vec![dir.path().to_path_buf()]);
        let mut tracker = FullBusTracker::new(storage);

        let t0 = Utc.with_ymd_and_hms(2025, 12, 18, 8, 0, 0).unwrap();
        let mut caps = HashMap::new();
        caps.insert(42, capacity(0, 5));
        tracker.process_cycle(&caps, &[vehicle(42, "1701")], &[], &HashMap::new(), &HashMap::new(), t0);
        assert!(tracker.active_episodes().is_empty());
    }
}
