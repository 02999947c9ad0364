use std::collections::BTreeMap;

use chrono::NaiveDate;
use model::mileage::{normalize_bus_name, BusDay, METERS_PER_MILE};
use model::vehicle::RawVehicle;
use utility::geo::haversine_distance_m;

pub type BusDays = BTreeMap<NaiveDate, BTreeMap<String, BusDay>>;

pub const MILEAGE_FILE: &str = "mileage.json";

/// Fold the latest position fixes into the per-day odometers. Runs inside
/// the fusion tick's critical section, so writes never race the readers.
pub fn record_positions(bus_days: &mut BusDays, vehicles: &[RawVehicle], service_date: NaiveDate) {
    for vehicle in vehicles {
        if !vehicle.lat.is_finite() || !vehicle.lon.is_finite() {
            continue;
        }
        let bus = normalize_bus_name(&vehicle.name);
        if bus.is_empty() {
            continue;
        }

        // New day records inherit the running total, baseline and last fix
        // from the bus's most recent prior service date.
        let seed = match bus_days.get(&service_date) {
            Some(day) if day.contains_key(&bus) => None,
            _ => bus_days
                .range(..service_date)
                .rev()
                .find_map(|(_, buses)| buses.get(&bus))
                .cloned(),
        };

        let day = bus_days.entry(service_date).or_default();
        let record = day.entry(bus).or_insert_with(|| match seed {
            Some(prev) => BusDay {
                total_miles: prev.total_miles,
                reset_miles: prev.reset_miles,
                day_miles: 0.0,
                blocks: Default::default(),
                last_lat: prev.last_lat,
                last_lon: prev.last_lon,
            },
            None => BusDay::default(),
        });

        if let (Some(last_lat), Some(last_lon)) = (record.last_lat, record.last_lon) {
            let delta_miles =
                haversine_distance_m(last_lat, last_lon, vehicle.lat, vehicle.lon) / METERS_PER_MILE;
            record.total_miles += delta_miles;
            record.day_miles += delta_miles;
        }
        record.last_lat = Some(vehicle.lat);
        record.last_lon = Some(vehicle.lon);
    }
}

/// Attach observed block ids to today's bus records (from the block-group
/// fetch).
pub fn note_blocks<'a>(
    bus_days: &mut BusDays,
    service_date: NaiveDate,
    pairs: impl IntoIterator<Item = (&'a str, &'a str)>,
) {
    let day = bus_days.entry(service_date).or_default();
    for (bus_name, block_id) in pairs {
        let bus = normalize_bus_name(bus_name);
        if bus.is_empty() || block_id.is_empty() {
            continue;
        }
        day.entry(bus).or_default().blocks.insert(block_id.to_owned());
    }
}

/// Set the bus's reset baseline to its current total, so displayed miles
/// start counting from zero. Returns the new baseline.
pub fn reset_baseline(bus_days: &mut BusDays, service_date: NaiveDate, bus: &str) -> Option<f64> {
    let bus = normalize_bus_name(bus);
    if bus.is_empty() {
        return None;
    }
    let record = bus_days.get_mut(&service_date)?.get_mut(&bus)?;
    record.reset_miles = record.total_miles;
    Some(record.reset_miles)
}
