use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use model::vehicle::RawVehicle;
use serde::{Deserialize, Serialize};
use utility::geo::haversine_distance_m;

use crate::core::Core;

pub const VEHICLE_LOG_FILE: &str = "vehicle_log.jsonl";

#[derive(Debug, Serialize, Deserialize)]
struct VehicleLogEntry {
    ts: i64,
    vehicles: Vec<RawVehicle>,
}

#[derive(Debug, Deserialize)]
struct EntryTimestamp {
    ts: i64,
}

/// Background position logger: appends the latest raw fixes as JSONL to the
/// primary data directory, skipping ticks where nothing moved past the
/// minimum, and pruning entries older than the retention window.
pub async fn run(core: Arc<Core>) {
    let interval = core.config.veh_log_interval_s.max(0.5);
    let min_move_m = core.config.veh_log_min_move_m;
    let retention_ms = core.config.veh_log_retention_ms;
    let path = core.config.primary_data_dir().join(VEHICLE_LOG_FILE);

    let mut last_logged: HashMap<i64, (f64, f64)> = HashMap::new();

    loop {
        let vehicles = core.state.read().await.vehicles_raw.clone();

        if !vehicles.is_empty() && any_moved(&vehicles, &last_logged, min_move_m) {
            let ts = Utc::now().timestamp_millis();
            for vehicle in &vehicles {
                last_logged.insert(vehicle.vehicle_id, (vehicle.lat, vehicle.lon));
            }
            let entry = VehicleLogEntry { ts, vehicles };
            if let Err(why) = append_entry(&path, &entry).await {
                log::warn!("[vehicle_log] append failed: {why}");
            }
            if let Err(why) = prune_old_entries(&path, ts - retention_ms).await {
                log::warn!("[vehicle_log] prune failed: {why}");
            }
        }

        tokio::time::sleep(Duration::from_secs_f64(interval)).await;
    }
}

fn any_moved(
    vehicles: &[RawVehicle],
    last_logged: &HashMap<i64, (f64, f64)>,
    min_move_m: f64,
) -> bool {
    vehicles.iter().any(|vehicle| {
        match last_logged.get(&vehicle.vehicle_id) {
            Some((lat, lon)) => {
                haversine_distance_m(*lat, *lon, vehicle.lat, vehicle.lon) >= min_move_m
            }
            None => true,
        }
    })
}

async fn append_entry(path: &Path, entry: &VehicleLogEntry) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut line = serde_json::to_string(entry)
        .map_err(|why| std::io::Error::new(std::io::ErrorKind::InvalidData, why))?;
    line.push('\n');

    use tokio::io::AsyncWriteExt;
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(line.as_bytes()).await?;
    Ok(())
}

async fn prune_old_entries(path: &Path, cutoff_ms: i64) -> std::io::Result<()> {
    let body = match tokio::fs::read_to_string(path).await {
        Ok(body) => body,
        Err(_) => return Ok(()),
    };

    let mut kept = String::with_capacity(body.len());
    let mut dropped = 0usize;
    for line in body.lines() {
        match serde_json::from_str::<EntryTimestamp>(line) {
            Ok(entry) if entry.ts >= cutoff_ms => {
                kept.push_str(line);
                kept.push('\n');
            }
            _ => dropped += 1,
        }
    }

    if dropped > 0 {
        if let Some(parent) = path.parent() {
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                crate::persist::write_atomic(parent, name, kept.as_bytes()).await?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vehicle(id: i64, lat: f64, lon: f64) -> RawVehicle {
        RawVehicle {
            vehicle_id: id,
            name: format!("{id}"),
            route_id: Some(1),
            lat,
            lon,
            heading_deg: 0.0,
            ground_speed_mps: 5.0,
            report_age_s: 1.0,
            provider_timestamp_ms: None,
        }
    }

    #[test]
    fn movement_check_uses_minimum_distance() {
        let mut last = HashMap::new();
        last.insert(1, (0.0, 0.0));
        // ~1.1 m of longitude: below a 3 m minimum.
        assert!(!any_moved(&[vehicle(1, 0.0, 0.00001)], &last, 3.0));
        // ~11 m: logged.
        assert!(any_moved(&[vehicle(1, 0.0, 0.0001)], &last, 3.0));
        // Unknown vehicles always count as moved.
        assert!(any_moved(&[vehicle(2, 0.0, 0.0)], &last, 3.0));
    }

    #[tokio::test]
    async fn append_and_prune_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(VEHICLE_LOG_FILE);

        let old = VehicleLogEntry {
            ts: 1_000,
            vehicles: vec![vehicle(1, 0.0, 0.0)],
        };
        let recent = VehicleLogEntry {
            ts: 2_000_000,
            vehicles: vec![vehicle(1, 0.0, 0.001)],
        };
        append_entry(&path, &old).await.unwrap();
        append_entry(&path, &recent).await.unwrap();

        prune_old_entries(&path, 1_000_000).await.unwrap();

        let body = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines.len(), 1);
        let entry: VehicleLogEntry = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(entry.ts, 2_000_000);
    }
}
