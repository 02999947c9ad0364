use std::collections::BTreeSet;
use std::fs::OpenOptions;
use std::path::PathBuf;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use model::fullbus::FullBusEvent;
use utility::time::{format_iso_utc, parse_iso8601_utc};

pub const FULLBUS_SUBDIR: &str = "fullbus";

/// Day-partitioned CSV log of closed full-bus episodes, bucketed by the UTC
/// date of the episode start. Columns: start_time, end_time, vehicle_id,
/// vehicle_name, block, route_id, route_name, nearest_stop_id,
/// nearest_stop_name, lat, lon, capacity, peak_occupation.
#[derive(Clone)]
pub struct FullBusStorage {
    data_dirs: Vec<PathBuf>,
}

impl FullBusStorage {
    pub fn new(data_dirs: Vec<PathBuf>) -> Self {
        Self { data_dirs }
    }

    fn file_name(date: NaiveDate) -> String {
        format!("{}.csv", date.format("%Y-%m-%d"))
    }

    pub fn write_event(&self, event: &FullBusEvent) -> std::io::Result<()> {
        let date = event.start_time.date_naive();
        let mut last_error = None;
        let mut wrote_any = false;

        for dir in &self.data_dirs {
            let subdir = dir.join(FULLBUS_SUBDIR);
            let result = std::fs::create_dir_all(&subdir).and_then(|_| {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(subdir.join(Self::file_name(date)))?;
                let mut writer = csv::WriterBuilder::new()
                    .has_headers(false)
                    .from_writer(file);
                writer.write_record(event_row(event))?;
                writer.flush()?;
                Ok(())
            });
            match result {
                Ok(()) => wrote_any = true,
                Err(why) => {
                    log::warn!("[fullbus] failed to append to {}: {why}", dir.display());
                    last_error = Some(why);
                }
            }
        }

        match (wrote_any, last_error) {
            (false, Some(why)) => Err(why),
            _ => Ok(()),
        }
    }

    pub fn query_events(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        route_ids: Option<&BTreeSet<String>>,
        stop_ids: Option<&BTreeSet<String>>,
    ) -> Vec<FullBusEvent> {
        let mut events = Vec::new();
        if end < start {
            return events;
        }

        let mut date = start.date_naive();
        let end_date = end.date_naive();
        while date <= end_date {
            if let Some(rows) = self.read_day(date) {
                for event in rows {
                    if event.start_time < start || event.start_time > end {
                        continue;
                    }
                    if let Some(filter) = route_ids {
                        if !filter.contains(&event.route_id) {
                            continue;
                        }
                    }
                    if let Some(filter) = stop_ids {
                        if !filter.contains(&event.nearest_stop_id) {
                            continue;
                        }
                    }
                    events.push(event);
                }
            }
            date += Duration::days(1);
        }

        events.sort_by_key(|event| event.start_time);
        events
    }

    fn read_day(&self, date: NaiveDate) -> Option<Vec<FullBusEvent>> {
        for dir in &self.data_dirs {
            let path = dir.join(FULLBUS_SUBDIR).join(Self::file_name(date));
            let file = match std::fs::File::open(&path) {
                Ok(file) => file,
                Err(_) => continue,
            };
            let mut reader = csv::ReaderBuilder::new()
                .has_headers(false)
                .flexible(true)
                .from_reader(file);
            let mut events = Vec::new();
            for record in reader.records().flatten() {
                if let Some(event) = parse_row(&record) {
                    events.push(event);
                }
            }
            return Some(events);
        }
        None
    }

    pub fn clear(&self) -> usize {
        let mut deleted = 0;
        for dir in &self.data_dirs {
            let subdir = dir.join(FULLBUS_SUBDIR);
            let Ok(entries) = std::fs::read_dir(&subdir) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.extension().map_or(false, |ext| ext == "csv")
                    && std::fs::remove_file(&path).is_ok()
                {
                    deleted += 1;
                }
            }
        }
        deleted
    }
}

fn event_row(event: &FullBusEvent) -> Vec<String> {
    vec![
        format_iso_utc(event.start_time),
        format_iso_utc(event.end_time),
        event.vehicle_id.clone(),
        event.vehicle_name.clone(),
        event.block.clone(),
        event.route_id.clone(),
        event.route_name.clone(),
        event.nearest_stop_id.clone(),
        event.nearest_stop_name.clone(),
        format!("{:.6}", event.lat),
        format!("{:.6}", event.lon),
        event.capacity.map(|v| v.to_string()).unwrap_or_default(),
        event
            .peak_occupation
            .map(|v| v.to_string())
            .unwrap_or_default(),
    ]
}

fn parse_row(record: &csv::StringRecord) -> Option<FullBusEvent> {
    if record.len() < 13 {
        return None;
    }
    let start_time = parse_iso8601_utc(record.get(0)?)?;
    let end_time = parse_iso8601_utc(record.get(1)?)?;
    let text = |index: usize| record.get(index).unwrap_or_default().to_owned();

    Some(FullBusEvent {
        start_time,
        end_time,
        vehicle_id: text(2),
        vehicle_name: text(3),
        block: text(4),
        route_id: text(5),
        route_name: text(6),
        nearest_stop_id: text(7),
        nearest_stop_name: text(8),
        lat: record.get(9).and_then(|v| v.parse().ok()).unwrap_or(0.0),
        lon: record.get(10).and_then(|v| v.parse().ok()).unwrap_or(0.0),
        capacity: record.get(11).and_then(|v| v.parse().ok()),
        peak_occupation: record.get(12).and_then(|v| v.parse().ok()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn episode_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FullBusStorage::new(vec![dir.path().to_path_buf()]);

        let start = Utc.with_ymd_and_hms(2025, 12, 18, 8, 0, 0).unwrap();
        let event = FullBusEvent {
            start_time: start,
            end_time: start + Duration::seconds(90),
            vehicle_id: "42".into(),
            vehicle_name: "1701".into(),
            block: "[05]".into(),
            route_id: "7".into(),
            route_name: "Orange Line".into(),
            nearest_stop_id: "S1".into(),
            nearest_stop_name: "Chapel".into(),
            lat: 38.03,
            lon: -78.5,
            capacity: Some(40),
            peak_occupation: Some(44),
        };
        storage.write_event(&event).unwrap();

        let read = storage.query_events(
            start - Duration::hours(1),
            start + Duration::hours(1),
            None,
            None,
        );
        assert_eq!(read.len(), 1);
        assert_eq!(read[0].vehicle_name, "1701");
        assert_eq!(read[0].peak_occupation, Some(44));

        assert_eq!(storage.clear(), 1);
    }
}
