use std::collections::{BTreeMap, BTreeSet};
use std::fs::OpenOptions;
use std::path::PathBuf;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use model::headway::{EventType, HeadwayEvent};
use utility::time::{format_iso_utc, parse_iso8601_utc};

pub const HEADWAY_SUBDIR: &str = "headway";

/// Append-only day-partitioned CSV log of arrival/departure events. Rows are
/// bucketed by the calendar UTC date of their timestamp, one file per day,
/// mirrored into every configured data directory. Row schema (no header):
/// `timestamp, route_id, stop_id, vehicle_id, event_type, headway_s, dwell_s`.
#[derive(Clone)]
pub struct HeadwayStorage {
    data_dirs: Vec<PathBuf>,
}

impl HeadwayStorage {
    pub fn new(data_dirs: Vec<PathBuf>) -> Self {
        Self { data_dirs }
    }

    fn file_name(date: NaiveDate) -> String {
        format!("{}.csv", date.format("%Y-%m-%d"))
    }

    pub fn write_events(&self, events: &[HeadwayEvent]) -> std::io::Result<()> {
        if events.is_empty() {
            return Ok(());
        }

        let mut by_date: BTreeMap<NaiveDate, Vec<&HeadwayEvent>> = BTreeMap::new();
        for event in events {
            by_date
                .entry(event.timestamp.date_naive())
                .or_default()
                .push(event);
        }

        let mut last_error = None;
        let mut wrote_any = false;
        for (date, day_events) in by_date {
            for dir in &self.data_dirs {
                match self.append_rows(dir, date, &day_events) {
                    Ok(()) => wrote_any = true,
                    Err(why) => {
                        log::warn!("[headway] failed to append to {}: {why}", dir.display());
                        last_error = Some(why);
                    }
                }
            }
        }

        match (wrote_any, last_error) {
            (false, Some(why)) => Err(why),
            _ => Ok(()),
        }
    }

    fn append_rows(
        &self,
        dir: &std::path::Path,
        date: NaiveDate,
        events: &[&HeadwayEvent],
    ) -> std::io::Result<()> {
        let subdir = dir.join(HEADWAY_SUBDIR);
        std::fs::create_dir_all(&subdir)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(subdir.join(Self::file_name(date)))?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        for event in events {
            writer.write_record(event_row(event))?;
        }
        writer.flush()
    }

    /// All events with `start <= timestamp <= end`, optionally filtered by
    /// route and stop id, sorted by timestamp. Each day file is read from
    /// the first directory that has it.
    pub fn query_events(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        route_ids: Option<&BTreeSet<String>>,
        stop_ids: Option<&BTreeSet<String>>,
    ) -> Vec<HeadwayEvent> {
        let mut events = Vec::new();
        if end < start {
            return events;
        }

        let mut date = start.date_naive();
        let end_date = end.date_naive();
        while date <= end_date {
            if let Some(rows) = self.read_day(date) {
                for event in rows {
                    if event.timestamp < start || event.timestamp > end {
                        continue;
                    }
                    if let Some(filter) = route_ids {
                        match &event.route_id {
                            Some(rid) if filter.contains(rid) => {}
                            _ => continue,
                        }
                    }
                    if let Some(filter) = stop_ids {
                        match &event.stop_id {
                            Some(sid) if filter.contains(sid) => {}
                            _ => continue,
                        }
                    }
                    events.push(event);
                }
            }
            date += Duration::days(1);
        }

        events.sort_by_key(|event| event.timestamp);
        events
    }

    fn read_day(&self, date: NaiveDate) -> Option<Vec<HeadwayEvent>> {
        for dir in &self.data_dirs {
            let path = dir.join(HEADWAY_SUBDIR).join(Self::file_name(date));
            let file = match std::fs::File::open(&path) {
                Ok(file) => file,
                Err(_) => continue,
            };
            let mut reader = csv::ReaderBuilder::new()
                .has_headers(false)
                .flexible(true)
                .from_reader(file);
            let mut events = Vec::new();
            for record in reader.records() {
                let record = match record {
                    Ok(record) => record,
                    Err(_) => continue,
                };
                if let Some(event) = parse_row(&record) {
                    events.push(event);
                }
            }
            return Some(events);
        }
        None
    }

    /// Delete all day files in every data directory; returns how many files
    /// were removed.
    pub fn clear(&self) -> usize {
        let mut deleted = 0;
        for dir in &self.data_dirs {
            let subdir = dir.join(HEADWAY_SUBDIR);
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

fn event_row(event: &HeadwayEvent) -> Vec<String> {
    let headway = match event.event_type {
        EventType::Arrival => event
            .headway_arrival_arrival_s
            .map(|v| format!("{v:.3}"))
            .unwrap_or_default(),
        EventType::Departure => String::new(),
    };
    vec![
        format_iso_utc(event.timestamp),
        event.route_id.clone().unwrap_or_default(),
        event.stop_id.clone().unwrap_or_default(),
        event.vehicle_id.clone().unwrap_or_default(),
        event.event_type.as_str().to_owned(),
        headway,
        event
            .dwell_s
            .map(|v| format!("{v:.3}"))
            .unwrap_or_default(),
    ]
}

fn parse_row(record: &csv::StringRecord) -> Option<HeadwayEvent> {
    if record.len() < 5 {
        return None;
    }
    let timestamp = parse_iso8601_utc(record.get(0)?)?;
    let event_type = EventType::parse(record.get(4)?)?;
    let headway: Option<f64> = record.get(5).filter(|v| !v.is_empty()).and_then(|v| v.parse().ok());
    let dwell: Option<f64> = record.get(6).filter(|v| !v.is_empty()).and_then(|v| v.parse().ok());

    let field = |index: usize| -> Option<String> {
        record
            .get(index)
            .filter(|value| !value.is_empty())
            .map(str::to_owned)
    };

    Some(HeadwayEvent {
        timestamp,
        route_id: field(1),
        stop_id: field(2),
        vehicle_id: field(3),
        vehicle_name: None,
        event_type,
        headway_arrival_arrival_s: match event_type {
            EventType::Arrival => headway,
            EventType::Departure => None,
        },
        headway_departure_arrival_s: None,
        dwell_s: dwell,
        route_name: None,
        address_id: None,
        stop_name: None,
        block: None,
        arrival_type: None,
    })
}
