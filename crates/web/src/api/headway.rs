use std::collections::{BTreeSet, HashMap, VecDeque};

use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Local, Utc};
use model::headway::{EventType, HeadwayEvent};
use serde::Deserialize;
use tower_cookies::Cookies;
use utility::time::parse_iso8601_utc;

use crate::common::{RouteErrorResponse, RouteResult};
use crate::WebState;

use super::auth::require;

#[derive(Debug, Deserialize)]
pub struct HeadwayQuery {
    pub start: String,
    pub end: String,
    pub route_ids: Option<String>,
    pub stop_ids: Option<String>,
    pub headway_type: Option<String>,
}

fn parse_range(query: &HeadwayQuery) -> Result<(DateTime<Utc>, DateTime<Utc>), RouteErrorResponse> {
    let start = parse_iso8601_utc(&query.start)
        .ok_or_else(|| RouteErrorResponse::bad_request("Invalid start timestamp."))?;
    let end = parse_iso8601_utc(&query.end)
        .ok_or_else(|| RouteErrorResponse::bad_request("Invalid end timestamp."))?;
    if end < start {
        return Err(RouteErrorResponse::bad_request("end precedes start."));
    }
    Ok((start, end))
}

fn parse_id_set(raw: Option<&String>) -> Option<BTreeSet<String>> {
    let set: BTreeSet<String> = raw?
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::to_owned)
        .collect();
    if set.is_empty() {
        None
    } else {
        Some(set)
    }
}

pub async fn query(
    State(state): State<WebState>,
    Query(query): Query<HeadwayQuery>,
) -> RouteResult<Json<serde_json::Value>> {
    let (start, end) = parse_range(&query)?;
    let route_filter = parse_id_set(query.route_ids.as_ref());
    let stop_filter = parse_id_set(query.stop_ids.as_ref());

    let events = state.core.headway_storage.query_events(
        start,
        end,
        route_filter.as_ref(),
        stop_filter.as_ref(),
    );

    let guard = state.core.state.read().await;
    let vehicle_names: HashMap<String, String> = guard.vehicle_names();

    Ok(Json(serde_json::json!({
        "events": events,
        "vehicle_names": vehicle_names,
    })))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadwayType {
    ArrivalArrival,
    DepartureArrival,
}

impl HeadwayType {
    fn parse(raw: Option<&str>) -> Result<Self, RouteErrorResponse> {
        match raw.unwrap_or("arrival_arrival") {
            "arrival_arrival" => Ok(HeadwayType::ArrivalArrival),
            "departure_arrival" => Ok(HeadwayType::DepartureArrival),
            other => Err(RouteErrorResponse::bad_request(format!(
                "Unknown headway type '{other}'."
            ))),
        }
    }
}

pub async fn export(
    State(state): State<WebState>,
    Query(query): Query<HeadwayQuery>,
) -> RouteResult<impl IntoResponse> {
    let (start, end) = parse_range(&query)?;
    let headway_type = HeadwayType::parse(query.headway_type.as_deref())?;
    let route_filter = parse_id_set(query.route_ids.as_ref());
    let stop_filter = parse_id_set(query.stop_ids.as_ref());

    let events = state.core.headway_storage.query_events(
        start,
        end,
        route_filter.as_ref(),
        stop_filter.as_ref(),
    );

    let vehicle_names = {
        let guard = state.core.state.read().await;
        guard.vehicle_names()
    };

    let rows = build_export_rows(&events, headway_type, &vehicle_names);

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record([
            "Route",
            "Arrival Date",
            "Stop",
            "Vehicle",
            "Arrival Time",
            "Departure Time",
            "Dwell",
            "Headway",
        ])
        .and_then(|_| {
            for row in &rows {
                writer.write_record(row)?;
            }
            Ok(())
        })
        .map_err(|why| RouteErrorResponse::internal(format!("export failed: {why}")))?;
    let body = writer
        .into_inner()
        .map_err(|why| RouteErrorResponse::internal(format!("export failed: {why}")))?;

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"headway_export.csv\"",
            ),
        ],
        body,
    ))
}

type PairKey = (Option<String>, Option<String>, Option<String>, Option<String>);

fn pair_key(event: &HeadwayEvent) -> PairKey {
    // Stops merged by physical address pair under the address id when the
    // stop id differs between directions.
    let stop_key = event.address_id.clone().or_else(|| event.stop_id.clone());
    (
        event.route_id.clone(),
        stop_key,
        event.vehicle_id.clone(),
        event.block.clone(),
    )
}

/// Pair arrivals with their following departure FIFO per (route, stop,
/// vehicle, block); either side may stand alone with the other's cells
/// blank.
pub fn build_export_rows(
    events: &[HeadwayEvent],
    headway_type: HeadwayType,
    vehicle_names: &HashMap<String, String>,
) -> Vec<[String; 8]> {
    let mut rows: Vec<[String; 8]> = Vec::new();
    let mut pending: HashMap<PairKey, VecDeque<usize>> = HashMap::new();
    let mut last_departure: HashMap<(Option<String>, Option<String>), DateTime<Utc>> =
        HashMap::new();

    for event in events {
        let key = pair_key(event);
        let stop_label = event
            .stop_name
            .clone()
            .or_else(|| event.stop_id.clone())
            .unwrap_or_default();
        let route_label = event
            .route_name
            .clone()
            .or_else(|| event.route_id.clone())
            .unwrap_or_default();
        let vehicle_label = event
            .vehicle_id
            .as_ref()
            .and_then(|vid| vehicle_names.get(vid).cloned())
            .or_else(|| event.vehicle_name.clone())
            .or_else(|| event.vehicle_id.clone())
            .unwrap_or_default();

        match event.event_type {
            EventType::Arrival => {
                let headway_s = match headway_type {
                    HeadwayType::ArrivalArrival => event.headway_arrival_arrival_s,
                    HeadwayType::DepartureArrival => {
                        let dep_key = (key.0.clone(), key.1.clone());
                        event.headway_departure_arrival_s.or_else(|| {
                            last_departure.get(&dep_key).map(|prev| {
                                ((event.timestamp - *prev).num_milliseconds() as f64 / 1000.0)
                                    .max(0.0)
                            })
                        })
                    }
                };

                rows.push([
                    route_label,
                    format_date_local(event.timestamp),
                    stop_label,
                    vehicle_label,
                    format_time_local(event.timestamp),
                    String::new(),
                    String::new(),
                    headway_s.map(format_hms).unwrap_or_default(),
                ]);
                pending.entry(key).or_default().push_back(rows.len() - 1);
            }
            EventType::Departure => {
                let dep_key = (key.0.clone(), key.1.clone());
                last_departure.insert(dep_key, event.timestamp);

                match pending.get_mut(&key).and_then(VecDeque::pop_front) {
                    Some(index) => {
                        rows[index][5] = format_time_local(event.timestamp);
                        rows[index][6] = event.dwell_s.map(format_hms).unwrap_or_default();
                    }
                    None => {
                        rows.push([
                            route_label,
                            String::new(),
                            stop_label,
                            vehicle_label,
                            String::new(),
                            format_time_local(event.timestamp),
                            event.dwell_s.map(format_hms).unwrap_or_default(),
                            String::new(),
                        ]);
                    }
                }
            }
        }
    }

    rows
}

fn format_date_local(ts: DateTime<Utc>) -> String {
    ts.with_timezone(&Local).format("%m-%d-%Y").to_string()
}

fn format_time_local(ts: DateTime<Utc>) -> String {
    let formatted = ts.with_timezone(&Local).format("%I:%M:%S %p").to_string();
    formatted.trim_start_matches('0').to_owned()
}

fn format_hms(seconds: f64) -> String {
    let total = seconds.round().max(0.0) as u64;
    format!("{:02}:{:02}:{:02}", total / 3600, (total % 3600) / 60, total % 60)
}

pub async fn clear(
    State(state): State<WebState>,
    cookies: Cookies,
) -> RouteResult<Json<serde_json::Value>> {
    require(&cookies)?;
    let deleted = state.core.headway_storage.clear();
    log::info!("[headway] cleared {deleted} day files");
    Ok(Json(serde_json::json!({ "ok": true, "deleted": deleted })))
}

pub async fn diagnostics(
    State(state): State<WebState>,
    cookies: Cookies,
) -> RouteResult<Json<serde_json::Value>> {
    require(&cookies)?;
    let tracker = state.core.headway.lock().await;
    Ok(Json(serde_json::json!({
        "active_bubble_states": tracker.active_bubble_states(),
        "recent_snapshot_diagnostics": tracker.snapshot_diagnostics(),
        "recent_stop_association_failures": tracker.stop_association_failures(),
        "recent_bubble_activations": tracker.bubble_activations(),
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn event(
        offset_s: i64,
        event_type: EventType,
        headway: Option<f64>,
        dwell: Option<f64>,
    ) -> HeadwayEvent {
        let base = Utc.with_ymd_and_hms(2025, 12, 18, 12, 0, 0).unwrap();
        HeadwayEvent {
            timestamp: base + chrono::Duration::seconds(offset_s),
            route_id: Some("R1".into()),
            stop_id: Some("S1".into()),
            vehicle_id: Some("17".into()),
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
        }
    }

    #[test]
    fn arrivals_pair_fifo_and_leftovers_keep_blank_cells() {
        // A1 at t=0, D1 at t=120, A2 at t=600 with no departure.
        let events = vec![
            event(0, EventType::Arrival, None, None),
            event(120, EventType::Departure, None, Some(120.0)),
            event(600, EventType::Arrival, Some(600.0), None),
        ];
        let rows = build_export_rows(&events, HeadwayType::ArrivalArrival, &HashMap::new());

        assert_eq!(rows.len(), 2);
        // First arrival got its departure and dwell.
        assert!(!rows[0][5].is_empty());
        assert_eq!(rows[0][6], "00:02:00");
        // Second arrival is unpaired: blank departure and dwell, headway set.
        assert!(rows[1][5].is_empty());
        assert!(rows[1][6].is_empty());
        assert_eq!(rows[1][7], "00:10:00");
    }

    #[test]
    fn orphan_departure_emits_row_with_blank_arrival() {
        let events = vec![event(0, EventType::Departure, None, None)];
        let rows = build_export_rows(&events, HeadwayType::ArrivalArrival, &HashMap::new());
        assert_eq!(rows.len(), 1);
        assert!(rows[0][4].is_empty());
        assert!(rows[0][1].is_empty());
        assert!(!rows[0][5].is_empty());
    }

    #[test]
    fn departure_arrival_headway_computed_from_scan() {
        let events = vec![
            event(0, EventType::Arrival, None, None),
            event(60, EventType::Departure, None, Some(60.0)),
            event(660, EventType::Arrival, Some(660.0), None),
        ];
        let rows = build_export_rows(&events, HeadwayType::DepartureArrival, &HashMap::new());
        // Second arrival: 660 - 60 = 600 s since the previous departure.
        assert_eq!(rows[1][7], "00:10:00");
    }

    #[test]
    fn vehicle_names_resolve_in_rows() {
        let mut names = HashMap::new();
        names.insert("17".to_owned(), "Bus 1701".to_owned());
        let events = vec![event(0, EventType::Arrival, None, None)];
        let rows = build_export_rows(&events, HeadwayType::ArrivalArrival, &names);
        assert_eq!(rows[0][3], "Bus 1701");
    }
}
