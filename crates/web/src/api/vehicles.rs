use std::collections::HashMap;

use axum::extract::State;
use axum::Json;
use chrono::Local;
use itertools::Itertools;
use serde::Serialize;
use tower_cookies::Cookies;
use utility::time::service_day;

use crate::common::RouteResult;
use crate::WebState;

use super::auth::require;

pub async fn list_vehicles(
    State(state): State<WebState>,
) -> Json<Vec<model::vehicle::RawVehicle>> {
    let guard = state.core.state.read().await;
    Json(guard.vehicles_raw.clone())
}

#[derive(Debug, Serialize)]
pub struct DropdownEntry {
    pub vehicle_id: i64,
    pub name: String,
}

pub async fn vehicles_dropdown(State(state): State<WebState>) -> Json<Vec<DropdownEntry>> {
    let guard = state.core.state.read().await;
    let entries: Vec<DropdownEntry> = guard
        .vehicles_raw
        .iter()
        .filter(|vehicle| !vehicle.name.is_empty())
        .map(|vehicle| DropdownEntry {
            vehicle_id: vehicle.vehicle_id,
            name: vehicle.name.clone(),
        })
        .sorted_by(|a, b| a.name.cmp(&b.name))
        .collect();
    Json(entries)
}

pub async fn vehicle_headings(
    State(state): State<WebState>,
) -> Json<HashMap<String, model::vehicle::PersistedHeading>> {
    let guard = state.core.state.read().await;
    Json(
        guard
            .last_headings
            .iter()
            .map(|(vid, heading)| (vid.to_string(), *heading))
            .collect(),
    )
}

pub async fn mileage(State(state): State<WebState>) -> Json<serde_json::Value> {
    let guard = state.core.state.read().await;
    let today = service_day(Local::now());
    let buses = guard.bus_days.get(&today).cloned().unwrap_or_default();
    let display: HashMap<String, serde_json::Value> = buses
        .into_iter()
        .map(|(bus, record)| {
            (
                bus,
                serde_json::json!({
                    "display_miles": record.display_miles(),
                    "day_miles": record.day_miles,
                    "total_miles": record.total_miles,
                    "blocks": record.blocks,
                }),
            )
        })
        .collect();
    Json(serde_json::json!({
        "service_date": today,
        "buses": display,
    }))
}

pub async fn vehicle_drivers(
    State(state): State<WebState>,
    cookies: Cookies,
) -> RouteResult<Json<model::drivers::VehicleDriversResult>> {
    require(&cookies)?;
    let guard = state.core.state.read().await;
    Ok(Json(guard.vehicle_drivers.clone()))
}

pub async fn blocks(
    State(state): State<WebState>,
    cookies: Cookies,
) -> RouteResult<Json<serde_json::Value>> {
    require(&cookies)?;
    let groups = state.core.blocks_cache.peek().await.unwrap_or_default();
    let guard = state.core.state.read().await;
    let route_colors: HashMap<i64, Option<String>> = guard
        .routes
        .iter()
        .map(|(rid, route)| (*rid, route.color.clone()))
        .collect();
    let entries =
        gateway::drivers::block_group_entries(&groups, &guard.route_id_to_name, &route_colors);
    Ok(Json(serde_json::json!({
        "entries": entries,
        "plain_language_blocks": guard.plain_language_blocks,
        "block_windows": guard.block_windows,
    })))
}

pub async fn ondemand_vehicles(
    State(state): State<WebState>,
    cookies: Cookies,
) -> RouteResult<Json<serde_json::Value>> {
    require(&cookies)?;
    let positions = state.core.ondemand_cache.peek().await.unwrap_or_default();
    let guard = state.core.state.read().await;

    let vehicles: Vec<serde_json::Value> = positions
        .iter()
        .filter_map(|vehicle| {
            let vid = vehicle.vehicle_id_string()?;
            let drivers = guard
                .vehicle_drivers
                .vehicle_drivers
                .get(&vid)
                .map(|entry| entry.drivers.clone())
                .unwrap_or_default();
            Some(serde_json::json!({
                "vehicle_id": vid,
                "call_name": vehicle.call_name,
                "driver_name": vehicle.driver_name,
                "lat": vehicle.lat,
                "lon": vehicle.lon,
                "drivers": drivers,
            }))
        })
        .collect();

    Ok(Json(serde_json::json!({ "vehicles": vehicles })))
}
