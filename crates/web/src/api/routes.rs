use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;

use crate::common::{RouteErrorResponse, RouteResult};
use crate::WebState;

#[serde_with::skip_serializing_none]
#[derive(Debug, Serialize)]
pub struct RouteSummary {
    pub route_id: i64,
    pub name: String,
    pub color: Option<String>,
    pub total_length_m: f64,
    pub vehicle_count: usize,
}

pub async fn list_routes(State(state): State<WebState>) -> Json<Vec<RouteSummary>> {
    let guard = state.core.state.read().await;
    let mut summaries: Vec<RouteSummary> = guard
        .active_route_ids
        .iter()
        .map(|rid| {
            let route = guard.routes.get(rid);
            RouteSummary {
                route_id: *rid,
                name: guard
                    .route_id_to_name
                    .get(rid)
                    .cloned()
                    .or_else(|| route.map(|r| r.display_name()))
                    .unwrap_or_else(|| rid.to_string()),
                color: route.and_then(|r| r.color.clone()),
                total_length_m: route.map(|r| r.total_length_m).unwrap_or(0.0),
                vehicle_count: guard
                    .vehicles_by_route
                    .get(rid)
                    .map(Vec::len)
                    .unwrap_or(0),
            }
        })
        .collect();
    summaries.sort_by_key(|summary| summary.route_id);
    Json(summaries)
}

#[serde_with::skip_serializing_none]
#[derive(Debug, Serialize)]
pub struct RouteDetail {
    pub route_id: i64,
    pub description: String,
    pub info_text: String,
    pub color: Option<String>,
    pub total_length_m: f64,
    pub segment_count: usize,
    pub segment_speed_caps_mps: Vec<f64>,
    pub segment_road_names: Vec<String>,
    pub active: bool,
}

pub async fn route_detail(
    State(state): State<WebState>,
    Path(rid): Path<i64>,
) -> RouteResult<Json<RouteDetail>> {
    let guard = state.core.state.read().await;
    let route = guard
        .routes
        .get(&rid)
        .ok_or_else(|| RouteErrorResponse::not_found("Unknown route."))?;
    Ok(Json(RouteDetail {
        route_id: route.route_id,
        description: route.description.clone(),
        info_text: route.info_text.clone(),
        color: route.color.clone(),
        total_length_m: route.total_length_m,
        segment_count: route.segment_count(),
        segment_speed_caps_mps: route.segment_speed_caps_mps.clone(),
        segment_road_names: route.segment_road_names.clone(),
        active: guard.active_route_ids.contains(&rid),
    }))
}

pub async fn route_shape(
    State(state): State<WebState>,
    Path(rid): Path<i64>,
) -> RouteResult<Json<serde_json::Value>> {
    let guard = state.core.state.read().await;
    let route = guard
        .routes
        .get(&rid)
        .ok_or_else(|| RouteErrorResponse::not_found("Unknown route."))?;
    Ok(Json(serde_json::json!({
        "route_id": route.route_id,
        "encoded_polyline": route.encoded_polyline,
        "total_length_m": route.total_length_m,
    })))
}

pub async fn route_vehicles(
    State(state): State<WebState>,
    Path(rid): Path<i64>,
) -> RouteResult<Json<Vec<model::vehicle::FusedVehicle>>> {
    let guard = state.core.state.read().await;
    if !guard.routes.contains_key(&rid) && !guard.active_route_ids.contains(&rid) {
        return Err(RouteErrorResponse::not_found("Unknown route."));
    }
    Ok(Json(
        guard.vehicles_by_route.get(&rid).cloned().unwrap_or_default(),
    ))
}
