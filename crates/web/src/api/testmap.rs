use axum::extract::State;
use axum::Json;

use crate::WebState;

pub async fn payload(State(state): State<WebState>) -> Json<gateway::state::TestmapPayload> {
    let guard = state.core.state.read().await;
    Json(guard.testmap_payload.clone())
}

pub async fn vehicles(State(state): State<WebState>) -> Json<Vec<gateway::state::TestmapVehicle>> {
    let guard = state.core.state.read().await;
    Json(guard.testmap_payload.vehicles.clone())
}

pub async fn metadata(State(state): State<WebState>) -> Json<serde_json::Value> {
    let guard = state.core.state.read().await;
    let routes: Vec<serde_json::Value> = guard
        .active_route_ids
        .iter()
        .map(|rid| {
            let route = guard.routes.get(rid);
            serde_json::json!({
                "route_id": rid,
                "name": guard.route_id_to_name.get(rid),
                "color": route.and_then(|r| r.color.clone()),
                "total_length_m": route.map(|r| r.total_length_m),
            })
        })
        .collect();
    Json(serde_json::json!({
        "generated_at": guard.testmap_payload.generated_at,
        "active_route_ids": guard.active_route_ids,
        "routes": routes,
        "vehicle_count": guard.testmap_payload.vehicles.len(),
        "stop_count": guard.stops_raw.len(),
    }))
}
