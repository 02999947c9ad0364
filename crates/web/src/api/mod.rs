use axum::routing::{get, post};
use axum::Router;

use crate::WebState;

pub mod auth;
pub mod dispatcher;
pub mod fullbus;
pub mod headway;
pub mod routes;
pub mod servicecrew;
pub mod streams;
pub mod sync;
pub mod testmap;
pub mod vehicles;

pub fn router(state: WebState) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/routes", get(routes::list_routes))
        .route("/v1/routes/:rid", get(routes::route_detail))
        .route("/v1/routes/:rid/shape", get(routes::route_shape))
        .route("/v1/routes/:rid/vehicles_raw", get(routes::route_vehicles))
        .route("/v1/vehicles", get(vehicles::list_vehicles))
        .route("/v1/vehicles_dropdown", get(vehicles::vehicles_dropdown))
        .route("/v1/vehicle_headings", get(vehicles::vehicle_headings))
        .route("/v1/mileage", get(vehicles::mileage))
        .route("/v1/servicecrew/reset/:bus", post(servicecrew::reset_mileage))
        .route("/v1/testmap/transloc", get(testmap::payload))
        .route("/v1/testmap/transloc/vehicles", get(testmap::vehicles))
        .route("/v1/testmap/transloc/metadata", get(testmap::metadata))
        .route("/v1/stream/api_calls", get(streams::api_calls))
        .route("/v1/stream/testmap/vehicles", get(streams::testmap_vehicles))
        .route("/v1/headway/clear", post(headway::clear))
        .route("/v1/headway/diagnostics", get(headway::diagnostics))
        .route("/v1/fullbus/events", get(fullbus::events))
        .route("/v1/fullbus/active", get(fullbus::active))
        .route("/v1/fullbus/clear", post(fullbus::clear))
        .route("/v1/ondemand/vehicles", get(vehicles::ondemand_vehicles))
        .route("/v1/dispatch/vehicle_drivers", get(vehicles::vehicle_drivers))
        .route("/v1/dispatch/blocks", get(vehicles::blocks))
        .route("/api/headway", get(headway::query))
        .route("/api/headway/export", get(headway::export))
        .route(
            "/api/dispatcher/auth",
            get(dispatcher::status).post(dispatcher::login),
        )
        .route("/api/dispatcher/logout", post(dispatcher::logout))
        .route("/sync", post(sync::replicate))
        .with_state(state)
}

async fn health(
    axum::extract::State(state): axum::extract::State<WebState>,
) -> axum::Json<serde_json::Value> {
    let guard = state.core.state.read().await;
    axum::Json(serde_json::json!({
        "ok": guard.last_error.is_none(),
        "last_error": guard.last_error,
        "last_error_ts": guard.last_error_ts,
        "last_tick_at": guard.last_tick_at,
    }))
}
