use axum::extract::{Query, State};
use axum::Json;
use model::fullbus::FullBusEvent;
use tower_cookies::Cookies;
use utility::time::parse_iso8601_utc;

use crate::common::{RouteErrorResponse, RouteResult};
use crate::WebState;

use super::auth::require;
use super::headway::HeadwayQuery;

pub async fn events(
    State(state): State<WebState>,
    Query(query): Query<HeadwayQuery>,
) -> RouteResult<Json<Vec<FullBusEvent>>> {
    let start = parse_iso8601_utc(&query.start)
        .ok_or_else(|| RouteErrorResponse::bad_request("Invalid start timestamp."))?;
    let end = parse_iso8601_utc(&query.end)
        .ok_or_else(|| RouteErrorResponse::bad_request("Invalid end timestamp."))?;

    let route_filter = query.route_ids.as_ref().map(|raw| {
        raw.split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(str::to_owned)
            .collect()
    });
    let stop_filter = query.stop_ids.as_ref().map(|raw| {
        raw.split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(str::to_owned)
            .collect()
    });

    Ok(Json(state.core.fullbus_storage.query_events(
        start,
        end,
        route_filter.as_ref(),
        stop_filter.as_ref(),
    )))
}

pub async fn active(State(state): State<WebState>) -> Json<serde_json::Value> {
    let tracker = state.core.fullbus.lock().await;
    Json(serde_json::json!({ "episodes": tracker.active_episodes() }))
}

pub async fn clear(
    State(state): State<WebState>,
    cookies: Cookies,
) -> RouteResult<Json<serde_json::Value>> {
    require(&cookies)?;
    let deleted = state.core.fullbus_storage.clear();
    log::info!("[fullbus] cleared {deleted} day files");
    Ok(Json(serde_json::json!({ "ok": true, "deleted": deleted })))
}
