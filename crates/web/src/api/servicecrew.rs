use axum::extract::{Path, State};
use axum::Json;
use chrono::Local;
use gateway::mileage::{self, MILEAGE_FILE};
use gateway::persist;
use tower_cookies::Cookies;
use utility::time::service_day;

use crate::common::{RouteErrorResponse, RouteResult};
use crate::WebState;

use super::auth::require;

/// Set a bus's mileage baseline so displayed miles restart at zero.
pub async fn reset_mileage(
    State(state): State<WebState>,
    cookies: Cookies,
    Path(bus): Path<String>,
) -> RouteResult<Json<serde_json::Value>> {
    require(&cookies)?;

    let service_date = service_day(Local::now());
    let snapshot = {
        let mut guard = state.core.state.write().await;
        let baseline = mileage::reset_baseline(&mut guard.bus_days, service_date, &bus)
            .ok_or_else(|| RouteErrorResponse::not_found("No mileage record for that bus."))?;
        (baseline, guard.bus_days.clone())
    };

    persist::write_json_all(&state.core.config.data_dirs, MILEAGE_FILE, &snapshot.1).await;

    Ok(Json(serde_json::json!({
        "ok": true,
        "bus": bus,
        "reset_miles": snapshot.0,
    })))
}
