use std::sync::Arc;

use chrono::NaiveDate;
use serde::de::DeserializeOwned;

use crate::model::{
    BlockGroup, RouteCatalogEntry, RouteWithShape, ScheduleVehicleCalendarEntry, TranslocStop,
    VehicleCapacityRecord, VehicleEstimates, VehiclePoint,
};
use crate::ApiError;

/// Hook invoked after every upstream call with `(method, url, status)`.
/// The url has the API key masked before it reaches the hook.
pub type ApiCallHook = Arc<dyn Fn(&str, &str, u16) + Send + Sync>;

/// Client for the TransLoc JSONP relay endpoints. All calls go through the
/// one shared `reqwest::Client` handed in at construction.
#[derive(Clone)]
pub struct TranslocClient {
    base: String,
    api_key: String,
    http: reqwest::Client,
    call_hook: Option<ApiCallHook>,
}

impl TranslocClient {
    pub fn new(base: impl Into<String>, api_key: impl Into<String>, http: reqwest::Client) -> Self {
        Self {
            base: base.into().trim_end_matches('/').to_owned(),
            api_key: api_key.into(),
            http,
            call_hook: None,
        }
    }

    pub fn with_call_hook(mut self, hook: ApiCallHook) -> Self {
        self.call_hook = Some(hook);
        self
    }

    pub async fn routes_with_shapes(&self) -> Result<Vec<RouteWithShape>, ApiError> {
        self.get_list("GetRoutesForMapWithScheduleWithEncodedLine", &[])
            .await
    }

    pub async fn routes_catalog(&self) -> Result<Vec<RouteCatalogEntry>, ApiError> {
        self.get_list("GetRoutes", &[]).await
    }

    pub async fn stops(&self) -> Result<Vec<TranslocStop>, ApiError> {
        self.get_list("GetStops", &[]).await
    }

    pub async fn vehicle_points(&self) -> Result<Vec<VehiclePoint>, ApiError> {
        self.get_list(
            "GetMapVehiclePoints",
            &[("returnVehiclesNotAssignedToRoute", "true")],
        )
        .await
    }

    pub async fn vehicle_capacities(&self) -> Result<Vec<VehicleCapacityRecord>, ApiError> {
        self.get_list("GetVehicleCapacities", &[]).await
    }

    /// Stop estimates for a batch of vehicles, requested as one
    /// comma-separated id list.
    pub async fn stop_estimates(
        &self,
        vehicle_ids: &[i64],
    ) -> Result<Vec<VehicleEstimates>, ApiError> {
        let ids = vehicle_ids
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(",");
        self.get_list(
            "GetVehicleRouteStopEstimates",
            &[("vehicleIdStrings", &ids), ("quantity", "3")],
        )
        .await
    }

    pub async fn schedule_calendar(
        &self,
        date: NaiveDate,
    ) -> Result<Vec<ScheduleVehicleCalendarEntry>, ApiError> {
        let date_string = date.format("%Y-%m-%d").to_string();
        self.get_list(
            "GetScheduleVehicleCalendarByDate",
            &[("dateString", &date_string)],
        )
        .await
    }

    /// Dispatch block-group data for a set of calendar ids, comma-joined.
    pub async fn block_groups(&self, calendar_ids: &[i64]) -> Result<Vec<BlockGroup>, ApiError> {
        let ids = calendar_ids
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(",");
        self.get_list(
            "GetDispatchBlockGroupData",
            &[("scheduleVehicleCalendarIdString", &ids)],
        )
        .await
    }

    async fn get_list<T: DeserializeOwned>(
        &self,
        method: &str,
        params: &[(&str, &str)],
    ) -> Result<Vec<T>, ApiError> {
        let mut url = format!(
            "{}/Services/JSONPRelay.svc/{}?APIKey={}",
            self.base, method, self.api_key
        );
        for (key, value) in params {
            url.push('&');
            url.push_str(key);
            url.push('=');
            url.push_str(value);
        }

        let response = self.http.get(&url).send().await;
        let masked = self.mask_key(&url);

        let response = match response {
            Ok(response) => response,
            Err(why) => {
                self.record("GET", &masked, 0);
                return Err(why.into());
            }
        };

        let status = response.status();
        self.record("GET", &masked, status.as_u16());

        if status != reqwest::StatusCode::OK {
            return match response.text().await {
                Ok(text) => Err(ApiError::InvalidResponse {
                    status_code: status,
                    url: masked,
                    response: Some(text),
                }),
                Err(_) => Err(ApiError::InvalidResponse {
                    status_code: status,
                    url: masked,
                    response: None,
                }),
            };
        }

        let value: serde_json::Value = response.json().await?;
        // The relay sometimes wraps the payload in a `d` envelope.
        let list = match value {
            serde_json::Value::Object(mut map) => map
                .remove("d")
                .unwrap_or(serde_json::Value::Array(Vec::new())),
            other => other,
        };

        // A malformed record drops out of the batch rather than failing it.
        let items = match list {
            serde_json::Value::Array(items) => items,
            serde_json::Value::Null => Vec::new(),
            other => return Ok(serde_json::from_value(other)?),
        };
        let mut parsed = Vec::with_capacity(items.len());
        for item in items {
            match serde_json::from_value(item) {
                Ok(record) => parsed.push(record),
                Err(why) => log::warn!("[transloc] skipping malformed {method} record: {why}"),
            }
        }
        Ok(parsed)
    }

    fn mask_key(&self, url: &str) -> String {
        if self.api_key.is_empty() {
            url.to_owned()
        } else {
            url.replace(&self.api_key, "***")
        }
    }

    fn record(&self, method: &str, url: &str, status: u16) {
        if let Some(hook) = &self.call_hook {
            hook(method, url, status);
        }
    }
}
