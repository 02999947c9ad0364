use std::sync::Arc;

use chrono::NaiveDate;
use chrono::Datelike;
use serde::Deserialize;

use crate::{ApiError, AssignedShift};

/// Hook invoked after every upstream call with `(method, url, status)`.
/// The url has the account key masked before it reaches the hook.
pub type ApiCallHook = Arc<dyn Fn(&str, &str, u16) + Send + Sync>;

#[derive(Debug, Deserialize)]
struct AssignedShiftListResponse {
    #[serde(rename = "AssignedShiftList", default)]
    assigned_shift_list: Vec<AssignedShift>,
}

/// Client for the driver-scheduling feed's assigned-shift endpoint.
#[derive(Clone)]
pub struct W2wClient {
    url: String,
    key: String,
    http: reqwest::Client,
    call_hook: Option<ApiCallHook>,
}

impl W2wClient {
    pub fn new(url: impl Into<String>, key: impl Into<String>, http: reqwest::Client) -> Self {
        Self {
            url: url.into(),
            key: key.into(),
            http,
            call_hook: None,
        }
    }

    pub fn with_call_hook(mut self, hook: ApiCallHook) -> Self {
        self.call_hook = Some(hook);
        self
    }

    /// Fetch assigned shifts for one service date. The feed expects
    /// `M/D/YYYY` without zero padding.
    pub async fn assigned_shifts(
        &self,
        service_date: NaiveDate,
    ) -> Result<Vec<AssignedShift>, ApiError> {
        let date = format!(
            "{}/{}/{}",
            service_date.month(),
            service_date.day(),
            service_date.year()
        );

        let response = self
            .http
            .get(&self.url)
            .query(&[
                ("start_date", date.as_str()),
                ("end_date", date.as_str()),
                ("key", &self.key),
            ])
            .send()
            .await;

        let masked = format!("{}?start_date={date}&end_date={date}&key=***", self.url);

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

        let payload: AssignedShiftListResponse = response.json().await?;
        Ok(payload.assigned_shift_list)
    }

    fn record(&self, method: &str, url: &str, status: u16) {
        if let Some(hook) = &self.call_hook {
            hook(method, url, status);
        }
    }
}
