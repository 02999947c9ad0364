use std::error;
use std::fmt;
use std::sync::{Arc, OnceLock};

use regex::Regex;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::Url;
use serde::Deserialize;
use tokio::sync::Mutex;

/// One paratransit vehicle position with its assigned driver and call name.
#[derive(Debug, Clone, Deserialize)]
pub struct OnDemandVehicle {
    #[serde(
        rename = "vehicle_id",
        alias = "VehicleID",
        alias = "vehicleId",
        default
    )]
    pub vehicle_id: Option<serde_json::Value>,
    #[serde(rename = "driverName", alias = "driver_name", default)]
    pub driver_name: Option<String>,
    #[serde(rename = "callName", alias = "call_name", default)]
    pub call_name: Option<String>,
    #[serde(rename = "lat", alias = "Latitude", default)]
    pub lat: Option<f64>,
    #[serde(rename = "lng", alias = "Longitude", alias = "lon", default)]
    pub lon: Option<f64>,
}

impl OnDemandVehicle {
    /// The vehicle id as a trimmed string, whatever JSON type the feed used.
    pub fn vehicle_id_string(&self) -> Option<String> {
        let text = match self.vehicle_id.as_ref()? {
            serde_json::Value::String(s) => s.trim().to_owned(),
            serde_json::Value::Number(n) => n.to_string(),
            _ => return None,
        };
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }
}

#[derive(Debug, Clone)]
pub enum ApiError {
    RequestError(Arc<reqwest::Error>),
    LoginFailed(String),
    InvalidResponse {
        status_code: reqwest::StatusCode,
        response: Option<String>,
    },
}

impl error::Error for ApiError {}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ApiError::RequestError(e) => write!(f, "HTTP request error: {}", e),
            ApiError::LoginFailed(why) => write!(f, "login failed: {}", why),
            ApiError::InvalidResponse {
                status_code,
                response,
            } => match response {
                Some(text) => write!(f, "Invalid Response ({}): {}", status_code, text),
                None => write!(f, "Invalid Response ({})", status_code),
            },
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        ApiError::RequestError(Arc::new(e))
    }
}

const AUTH_COOKIE_NAME: &str = "transloc_authn_cookie";

fn csrf_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"name="csrf_token" value="([^"]+)""#).unwrap())
}

/// Client for the on-demand paratransit feed. Authenticates with a form
/// login (csrf token scraped from the login page) and reuses the resulting
/// token until the feed rejects it.
pub struct OnDemandClient {
    login_url: Url,
    positions_url: Url,
    user: String,
    passwd: String,
    http: reqwest::Client,
    jar: Arc<Jar>,
    token: Mutex<Option<String>>,
}

impl OnDemandClient {
    pub fn new(
        login_url: &str,
        positions_url: &str,
        user: impl Into<String>,
        passwd: impl Into<String>,
    ) -> Result<Self, ApiError> {
        let login_url = Url::parse(login_url)
            .map_err(|e| ApiError::LoginFailed(format!("bad login url: {e}")))?;
        let positions_url = Url::parse(positions_url)
            .map_err(|e| ApiError::LoginFailed(format!("bad positions url: {e}")))?;

        let jar = Arc::new(Jar::default());
        let http = reqwest::Client::builder()
            .cookie_provider(jar.clone())
            .timeout(std::time::Duration::from_secs(10))
            .build()?;

        Ok(Self {
            login_url,
            positions_url,
            user: user.into(),
            passwd: passwd.into(),
            http,
            jar,
            token: Mutex::new(None),
        })
    }

    async fn login(&self) -> Result<String, ApiError> {
        let login_page = self.http.get(self.login_url.clone()).send().await?;
        let status = login_page.status();
        if status != reqwest::StatusCode::OK {
            return Err(ApiError::InvalidResponse {
                status_code: status,
                response: login_page.text().await.ok(),
            });
        }

        let html = login_page.text().await?;
        let csrf_token = csrf_re()
            .captures(&html)
            .map(|caps| caps[1].to_owned())
            .ok_or_else(|| ApiError::LoginFailed("csrf_token not found in login page".into()))?;

        let response = self
            .http
            .post(self.login_url.clone())
            .form(&[
                ("csrf_token", csrf_token.as_str()),
                ("username", &self.user),
                ("password", &self.passwd),
            ])
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::InvalidResponse {
                status_code: status,
                response: response.text().await.ok(),
            });
        }

        self.cookie_token().ok_or_else(|| {
            ApiError::LoginFailed(format!("{AUTH_COOKIE_NAME} not set after login"))
        })
    }

    fn cookie_token(&self) -> Option<String> {
        let header = self.jar.cookies(&self.login_url)?;
        let text = header.to_str().ok()?;
        for pair in text.split(';') {
            let mut parts = pair.trim().splitn(2, '=');
            if parts.next() == Some(AUTH_COOKIE_NAME) {
                return parts.next().map(str::to_owned);
            }
        }
        None
    }

    async fn ensure_token(&self) -> Result<String, ApiError> {
        let mut token = self.token.lock().await;
        if let Some(token) = token.as_ref() {
            return Ok(token.clone());
        }
        let fresh = self.login().await?;
        *token = Some(fresh.clone());
        Ok(fresh)
    }

    /// Fetch the current paratransit vehicle positions, retrying once with a
    /// fresh login when the token is rejected.
    pub async fn vehicle_positions(&self) -> Result<Vec<OnDemandVehicle>, ApiError> {
        let token = self.ensure_token().await?;
        let response = self.positions_request(&token).await?;

        let response = if matches!(
            response.status(),
            reqwest::StatusCode::UNAUTHORIZED | reqwest::StatusCode::FORBIDDEN
        ) {
            let mut guard = self.token.lock().await;
            *guard = None;
            let fresh = self.login().await?;
            *guard = Some(fresh.clone());
            drop(guard);
            self.positions_request(&fresh).await?
        } else {
            response
        };

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(ApiError::InvalidResponse {
                status_code: status,
                response: response.text().await.ok(),
            });
        }

        Ok(response.json().await?)
    }

    async fn positions_request(&self, token: &str) -> Result<reqwest::Response, ApiError> {
        Ok(self
            .http
            .get(self.positions_url.clone())
            .header("Authorization", format!("Token {token}"))
            .header("Accept", "application/json")
            .send()
            .await?)
    }
}
