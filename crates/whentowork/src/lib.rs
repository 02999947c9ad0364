use std::error;
use std::fmt;
use std::sync::Arc;

pub mod assignments;
pub mod client;
pub mod position;

pub use assignments::build_driver_assignments;
pub use client::{ApiCallHook, W2wClient};
pub use position::{extract_block_from_position, format_driver_time};

use serde::Deserialize;

/// One row of the scheduling feed's `AssignedShiftList`.
#[derive(Debug, Clone, Deserialize)]
pub struct AssignedShift {
    #[serde(rename = "POSITION_NAME", default)]
    pub position_name: Option<String>,
    #[serde(rename = "FIRST_NAME", default)]
    pub first_name: Option<String>,
    #[serde(rename = "LAST_NAME", default)]
    pub last_name: Option<String>,
    #[serde(rename = "START_DATE", default)]
    pub start_date: Option<String>,
    #[serde(rename = "START_TIME", default)]
    pub start_time: Option<String>,
    #[serde(rename = "END_DATE", default)]
    pub end_date: Option<String>,
    #[serde(rename = "END_TIME", default)]
    pub end_time: Option<String>,
    /// Shift length in hours, used when no end date/time is present.
    #[serde(rename = "DURATION", default)]
    pub duration: Option<serde_json::Value>,
    #[serde(rename = "COLOR_ID", default)]
    pub color_id: Option<serde_json::Value>,
}

#[derive(Debug, Clone)]
pub enum ApiError {
    RequestError(Arc<reqwest::Error>),
    JsonError(Arc<serde_json::Error>),
    InvalidResponse {
        status_code: reqwest::StatusCode,
        url: String,
        response: Option<String>,
    },
}

impl error::Error for ApiError {}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ApiError::RequestError(e) => write!(f, "HTTP request error: {}", e),
            ApiError::JsonError(e) => write!(f, "JSON parse error: {}", e),
            ApiError::InvalidResponse {
                status_code,
                url,
                response,
            } => match response {
                Some(text) => {
                    write!(f, "Invalid Response ({}) {}: {}", status_code, url, text)
                }
                None => write!(f, "Invalid Response ({}) {}", status_code, url),
            },
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        ApiError::RequestError(Arc::new(e))
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(e: serde_json::Error) -> Self {
        ApiError::JsonError(Arc::new(e))
    }
}
