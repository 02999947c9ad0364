use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;

pub type RouteResult<O> = Result<O, RouteErrorResponse>;

/// JSON error body shared by every handler.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
pub struct RouteErrorResponse {
    #[serde(skip)]
    pub status_code: StatusCode,
    pub message: Option<String>,
    pub detailed_information: Option<String>,
}

impl RouteErrorResponse {
    pub fn new(status_code: StatusCode) -> Self {
        Self {
            status_code,
            message: None,
            detailed_information: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST).with_message(message)
    }

    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED).with_message("Not authorized.")
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND).with_message(message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR).with_message(message)
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_detailed_information(mut self, detail: impl Into<String>) -> Self {
        self.detailed_information = Some(detail.into());
        self
    }
}

impl IntoResponse for RouteErrorResponse {
    fn into_response(self) -> axum::response::Response {
        (self.status_code, Json(self)).into_response()
    }
}
