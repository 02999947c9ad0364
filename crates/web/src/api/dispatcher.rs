use axum::extract::State;
use axum::Json;
use gateway::auth::{AuthTable, COOKIE_NAME};
use serde::Deserialize;
use tower_cookies::cookie::time::Duration as CookieDuration;
use tower_cookies::cookie::SameSite;
use tower_cookies::{Cookie, Cookies};

use crate::common::{RouteErrorResponse, RouteResult};
use crate::WebState;

use super::auth::principal;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub password: String,
}

pub async fn login(
    State(state): State<WebState>,
    cookies: Cookies,
    Json(body): Json<LoginRequest>,
) -> RouteResult<Json<serde_json::Value>> {
    let table = AuthTable::from_env();
    let Some((who, cookie_value)) = table.login(&body.password) else {
        return Err(RouteErrorResponse::unauthorized().with_message("Incorrect password."));
    };

    let config = &state.core.config;
    let mut cookie = Cookie::new(COOKIE_NAME, cookie_value);
    cookie.set_path("/");
    cookie.set_http_only(true);
    cookie.set_same_site(SameSite::Lax);
    cookie.set_secure(config.dispatch_cookie_secure);
    cookie.set_max_age(CookieDuration::seconds(config.dispatch_cookie_max_age_s));
    cookies.add(cookie);

    Ok(Json(serde_json::json!({
        "ok": true,
        "label": who.label,
        "access_type": who.access_type.as_str(),
    })))
}

pub async fn status(cookies: Cookies) -> Json<serde_json::Value> {
    let table = AuthTable::from_env();
    match principal(&cookies) {
        Some(who) => Json(serde_json::json!({
            "required": !table.is_empty(),
            "authorized": true,
            "label": who.label,
            "access_type": who.access_type.as_str(),
        })),
        None => Json(serde_json::json!({
            "required": !table.is_empty(),
            "authorized": false,
            "label": null,
            "access_type": null,
        })),
    }
}

pub async fn logout(cookies: Cookies) -> Json<serde_json::Value> {
    let mut cookie = Cookie::new(COOKIE_NAME, "");
    cookie.set_path("/");
    cookie.set_max_age(CookieDuration::seconds(0));
    cookies.add(cookie);
    Json(serde_json::json!({ "ok": true }))
}
