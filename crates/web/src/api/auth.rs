use gateway::auth::{AuthPrincipal, AuthTable, COOKIE_NAME};
use tower_cookies::Cookies;

use crate::common::RouteErrorResponse;

/// Resolve the request's dispatcher principal. The secret table is rebuilt
/// from the environment on every check so rotations take effect immediately.
pub fn principal(cookies: &Cookies) -> Option<AuthPrincipal> {
    let cookie = cookies.get(COOKIE_NAME)?;
    AuthTable::from_env().verify(cookie.value())
}

pub fn require(cookies: &Cookies) -> Result<AuthPrincipal, RouteErrorResponse> {
    principal(cookies).ok_or_else(RouteErrorResponse::unauthorized)
}
