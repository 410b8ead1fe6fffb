//! services/api/src/web/middleware.rs
//!
//! Identity middleware for protecting routes.
//!
//! Login itself belongs to the HRMS front door. By the time a request reaches
//! this service the gateway has attached the caller's identity as headers.

use axum::{
    extract::Request,
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use tracing::debug;

use crate::web::state::CurrentUser;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_NAME_HEADER: &str = "x-user-name";

/// Middleware that extracts the logged-in user from the identity headers.
///
/// If present, inserts a `CurrentUser` into request extensions for handlers to use.
/// If missing or blank, returns 401 Unauthorized.
pub async fn require_user(mut req: Request, next: Next) -> Result<Response, StatusCode> {
    let user = current_user(req.headers()).ok_or_else(|| {
        debug!("Rejecting request without a user identity");
        StatusCode::UNAUTHORIZED
    })?;

    req.extensions_mut().insert(user);
    Ok(next.run(req).await)
}

fn current_user(headers: &HeaderMap) -> Option<CurrentUser> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(String::from)
    };

    let id = header(USER_ID_HEADER)?;
    let display_name = header(USER_NAME_HEADER).unwrap_or_else(|| id.clone());
    Some(CurrentUser { id, display_name })
}
