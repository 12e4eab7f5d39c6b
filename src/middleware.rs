use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Extension, Json,
};
use std::sync::Arc;
use tower_cookies::Cookies;

use crate::{data::model::User, AppState};

pub const SESSION_COOKIE: &str = "mira-session";

/// Resolve the session cookie to a user row and stash it as a request
/// extension. Lookup failures degrade to an anonymous request; the auth
/// guard below decides whether that is acceptable.
pub async fn extract_user(
    State(state): State<Arc<AppState>>,
    cookies: Cookies,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let user: Option<User> = match cookies.get(SESSION_COOKIE) {
        Some(cookie) => state
            .chat_repo
            .find_user_by_session(cookie.value())
            .await
            .unwrap_or_else(|e| {
                tracing::warn!("session lookup failed: {}", e);
                None
            }),
        None => None,
    };
    req.extensions_mut().insert(user);
    next.run(req).await
}

pub async fn require_auth(
    Extension(current_user): Extension<Option<User>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    match current_user {
        Some(_) => next.run(req).await,
        None => (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({"error": "Not authenticated"})),
        )
            .into_response(),
    }
}
