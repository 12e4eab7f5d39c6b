use axum::{
    middleware::from_fn,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;

use crate::middleware::require_auth;
use crate::AppState;

pub mod chat;
pub mod models;

async fn health() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

fn chat_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(chat::list_chats).post(chat::chat_stream))
        .route("/new", post(chat::new_chat))
        .route(
            "/{chat_id}",
            get(chat::get_chat).delete(chat::delete_chat),
        )
        .layer(from_fn(require_auth))
        .with_state(state)
}

fn models_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(models::list_models))
        .route(
            "/{model}/favorite",
            post(models::add_favorite).delete(models::remove_favorite),
        )
        .layer(from_fn(require_auth))
        .with_state(state)
}

pub fn app_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .nest("/api/v1/chat", chat_router(state.clone()))
        .nest("/api/v1/models", models_router(state))
}
