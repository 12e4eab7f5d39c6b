use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;

use crate::data::model::{is_supported_model, User, SUPPORTED_MODELS};
use crate::router::app::chat::ChatError;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct ModelListing {
    pub id: &'static str,
    pub name: &'static str,
    pub provider: &'static str,
    pub context_length: u32,
    pub supports_thinking: bool,
    pub is_favorite: bool,
}

#[axum::debug_handler]
pub async fn list_models(
    State(state): State<Arc<AppState>>,
    Extension(current_user): Extension<Option<User>>,
) -> Result<Json<serde_json::Value>, ChatError> {
    let user = current_user.ok_or(ChatError::MissingUser)?;
    let favorites = state.chat_repo.list_favorites(user.id).await?;

    let models: Vec<ModelListing> = SUPPORTED_MODELS
        .iter()
        .map(|m| ModelListing {
            id: m.id,
            name: m.name,
            provider: m.provider,
            context_length: m.context_length,
            supports_thinking: m.supports_thinking,
            is_favorite: favorites.iter().any(|f| f == m.id),
        })
        .collect();

    Ok(Json(json!({ "models": models })))
}

#[axum::debug_handler]
pub async fn add_favorite(
    Path(model): Path<String>,
    State(state): State<Arc<AppState>>,
    Extension(current_user): Extension<Option<User>>,
) -> Result<StatusCode, ChatError> {
    let user = current_user.ok_or(ChatError::MissingUser)?;
    if !is_supported_model(&model) {
        return Err(ChatError::UnsupportedModel(model));
    }
    state.chat_repo.add_favorite(user.id, &model).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[axum::debug_handler]
pub async fn remove_favorite(
    Path(model): Path<String>,
    State(state): State<Arc<AppState>>,
    Extension(current_user): Extension<Option<User>>,
) -> Result<StatusCode, ChatError> {
    let user = current_user.ok_or(ChatError::MissingUser)?;
    state.chat_repo.remove_favorite(user.id, &model).await?;
    Ok(StatusCode::NO_CONTENT)
}
