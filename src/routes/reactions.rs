use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::guards::Auth;
use crate::models::Reaction;
use crate::routes::ApiResponse;
use crate::services::MessageService;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ReactionBody {
    pub emoji: String,
}

pub async fn add(
    State(state): State<AppState>,
    Auth(auth): Auth,
    Path(message_id): Path<Uuid>,
    Json(body): Json<ReactionBody>,
) -> Result<Json<ApiResponse<()>>, AppError> {
    MessageService::add_reaction(&state, &auth, message_id, &body.emoji).await?;
    Ok(Json(ApiResponse::new(())))
}

pub async fn list(
    State(state): State<AppState>,
    Auth(auth): Auth,
    Path(message_id): Path<Uuid>,
) -> Result<Json<ApiResponse<Vec<Reaction>>>, AppError> {
    let reactions = MessageService::list_reactions(&state, &auth, message_id).await?;
    Ok(Json(ApiResponse::new(reactions)))
}

pub async fn remove(
    State(state): State<AppState>,
    Auth(auth): Auth,
    Path((message_id, emoji)): Path<(Uuid, String)>,
) -> Result<Json<ApiResponse<()>>, AppError> {
    MessageService::remove_reaction(&state, &auth, message_id, &emoji).await?;
    Ok(Json(ApiResponse::new(())))
}
