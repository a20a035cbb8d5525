use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::guards::Auth;
use crate::models::{Conversation, UserRole};
use crate::routes::{ApiResponse, Pagination};
use crate::services::conversation_service::{
    ConversationFilters, CreateConversationInput, UpdateConversationInput,
};
use crate::services::ConversationService;
use crate::state::AppState;

pub async fn create(
    State(state): State<AppState>,
    Auth(auth): Auth,
    Json(input): Json<CreateConversationInput>,
) -> Result<Json<ApiResponse<Conversation>>, AppError> {
    let conversation = ConversationService::create_conversation(&state, &auth, input).await?;
    Ok(Json(ApiResponse::new(conversation)))
}

pub async fn list(
    State(state): State<AppState>,
    Auth(auth): Auth,
    Query(filters): Query<ConversationFilters>,
) -> Result<Json<ApiResponse<Vec<Conversation>>>, AppError> {
    let limit = filters.limit.unwrap_or(50).clamp(1, 200);
    let offset = filters.offset.unwrap_or(0).max(0);
    let (conversations, total) =
        ConversationService::list_conversations(&state.db, &auth, &filters).await?;
    Ok(Json(ApiResponse::paginated(
        conversations,
        Pagination {
            limit,
            offset,
            total,
        },
    )))
}

pub async fn get_one(
    State(state): State<AppState>,
    Auth(auth): Auth,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Conversation>>, AppError> {
    let conversation = ConversationService::get_conversation(&state.db, &auth, id).await?;
    Ok(Json(ApiResponse::new(conversation)))
}

pub async fn update(
    State(state): State<AppState>,
    Auth(auth): Auth,
    Path(id): Path<Uuid>,
    Json(input): Json<UpdateConversationInput>,
) -> Result<Json<ApiResponse<Conversation>>, AppError> {
    let conversation = ConversationService::update_conversation(&state, &auth, id, input).await?;
    Ok(Json(ApiResponse::new(conversation)))
}

pub async fn remove(
    State(state): State<AppState>,
    Auth(auth): Auth,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<()>>, AppError> {
    ConversationService::delete_conversation(&state, &auth, id).await?;
    Ok(Json(ApiResponse::new(())))
}

#[derive(Debug, Deserialize)]
pub struct AddParticipantBody {
    pub user_id: Uuid,
    pub role: UserRole,
}

pub async fn add_participant(
    State(state): State<AppState>,
    Auth(auth): Auth,
    Path(id): Path<Uuid>,
    Json(body): Json<AddParticipantBody>,
) -> Result<Json<ApiResponse<()>>, AppError> {
    ConversationService::add_participant(&state, &auth, id, body.user_id, body.role).await?;
    Ok(Json(ApiResponse::new(())))
}

pub async fn remove_participant(
    State(state): State<AppState>,
    Auth(auth): Auth,
    Path((id, user_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<ApiResponse<()>>, AppError> {
    ConversationService::remove_participant(&state, &auth, id, user_id).await?;
    Ok(Json(ApiResponse::new(())))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Auth(auth): Auth,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<()>>, AppError> {
    ConversationService::mark_conversation_read(&state.db, &auth, id).await?;
    Ok(Json(ApiResponse::new(())))
}
