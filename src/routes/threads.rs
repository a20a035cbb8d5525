use axum::extract::{Path, Query, State};
use axum::Json;
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::guards::Auth;
use crate::models::Message;
use crate::routes::ApiResponse;
use crate::services::message_service::SendMessageInput;
use crate::services::thread_service::{ThreadMessages, ThreadQuery, ThreadSummary};
use crate::services::ThreadService;
use crate::state::AppState;

/// Promote an existing message into a thread root.
pub async fn create(
    State(state): State<AppState>,
    Auth(auth): Auth,
    Path(message_id): Path<Uuid>,
) -> Result<Json<ApiResponse<Message>>, AppError> {
    let root = ThreadService::create_thread(&state, &auth, message_id).await?;
    Ok(Json(ApiResponse::new(root)))
}

pub async fn reply(
    State(state): State<AppState>,
    Auth(auth): Auth,
    Path(thread_id): Path<Uuid>,
    Json(input): Json<SendMessageInput>,
) -> Result<Json<ApiResponse<Message>>, AppError> {
    let message = ThreadService::reply_to_thread(&state, &auth, thread_id, input).await?;
    Ok(Json(ApiResponse::new(message)))
}

pub async fn get_messages(
    State(state): State<AppState>,
    Auth(auth): Auth,
    Path(thread_id): Path<Uuid>,
    Query(query): Query<ThreadQuery>,
) -> Result<Json<ApiResponse<ThreadMessages>>, AppError> {
    let thread = ThreadService::get_thread_messages(&state, &auth, thread_id, &query).await?;
    Ok(Json(ApiResponse::new(thread)))
}

pub async fn summary(
    State(state): State<AppState>,
    Auth(auth): Auth,
    Path(thread_id): Path<Uuid>,
) -> Result<Json<ApiResponse<ThreadSummary>>, AppError> {
    let summary = ThreadService::get_thread_summary(&state, &auth, thread_id).await?;
    Ok(Json(ApiResponse::new(summary)))
}

pub async fn list_for_conversation(
    State(state): State<AppState>,
    Auth(auth): Auth,
    Path(conversation_id): Path<Uuid>,
) -> Result<Json<ApiResponse<Vec<ThreadSummary>>>, AppError> {
    let threads = ThreadService::get_conversation_threads(&state, &auth, conversation_id).await?;
    Ok(Json(ApiResponse::new(threads)))
}
