use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::guards::Auth;
use crate::models::Message;
use crate::routes::ApiResponse;
use crate::services::message_service::{MessageQuery, MessageStatusView, SendMessageInput};
use crate::services::MessageService;
use crate::state::AppState;

pub async fn send(
    State(state): State<AppState>,
    Auth(auth): Auth,
    Path(conversation_id): Path<Uuid>,
    Json(input): Json<SendMessageInput>,
) -> Result<Json<ApiResponse<Message>>, AppError> {
    let message = MessageService::send_message(&state, &auth, conversation_id, input).await?;
    Ok(Json(ApiResponse::new(message)))
}

pub async fn list(
    State(state): State<AppState>,
    Auth(auth): Auth,
    Path(conversation_id): Path<Uuid>,
    Query(query): Query<MessageQuery>,
) -> Result<Json<ApiResponse<Vec<Message>>>, AppError> {
    let messages = MessageService::get_messages(&state, &auth, conversation_id, &query).await?;
    Ok(Json(ApiResponse::new(messages)))
}

pub async fn get_one(
    State(state): State<AppState>,
    Auth(auth): Auth,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Message>>, AppError> {
    let message = MessageService::get_message(&state, &auth, id).await?;
    Ok(Json(ApiResponse::new(message)))
}

#[derive(Debug, Deserialize)]
pub struct EditBody {
    pub text: String,
    pub reason: Option<String>,
}

pub async fn edit(
    State(state): State<AppState>,
    Auth(auth): Auth,
    Path(id): Path<Uuid>,
    Json(body): Json<EditBody>,
) -> Result<Json<ApiResponse<Message>>, AppError> {
    let message = MessageService::edit_message(&state, &auth, id, body.text, body.reason).await?;
    Ok(Json(ApiResponse::new(message)))
}

pub async fn remove(
    State(state): State<AppState>,
    Auth(auth): Auth,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<()>>, AppError> {
    MessageService::delete_message(&state, &auth, id).await?;
    Ok(Json(ApiResponse::new(())))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Auth(auth): Auth,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<()>>, AppError> {
    MessageService::mark_message_read(&state, &auth, id).await?;
    Ok(Json(ApiResponse::new(())))
}

#[derive(Debug, Deserialize)]
pub struct StatusBody {
    pub message_ids: Vec<Uuid>,
}

pub async fn statuses(
    State(state): State<AppState>,
    Auth(auth): Auth,
    Path(conversation_id): Path<Uuid>,
    Json(body): Json<StatusBody>,
) -> Result<Json<ApiResponse<Vec<MessageStatusView>>>, AppError> {
    let statuses = MessageService::get_message_statuses(
        &state.db,
        &auth,
        conversation_id,
        &body.message_ids,
    )
    .await?;
    Ok(Json(ApiResponse::new(statuses)))
}
