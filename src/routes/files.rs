use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::guards::Auth;
use crate::models::Attachment;
use crate::routes::ApiResponse;
use crate::services::FileService;
use crate::state::AppState;

fn default_mime_type() -> String {
    "application/octet-stream".to_string()
}

#[derive(Debug, Deserialize)]
pub struct UploadParams {
    pub file_name: String,
    #[serde(default = "default_mime_type")]
    pub mime_type: String,
}

/// Raw body upload: metadata rides in the query string.
pub async fn upload(
    State(state): State<AppState>,
    Auth(auth): Auth,
    Path(conversation_id): Path<Uuid>,
    Query(params): Query<UploadParams>,
    body: Bytes,
) -> Result<Json<ApiResponse<Attachment>>, AppError> {
    let attachment = FileService::upload(
        &state,
        &auth,
        conversation_id,
        &params.file_name,
        &params.mime_type,
        body.to_vec(),
    )
    .await?;
    Ok(Json(ApiResponse::new(attachment)))
}

pub async fn download(
    State(state): State<AppState>,
    Auth(auth): Auth,
    Path(file_id): Path<Uuid>,
) -> Result<Response, AppError> {
    let bytes = FileService::download(&state, &auth, file_id).await?;
    Ok((
        [(header::CONTENT_TYPE, "application/octet-stream")],
        bytes,
    )
        .into_response())
}

pub async fn remove(
    State(state): State<AppState>,
    Auth(auth): Auth,
    Path((conversation_id, file_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<ApiResponse<()>>, AppError> {
    FileService::delete(&state, &auth, conversation_id, file_id).await?;
    Ok(Json(ApiResponse::new(())))
}
