use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;

use crate::error::AppError;
use crate::middleware::guards::Auth;
use crate::routes::ApiResponse;
use crate::services::search_service::{
    ConversationSearchHit, ConversationSearchQuery, MessageSearchHit, MessageSearchQuery,
};
use crate::services::SearchService;
use crate::state::AppState;

pub async fn messages(
    State(state): State<AppState>,
    Auth(auth): Auth,
    Query(query): Query<MessageSearchQuery>,
) -> Result<Json<ApiResponse<Vec<MessageSearchHit>>>, AppError> {
    let hits = SearchService::search_messages(&state, &auth, &query).await?;
    Ok(Json(ApiResponse::new(hits)))
}

pub async fn conversations(
    State(state): State<AppState>,
    Auth(auth): Auth,
    Query(query): Query<ConversationSearchQuery>,
) -> Result<Json<ApiResponse<Vec<ConversationSearchHit>>>, AppError> {
    let hits = SearchService::search_conversations(&state, &auth, &query).await?;
    Ok(Json(ApiResponse::new(hits)))
}

#[derive(Debug, Deserialize)]
pub struct RecentQuery {
    pub limit: Option<i64>,
}

pub async fn recent(
    State(state): State<AppState>,
    Auth(auth): Auth,
    Query(query): Query<RecentQuery>,
) -> Result<Json<ApiResponse<Vec<String>>>, AppError> {
    let recent =
        SearchService::recent_searches(&state, &auth, query.limit.unwrap_or(10)).await?;
    Ok(Json(ApiResponse::new(recent)))
}
