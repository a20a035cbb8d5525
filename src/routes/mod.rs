pub mod conversations;
pub mod files;
pub mod messages;
pub mod reactions;
pub mod search;
pub mod threads;

use axum::routing::{delete, get, post};
use axum::{middleware, Json, Router};
use serde::Serialize;

use crate::middleware::auth::auth_middleware;
use crate::state::AppState;
use crate::websocket::handlers::ws_handler;

/// Uniform success envelope. Errors never use this shape; they go through
/// the error middleware.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pagination: Option<Pagination>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct Pagination {
    pub limit: i64,
    pub offset: i64,
    pub total: i64,
}

impl<T> ApiResponse<T> {
    pub fn new(data: T) -> Self {
        Self {
            success: true,
            data,
            pagination: None,
        }
    }

    pub fn paginated(data: T, pagination: Pagination) -> Self {
        Self {
            success: true,
            data,
            pagination: Some(pagination),
        }
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route(
            "/conversations",
            post(conversations::create).get(conversations::list),
        )
        .route(
            "/conversations/:id",
            get(conversations::get_one)
                .patch(conversations::update)
                .delete(conversations::remove),
        )
        .route(
            "/conversations/:id/participants",
            post(conversations::add_participant),
        )
        .route(
            "/conversations/:id/participants/:user_id",
            delete(conversations::remove_participant),
        )
        .route("/conversations/:id/read", post(conversations::mark_read))
        .route(
            "/conversations/:id/messages",
            get(messages::list).post(messages::send),
        )
        .route(
            "/conversations/:id/messages/status",
            post(messages::statuses),
        )
        .route(
            "/conversations/:id/threads",
            get(threads::list_for_conversation),
        )
        .route("/conversations/:id/files", post(files::upload))
        .route(
            "/conversations/:id/files/:file_id",
            delete(files::remove),
        )
        .route("/files/:id", get(files::download))
        .route(
            "/messages/:id",
            get(messages::get_one)
                .patch(messages::edit)
                .delete(messages::remove),
        )
        .route("/messages/:id/read", post(messages::mark_read))
        .route("/messages/:id/thread", post(threads::create))
        .route(
            "/messages/:id/reactions",
            get(reactions::list).post(reactions::add),
        )
        .route(
            "/messages/:id/reactions/:emoji",
            delete(reactions::remove),
        )
        .route("/threads/:id", get(threads::get_messages))
        .route("/threads/:id/summary", get(threads::summary))
        .route("/threads/:id/replies", post(threads::reply))
        .route("/search/messages", get(search::messages))
        .route("/search/conversations", get(search::conversations))
        .route("/search/recent", get(search::recent))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new()
        .route("/health", get(health))
        .route("/ws", get(ws_handler))
        .nest("/api", api)
        .with_state(state)
}
