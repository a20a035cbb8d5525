//! WebSocket endpoint: authentication happens BEFORE the protocol upgrade,
//! so an invalid token gets an HTTP 401 instead of a half-open socket.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::auth::{authenticate, AuthContext};
use crate::middleware::guards::ConversationAccess;
use crate::services::conversation_service::{
    CreateConversationInput, ParticipantInput, UpdateConversationInput,
};
use crate::services::message_service::SendMessageInput;
use crate::services::{ConversationService, MessageService};
use crate::state::AppState;
use crate::websocket::events::{
    broadcast_event, broadcast_event_except, ClientEvent, ServerEvent,
};
use crate::websocket::registry::Room;

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub token: Option<String>,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<WsParams>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let token = params
        .token
        .or_else(|| {
            headers
                .get(axum::http::header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
                .map(str::to_string)
        })
        .ok_or(AppError::Unauthorized)?;

    let auth = authenticate(&token, &state.config.jwt_secret)?;
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, auth)))
}

async fn handle_socket(socket: WebSocket, state: AppState, auth: AuthContext) {
    let connection_id = Uuid::new_v4();
    let user_id = auth.user_id;
    tracing::info!(%connection_id, %user_id, "websocket connected");

    let mut rx = state.registry.register(connection_id, user_id).await;
    state
        .registry
        .join(connection_id, Room::User(user_id))
        .await;
    state
        .registry
        .join(connection_id, Room::Tenant(auth.tenant_id))
        .await;

    // presence transitions fire only on the user's first connection
    if state.presence.connection_opened(user_id, connection_id).await {
        broadcast_event_except(
            &state.registry,
            Room::Tenant(auth.tenant_id),
            user_id,
            ServerEvent::PresenceChanged {
                subject_id: user_id,
                status: "online".to_string(),
            },
        )
        .await;
    }

    // initial state so the client renders without a follow-up fetch
    match ConversationService::snapshot(&state.db, &auth, state.config.snapshot_limit).await {
        Ok(conversations) => {
            send_event(
                &state,
                connection_id,
                user_id,
                ServerEvent::Snapshot { conversations },
            )
            .await;
        }
        Err(e) => {
            tracing::error!(error = %e, %user_id, "failed to build connect snapshot");
        }
    }

    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            outbound = rx.recv() => {
                match outbound {
                    Some(msg) => {
                        if sink.send(msg).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            inbound = stream.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        handle_text(&state, &auth, connection_id, &text).await;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sink.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!(error = %e, %connection_id, "websocket read error");
                        break;
                    }
                }
            }
        }
    }

    cleanup(&state, &auth, connection_id).await;
    tracing::info!(%connection_id, %user_id, "websocket disconnected");
}

async fn handle_text(state: &AppState, auth: &AuthContext, connection_id: Uuid, text: &str) {
    let event: ClientEvent = match serde_json::from_str(text) {
        Ok(event) => event,
        Err(e) => {
            send_event(
                state,
                connection_id,
                auth.user_id,
                ServerEvent::Error {
                    code: "INVALID_REQUEST",
                    message: format!("malformed event: {e}"),
                },
            )
            .await;
            return;
        }
    };

    if let Err(e) = handle_client_event(state, auth, connection_id, event).await {
        send_event(
            state,
            connection_id,
            auth.user_id,
            ServerEvent::Error {
                code: error_code(&e),
                message: error_message(&e),
            },
        )
        .await;
    }
}

async fn handle_client_event(
    state: &AppState,
    auth: &AuthContext,
    connection_id: Uuid,
    event: ClientEvent,
) -> Result<(), AppError> {
    match event {
        ClientEvent::ConversationCreate {
            conversation_type,
            title,
            participants,
            patient_id,
            priority,
            tags,
        } => {
            let input = CreateConversationInput {
                kind: conversation_type,
                title,
                participants: participants
                    .into_iter()
                    .map(|p| ParticipantInput {
                        user_id: p.user_id,
                        role: p.role,
                    })
                    .collect(),
                patient_id,
                case_id: None,
                priority,
                tags,
                clinical_context: None,
                skip_validation: false,
            };
            let conversation =
                ConversationService::create_conversation(state, auth, input).await?;
            // the service notifies the other participants; ack the creator
            send_event(
                state,
                connection_id,
                auth.user_id,
                ServerEvent::ConversationCreated {
                    conversation_id: conversation.id,
                },
            )
            .await;
        }

        ClientEvent::ConversationUpdate {
            conversation_id,
            title,
            status,
            priority,
            tags,
        } => {
            let input = UpdateConversationInput {
                title,
                status,
                priority,
                tags,
            };
            ConversationService::update_conversation(state, auth, conversation_id, input)
                .await?;
        }

        ClientEvent::ConversationJoin { conversation_id } => {
            ConversationAccess::verify(&state.db, auth, conversation_id).await?;
            state
                .registry
                .join(connection_id, Room::Conversation(conversation_id))
                .await;
        }

        ClientEvent::ConversationLeave { conversation_id } => {
            state
                .registry
                .leave(connection_id, Room::Conversation(conversation_id))
                .await;
            if state.typing.stop(connection_id, conversation_id).await {
                broadcast_event_except(
                    &state.registry,
                    Room::Conversation(conversation_id),
                    auth.user_id,
                    ServerEvent::TypingStopped { conversation_id },
                )
                .await;
            }
        }

        ClientEvent::ConversationRead { conversation_id } => {
            ConversationService::mark_conversation_read(&state.db, auth, conversation_id).await?;
        }

        ClientEvent::MessageSend {
            conversation_id,
            text,
            mentions,
            priority,
            thread_id,
            parent_message_id,
        } => {
            let input = SendMessageInput {
                text,
                message_type: crate::models::MessageType::Text,
                attachments: Vec::new(),
                mentions,
                priority,
                thread_id,
                parent_message_id,
                metadata: serde_json::Value::Object(Default::default()),
            };
            MessageService::send_message(state, auth, conversation_id, input).await?;
        }

        ClientEvent::MessageRead { message_id } => {
            MessageService::mark_message_read(state, auth, message_id).await?;
        }

        ClientEvent::ReactionAdd { message_id, emoji } => {
            MessageService::add_reaction(state, auth, message_id, &emoji).await?;
        }

        ClientEvent::ReactionRemove { message_id, emoji } => {
            MessageService::remove_reaction(state, auth, message_id, &emoji).await?;
        }

        ClientEvent::TypingStart { conversation_id } => {
            let access = ConversationAccess::verify(&state.db, auth, conversation_id).await?;
            if !access.is_participant {
                return Err(AppError::NotFound);
            }
            let registry = state.registry.clone();
            let user_id = auth.user_id;
            let fresh = state
                .typing
                .start(connection_id, conversation_id, move || async move {
                    // TTL ran out without an explicit stop
                    broadcast_event_except(
                        &registry,
                        Room::Conversation(conversation_id),
                        user_id,
                        ServerEvent::TypingStopped { conversation_id },
                    )
                    .await;
                })
                .await;
            if fresh {
                broadcast_event_except(
                    &state.registry,
                    Room::Conversation(conversation_id),
                    auth.user_id,
                    ServerEvent::TypingStarted { conversation_id },
                )
                .await;
            }
        }

        ClientEvent::TypingStop { conversation_id } => {
            if state.typing.stop(connection_id, conversation_id).await {
                broadcast_event_except(
                    &state.registry,
                    Room::Conversation(conversation_id),
                    auth.user_id,
                    ServerEvent::TypingStopped { conversation_id },
                )
                .await;
            }
        }

        ClientEvent::PresenceUpdate { status } => {
            broadcast_event_except(
                &state.registry,
                Room::Tenant(auth.tenant_id),
                auth.user_id,
                ServerEvent::PresenceChanged {
                    subject_id: auth.user_id,
                    status,
                },
            )
            .await;
        }

        ClientEvent::FileProgress {
            conversation_id,
            file_id,
            progress,
        } => {
            // pure relay, but only within rooms the connection has joined
            if !state
                .registry
                .is_joined(connection_id, Room::Conversation(conversation_id))
                .await
            {
                return Err(AppError::NotFound);
            }
            broadcast_event_except(
                &state.registry,
                Room::Conversation(conversation_id),
                auth.user_id,
                ServerEvent::FileProgress {
                    conversation_id,
                    file_id,
                    progress: progress.min(100),
                },
            )
            .await;
        }

        ClientEvent::FileComplete {
            conversation_id,
            file_id,
        } => {
            if !state
                .registry
                .is_joined(connection_id, Room::Conversation(conversation_id))
                .await
            {
                return Err(AppError::NotFound);
            }
            broadcast_event(
                &state.registry,
                Room::Conversation(conversation_id),
                auth.user_id,
                ServerEvent::FileComplete {
                    conversation_id,
                    file_id,
                },
            )
            .await;
        }
    }
    Ok(())
}

/// Teardown order matters: the registry forgets the connection first so no
/// further fan-out targets it, then typing episodes are closed out, then the
/// presence transition (if any) is announced.
async fn cleanup(state: &AppState, auth: &AuthContext, connection_id: Uuid) {
    state.registry.unregister(connection_id).await;

    for conversation_id in state.typing.disconnect(connection_id).await {
        broadcast_event_except(
            &state.registry,
            Room::Conversation(conversation_id),
            auth.user_id,
            ServerEvent::TypingStopped { conversation_id },
        )
        .await;
    }

    if state
        .presence
        .connection_closed(auth.user_id, connection_id)
        .await
    {
        broadcast_event_except(
            &state.registry,
            Room::Tenant(auth.tenant_id),
            auth.user_id,
            ServerEvent::PresenceChanged {
                subject_id: auth.user_id,
                status: "offline".to_string(),
            },
        )
        .await;
    }
}

async fn send_event(state: &AppState, connection_id: Uuid, user_id: Uuid, event: ServerEvent) {
    match event.to_broadcast_payload(user_id) {
        Ok(payload) => {
            state
                .registry
                .send_to(connection_id, Message::Text(payload))
                .await;
        }
        Err(e) => {
            tracing::error!(error = %e, event = event.event_type(), "failed to serialize event");
        }
    }
}

fn error_code(err: &AppError) -> &'static str {
    match err {
        AppError::Validation { .. } => "INVALID_REQUEST",
        AppError::Unauthorized => "INVALID_CREDENTIALS",
        AppError::PermissionDenied(_) => "PERMISSION_DENIED",
        AppError::NotFound => "NOT_FOUND",
        AppError::Unavailable(_) => "DEPENDENCY_UNAVAILABLE",
        _ => "INTERNAL_SERVER_ERROR",
    }
}

fn error_message(err: &AppError) -> String {
    if err.status_code() >= 500 {
        tracing::error!(error = %err, "websocket event failed");
        "internal error".to_string()
    } else {
        err.to_string()
    }
}
