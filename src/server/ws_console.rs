use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tracing::{info, warn};

use crate::console::event::{ClientMessage, ConsoleMessage, ServerId};
use crate::console::observer::ObserverChannel;
use crate::console::session::AttachError;
use crate::server::auth::{self, AuthUser, WsAuthQuery};
use crate::server::error::ApiError;
use crate::server::AppState;

/// `GET /ws/console/{server_id}`: live console for one server.
///
/// Authentication and the ownership check happen once, before the upgrade;
/// afterwards the duplex loop runs until either side closes.
pub async fn console_ws(
    ws: WebSocketUpgrade,
    Path(server_id): Path<ServerId>,
    Query(query): Query<WsAuthQuery>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let user = auth::authenticate_ws(&state, &headers, &query)?;

    if !state.access.has_access(server_id, user.user_id).await? {
        return Err(ApiError::Forbidden(
            "no access to this server".to_string(),
        ));
    }

    Ok(ws.on_upgrade(move |socket| handle_console(socket, state, server_id, user)))
}

async fn handle_console(
    socket: WebSocket,
    state: Arc<AppState>,
    server_id: ServerId,
    user: AuthUser,
) {
    let (observer, mut outbound) =
        ObserverChannel::new(server_id, state.config.observer_queue_capacity);
    let observer_id = observer.id();

    // The handler keeps its own sender for error replies and history
    // requests; it stays usable even when the session is gone.
    let reply = observer.clone();

    match state.registry.attach(server_id, observer).await {
        Ok(()) => {
            info!(server_id, user_id = user.user_id, "console observer attached");
        }
        Err(err @ AttachError::NotRunning) => {
            let _ = reply.push(ConsoleMessage::Info {
                message: err.to_string(),
            });
        }
        Err(AttachError::Unreachable(msg)) => {
            let _ = reply.push(ConsoleMessage::Error {
                message: format!("Container runtime unreachable: {msg}"),
            });
        }
        Err(AttachError::Stale) => {
            let _ = reply.push(ConsoleMessage::Error {
                message: "Console is restarting, please reconnect".to_string(),
            });
        }
    }

    let (mut ws_tx, mut ws_rx) = socket.split();

    // Egress: bounded observer queue → socket, in arrival order.
    let mut egress = tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            let Ok(payload) = serde_json::to_string(&message) else {
                continue;
            };
            if ws_tx.send(Message::Text(payload.into())).await.is_err() {
                break;
            }
        }
    });

    // Ingress: socket → commands and history requests.
    let ingress_state = state.clone();
    let mut ingress = tokio::spawn(async move {
        while let Some(frame) = ws_rx.next().await {
            match frame {
                Ok(Message::Text(text)) => {
                    handle_client_frame(&ingress_state, &reply, text.as_str()).await;
                }
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    });

    tokio::select! {
        _ = &mut egress => ingress.abort(),
        _ = &mut ingress => egress.abort(),
    }

    state.registry.detach(server_id, observer_id).await;
    info!(server_id, "console connection closed");
}

async fn handle_client_frame(state: &Arc<AppState>, reply: &ObserverChannel, text: &str) {
    let server_id = reply.server_id();
    let message: ClientMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(err) => {
            let _ = reply.push(ConsoleMessage::Error {
                message: format!("invalid message: {err}"),
            });
            return;
        }
    };

    match message {
        ClientMessage::Command { command } => {
            let Some(session) = state.registry.session(server_id) else {
                let _ = reply.push(ConsoleMessage::Error {
                    message: "Server is not running".to_string(),
                });
                return;
            };
            if let Err(err) = session.submit_command(&command).await {
                let _ = reply.push(ConsoleMessage::Error {
                    message: format!("Failed to execute command: {err}"),
                });
            }
        }
        ClientMessage::GetHistory => {
            let logs = state
                .history
                .recent_logs(server_id, state.config.history_replay_limit)
                .await;
            match logs {
                Ok(logs) => {
                    for log in logs.into_iter().rev() {
                        let pushed = reply.push(ConsoleMessage::Log {
                            message: log.message,
                            log_level: log.level,
                            timestamp: log.timestamp,
                        });
                        if pushed.is_err() {
                            break;
                        }
                    }
                }
                Err(err) => {
                    warn!(server_id, "failed to load history: {err:#}");
                    let _ = reply.push(ConsoleMessage::Error {
                        message: "Failed to load history".to_string(),
                    });
                }
            }
        }
    }
}
