use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::console::event::{ConsoleMessage, ServerId};
use crate::server::auth::{self, WsAuthQuery};
use crate::server::error::ApiError;
use crate::server::AppState;

/// `GET /ws/stats/{server_id}`: resource-usage samples every interval.
pub async fn stats_ws(
    ws: WebSocketUpgrade,
    Path(server_id): Path<ServerId>,
    Query(query): Query<WsAuthQuery>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    auth::authenticate_ws(&state, &headers, &query)?;
    Ok(ws.on_upgrade(move |socket| handle_stats(socket, state, server_id)))
}

async fn handle_stats(socket: WebSocket, state: Arc<AppState>, server_id: ServerId) {
    let cancel = CancellationToken::new();
    let (tx, mut samples) = mpsc::channel(8);

    let sampler = state.sampler.clone();
    let sampler_cancel = cancel.clone();
    let sampler_task =
        tokio::spawn(async move { sampler.run(server_id, sampler_cancel, tx).await });

    let (mut ws_tx, mut ws_rx) = socket.split();

    loop {
        tokio::select! {
            sample = samples.recv() => match sample {
                Some(sample) => {
                    let frame = ConsoleMessage::Stats { data: sample };
                    let Ok(payload) = serde_json::to_string(&frame) else {
                        continue;
                    };
                    if ws_tx.send(Message::Text(payload.into())).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
            frame = ws_rx.next() => match frame {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            }
        }
    }

    // Stop sampling the moment the connection goes away; the sampler checks
    // the token before each tick, so nothing is emitted afterwards.
    cancel.cancel();
    let _ = sampler_task.await;
    info!(server_id, "stats connection closed");
}
