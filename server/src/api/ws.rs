//! Session gateway
//!
//! One WebSocket per browser tab. A client registers for a container, which
//! joins it to that container's room and attaches it to the shared terminal.
//! Frames are JSON text in both directions.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domain::types::{ClientMessage, ServerMessage};
use crate::error::{Error, Result};
use crate::AppState;

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Per-connection state
struct Connection {
    client_id: String,
    container_id: Option<String>,
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let client_id = Uuid::new_v4().to_string();
    info!("Gateway client {} connected", client_id);

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
    state.hub.register(&client_id, tx);

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(json) => json,
                Err(e) => {
                    error!("Failed to serialize message: {}", e);
                    continue;
                }
            };
            if ws_tx.send(Message::Text(json.into())).await.is_err() {
                debug!("WebSocket send failed, client disconnected");
                break;
            }
        }
    });

    let mut conn = Connection {
        client_id: client_id.clone(),
        container_id: None,
    };

    while let Some(result) = ws_rx.next().await {
        let text = match result {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                warn!("WebSocket error from {}: {}", client_id, e);
                break;
            }
        };

        match serde_json::from_str::<ClientMessage>(text.as_str()) {
            Ok(msg) => handle_client_message(msg, &mut conn, &state).await,
            Err(e) => {
                warn!("Failed to parse client message from {}: {}", client_id, e);
                state.hub.send_to(
                    &client_id,
                    ServerMessage::TerminalError {
                        message: format!("Invalid message: {}", e),
                    },
                );
            }
        }
    }

    if let Some(container_id) = conn.container_id.take() {
        state.terminal_service.detach(&container_id, &client_id).await;
    }
    state.hub.unregister(&client_id);
    send_task.abort();
    info!("Gateway client {} disconnected", client_id);
}

async fn handle_client_message(msg: ClientMessage, conn: &mut Connection, state: &AppState) {
    let client_id = conn.client_id.as_str();

    match msg {
        ClientMessage::Register { container_id } => {
            let container_id = match register_target(state, container_id).await {
                Ok(id) => id,
                Err(e) => {
                    error!("Failed to resolve register target for {}: {}", client_id, e);
                    state.hub.send_to(
                        client_id,
                        ServerMessage::TerminalError {
                            message: e.to_string(),
                        },
                    );
                    return;
                }
            };

            if let Some(previous) = conn.container_id.take() {
                if previous != container_id {
                    state.terminal_service.detach(&previous, client_id).await;
                    state.hub.leave(&previous, client_id);
                }
            }

            state.hub.join(&container_id, client_id);
            conn.container_id = Some(container_id.clone());
            state.hub.send_to(
                client_id,
                ServerMessage::Registered {
                    container_id: container_id.clone(),
                },
            );

            if let Err(e) = state.terminal_service.attach(&container_id, client_id).await {
                warn!(
                    "Failed to attach {} to terminal of {}: {}",
                    client_id, container_id, e
                );
                state.hub.send_to(
                    client_id,
                    ServerMessage::TerminalError {
                        message: e.to_string(),
                    },
                );
            }
        }

        ClientMessage::TerminalInput { data } => match conn.container_id.as_deref() {
            Some(container_id) => {
                if let Err(e) = state.terminal_service.input(container_id, &data).await {
                    warn!("Terminal input for {} failed: {}", container_id, e);
                    state.hub.send_to(
                        client_id,
                        ServerMessage::TerminalError {
                            message: e.to_string(),
                        },
                    );
                }
            }
            None => {
                state.hub.send_to(
                    client_id,
                    ServerMessage::TerminalError {
                        message: "Not registered to a container".to_string(),
                    },
                );
            }
        },

        ClientMessage::TerminalResize { rows, cols } => {
            if let Some(container_id) = conn.container_id.as_deref() {
                if let Err(e) = state.terminal_service.resize(container_id, rows, cols).await {
                    warn!("Terminal resize for {} failed: {}", container_id, e);
                }
            }
        }

        ClientMessage::GetInitialFilesystem { container_id } => {
            let msg = match state.file_service.initial_filesystem(&container_id).await {
                Ok(msg) => msg,
                Err(e) => {
                    warn!("Initial filesystem for {} failed: {}", container_id, e);
                    ServerMessage::FilesystemError {
                        container_id,
                        message: e.to_string(),
                    }
                }
            };
            state.hub.send_to(client_id, msg);
        }
    }
}

/// Full id of a register target. Ids the store does not know pass through.
async fn register_target(state: &AppState, container_id: String) -> Result<String> {
    match state.container_service.resolve_id(&container_id).await {
        Ok(id) => Ok(id),
        Err(Error::ContainerNotFound(_)) => Ok(container_id),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::testing::Harness;

    #[tokio::test]
    async fn test_register_target_resolves_prefix() {
        let h = Harness::new().await;
        let (_, container_id) = h.running_project().await;
        let state = h.app_state();

        let resolved = register_target(&state, container_id[..12].to_string())
            .await
            .unwrap();
        assert_eq!(resolved, container_id);

        let unknown = register_target(&state, "feedfacecafe".to_string())
            .await
            .unwrap();
        assert_eq!(unknown, "feedfacecafe");
    }

    #[tokio::test]
    async fn test_register_target_reports_store_failure() {
        let h = Harness::new().await;
        let state = h.app_state();
        h.pool.close().await;

        let result = register_target(&state, "feedfacecafe".to_string()).await;
        assert!(matches!(result, Err(Error::DatabaseError(_))));
    }
}
