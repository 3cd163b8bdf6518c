use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use futures::{stream::SplitSink, SinkExt, StreamExt};
use serde::{Deserialize, Serialize};

use crate::protocol::{parse_inbound, Inbound, ServerMessage};
use crate::pty;
use crate::session::{Attachment, LaunchRequest, RegistryError, Session, SessionInfo};

use super::error::ApiError;
use super::AppState;

const DEFAULT_PROJECT_ID: &str = "default";

#[derive(Serialize)]
pub(super) struct HealthResponse {
    status: &'static str,
}

pub(super) async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

pub(super) async fn session_list(State(state): State<AppState>) -> Json<Vec<SessionInfo>> {
    Json(state.sessions.list())
}

pub(super) async fn session_kill(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let session = state
        .sessions
        .get(&id)
        .ok_or_else(|| ApiError::SessionNotFound(id.clone()))?;
    tracing::info!(session = %id, "kill requested over HTTP");
    session.kill();
    Ok(StatusCode::NO_CONTENT)
}

/// Query parameters of the viewer endpoint.
#[derive(Debug, Default, Deserialize)]
pub(super) struct ConnectParams {
    /// Project id.
    id: Option<String>,
    cwd: Option<String>,
    cmd: Option<String>,
    /// Session id to reattach to.
    attach: Option<String>,
}

pub(super) async fn ws_connect(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<ConnectParams>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_viewer(socket, state, params))
}

/// Reattach to `params.attach` if it names a live session, otherwise launch
/// a new one. A reattach target that dies between lookup and attach is
/// treated like an unknown id. Empty parameters count as absent.
async fn resolve_session(
    state: &AppState,
    params: ConnectParams,
) -> Result<(Session, Attachment), RegistryError> {
    if let Some(id) = params.attach.as_deref().filter(|id| !id.is_empty()) {
        match state.sessions.get(id) {
            Some(session) => match session.attach() {
                Ok(attachment) => return Ok((session, attachment)),
                Err(e) => {
                    tracing::debug!(session = %id, error = %e, "reattach lost race with exit");
                }
            },
            None => {
                tracing::info!(session = %id, "reattach target not found, starting new session");
            }
        }
    }

    let request = LaunchRequest {
        project_id: params
            .id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| DEFAULT_PROJECT_ID.to_string()),
        cwd: pty::resolve_cwd(params.cwd.as_deref()),
        command: params
            .cmd
            .filter(|cmd| !cmd.is_empty())
            .unwrap_or_else(|| state.default_command.clone()),
    };
    state.sessions.create_attached(request).await
}

type WsSink = SplitSink<WebSocket, Message>;

async fn send_json(ws_tx: &mut WsSink, msg: &ServerMessage) -> bool {
    ws_tx.send(Message::Text(msg.to_json().into())).await.is_ok()
}

async fn send_close(ws_tx: &mut WsSink, code: u16, reason: &'static str) {
    let close_frame = CloseFrame {
        code,
        reason: reason.into(),
    };
    let _ = ws_tx.send(Message::Close(Some(close_frame))).await;
    let _ = ws_tx.flush().await;
}

async fn handle_viewer(socket: WebSocket, state: AppState, params: ConnectParams) {
    // Register this connection for graceful shutdown tracking
    let (_guard, mut shutdown_rx) = state.shutdown.register();

    let (mut ws_tx, mut ws_rx) = socket.split();

    // `changed()` never fires for a connection that arrives after shutdown.
    if state.shutdown.is_shutting_down() {
        send_close(&mut ws_tx, close_code::NORMAL, "server shutting down").await;
        return;
    }

    let (session, attachment) = match resolve_session(&state, params).await {
        Ok(pair) => pair,
        Err(e) => {
            tracing::error!(error = %e, "failed to start session for viewer");
            let msg = ServerMessage::Error {
                text: e.to_string(),
            };
            send_json(&mut ws_tx, &msg).await;
            send_close(&mut ws_tx, close_code::ERROR, "session failed to start").await;
            return;
        }
    };
    let Attachment {
        viewer_id,
        rx: mut output_rx,
    } = attachment;

    // False once another viewer has taken over this session.
    let mut current = true;

    loop {
        tokio::select! {
            // Session -> WebSocket
            msg = output_rx.recv(), if current => {
                match msg {
                    Some(msg) => {
                        let exited = matches!(msg, ServerMessage::Exit { .. });
                        if !send_json(&mut ws_tx, &msg).await {
                            break;
                        }
                        if exited {
                            send_close(&mut ws_tx, close_code::NORMAL, "session exited").await;
                            break;
                        }
                    }
                    None => {
                        tracing::debug!(session = %session.id, viewer = viewer_id, "viewer superseded");
                        current = false;
                    }
                }
            }

            // A superseded viewer hears nothing more; close it once the
            // shell is gone.
            _ = session.closed(), if !current => {
                send_close(&mut ws_tx, close_code::NORMAL, "session exited").await;
                break;
            }

            // WebSocket -> session
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let result = match parse_inbound(text.as_str()) {
                            Inbound::Message(msg) => session.apply(msg).await,
                            Inbound::Raw(raw) => session.write_input(raw.into()).await,
                            Inbound::Ignored => Ok(()),
                        };
                        if let Err(e) = result {
                            tracing::debug!(session = %session.id, error = %e, "viewer message not applied");
                        }
                    }
                    Some(Ok(Message::Binary(data))) => {
                        if let Err(e) = session.write_input(data).await {
                            tracing::debug!(session = %session.id, error = %e, "viewer input not applied");
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue, // Ping/Pong handled automatically
                    Some(Err(_)) => break,
                }
            }

            // Shutdown signal
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    tracing::debug!(session = %session.id, "viewer received shutdown signal, closing");
                    send_close(&mut ws_tx, close_code::NORMAL, "server shutting down").await;
                    break;
                }
            }
        }
    }

    session.detach(viewer_id);
    // _guard is dropped here, decrementing active connection count
}
