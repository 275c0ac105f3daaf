//! WebSocket bridge between a map session and its embedded renderer.
//!
//! One connection is one renderer instance:
//! - Renderer/host sends `HostCommand`s (ready signal, filter, location, override)
//! - Session pushes `UPDATE_MARKERS` snapshots once the renderer is ready
//! - Unparseable frames are logged and skipped; the connection stays up

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use streaming::{Channel, ChannelError, Filter, HostCommand, MapMessage};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::session::{MapSession, SessionDeps};
use crate::AppState;

/// Serializes outbound messages onto the socket writer task.
pub struct WsTransport {
    tx: mpsc::UnboundedSender<String>,
}

impl WsTransport {
    pub fn new(tx: mpsc::UnboundedSender<String>) -> Self {
        Self { tx }
    }
}

impl Channel for WsTransport {
    fn send(&mut self, message: &MapMessage) -> Result<(), ChannelError> {
        let text =
            serde_json::to_string(message).map_err(|e| ChannelError::Encode(e.to_string()))?;
        self.tx.send(text).map_err(|_| ChannelError::Closed)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct WsParams {
    #[serde(default)]
    pub filter: Option<Filter>,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<WsParams>,
) -> Response {
    let deps = state.session_deps();
    let filter = params.filter.unwrap_or_default();
    ws.on_upgrade(move |socket| handle_ws_connection(socket, deps, filter))
}

/// Handle a WebSocket connection for one map renderer.
pub async fn handle_ws_connection(socket: WebSocket, deps: SessionDeps, filter: Filter) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
    let (cmd_tx, cmd_rx) = mpsc::channel::<HostCommand>(64);

    let session = MapSession::new(deps, WsTransport::new(out_tx), filter);
    let session_id = session.id().to_string();
    info!("WS session {session_id} connected");

    // Spawn socket writer task
    let sender_task = tokio::spawn(async move {
        while let Some(text) = out_rx.recv().await {
            if let Err(e) = ws_tx.send(Message::Text(text)).await {
                warn!("Failed to send message: {e}");
                break;
            }
        }
    });

    let session_task = tokio::spawn(session.run(cmd_rx));

    // Main message loop
    while let Some(msg) = ws_rx.next().await {
        let msg = match msg {
            Ok(m) => m,
            Err(e) => {
                warn!("WS receive error: {e}");
                break;
            }
        };

        match msg {
            Message::Text(text) => match parse_command(&text) {
                Some(cmd) => {
                    if cmd_tx.send(cmd).await.is_err() {
                        break;
                    }
                }
                None => continue,
            },
            Message::Binary(_) => {
                debug!("WS session {session_id} ignoring binary frame");
            }
            Message::Ping(_) | Message::Pong(_) => {}
            Message::Close(_) => {
                info!("WS session {session_id} closed by client");
                break;
            }
        }
    }

    drop(cmd_tx);
    let _ = session_task.await;
    let _ = sender_task.await;
    info!("WS session {session_id} disconnected");
}

fn parse_command(text: &str) -> Option<HostCommand> {
    match serde_json::from_str(text) {
        Ok(cmd) => Some(cmd),
        Err(e) => {
            warn!("ignoring malformed host command: {e}");
            None
        }
    }
}
