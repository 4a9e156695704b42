//! WebSocket upgrade and per-connection session loop.

use std::net::SocketAddr;

use axum::{
    extract::{
        ConnectInfo, State, WebSocketUpgrade,
        ws::{CloseFrame, Message, WebSocket, close_code},
    },
    http::{HeaderMap, Uri, header},
    response::Response,
};
use cnc_protocol::{
    ClientMessage, DataPayload, RuleDeletePayload, RuleInsertPayload, SubscribePayload,
};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::api::AppState;
use crate::hub::{HubError, HubHandle, Outbound, Role, SessionId, SessionRegistration};

/// Longest message prefix echoed into debug logs.
const LOG_PREVIEW_CHARS: usize = 64;

/// WebSocket upgrade handler.
///
/// GET /ws, /ws/ui, /ws/grafana-agent
pub async fn ws_handler(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    let id = SessionId::new();
    let role = Role::from_path(uri.path());
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let span = info_span!("session", %id, %role, %remote, user_agent);
    ws.on_upgrade(move |socket| {
        let (outbound, queue) = mpsc::channel(state.outbound_buffer);
        let session = ClientSession {
            id,
            role,
            hub: state.hub,
            outbound,
            shutdown: state.shutdown,
        };
        session.run(socket, queue).instrument(span)
    })
}

/// Reader side of one connection.
struct ClientSession {
    id: SessionId,
    role: Role,
    hub: HubHandle,
    outbound: Outbound,
    shutdown: CancellationToken,
}

impl ClientSession {
    async fn run(self, socket: WebSocket, queue: mpsc::Receiver<String>) {
        info!("connection opened");
        let (sink, mut stream) = socket.split();
        let mut writer = tokio::spawn(write_pump(sink, queue).in_current_span());

        let mut writer_done = false;
        if let Err(err) = self.hub.register(self.registration(Vec::new())).await {
            warn!(error = %err, "could not register session");
        } else {
            loop {
                tokio::select! {
                    frame = stream.next() => match frame {
                        Some(Ok(Message::Text(text))) => {
                            if let Err(err) = self.dispatch(text.as_str()).await {
                                warn!(error = %err, "hub unavailable");
                                break;
                            }
                        }
                        Some(Ok(Message::Binary(_))) => debug!("ignoring binary frame"),
                        Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                        Some(Ok(Message::Close(frame))) => {
                            log_close(frame.as_ref());
                            break;
                        }
                        Some(Err(err)) => {
                            // Peer vanished without a close handshake (1006).
                            debug!(error = %err, "connection lost");
                            break;
                        }
                        None => {
                            debug!("peer disconnected");
                            break;
                        }
                    },
                    _ = self.shutdown.cancelled() => {
                        debug!("server shutting down");
                        break;
                    }
                    _ = &mut writer => {
                        writer_done = true;
                        debug!("writer stopped");
                        break;
                    }
                }
            }
        }

        // Fails only once the hub has already stopped.
        if let Err(err) = self.hub.unregister(self.id).await {
            debug!(error = %err, "could not unregister session");
        }
        // The hub's copy of the sender is gone after unregister; dropping ours
        // closes the queue and lets the writer send its close frame.
        drop(self);
        if !writer_done {
            let _ = writer.await;
        }
        info!("connection closed");
    }

    fn registration(&self, topics: Vec<String>) -> SessionRegistration {
        SessionRegistration {
            id: self.id,
            role: self.role,
            topics,
            outbound: self.outbound.clone(),
        }
    }

    /// Decode one text frame and forward it to the hub.
    ///
    /// Malformed or disallowed messages are logged and dropped; only a hub
    /// that stopped running is an error.
    async fn dispatch(&self, text: &str) -> Result<(), HubError> {
        let message = match ClientMessage::from_json(text) {
            Ok(message) => message,
            Err(err) => {
                warn!(error = %err, message = preview(text), "malformed message");
                return Ok(());
            }
        };
        debug!(kind = message.kind(), "received message");

        match message {
            ClientMessage::Subscribe(SubscribePayload { topics }) => {
                self.hub.register(self.registration(topics)).await
            }
            ClientMessage::Data(DataPayload { rules, agents }) => {
                if !self.role.is_agent() {
                    warn!("ui sessions may not report agents");
                    return Ok(());
                }
                if !rules.is_empty() {
                    debug!(count = rules.len(), "ignoring rules in agent report");
                }
                for agent in agents {
                    if agent.name.is_empty() {
                        warn!("ignoring agent report without a name");
                        continue;
                    }
                    self.hub.report_agent(agent).await?;
                }
                Ok(())
            }
            ClientMessage::RuleInsert(RuleInsertPayload { rule, after }) => {
                if self.role.is_agent() {
                    warn!("agents may not insert rules");
                    return Ok(());
                }
                self.hub.insert_rule(rule, after).await
            }
            ClientMessage::RuleDelete(RuleDeletePayload { id }) => {
                if self.role.is_agent() {
                    warn!("agents may not delete rules");
                    return Ok(());
                }
                let Some(id) = id else {
                    warn!("rule.delete without an id");
                    return Ok(());
                };
                self.hub.delete_rule(id).await
            }
        }
    }
}

/// Drain the outbound queue onto the socket until either side closes.
async fn write_pump(
    mut sink: SplitSink<WebSocket, Message>,
    mut queue: mpsc::Receiver<String>,
) {
    while let Some(text) = queue.recv().await {
        debug!(message = preview(&text), "sending");
        if let Err(err) = sink.send(Message::Text(text.into())).await {
            debug!(error = %err, "write failed");
            return;
        }
    }

    let frame = CloseFrame {
        code: close_code::NORMAL,
        reason: "".into(),
    };
    let _ = sink.send(Message::Close(Some(frame))).await;
}

fn log_close(frame: Option<&CloseFrame>) {
    match frame {
        None => debug!("peer closed connection"),
        Some(frame) if is_expected_close(frame.code) => {
            debug!(code = frame.code, reason = frame.reason.as_str(), "peer closed connection");
        }
        Some(frame) => {
            warn!(code = frame.code, reason = frame.reason.as_str(), "peer closed connection unexpectedly");
        }
    }
}

fn is_expected_close(code: u16) -> bool {
    matches!(
        code,
        close_code::NORMAL | close_code::AWAY | close_code::ABNORMAL
    )
}

fn preview(text: &str) -> &str {
    match text.char_indices().nth(LOG_PREVIEW_CHARS) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}
