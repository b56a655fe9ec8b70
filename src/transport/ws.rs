//! WebSocket transport adapter over `tokio-tungstenite`.
//!
//! Connects to the signed URL, performs a small JSON handshake (`session_init`
//! out, `ready` back), then pumps frames between the wire and the
//! [`TransportEvent`]/[`TransportCommand`] surface in a background task.

use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message as WsMessage};
use tracing::{debug, info, warn};

use super::{Transport, TransportCommand, TransportConfig, TransportEvent, TransportLink};
use crate::error::SessionError;
use crate::models::{AgentMessage, AgentMode, MessageRole};

/// Frames sent to the voice backend.
#[derive(Serialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientFrame {
    /// Announces the session. Must be the first frame.
    SessionInit {
        agent_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        conversation_id: Option<String>,
    },
    /// User text delivered into the conversation.
    UserText { text: String },
    /// Application-level liveness probe.
    Ping,
}

/// Frames received from the voice backend.
#[derive(Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerFrame {
    /// Handshake acknowledgement carrying the session address.
    Ready {
        session_id: String,
        session_url: Option<String>,
    },
    /// A message from the agent.
    AgentMessage { text: String },
    /// Finalized transcript of what the user said.
    UserTranscript { text: String },
    /// The agent's current mode.
    AgentMode { mode: AgentMode },
    /// Liveness probe acknowledgement.
    Pong,
    /// Backend-reported error.
    Error { message: String },
}

/// Production [`Transport`] implementation.
pub struct WsTransport;

impl WsTransport {
    pub fn new() -> Self {
        Self
    }
}

impl Default for WsTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Transport for WsTransport {
    async fn connect(&self, config: TransportConfig) -> Result<TransportLink, SessionError> {
        let (ws_stream, _) = connect_async(config.signed_url.as_str())
            .await
            .map_err(|e| SessionError::Connect(format!("websocket handshake failed: {e}")))?;
        let (mut sink, mut stream) = ws_stream.split();

        let init = ClientFrame::SessionInit {
            agent_id: config.agent_id.clone(),
            conversation_id: config.conversation_id.clone(),
        };
        let serialized = serde_json::to_string(&init)
            .map_err(|e| SessionError::Connect(format!("failed to encode session_init: {e}")))?;
        sink.send(WsMessage::Text(serialized.into()))
            .await
            .map_err(|e| SessionError::Connect(format!("failed to send session_init: {e}")))?;

        // The backend must answer with a ready frame before anything else is
        // considered part of the session.
        let (session_id, session_url) = loop {
            match stream.next().await {
                Some(Ok(WsMessage::Text(text))) => match serde_json::from_str::<ServerFrame>(&text)
                {
                    Ok(ServerFrame::Ready {
                        session_id,
                        session_url,
                    }) => break (session_id, session_url),
                    Ok(ServerFrame::Error { message }) => {
                        return Err(SessionError::Connect(format!(
                            "backend rejected session: {message}"
                        )));
                    }
                    Ok(other) => {
                        debug!(?other, "ignoring pre-ready frame");
                    }
                    Err(e) => {
                        warn!(error = %e, "unparseable frame during handshake");
                    }
                },
                Some(Ok(WsMessage::Close(frame))) => {
                    return Err(SessionError::Connect(format!(
                        "backend closed during handshake: {frame:?}"
                    )));
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    return Err(SessionError::Connect(format!("handshake read failed: {e}")));
                }
                None => {
                    return Err(SessionError::Connect(
                        "backend hung up during handshake".to_string(),
                    ));
                }
            }
        };
        info!(%session_id, "realtime channel established");

        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let (event_tx, event_rx) = mpsc::channel(256);
        tokio::spawn(pump(sink, stream, cmd_rx, event_tx));

        Ok(TransportLink {
            session_url: session_url.unwrap_or_else(|| config.signed_url.clone()),
            session_id,
            commands: cmd_tx,
            events: event_rx,
        })
    }
}

type WsSink = futures_util::stream::SplitSink<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    WsMessage,
>;
type WsStream = futures_util::stream::SplitStream<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
>;

/// Bridges the wire and the channel surface until either side closes.
async fn pump(
    mut sink: WsSink,
    mut stream: WsStream,
    mut cmd_rx: mpsc::Receiver<TransportCommand>,
    event_tx: mpsc::Sender<TransportEvent>,
) {
    loop {
        tokio::select! {
            command = cmd_rx.recv() => {
                let frame = match command {
                    Some(TransportCommand::SendText(text)) => ClientFrame::UserText { text },
                    Some(TransportCommand::Ping) => ClientFrame::Ping,
                    Some(TransportCommand::Close) | None => {
                        let _ = sink.send(WsMessage::Close(None)).await;
                        debug!("transport closed by session");
                        return;
                    }
                };
                let serialized = match serde_json::to_string(&frame) {
                    Ok(s) => s,
                    Err(e) => {
                        warn!(error = %e, "failed to encode client frame");
                        continue;
                    }
                };
                if let Err(e) = sink.send(WsMessage::Text(serialized.into())).await {
                    warn!(error = %e, "websocket send failed");
                    let _ = event_tx
                        .send(TransportEvent::Closed { reason: Some(e.to_string()) })
                        .await;
                    return;
                }
            }
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(WsMessage::Text(text))) => {
                        match serde_json::from_str::<ServerFrame>(&text) {
                            Ok(frame) => {
                                if let Some(event) = translate(frame) {
                                    if event_tx.send(event).await.is_err() {
                                        return;
                                    }
                                }
                            }
                            Err(e) => warn!(error = %e, "unparseable server frame"),
                        }
                    }
                    Some(Ok(WsMessage::Close(frame))) => {
                        let reason = frame.map(|f| f.reason.to_string());
                        let _ = event_tx.send(TransportEvent::Closed { reason }).await;
                        return;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        let _ = event_tx
                            .send(TransportEvent::Closed { reason: Some(e.to_string()) })
                            .await;
                        return;
                    }
                    None => {
                        let _ = event_tx.send(TransportEvent::Closed { reason: None }).await;
                        return;
                    }
                }
            }
        }
    }
}

fn translate(frame: ServerFrame) -> Option<TransportEvent> {
    match frame {
        ServerFrame::AgentMessage { text } => Some(TransportEvent::Message(AgentMessage {
            role: MessageRole::Agent,
            text,
        })),
        ServerFrame::UserTranscript { text } => Some(TransportEvent::Message(AgentMessage {
            role: MessageRole::User,
            text,
        })),
        ServerFrame::AgentMode { mode } => Some(TransportEvent::ModeChange(mode)),
        ServerFrame::Pong => Some(TransportEvent::Pong),
        ServerFrame::Error { message } => Some(TransportEvent::Error(message)),
        // A ready frame after the handshake carries nothing new.
        ServerFrame::Ready { .. } => None,
    }
}
