//! The realtime transport capability.
//!
//! The connection manager depends only on this surface, never on a concrete
//! vendor SDK: a [`Transport`] opens a duplex channel from a signed URL and
//! hands back a [`TransportLink`] carrying a command sink and an event stream.
//! Production binds the WebSocket adapter in [`ws`]; tests bind a fake.

pub mod ws;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::SessionError;
use crate::models::{AgentMessage, AgentMode};

/// Everything a transport needs to open a channel.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Pre-authorized connection address.
    pub signed_url: String,
    pub agent_id: String,
    pub conversation_id: Option<String>,
}

/// Commands accepted by an open transport channel.
#[derive(Debug)]
pub enum TransportCommand {
    /// Deliver user text into the conversation.
    SendText(String),
    /// Application-level liveness probe.
    Ping,
    /// Close the channel gracefully.
    Close,
}

/// Events emitted by an open transport channel.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A conversational message (agent reply or user transcript).
    Message(AgentMessage),
    /// The agent changed between idle/listening/speaking.
    ModeChange(AgentMode),
    /// Acknowledgement of a liveness probe.
    Pong,
    /// A non-fatal transport-level error report.
    Error(String),
    /// The channel closed. Terminal for this link.
    Closed { reason: Option<String> },
}

/// A live duplex channel produced by a successful [`Transport::connect`].
///
/// The event receiver is moved into the session task; the command sender is
/// retained for the lifetime of the link.
pub struct TransportLink {
    /// Transport-assigned session identifier.
    pub session_id: String,
    /// Address of the live session, published during registration.
    pub session_url: String,
    pub commands: mpsc::Sender<TransportCommand>,
    pub events: mpsc::Receiver<TransportEvent>,
}

/// Capability to open realtime channels.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a channel using the signed URL. Resolves once the channel is
    /// established and ready for commands.
    async fn connect(&self, config: TransportConfig) -> Result<TransportLink, SessionError>;
}
