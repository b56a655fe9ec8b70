//! voicelink — client-side connection manager for realtime voice-agent
//! sessions.
//!
//! The crate owns the full lifecycle of a single session against a
//! conversational-voice backend:
//!
//! - ephemeral signed-URL acquisition with bounded retry and proactive
//!   renewal ahead of expiry,
//! - connect/reconnect with jittered exponential backoff under a retry
//!   budget,
//! - heartbeat-based liveness detection over the open channel,
//! - out-of-band session registration so the backend can route asynchronous
//!   pushes to the live connection,
//! - agent-mode and message event fan-out through a typed observer.
//!
//! The realtime transport is a pluggable capability ([`transport::Transport`]);
//! production binds the WebSocket adapter, tests bind fakes. All mutable
//! session state is owned by a single background task reached through the
//! [`VoiceSession`] handle.
//!
//! ```no_run
//! use std::sync::Arc;
//! use voicelink::{Config, VoiceSession};
//!
//! # async fn demo() -> Result<(), voicelink::SessionError> {
//! let config = Config::from_env().expect("voicelink configuration");
//! let session = VoiceSession::builder(config).build();
//! session.start("agent-1", Some("conv-1".to_string()), None).await?;
//! session.send_text("hello there").await?;
//! session.end().await;
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod config;
pub mod credentials;
pub mod error;
pub mod events;
pub mod heartbeat;
pub mod models;
pub mod registrar;
pub mod session;
pub mod transport;

pub use config::Config;
pub use error::SessionError;
pub use events::SessionObserver;
pub use models::{AgentMessage, AgentMode, ConnectionStatus, MessageRole, SignedCredential};
pub use session::{AlwaysGranted, PermissionGate, VoiceSession, VoiceSessionBuilder};
