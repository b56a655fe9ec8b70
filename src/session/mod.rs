//! The public session surface.
//!
//! A [`VoiceSession`] is a handle to a background task that owns the entire
//! connection lifecycle: credential acquisition and renewal, transport
//! connect/reconnect with bounded backoff, heartbeat liveness, session
//! registration, and event fan-out. Exactly one live session exists per
//! handle; dropping the handle tears the session down.

mod actor;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{Instrument, info_span};

use crate::config::Config;
use crate::credentials::{CredentialProvider, HttpCredentialProvider};
use crate::error::SessionError;
use crate::events::{NullObserver, SessionObserver};
use crate::models::{AgentMode, ConnectionStatus, SignedCredential};
use crate::registrar::{HttpSessionRegistrar, SessionRegistrar};
use crate::transport::{Transport, ws::WsTransport};

use actor::{Command, Deps, SessionActor};

/// Media-capture permission gate, checked once per connect attempt.
///
/// Denial is terminal for that attempt only and does not consume the
/// reconnect budget.
#[async_trait]
pub trait PermissionGate: Send + Sync {
    async fn request_capture(&self) -> Result<(), SessionError>;
}

/// Gate for environments where capture permission is pre-authorized.
pub struct AlwaysGranted;

#[async_trait]
impl PermissionGate for AlwaysGranted {
    async fn request_capture(&self) -> Result<(), SessionError> {
        Ok(())
    }
}

/// Handle to a running voice session task.
pub struct VoiceSession {
    cmd_tx: mpsc::Sender<Command>,
    status_rx: watch::Receiver<ConnectionStatus>,
    mode_rx: watch::Receiver<AgentMode>,
    _task: JoinHandle<()>,
}

impl VoiceSession {
    pub fn builder(config: Config) -> VoiceSessionBuilder {
        VoiceSessionBuilder {
            config,
            transport: None,
            credentials: None,
            registrar: None,
            permission: None,
            observer: None,
        }
    }

    /// Install or replace the observer receiving session notifications.
    pub async fn configure(&self, observer: Arc<dyn SessionObserver>) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Configure { observer, reply })
            .await
            .map_err(|_| SessionError::SessionGone)?;
        rx.await.map_err(|_| SessionError::SessionGone)
    }

    /// Begin a session for `agent_id` and resolve once Connected.
    ///
    /// Fails fast with `InvalidState` while Connecting or Connected, and with
    /// `Config` when the voice feature is disabled. A pre-fetched credential
    /// may be supplied to skip the first fetch; it is renewed automatically
    /// when absent or expired.
    pub async fn start(
        &self,
        agent_id: impl Into<String>,
        conversation_id: Option<String>,
        credential: Option<SignedCredential>,
    ) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Start {
                agent_id: agent_id.into(),
                conversation_id,
                credential,
                reply,
            })
            .await
            .map_err(|_| SessionError::SessionGone)?;
        rx.await.map_err(|_| SessionError::SessionGone)?
    }

    /// Tear the session down. Idempotent; always lands in Disconnected.
    pub async fn end(&self) {
        let (reply, rx) = oneshot::channel();
        if self.cmd_tx.send(Command::End { reply }).await.is_ok() {
            let _ = rx.await;
        }
    }

    /// Deliver user text into the conversation. Requires Connected.
    pub async fn send_text(&self, text: impl Into<String>) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::SendText {
                text: text.into(),
                reply,
            })
            .await
            .map_err(|_| SessionError::SessionGone)?;
        rx.await.map_err(|_| SessionError::SessionGone)?
    }

    /// Force an immediate credential renewal. If the session is Connected the
    /// transport is cycled (close then reopen) once the new credential is in
    /// hand; there is no hot credential swap.
    pub async fn renew_credential(&self) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::RenewCredential { reply })
            .await
            .map_err(|_| SessionError::SessionGone)?;
        rx.await.map_err(|_| SessionError::SessionGone)?
    }

    /// Current connection status. Pure read, no side effects.
    pub fn status(&self) -> ConnectionStatus {
        *self.status_rx.borrow()
    }

    /// Current agent mode. Pure read, no side effects.
    pub fn mode(&self) -> AgentMode {
        *self.mode_rx.borrow()
    }
}

/// Assembles a [`VoiceSession`] with its collaborators.
///
/// Production uses the defaults (WebSocket transport, HTTP credential and
/// registration endpoints from [`Config`]); tests inject fakes.
pub struct VoiceSessionBuilder {
    config: Config,
    transport: Option<Arc<dyn Transport>>,
    credentials: Option<Arc<dyn CredentialProvider>>,
    registrar: Option<Arc<dyn SessionRegistrar>>,
    permission: Option<Arc<dyn PermissionGate>>,
    observer: Option<Arc<dyn SessionObserver>>,
}

impl VoiceSessionBuilder {
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn credentials(mut self, credentials: Arc<dyn CredentialProvider>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn registrar(mut self, registrar: Arc<dyn SessionRegistrar>) -> Self {
        self.registrar = Some(registrar);
        self
    }

    pub fn permission_gate(mut self, permission: Arc<dyn PermissionGate>) -> Self {
        self.permission = Some(permission);
        self
    }

    pub fn observer(mut self, observer: Arc<dyn SessionObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Spawn the session task and return its handle.
    pub fn build(self) -> VoiceSession {
        let deps = Deps {
            transport: self
                .transport
                .unwrap_or_else(|| Arc::new(WsTransport::new())),
            credentials: self.credentials.unwrap_or_else(|| {
                Arc::new(HttpCredentialProvider::new(self.config.credential_url.clone()))
            }),
            registrar: self.registrar.unwrap_or_else(|| {
                Arc::new(HttpSessionRegistrar::new(self.config.registration_url.clone()))
            }),
            permission: self.permission.unwrap_or_else(|| Arc::new(AlwaysGranted)),
        };
        let observer = self.observer.unwrap_or_else(|| Arc::new(NullObserver));

        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Disconnected);
        let (mode_tx, mode_rx) = watch::channel(AgentMode::Idle);

        let session_actor =
            SessionActor::new(self.config, deps, observer, status_tx, mode_tx, internal_tx);
        let task = tokio::spawn(
            session_actor
                .run(cmd_rx, internal_rx)
                .instrument(info_span!("voice_session")),
        );

        VoiceSession {
            cmd_tx,
            status_rx,
            mode_rx,
            _task: task,
        }
    }
}
