//! The connection state machine.
//!
//! A single task owns all mutable session state: the command loop below is the
//! only writer. Every async operation it launches (connect attempts, timers,
//! renewal fetches, registration calls, the transport event pump) runs in its
//! own task and reports back over the internal channel, tagged with the epoch
//! it was spawned under. The epoch bumps on every teardown boundary, so a
//! completion addressed to a superseded session is discarded instead of
//! resurrecting state.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::backoff::ReconnectSchedule;
use crate::config::Config;
use crate::credentials::{CredentialProvider, fetch_with_retry};
use crate::error::SessionError;
use crate::events::SessionObserver;
use crate::heartbeat::HeartbeatMonitor;
use crate::models::{AgentMode, ConnectionStatus, SignedCredential};
use crate::registrar::{RegistrationMetadata, RegistrationRequest, SessionRegistrar};
use crate::transport::{
    Transport, TransportCommand, TransportConfig, TransportEvent, TransportLink,
};

use super::PermissionGate;

/// Commands from the public handle.
pub(crate) enum Command {
    Configure {
        observer: Arc<dyn SessionObserver>,
        reply: oneshot::Sender<()>,
    },
    Start {
        agent_id: String,
        conversation_id: Option<String>,
        credential: Option<SignedCredential>,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    End {
        reply: oneshot::Sender<()>,
    },
    SendText {
        text: String,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    RenewCredential {
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
}

/// Collaborators injected into the session task.
pub(crate) struct Deps {
    pub transport: Arc<dyn Transport>,
    pub credentials: Arc<dyn CredentialProvider>,
    pub registrar: Arc<dyn SessionRegistrar>,
    pub permission: Arc<dyn PermissionGate>,
}

/// An epoch-tagged completion from spawned async work.
pub(crate) struct Internal {
    epoch: u64,
    kind: InternalKind,
}

enum InternalKind {
    ConnectOutcome(Result<ConnectSuccess, ConnectFailure>),
    FromTransport(TransportEvent),
    HeartbeatTick,
    HeartbeatTimeout,
    BackoffElapsed,
    RenewalDue,
    RenewalOutcome {
        result: Result<SignedCredential, SessionError>,
        forced: bool,
    },
    RegistrationOutcome(Result<(), SessionError>),
}

struct ConnectSuccess {
    link: TransportLink,
    credential: SignedCredential,
}

struct ConnectFailure {
    error: SessionError,
    permission_denied: bool,
}

/// The one live session. Created by `start`, destroyed by `end` or budget
/// exhaustion.
struct Session {
    agent_id: String,
    conversation_id: Option<String>,
    credential: Option<SignedCredential>,
    transport: Option<LiveTransport>,
    registered: bool,
}

/// The connected half of a transport link retained by the actor; the event
/// receiver lives in the pump task.
struct LiveTransport {
    session_id: String,
    session_url: String,
    commands: mpsc::Sender<TransportCommand>,
    pump: AbortHandle,
}

/// Every timer is tracked individually so each can be cancelled
/// deterministically. Clearing an empty slot is a no-op.
#[derive(Default)]
struct Timers {
    heartbeat_interval: Option<AbortHandle>,
    heartbeat_timeout: Option<AbortHandle>,
    /// Scheduled renewal, or an in-flight renewal fetch.
    renewal: Option<AbortHandle>,
    backoff: Option<AbortHandle>,
    /// In-flight connect attempt, which owns the connection timeout.
    connect: Option<AbortHandle>,
}

impl Timers {
    fn clear(slot: &mut Option<AbortHandle>) {
        if let Some(handle) = slot.take() {
            handle.abort();
        }
    }

    fn clear_heartbeat(&mut self) {
        Self::clear(&mut self.heartbeat_interval);
        Self::clear(&mut self.heartbeat_timeout);
    }

    fn clear_heartbeat_timeout(&mut self) {
        Self::clear(&mut self.heartbeat_timeout);
    }

    fn clear_renewal(&mut self) {
        Self::clear(&mut self.renewal);
    }

    fn clear_backoff(&mut self) {
        Self::clear(&mut self.backoff);
    }

    fn clear_connect(&mut self) {
        Self::clear(&mut self.connect);
    }

    fn clear_all(&mut self) {
        self.clear_heartbeat();
        self.clear_renewal();
        self.clear_backoff();
        self.clear_connect();
    }
}

pub(crate) struct SessionActor {
    config: Config,
    deps: Deps,
    observer: Arc<dyn SessionObserver>,
    status_tx: watch::Sender<ConnectionStatus>,
    mode_tx: watch::Sender<AgentMode>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    epoch: u64,
    session: Option<Session>,
    schedule: ReconnectSchedule,
    heartbeat: HeartbeatMonitor,
    timers: Timers,
    pending_start: Option<oneshot::Sender<Result<(), SessionError>>>,
    pending_renewal: Option<oneshot::Sender<Result<(), SessionError>>>,
}

impl SessionActor {
    pub(crate) fn new(
        config: Config,
        deps: Deps,
        observer: Arc<dyn SessionObserver>,
        status_tx: watch::Sender<ConnectionStatus>,
        mode_tx: watch::Sender<AgentMode>,
        internal_tx: mpsc::UnboundedSender<Internal>,
    ) -> Self {
        let schedule = ReconnectSchedule::from_config(&config);
        let heartbeat = HeartbeatMonitor::from_config(&config);
        Self {
            config,
            deps,
            observer,
            status_tx,
            mode_tx,
            internal_tx,
            epoch: 0,
            session: None,
            schedule,
            heartbeat,
            timers: Timers::default(),
            pending_start: None,
            pending_renewal: None,
        }
    }

    pub(crate) async fn run(
        mut self,
        mut cmd_rx: mpsc::Receiver<Command>,
        mut internal_rx: mpsc::UnboundedReceiver<Internal>,
    ) {
        loop {
            tokio::select! {
                command = cmd_rx.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => {
                        // Handle dropped: tear down like an explicit end.
                        self.do_end();
                        break;
                    }
                },
                Some(event) = internal_rx.recv() => {
                    if event.epoch == self.epoch {
                        self.handle_internal(event.kind);
                    } else {
                        debug!(
                            stale = event.epoch,
                            current = self.epoch,
                            "discarding completion from superseded session"
                        );
                    }
                }
            }
        }
    }

    // ── command handling ────────────────────────────────────────────────

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Configure { observer, reply } => {
                self.observer = observer;
                let _ = reply.send(());
            }
            Command::Start {
                agent_id,
                conversation_id,
                credential,
                reply,
            } => self.handle_start(agent_id, conversation_id, credential, reply),
            Command::End { reply } => {
                self.do_end();
                let _ = reply.send(());
            }
            Command::SendText { text, reply } => self.handle_send_text(text, reply),
            Command::RenewCredential { reply } => self.handle_renew(reply),
        }
    }

    fn handle_start(
        &mut self,
        agent_id: String,
        conversation_id: Option<String>,
        credential: Option<SignedCredential>,
        reply: oneshot::Sender<Result<(), SessionError>>,
    ) {
        if !self.config.enabled {
            let err = SessionError::Config("voice feature is disabled".to_string());
            self.observer.on_error(&err);
            let _ = reply.send(Err(err));
            return;
        }
        match self.status() {
            ConnectionStatus::Connecting | ConnectionStatus::Connected => {
                let err = SessionError::InvalidState(format!(
                    "start called while {}",
                    self.status()
                ));
                self.observer.on_error(&err);
                let _ = reply.send(Err(err));
            }
            _ => {
                info!(%agent_id, "starting voice session");
                // Supersede any pending backoff or stale completions from a
                // previous life of this handle.
                self.bump_epoch();
                self.timers.clear_all();
                self.close_transport();
                self.schedule.reset();
                self.heartbeat.reset();
                self.session = Some(Session {
                    agent_id,
                    conversation_id,
                    credential,
                    transport: None,
                    registered: false,
                });
                self.pending_start = Some(reply);
                self.set_status(ConnectionStatus::Connecting);
                self.spawn_connect_attempt();
            }
        }
    }

    fn handle_renew(&mut self, reply: oneshot::Sender<Result<(), SessionError>>) {
        if self.session.is_none() {
            let _ = reply.send(Err(SessionError::InvalidState(
                "no session to renew; call start first".to_string(),
            )));
            return;
        }
        if self.pending_renewal.is_some() {
            let _ = reply.send(Err(SessionError::InvalidState(
                "a renewal is already in progress".to_string(),
            )));
            return;
        }
        info!("forcing credential renewal");
        self.pending_renewal = Some(reply);
        self.spawn_renewal_fetch(true);
    }

    fn handle_send_text(
        &self,
        text: String,
        reply: oneshot::Sender<Result<(), SessionError>>,
    ) {
        let link = match self.status() {
            ConnectionStatus::Connected => {
                self.session.as_ref().and_then(|s| s.transport.as_ref())
            }
            _ => None,
        };
        let Some(link) = link else {
            debug!("send_text rejected: not connected");
            let _ = reply.send(Err(SessionError::NotConnected));
            return;
        };
        // Delivery awaits channel capacity off the actor loop; a congested
        // transport delays the caller instead of failing it. Only a closed
        // channel (link torn down mid-flight) rejects.
        let commands = link.commands.clone();
        tokio::spawn(async move {
            let result = commands
                .send(TransportCommand::SendText(text))
                .await
                .map_err(|_| SessionError::NotConnected);
            let _ = reply.send(result);
        });
    }

    /// Idempotent teardown. Fires the disconnect notification exactly once
    /// per previously-non-Disconnected call.
    fn do_end(&mut self) {
        let was_active = self.status() != ConnectionStatus::Disconnected;
        self.bump_epoch();
        self.timers.clear_all();
        self.close_transport();
        self.heartbeat.reset();
        self.session = None;
        if let Some(reply) = self.pending_start.take() {
            let _ = reply.send(Err(SessionError::InvalidState(
                "session ended during connect".to_string(),
            )));
        }
        if let Some(reply) = self.pending_renewal.take() {
            let _ = reply.send(Err(SessionError::InvalidState(
                "session ended during renewal".to_string(),
            )));
        }
        self.set_mode(AgentMode::Idle);
        self.set_status(ConnectionStatus::Disconnected);
        if was_active {
            info!("voice session ended");
            self.observer.on_disconnect();
        }
    }

    // ── internal event handling ─────────────────────────────────────────

    fn handle_internal(&mut self, kind: InternalKind) {
        match kind {
            InternalKind::ConnectOutcome(Ok(success)) => self.on_connect_success(success),
            InternalKind::ConnectOutcome(Err(failure)) => self.on_connect_failure(failure),
            InternalKind::FromTransport(event) => self.on_transport_event(event),
            InternalKind::HeartbeatTick => self.on_heartbeat_tick(),
            InternalKind::HeartbeatTimeout => {
                let err = SessionError::Connect(format!(
                    "no heartbeat acknowledgement within {:?}",
                    self.heartbeat.timeout()
                ));
                self.observer.on_error(&err);
                self.handle_connection_loss("heartbeat timeout");
            }
            InternalKind::BackoffElapsed => {
                self.timers.clear_backoff();
                self.spawn_connect_attempt();
            }
            InternalKind::RenewalDue => {
                debug!("scheduled credential renewal due");
                self.spawn_renewal_fetch(false);
            }
            InternalKind::RenewalOutcome { result, forced } => {
                self.on_renewal_outcome(result, forced)
            }
            InternalKind::RegistrationOutcome(result) => match result {
                Ok(()) => {
                    if let Some(session) = &mut self.session {
                        session.registered = true;
                    }
                    debug!("session registered for callback routing");
                }
                Err(error) => {
                    // Non-fatal: dependent integrations may be degraded, but
                    // the connection itself is fine.
                    warn!(%error, "session registration failed");
                    self.observer.on_error(&error);
                }
            },
        }
    }

    fn on_connect_success(&mut self, success: ConnectSuccess) {
        self.timers.clear_connect();
        let TransportLink {
            session_id,
            session_url,
            commands,
            events,
        } = success.link;
        let pump = self.spawn_event_pump(events);

        let Some(session) = &mut self.session else {
            // Cannot happen with a matching epoch, but never let a link leak.
            pump.abort();
            return;
        };
        session.credential = Some(success.credential);
        session.registered = false;
        session.transport = Some(LiveTransport {
            session_id: session_id.clone(),
            session_url,
            commands,
            pump,
        });

        info!(%session_id, attempts = self.schedule.attempts(), "voice session connected");
        self.schedule.reset();
        self.set_status(ConnectionStatus::Connected);
        self.observer.on_connect(&session_id);
        if let Some(reply) = self.pending_start.take() {
            let _ = reply.send(Ok(()));
        }

        self.heartbeat.reset();
        self.arm_heartbeat_interval();
        self.schedule_renewal();
        self.spawn_registration();
    }

    fn on_connect_failure(&mut self, failure: ConnectFailure) {
        self.timers.clear_connect();
        warn!(error = %failure.error, "connect attempt failed");
        if self.pending_start.is_some() {
            // The initiating call gets the classified error; the session is
            // terminal until a fresh start.
            self.enter_error(failure.error);
        } else {
            self.observer.on_error(&failure.error);
            self.schedule_retry(failure.permission_denied);
        }
    }

    fn on_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Message(message) => self.observer.on_message(&message),
            TransportEvent::ModeChange(mode) => self.set_mode(mode),
            TransportEvent::Pong => {
                if self.heartbeat.ack_received() {
                    self.timers.clear_heartbeat_timeout();
                }
            }
            TransportEvent::Error(message) => {
                self.observer.on_error(&SessionError::Connect(message));
            }
            TransportEvent::Closed { reason } => {
                if self.status() == ConnectionStatus::Connected {
                    self.handle_connection_loss(
                        reason.as_deref().unwrap_or("transport closed"),
                    );
                }
            }
        }
    }

    fn on_heartbeat_tick(&mut self) {
        if self.status() != ConnectionStatus::Connected {
            return;
        }
        let Some(link) = self.session.as_ref().and_then(|s| s.transport.as_ref()) else {
            return;
        };
        match link.commands.try_send(TransportCommand::Ping) {
            Ok(()) => {
                if self.heartbeat.probe_sent() {
                    let handle =
                        self.arm_timer(self.heartbeat.timeout(), InternalKind::HeartbeatTimeout);
                    self.timers.heartbeat_timeout = Some(handle);
                }
            }
            Err(_) => self.handle_connection_loss("transport command channel closed"),
        }
    }

    fn on_renewal_outcome(
        &mut self,
        result: Result<SignedCredential, SessionError>,
        forced: bool,
    ) {
        self.timers.clear_renewal();
        match result {
            Ok(credential) => {
                info!(expires_at = ?credential.expires_at, "credential renewed");
                if let Some(session) = &mut self.session {
                    session.credential = Some(credential);
                }
                if let Some(reply) = self.pending_renewal.take() {
                    let _ = reply.send(Ok(()));
                }
                if self.status() == ConnectionStatus::Connected {
                    // The transport cannot swap credentials on a live channel;
                    // a fresh handshake is required even at the cost of a
                    // brief gap.
                    info!("cycling transport onto the renewed credential");
                    self.begin_renewal_reconnect();
                } else {
                    self.schedule_renewal();
                }
            }
            Err(error) => {
                warn!(%error, "credential renewal failed");
                self.observer.on_error(&error);
                if let Some(reply) = self.pending_renewal.take() {
                    let _ = reply.send(Err(error));
                }
                if !forced && self.status() == ConnectionStatus::Connected {
                    // The credential is about to lapse and cannot be replaced;
                    // drop it and go through the reconnect path, which fetches
                    // fresh credentials under the retry budget.
                    if let Some(session) = &mut self.session {
                        session.credential = None;
                    }
                    self.handle_connection_loss("credential renewal failed");
                }
            }
        }
    }

    // ── transitions ─────────────────────────────────────────────────────

    /// Connected → Reconnecting after a transport close or heartbeat timeout.
    fn handle_connection_loss(&mut self, reason: &str) {
        warn!(reason, "connection lost; entering reconnect");
        self.bump_epoch();
        self.timers.clear_all();
        self.close_transport();
        self.heartbeat.reset();
        self.set_mode(AgentMode::Idle);
        self.schedule_retry(false);
    }

    /// Close-then-reopen on a credential renewed while Connected. Exactly one
    /// transport close followed by exactly one open, with no backoff delay
    /// and no budget consumed.
    fn begin_renewal_reconnect(&mut self) {
        self.bump_epoch();
        self.timers.clear_all();
        self.close_transport();
        self.heartbeat.reset();
        self.set_mode(AgentMode::Idle);
        self.set_status(ConnectionStatus::Reconnecting);
        self.schedule_renewal();
        self.spawn_connect_attempt();
    }

    fn schedule_retry(&mut self, refund_attempt: bool) {
        if refund_attempt {
            // Permission denials are terminal per attempt but must not eat
            // the budget.
            self.schedule.refund();
        }
        match self.schedule.next_delay() {
            Some(delay) => {
                self.set_status(ConnectionStatus::Reconnecting);
                info!(attempt = self.schedule.attempts(), ?delay, "scheduling reconnect");
                let handle = self.arm_timer(delay, InternalKind::BackoffElapsed);
                self.timers.backoff = Some(handle);
            }
            None => {
                let err = SessionError::RetryBudgetExceeded {
                    attempts: self.schedule.attempts(),
                };
                error!(%err, "reconnect budget exhausted");
                self.enter_error(err);
            }
        }
    }

    /// Terminal failure: everything torn down, status Error, and only an
    /// explicit new `start` leaves this state.
    fn enter_error(&mut self, error: SessionError) {
        self.bump_epoch();
        self.timers.clear_all();
        self.close_transport();
        self.heartbeat.reset();
        if let Some(session) = &mut self.session {
            // Keep the identifiers for diagnostics; drop everything live.
            session.credential = None;
            session.registered = false;
        }
        self.set_mode(AgentMode::Idle);
        self.observer.on_error(&error);
        if let Some(reply) = self.pending_start.take() {
            let _ = reply.send(Err(error.clone()));
        }
        if let Some(reply) = self.pending_renewal.take() {
            let _ = reply.send(Err(error));
        }
        self.set_status(ConnectionStatus::Error);
    }

    fn close_transport(&mut self) {
        if let Some(session) = &mut self.session {
            if let Some(link) = session.transport.take() {
                let _ = link.commands.try_send(TransportCommand::Close);
                link.pump.abort();
            }
            session.registered = false;
        }
    }

    fn set_status(&self, status: ConnectionStatus) {
        let previous = *self.status_tx.borrow();
        if previous != status {
            info!(from = %previous, to = %status, "connection status changed");
            self.status_tx.send_replace(status);
            self.observer.on_status_change(status);
        }
    }

    fn set_mode(&self, mode: AgentMode) {
        let previous = *self.mode_tx.borrow();
        if previous != mode {
            debug!(from = %previous, to = %mode, "agent mode changed");
            self.mode_tx.send_replace(mode);
            self.observer.on_mode_change(mode);
        }
    }

    fn status(&self) -> ConnectionStatus {
        *self.status_tx.borrow()
    }

    fn bump_epoch(&mut self) {
        self.epoch += 1;
    }

    // ── spawned work ────────────────────────────────────────────────────

    fn arm_timer(&self, delay: Duration, kind: InternalKind) -> AbortHandle {
        let tx = self.internal_tx.clone();
        let epoch = self.epoch;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(Internal { epoch, kind });
        })
        .abort_handle()
    }

    fn arm_heartbeat_interval(&mut self) {
        let tx = self.internal_tx.clone();
        let epoch = self.epoch;
        let interval = self.heartbeat.interval();
        let handle = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);
            loop {
                ticker.tick().await;
                if tx
                    .send(Internal {
                        epoch,
                        kind: InternalKind::HeartbeatTick,
                    })
                    .is_err()
                {
                    return;
                }
            }
        })
        .abort_handle();
        self.timers.heartbeat_interval = Some(handle);
    }

    fn spawn_connect_attempt(&mut self) {
        let Some(session) = &self.session else {
            return;
        };
        let epoch = self.epoch;
        let tx = self.internal_tx.clone();
        let transport = self.deps.transport.clone();
        let credentials = self.deps.credentials.clone();
        let permission = self.deps.permission.clone();
        let config = self.config.clone();
        let agent_id = session.agent_id.clone();
        let conversation_id = session.conversation_id.clone();
        let credential = session.credential.clone();

        let handle = tokio::spawn(async move {
            let outcome = run_connect_attempt(
                transport,
                credentials,
                permission,
                config,
                agent_id,
                conversation_id,
                credential,
            )
            .await;
            let _ = tx.send(Internal {
                epoch,
                kind: InternalKind::ConnectOutcome(outcome),
            });
        })
        .abort_handle();
        self.timers.connect = Some(handle);
    }

    fn spawn_event_pump(&self, mut events: mpsc::Receiver<TransportEvent>) -> AbortHandle {
        let tx = self.internal_tx.clone();
        let epoch = self.epoch;
        tokio::spawn(async move {
            let mut saw_close = false;
            while let Some(event) = events.recv().await {
                saw_close = matches!(event, TransportEvent::Closed { .. });
                if tx
                    .send(Internal {
                        epoch,
                        kind: InternalKind::FromTransport(event),
                    })
                    .is_err()
                    || saw_close
                {
                    break;
                }
            }
            if !saw_close {
                // Sender side vanished without a close frame; treat it as one.
                let _ = tx.send(Internal {
                    epoch,
                    kind: InternalKind::FromTransport(TransportEvent::Closed { reason: None }),
                });
            }
        })
        .abort_handle()
    }

    fn spawn_renewal_fetch(&mut self, forced: bool) {
        let Some(session) = &self.session else {
            return;
        };
        let agent_id = session.agent_id.clone();
        let credentials = self.deps.credentials.clone();
        let attempts = self.config.credential_attempts;
        let delay = self.config.credential_retry_delay;
        let tx = self.internal_tx.clone();
        let epoch = self.epoch;

        self.timers.clear_renewal();
        let handle = tokio::spawn(async move {
            let result = fetch_with_retry(credentials.as_ref(), &agent_id, attempts, delay).await;
            let _ = tx.send(Internal {
                epoch,
                kind: InternalKind::RenewalOutcome { result, forced },
            });
        })
        .abort_handle();
        self.timers.renewal = Some(handle);
    }

    fn schedule_renewal(&mut self) {
        self.timers.clear_renewal();
        let Some(expires_at) = self
            .session
            .as_ref()
            .and_then(|s| s.credential.as_ref())
            .and_then(|c| c.expires_at)
        else {
            return;
        };
        let until_expiry = (expires_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        let delay = until_expiry.saturating_sub(self.config.renewal_lead);
        debug!(?delay, "scheduling background credential renewal");
        let handle = self.arm_timer(delay, InternalKind::RenewalDue);
        self.timers.renewal = Some(handle);
    }

    /// Fire-and-forget: the outcome is epoch-tagged, so a result landing
    /// after a teardown is discarded.
    fn spawn_registration(&self) {
        let Some(session) = &self.session else {
            return;
        };
        let Some(link) = &session.transport else {
            return;
        };
        let request = RegistrationRequest {
            session_url: link.session_url.clone(),
            session_id: link.session_id.clone(),
            metadata: RegistrationMetadata {
                agent_id: session.agent_id.clone(),
                conversation_id: session.conversation_id.clone(),
                client_ref: Uuid::new_v4(),
            },
        };
        let registrar = self.deps.registrar.clone();
        let tx = self.internal_tx.clone();
        let epoch = self.epoch;
        tokio::spawn(async move {
            let result = registrar.register(&request).await;
            let _ = tx.send(Internal {
                epoch,
                kind: InternalKind::RegistrationOutcome(result),
            });
        });
    }
}

/// One full connect attempt: permission gate, credential (renewed if absent
/// or expired), then the transport handshake under the connection timeout.
async fn run_connect_attempt(
    transport: Arc<dyn Transport>,
    credentials: Arc<dyn CredentialProvider>,
    permission: Arc<dyn PermissionGate>,
    config: Config,
    agent_id: String,
    conversation_id: Option<String>,
    credential: Option<SignedCredential>,
) -> Result<ConnectSuccess, ConnectFailure> {
    if let Err(error) = permission.request_capture().await {
        return Err(ConnectFailure {
            error,
            permission_denied: true,
        });
    }

    let credential = match credential.filter(|c| !c.is_expired(Utc::now())) {
        Some(credential) => credential,
        None => fetch_with_retry(
            credentials.as_ref(),
            &agent_id,
            config.credential_attempts,
            config.credential_retry_delay,
        )
        .await
        .map_err(|error| ConnectFailure {
            error,
            permission_denied: false,
        })?,
    };

    let connect = transport.connect(TransportConfig {
        signed_url: credential.signed_url.clone(),
        agent_id,
        conversation_id,
    });
    let link = match tokio::time::timeout(config.connect_timeout, connect).await {
        Ok(Ok(link)) => link,
        Ok(Err(error)) => {
            return Err(ConnectFailure {
                error,
                permission_denied: false,
            });
        }
        Err(_) => {
            return Err(ConnectFailure {
                error: SessionError::Connect(format!(
                    "transport handshake timed out after {:?}",
                    config.connect_timeout
                )),
                permission_denied: false,
            });
        }
    };

    Ok(ConnectSuccess { link, credential })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn clearing_timers_twice_is_safe() {
        let mut timers = Timers::default();
        timers.backoff = Some(tokio::spawn(async {}).abort_handle());
        timers.clear_backoff();
        timers.clear_backoff();
        timers.clear_all();
        timers.clear_all();
        assert!(timers.backoff.is_none());
    }
}
