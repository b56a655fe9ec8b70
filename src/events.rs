//! Observer surface for session notifications.
//!
//! The state machine fans out lifecycle and conversational events through a
//! [`SessionObserver`]. Callbacks are invoked from the session task in the
//! exact order the transitions occurred; implementations must be cheap and
//! non-blocking (hand off to a channel if real work is needed).

use crate::error::SessionError;
use crate::models::{AgentMessage, AgentMode, ConnectionStatus};

/// Typed listener interface for session events.
///
/// All methods have no-op defaults so callers only implement what they need.
pub trait SessionObserver: Send + Sync {
    /// The connection status changed. Fired for every transition, in order.
    fn on_status_change(&self, _status: ConnectionStatus) {}

    /// A transport session reached Connected. Carries the transport session id.
    fn on_connect(&self, _session_id: &str) {}

    /// The session left a non-Disconnected state via `end()`. Fired exactly
    /// once per teardown.
    fn on_disconnect(&self) {}

    /// The agent mode changed. No-op transitions are suppressed.
    fn on_mode_change(&self, _mode: AgentMode) {}

    /// A conversational message arrived over the transport.
    fn on_message(&self, _message: &AgentMessage) {}

    /// A classified error occurred. Non-fatal errors (registration, scheduled
    /// renewal) arrive here without any status change.
    fn on_error(&self, _error: &SessionError) {}
}

/// Observer used until `configure` installs a real one.
pub(crate) struct NullObserver;

impl SessionObserver for NullObserver {}
