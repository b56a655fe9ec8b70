//! The error taxonomy for voice session management.

use thiserror::Error;

/// Classified failures surfaced by the connection manager.
///
/// `Registration` is non-fatal: it never changes the connection status, it is
/// only reported to the error observer. `RetryBudgetExceeded` is terminal: the
/// session lands in [`ConnectionStatus::Error`] and requires a fresh `start`.
///
/// [`ConnectionStatus::Error`]: crate::models::ConnectionStatus::Error
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    /// The voice feature is disabled, or the configuration is unusable.
    #[error("voice configuration error: {0}")]
    Config(String),

    /// The requested operation is not valid in the current connection state.
    #[error("invalid session state: {0}")]
    InvalidState(String),

    /// Opening the realtime transport failed.
    #[error("connection failed: {0}")]
    Connect(String),

    /// Media capture permission was denied for this connect attempt.
    #[error("media permission denied: {0}")]
    Permission(String),

    /// Acquiring or renewing the signed URL failed.
    #[error("credential acquisition failed: {0}")]
    Token(String),

    /// Registering the live session for callback routing failed (non-fatal).
    #[error("session registration failed: {0}")]
    Registration(String),

    /// All reconnect attempts were consumed without reaching Connected.
    #[error("reconnect budget exhausted after {attempts} attempts")]
    RetryBudgetExceeded { attempts: u32 },

    /// The operation requires a live, connected transport.
    #[error("not connected")]
    NotConnected,

    /// The session task is no longer running.
    #[error("session task is gone")]
    SessionGone,
}
