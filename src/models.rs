//! Core data types shared across the connection manager.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of the managed connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Error,
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Reconnecting => write!(f, "reconnecting"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// What the agent is currently doing, tracked independently of
/// [`ConnectionStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentMode {
    Idle,
    Listening,
    Speaking,
}

impl std::fmt::Display for AgentMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Listening => write!(f, "listening"),
            Self::Speaking => write!(f, "speaking"),
        }
    }
}

/// A short-lived, pre-authorized connection address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedCredential {
    pub signed_url: String,
    /// When the signed URL stops being accepted. `None` means the backend did
    /// not report an expiry and the URL is treated as non-expiring.
    pub expires_at: Option<DateTime<Utc>>,
}

impl SignedCredential {
    /// Whether the credential must not be used for a connect attempt anymore.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at <= now,
            None => false,
        }
    }
}

/// Who produced a conversational message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Agent,
}

/// A conversational message delivered over the realtime transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMessage {
    pub role: MessageRole,
    pub text: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn credential_without_expiry_never_expires() {
        let cred = SignedCredential {
            signed_url: "wss://example/session?token=abc".to_string(),
            expires_at: None,
        };
        assert!(!cred.is_expired(Utc::now() + Duration::days(365)));
    }

    #[test]
    fn credential_expiry_is_inclusive() {
        let now = Utc::now();
        let cred = SignedCredential {
            signed_url: "wss://example/session?token=abc".to_string(),
            expires_at: Some(now),
        };
        assert!(cred.is_expired(now));
        assert!(!cred.is_expired(now - Duration::seconds(1)));
    }
}
