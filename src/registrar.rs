//! Session registration for backend callback routing.
//!
//! After every successful Connected transition the live session address is
//! published to a callback-routing endpoint so the backend can push
//! asynchronous events at it. Registration failure never changes the
//! connection status; it is only reported to the error observer.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SessionError;

/// Payload published to the callback-routing service.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationRequest {
    pub session_url: String,
    pub session_id: String,
    pub metadata: RegistrationMetadata,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationMetadata {
    pub agent_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    /// Client-generated reference for correlating registration records.
    pub client_ref: Uuid,
}

#[derive(Debug, Deserialize)]
struct RegistrationResponse {
    success: bool,
    message: Option<String>,
}

/// Publishes a live session address to the backend. Production binds the HTTP
/// registrar; tests bind a fake.
#[async_trait]
pub trait SessionRegistrar: Send + Sync {
    async fn register(&self, request: &RegistrationRequest) -> Result<(), SessionError>;
}

/// Registers sessions over HTTP.
pub struct HttpSessionRegistrar {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpSessionRegistrar {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl SessionRegistrar for HttpSessionRegistrar {
    async fn register(&self, request: &RegistrationRequest) -> Result<(), SessionError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(request)
            .send()
            .await
            .map_err(|e| SessionError::Registration(format!("registration request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SessionError::Registration(format!(
                "registration endpoint returned {status}"
            )));
        }

        let body: RegistrationResponse = response.json().await.map_err(|e| {
            SessionError::Registration(format!("malformed registration response: {e}"))
        })?;

        if body.success {
            Ok(())
        } else {
            Err(SessionError::Registration(
                body.message
                    .unwrap_or_else(|| "registration rejected by backend".to_string()),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serializes_in_endpoint_shape() {
        let request = RegistrationRequest {
            session_url: "wss://voice.example/session/abc".to_string(),
            session_id: "sess-abc".to_string(),
            metadata: RegistrationMetadata {
                agent_id: "agent-1".to_string(),
                conversation_id: Some("conv-1".to_string()),
                client_ref: Uuid::nil(),
            },
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["sessionUrl"], "wss://voice.example/session/abc");
        assert_eq!(json["sessionId"], "sess-abc");
        assert_eq!(json["metadata"]["agentId"], "agent-1");
        assert_eq!(json["metadata"]["conversationId"], "conv-1");
    }

    #[test]
    fn response_message_is_optional() {
        let body: RegistrationResponse = serde_json::from_str(r#"{"success":true}"#).unwrap();
        assert!(body.success);
        assert!(body.message.is_none());

        let body: RegistrationResponse =
            serde_json::from_str(r#"{"success":false,"message":"unknown session"}"#).unwrap();
        assert!(!body.success);
        assert_eq!(body.message.as_deref(), Some("unknown session"));
    }
}
