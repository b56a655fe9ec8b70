//! Signed-URL acquisition from the credential endpoint.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::SessionError;
use crate::models::SignedCredential;

/// Source of short-lived signed URLs. Production binds the HTTP provider;
/// tests bind a fake.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Fetch a fresh signed URL for the given agent. A single attempt; the
    /// caller owns retry policy.
    async fn fetch(&self, agent_id: &str) -> Result<SignedCredential, SessionError>;
}

/// Wire shape of the credential endpoint response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignedUrlResponse {
    signed_url: Option<String>,
    expires_at: Option<DateTime<Utc>>,
}

/// Fetches signed URLs over HTTP.
pub struct HttpCredentialProvider {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpCredentialProvider {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl CredentialProvider for HttpCredentialProvider {
    async fn fetch(&self, agent_id: &str) -> Result<SignedCredential, SessionError> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("agent_id", agent_id)])
            .send()
            .await
            .map_err(|e| SessionError::Token(format!("credential request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SessionError::Token(format!(
                "credential endpoint returned {status}"
            )));
        }

        let body: SignedUrlResponse = response
            .json()
            .await
            .map_err(|e| SessionError::Token(format!("malformed credential response: {e}")))?;

        let signed_url = body
            .signed_url
            .filter(|url| !url.is_empty())
            .ok_or_else(|| {
                SessionError::Token("credential response is missing the signed URL".to_string())
            })?;

        Ok(SignedCredential {
            signed_url,
            expires_at: body.expires_at,
        })
    }
}

/// Fetch a credential with bounded retry: `attempts` total calls, sleeping
/// `initial_delay` before the first retry and doubling after each failure.
pub(crate) async fn fetch_with_retry(
    provider: &dyn CredentialProvider,
    agent_id: &str,
    attempts: u32,
    initial_delay: Duration,
) -> Result<SignedCredential, SessionError> {
    let mut delay = initial_delay;
    let mut last_error = SessionError::Token("no credential fetch attempted".to_string());

    for attempt in 1..=attempts.max(1) {
        match provider.fetch(agent_id).await {
            Ok(credential) => {
                debug!(attempt, "signed URL acquired");
                return Ok(credential);
            }
            Err(error) => {
                warn!(attempt, %error, "credential fetch failed");
                last_error = error;
            }
        }
        if attempt < attempts {
            tokio::time::sleep(delay).await;
            delay *= 2;
        }
    }

    Err(last_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyProvider {
        calls: AtomicU32,
        succeed_on: u32,
    }

    #[async_trait]
    impl CredentialProvider for FlakyProvider {
        async fn fetch(&self, _agent_id: &str) -> Result<SignedCredential, SessionError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call >= self.succeed_on {
                Ok(SignedCredential {
                    signed_url: format!("wss://example/session?call={call}"),
                    expires_at: None,
                })
            } else {
                Err(SessionError::Token("transient".to_string()))
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retry_recovers_from_transient_failures() {
        let provider = FlakyProvider {
            calls: AtomicU32::new(0),
            succeed_on: 3,
        };
        let credential = fetch_with_retry(&provider, "agent-1", 4, Duration::from_secs(1))
            .await
            .expect("third attempt should succeed");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
        assert!(credential.signed_url.contains("call=3"));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_gives_up_after_all_attempts() {
        let provider = FlakyProvider {
            calls: AtomicU32::new(0),
            succeed_on: u32::MAX,
        };
        let err = fetch_with_retry(&provider, "agent-1", 4, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(provider.calls.load(Ordering::SeqCst), 4);
        assert!(matches!(err, SessionError::Token(_)));
    }

    #[tokio::test]
    async fn success_short_circuits() {
        let provider = FlakyProvider {
            calls: AtomicU32::new(0),
            succeed_on: 1,
        };
        fetch_with_retry(&provider, "agent-1", 4, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn response_parsing_requires_a_url() {
        let body: SignedUrlResponse =
            serde_json::from_str(r#"{"expiresAt":"2026-01-01T00:00:00Z"}"#).unwrap();
        assert!(body.signed_url.is_none());

        let body: SignedUrlResponse = serde_json::from_str(
            r#"{"signedUrl":"wss://x/y?token=t","expiresAt":"2026-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(body.signed_url.as_deref(), Some("wss://x/y?token=t"));
        assert!(body.expires_at.is_some());
    }
}
