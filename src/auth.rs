use crate::config::AuthOptions;
use secrecy::{ExposeSecret, SecretBox};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Authentication rejected: {status} - {message}")]
    Rejected { status: u16, message: String },
    #[error("Invalid authenticator response: {0}")]
    InvalidResponse(String),
}

/// Short-lived credential issued by the authenticator. Single-use: the
/// session controller sends it as the first frame after the socket opens and
/// requests a fresh one for every reconnect attempt.
pub struct SessionCredential {
    token: SecretBox<String>,
    /// Seconds the server will keep this session alive, at most.
    pub session_time_limit: u64,
    /// Seconds of daily quota the user has left.
    pub daily_remaining: u64,
}

impl SessionCredential {
    pub fn new(token: String, session_time_limit: u64, daily_remaining: u64) -> Self {
        Self {
            token: SecretBox::new(Box::new(token)),
            session_time_limit,
            daily_remaining,
        }
    }

    /// Expose the raw token (use only when building the auth frame).
    pub fn token(&self) -> &str {
        self.token.expose_secret()
    }
}

impl std::fmt::Debug for SessionCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCredential")
            .field("token", &"[REDACTED]")
            .field("session_time_limit", &self.session_time_limit)
            .field("daily_remaining", &self.daily_remaining)
            .finish()
    }
}

/// External credential-exchange collaborator. The core never retries a
/// failed exchange on first connect; retry/backoff is caller policy.
#[async_trait::async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, options: &AuthOptions) -> Result<SessionCredential, AuthError>;
}

#[derive(Debug, Deserialize)]
struct AuthResponse {
    session_token: String,
    #[serde(default)]
    session_time_limit: u64,
    #[serde(default)]
    daily_remaining: u64,
}

/// Authenticator exchanging auth options for a session token over HTTP.
pub struct HttpAuthenticator {
    client: reqwest::Client,
    auth_url: String,
}

impl HttpAuthenticator {
    pub fn new(auth_url: String) -> Result<Self, AuthError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self { client, auth_url })
    }
}

#[async_trait::async_trait]
impl Authenticator for HttpAuthenticator {
    async fn authenticate(&self, options: &AuthOptions) -> Result<SessionCredential, AuthError> {
        let response = self
            .client
            .post(&self.auth_url)
            .json(&options.to_request_body())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AuthError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let body: AuthResponse = response
            .json()
            .await
            .map_err(|e| AuthError::InvalidResponse(e.to_string()))?;

        if body.session_token.is_empty() {
            return Err(AuthError::InvalidResponse(
                "empty session token".to_string(),
            ));
        }

        log::info!(
            "Authenticated: session limit {}s, daily remaining {}s",
            body.session_time_limit,
            body.daily_remaining
        );

        Ok(SessionCredential::new(
            body.session_token,
            body.session_time_limit,
            body.daily_remaining,
        ))
    }
}
