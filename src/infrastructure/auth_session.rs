//! Per-backend Session Token Cache
//!
//! Holds the bearer token of one panel and decides when a fresh login is
//! needed. Every login decision runs under one async mutex, so concurrent
//! callers that all find the session stale share a single login.

use crate::domain::errors::Result;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Default token lifetime: one hour below the usual 24h panel token.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(23 * 60 * 60);

/// State of a panel session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Unauthenticated,
    Authenticated { token: String, expires_at: Instant },
}

impl SessionState {
    /// Token usable at `now`, if any.
    fn valid_token(&self, now: Instant) -> Option<&str> {
        match self {
            Self::Authenticated { token, expires_at } if now < *expires_at => Some(token),
            _ => None,
        }
    }
}

/// Cached session of one backend.
pub struct AuthSession {
    backend_id: String,
    ttl: Duration,
    state: Mutex<SessionState>,
}

impl AuthSession {
    pub fn new(backend_id: impl Into<String>, ttl: Duration) -> Self {
        Self {
            backend_id: backend_id.into(),
            ttl,
            state: Mutex::new(SessionState::Unauthenticated),
        }
    }

    pub fn backend_id(&self) -> &str {
        &self.backend_id
    }

    /// Return a valid token, logging in first when the session is missing or
    /// expired.
    pub async fn token<F, Fut>(&self, login: F) -> Result<String>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String>>,
    {
        let mut state = self.state.lock().await;
        if let Some(token) = state.valid_token(Instant::now()) {
            return Ok(token.to_string());
        }

        if matches!(*state, SessionState::Authenticated { .. }) {
            tracing::debug!("backend {}: session expired, logging in", self.backend_id);
            *state = SessionState::Unauthenticated;
        }

        let token = login().await?;
        *state = SessionState::Authenticated {
            token: token.clone(),
            expires_at: Instant::now() + self.ttl,
        };
        Ok(token)
    }

    /// Drop any cached token and log in again unconditionally.
    pub async fn renew<F, Fut>(&self, login: F) -> Result<String>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String>>,
    {
        let mut state = self.state.lock().await;
        *state = SessionState::Unauthenticated;

        let token = login().await?;
        *state = SessionState::Authenticated {
            token: token.clone(),
            expires_at: Instant::now() + self.ttl,
        };
        Ok(token)
    }

    /// Forget the session after the panel rejected `stale_token`.
    ///
    /// A session that already moved on to a newer token is left alone.
    pub async fn invalidate(&self, stale_token: &str) {
        let mut state = self.state.lock().await;
        if let SessionState::Authenticated { token, .. } = &*state {
            if token == stale_token {
                *state = SessionState::Unauthenticated;
            }
        }
    }

    /// Whether a non-expired token is cached.
    pub async fn is_authenticated(&self) -> bool {
        self.state
            .lock()
            .await
            .valid_token(Instant::now())
            .is_some()
    }

    pub async fn state(&self) -> SessionState {
        self.state.lock().await.clone()
    }
}
