//! Shared HTTP plumbing for panel adapters
//!
//! Wraps one backend's base URL, the shared reqwest client and the session
//! cache. `send` attaches the bearer token and performs the single
//! re-login + replay on an unauthorized response.

use crate::domain::errors::{FleetError, Result};
use crate::infrastructure::AuthSession;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::future::Future;
use std::time::Duration;

/// Map a reqwest failure onto the fleet taxonomy.
pub fn http_error(backend: &str, e: reqwest::Error) -> FleetError {
    if e.is_decode() {
        FleetError::protocol(backend, format!("malformed response: {}", e))
    } else {
        FleetError::Transport {
            backend: backend.to_string(),
            message: e.to_string(),
        }
    }
}

pub struct PanelHttp {
    backend_id: String,
    base_url: String,
    client: reqwest::Client,
    session: AuthSession,
}

impl PanelHttp {
    pub fn new(
        backend_id: impl Into<String>,
        base_url: &str,
        client: reqwest::Client,
        token_ttl: Duration,
    ) -> Self {
        let backend_id = backend_id.into();
        Self {
            session: AuthSession::new(backend_id.clone(), token_ttl),
            backend_id,
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    pub fn backend_id(&self) -> &str {
        &self.backend_id
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub fn session(&self) -> &AuthSession {
        &self.session
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// `path` followed by caller-supplied keys, each encoded as exactly one
    /// path segment (`/`, `?` and `#` are percent-escaped).
    pub fn segment_url(&self, path: &str, segments: &[&str]) -> Result<reqwest::Url> {
        let mut url = reqwest::Url::parse(&self.url(path)).map_err(|e| {
            FleetError::Config(format!("invalid base_url for backend {}: {}", self.backend_id, e))
        })?;
        url.path_segments_mut()
            .map_err(|_| {
                FleetError::Config(format!("base_url of backend {} cannot carry a path", self.backend_id))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Send a request with a valid bearer token.
    ///
    /// On 401 the session is dropped, `login` runs once and the request is
    /// replayed once. A second 401 is `FleetError::Authentication`.
    pub async fn send<F, Fut>(&self, request: RequestBuilder, login: F) -> Result<Response>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<String>>,
    {
        let replay = request.try_clone();
        let token = self.session.token(&login).await?;
        let response = request
            .bearer_auth(&token)
            .send()
            .await
            .map_err(|e| http_error(&self.backend_id, e))?;

        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        tracing::debug!("backend {}: token rejected, logging in again", self.backend_id);
        self.session.invalidate(&token).await;
        let replay = replay.ok_or_else(|| {
            FleetError::protocol(&self.backend_id, "request cannot be replayed after re-login")
        })?;

        let token = self.session.token(&login).await?;
        let response = replay
            .bearer_auth(&token)
            .send()
            .await
            .map_err(|e| http_error(&self.backend_id, e))?;

        if response.status() == StatusCode::UNAUTHORIZED {
            self.session.invalidate(&token).await;
            return Err(FleetError::auth(
                &self.backend_id,
                "request still unauthorized after re-login",
            ));
        }
        Ok(response)
    }

    /// Turn a non-success status into a typed error.
    ///
    /// `resource` names what a 404 refers to.
    pub async fn check_status(&self, response: Response, resource: &str) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let detail = error_detail(&body);
        Err(match status {
            StatusCode::NOT_FOUND => FleetError::not_found(&self.backend_id, resource),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                FleetError::auth(&self.backend_id, format!("{} - {}", status, detail))
            }
            StatusCode::BAD_REQUEST | StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY => {
                FleetError::rejected(&self.backend_id, format!("{} - {}", status, detail))
            }
            _ => FleetError::protocol(
                &self.backend_id,
                format!("unexpected status {} - {}", status, detail),
            ),
        })
    }

    /// Check the status and decode a JSON body.
    pub async fn json<T: DeserializeOwned>(&self, response: Response, resource: &str) -> Result<T> {
        let response = self.check_status(response, resource).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| http_error(&self.backend_id, e))
    }
}

/// Best-effort error message out of a panel error body.
fn error_detail(body: &str) -> String {
    let parsed: Option<serde_json::Value> = serde_json::from_str(body).ok();
    let message = parsed.as_ref().and_then(|v| {
        ["detail", "msg", "message"]
            .iter()
            .find_map(|key| v.get(*key))
            .map(|m| match m.as_str() {
                Some(s) => s.to_string(),
                None => m.to_string(),
            })
    });
    message.unwrap_or_else(|| body.trim().to_string())
}
