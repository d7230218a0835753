//! 3X-UI Panel Adapter
//!
//! Implements PanelClient for 3X-UI style panels. Clients live inside an
//! inbound, every response is wrapped in a `{success, msg, obj}` envelope,
//! quotas travel as GiB and expiry as epoch milliseconds.

use crate::adapters::outbound::panel_http::PanelHttp;
use crate::domain::entities::{Backend, ClientSpec, RemoteClient, Target};
use crate::domain::errors::{FleetError, Result};
use crate::domain::ports::PanelClient;
use crate::domain::value_objects::{PanelKind, BYTES_PER_GB};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Response envelope used by every XUI endpoint.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    success: bool,
    #[serde(default)]
    msg: String,
    obj: Option<T>,
}

#[derive(Debug, Deserialize)]
struct LoginObj {
    token: String,
}

/// Ids arrive as numbers or strings depending on panel version.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(untagged)]
enum WireId {
    Num(i64),
    Text(String),
}

impl WireId {
    fn into_string(self) -> String {
        match self {
            Self::Num(n) => n.to_string(),
            Self::Text(s) => s,
        }
    }
}

#[derive(Debug, Deserialize)]
struct XuiInbound {
    id: WireId,
    #[serde(default)]
    remark: String,
    #[serde(default)]
    port: Option<u16>,
    #[serde(default)]
    protocol: String,
    #[serde(default = "default_true")]
    enable: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
struct XuiClient {
    #[serde(default)]
    id: Option<WireId>,
    #[serde(default)]
    email: String,
    #[serde(default)]
    uuid: Option<String>,
    #[serde(default)]
    alter_id: u32,
    #[serde(default)]
    level: u32,
    #[serde(default = "default_true")]
    enable: bool,
    #[serde(rename = "totalGB", default)]
    total_gb: f64,
    #[serde(rename = "usedGB", default)]
    used_gb: f64,
    #[serde(default)]
    expiry_time: i64,
}

/// Body of `updateClient`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct XuiClientUpdate<'a> {
    id: &'a str,
    email: &'a str,
    enable: bool,
    #[serde(rename = "totalGB")]
    total_gb: f64,
    expiry_time: i64,
}

#[derive(Debug, Serialize)]
struct XuiClientRef<'a> {
    id: &'a str,
}

fn default_true() -> bool {
    true
}

fn bytes_to_gb(bytes: u64) -> f64 {
    bytes as f64 / BYTES_PER_GB as f64
}

fn gb_to_bytes(gb: f64) -> u64 {
    if gb <= 0.0 {
        return 0;
    }
    (gb * BYTES_PER_GB as f64).round() as u64
}

/// Unix seconds to XUI milliseconds (0 = never).
fn expiry_to_wire(expires_at: Option<i64>) -> i64 {
    expires_at.filter(|at| *at > 0).map(|at| at * 1000).unwrap_or(0)
}

fn expiry_from_wire(expiry_ms: i64) -> Option<i64> {
    if expiry_ms > 0 {
        Some(expiry_ms / 1000)
    } else {
        None
    }
}

fn is_not_found_message(msg: &str) -> bool {
    let msg = msg.to_lowercase();
    msg.contains("not found") || msg.contains("not exist") || msg.contains("no client")
}

impl XuiClient {
    fn from_spec(spec: &ClientSpec, uuid: String) -> Self {
        Self {
            id: Some(WireId::Text(uuid.clone())),
            email: spec.user_key.clone(),
            uuid: Some(uuid),
            alter_id: 0,
            level: 0,
            enable: spec.enabled,
            total_gb: bytes_to_gb(spec.quota_bytes),
            used_gb: 0.0,
            expiry_time: expiry_to_wire(spec.expires_at),
        }
    }

    fn into_remote(self) -> RemoteClient {
        let id = self
            .id
            .map(WireId::into_string)
            .filter(|id| !id.is_empty())
            .or_else(|| self.uuid.clone())
            .unwrap_or_else(|| self.email.clone());
        RemoteClient {
            id,
            uuid: self.uuid,
            email: self.email,
            quota_bytes: gb_to_bytes(self.total_gb),
            used_bytes: gb_to_bytes(self.used_gb),
            expires_at: expiry_from_wire(self.expiry_time),
            enabled: self.enable,
            status: None,
        }
    }
}

/// Adapter for one 3X-UI backend.
pub struct XuiPanelClient {
    http: PanelHttp,
    username: String,
    password: String,
}

impl XuiPanelClient {
    pub fn new(backend: &Backend, client: reqwest::Client, token_ttl: Duration) -> Self {
        Self {
            http: PanelHttp::new(backend.id.clone(), &backend.base_url, client, token_ttl),
            username: backend.credentials.username.clone(),
            password: backend.credentials.password.clone(),
        }
    }

    /// `POST /login` with JSON credentials.
    async fn login(&self) -> Result<String> {
        let backend = self.http.backend_id();
        let response = self
            .http
            .client()
            .post(self.http.url("/login"))
            .json(&serde_json::json!({
                "username": self.username,
                "password": self.password,
            }))
            .send()
            .await
            .map_err(|e| super::panel_http::http_error(backend, e))?;

        let envelope: Envelope<LoginObj> = self.http.json(response, "login endpoint").await?;
        if !envelope.success {
            return Err(FleetError::auth(backend, envelope.msg));
        }
        let token = envelope
            .obj
            .map(|o| o.token)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| FleetError::protocol(backend, "login response carried no token"))?;

        tracing::debug!("backend {}: logged in", backend);
        Ok(token)
    }

    /// Send an authorized request and unwrap the envelope.
    async fn call<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        resource: &str,
    ) -> Result<Option<T>> {
        let response = self.http.send(request, || self.login()).await?;
        let envelope: Envelope<T> = self.http.json(response, resource).await?;

        if envelope.success {
            return Ok(envelope.obj);
        }
        if is_not_found_message(&envelope.msg) {
            return Err(FleetError::not_found(self.http.backend_id(), resource));
        }
        Err(FleetError::rejected(self.http.backend_id(), envelope.msg))
    }

    fn find_client(clients: Vec<RemoteClient>, client_id: &str) -> Option<RemoteClient> {
        clients.into_iter().find(|c| {
            c.id == client_id || c.uuid.as_deref() == Some(client_id) || c.email == client_id
        })
    }
}

#[async_trait]
impl PanelClient for XuiPanelClient {
    fn backend_id(&self) -> &str {
        self.http.backend_id()
    }

    fn kind(&self) -> PanelKind {
        PanelKind::Xui
    }

    async fn authenticate(&self) -> Result<()> {
        self.http.session().renew(|| self.login()).await?;
        Ok(())
    }

    async fn list_targets(&self) -> Result<Vec<Target>> {
        let request = self.http.client().get(self.http.url("/xui/inbound/list"));
        let inbounds: Vec<XuiInbound> = self.call(request, "inbound list").await?.unwrap_or_default();

        Ok(inbounds
            .into_iter()
            .map(|inbound| Target {
                id: inbound.id.into_string(),
                remark: inbound.remark,
                protocol: inbound.protocol,
                port: inbound.port,
                enabled: inbound.enable,
            })
            .collect())
    }

    async fn list_clients(&self, target_id: &str) -> Result<Vec<RemoteClient>> {
        let request = self
            .http
            .client()
            .get(self.http.segment_url("/xui/inbound/listClient", &[target_id])?);
        let clients: Vec<XuiClient> = self
            .call(request, &format!("inbound {}", target_id))
            .await?
            .unwrap_or_default();

        Ok(clients.into_iter().map(XuiClient::into_remote).collect())
    }

    async fn get_client(&self, target_id: &str, client_id: &str) -> Result<RemoteClient> {
        let clients = self.list_clients(target_id).await?;
        Self::find_client(clients, client_id).ok_or_else(|| {
            FleetError::not_found(self.backend_id(), format!("client {}", client_id))
        })
    }

    async fn add_client(&self, target_id: &str, spec: &ClientSpec) -> Result<RemoteClient> {
        let uuid = spec
            .uuid
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let wire = XuiClient::from_spec(spec, uuid);

        let request = self
            .http
            .client()
            .post(self.http.segment_url("/xui/inbound/addClient", &[target_id])?)
            .json(&wire);
        let created: Option<XuiClient> = self
            .call(request, &format!("inbound {}", target_id))
            .await?;

        tracing::info!(
            "backend {}: client {} added to inbound {}",
            self.backend_id(),
            spec.user_key,
            target_id
        );
        Ok(created.unwrap_or(wire).into_remote())
    }

    async fn update_client(
        &self,
        target_id: &str,
        client_id: &str,
        spec: &ClientSpec,
    ) -> Result<RemoteClient> {
        let body = XuiClientUpdate {
            id: client_id,
            email: &spec.user_key,
            enable: spec.enabled,
            total_gb: bytes_to_gb(spec.quota_bytes),
            expiry_time: expiry_to_wire(spec.expires_at),
        };
        let request = self
            .http
            .client()
            .post(self.http.segment_url("/xui/inbound/updateClient", &[target_id])?)
            .json(&body);
        let updated: Option<XuiClient> = self
            .call(request, &format!("client {}", client_id))
            .await?;

        match updated {
            Some(client) => Ok(client.into_remote()),
            None => self.get_client(target_id, client_id).await,
        }
    }

    async fn delete_client(&self, target_id: &str, client_id: &str) -> Result<()> {
        let request = self
            .http
            .client()
            .post(self.http.segment_url("/xui/inbound/delClient", &[target_id])?)
            .json(&XuiClientRef { id: client_id });
        self.call::<serde_json::Value>(request, &format!("client {}", client_id))
            .await?;

        tracing::info!(
            "backend {}: client {} removed from inbound {}",
            self.backend_id(),
            client_id,
            target_id
        );
        Ok(())
    }
}
