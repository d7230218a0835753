//! Marzban Panel Adapter
//!
//! Implements PanelClient for Marzban panels: OAuth2 password-form login,
//! user-scoped CRUD under `/api/user/{username}`, byte quotas and unix-second
//! expiry. A target is a proxy protocol (vless, vmess, trojan, shadowsocks).

use crate::adapters::outbound::panel_http::{http_error, PanelHttp};
use crate::domain::entities::{
    Backend, ClientSpec, ClientUsage, NodeUsage, RemoteClient, Target,
};
use crate::domain::errors::{FleetError, Result};
use crate::domain::ports::PanelClient;
use crate::domain::value_objects::PanelKind;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct MarzbanUser {
    username: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    expire: Option<i64>,
    #[serde(default)]
    data_limit: Option<u64>,
    #[serde(default)]
    used_traffic: u64,
    #[serde(default)]
    proxies: Map<String, Value>,
}

impl MarzbanUser {
    fn uuid(&self) -> Option<String> {
        self.proxies.values().find_map(|settings| {
            settings
                .get("id")
                .or_else(|| settings.get("password"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
    }

    fn into_remote(self) -> RemoteClient {
        let uuid = self.uuid();
        let enabled = matches!(self.status.as_deref(), Some("active") | Some("on_hold"));
        RemoteClient {
            id: self.username.clone(),
            uuid,
            email: self.username,
            quota_bytes: self.data_limit.unwrap_or(0),
            used_bytes: self.used_traffic,
            expires_at: self.expire.filter(|at| *at > 0),
            enabled,
            status: self.status,
        }
    }
}

/// `GET /api/users` answers with either shape depending on panel version.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum UserList {
    Wrapped { users: Vec<MarzbanUser> },
    Bare(Vec<MarzbanUser>),
}

impl UserList {
    fn into_users(self) -> Vec<MarzbanUser> {
        match self {
            Self::Wrapped { users } => users,
            Self::Bare(users) => users,
        }
    }
}

#[derive(Debug, Deserialize)]
struct MarzbanInbound {
    tag: String,
    protocol: String,
    #[serde(default)]
    port: Option<u16>,
}

/// `GET /api/inbounds`: protocol-keyed object or a bare array.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum InboundList {
    ByProtocol(BTreeMap<String, Vec<MarzbanInbound>>),
    Bare(Vec<MarzbanInbound>),
}

impl InboundList {
    fn into_targets(self) -> Vec<Target> {
        let mut grouped: BTreeMap<String, Vec<MarzbanInbound>> = BTreeMap::new();
        match self {
            Self::ByProtocol(map) => {
                for (protocol, inbounds) in map {
                    grouped.entry(protocol).or_default().extend(inbounds);
                }
            }
            Self::Bare(inbounds) => {
                for inbound in inbounds {
                    grouped.entry(inbound.protocol.clone()).or_default().push(inbound);
                }
            }
        }

        grouped
            .into_iter()
            .map(|(protocol, inbounds)| Target {
                id: protocol.clone(),
                remark: inbounds
                    .iter()
                    .map(|i| i.tag.as_str())
                    .collect::<Vec<_>>()
                    .join(","),
                port: inbounds.iter().find_map(|i| i.port),
                protocol,
                enabled: true,
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct UsageResponse {
    #[serde(default)]
    usages: Vec<NodeUsageWire>,
}

#[derive(Debug, Deserialize)]
struct NodeUsageWire {
    #[serde(default)]
    node_name: String,
    #[serde(default)]
    used_traffic: u64,
}

/// Proxy settings block for a new user on `protocol`.
fn proxy_settings(protocol: &str, uuid: &str) -> Value {
    match protocol {
        "vless" | "vmess" => json!({ "id": uuid }),
        "trojan" | "shadowsocks" => json!({ "password": uuid }),
        _ => json!({}),
    }
}

fn status_for(enabled: bool) -> &'static str {
    if enabled {
        "active"
    } else {
        "disabled"
    }
}

/// Adapter for one Marzban backend.
pub struct MarzbanPanelClient {
    http: PanelHttp,
    username: String,
    password: String,
}

impl MarzbanPanelClient {
    pub fn new(backend: &Backend, client: reqwest::Client, token_ttl: Duration) -> Self {
        Self {
            http: PanelHttp::new(backend.id.clone(), &backend.base_url, client, token_ttl),
            username: backend.credentials.username.clone(),
            password: backend.credentials.password.clone(),
        }
    }

    /// `POST /api/admin/token` as an OAuth2 password form.
    async fn login(&self) -> Result<String> {
        let backend = self.http.backend_id();
        let response = self
            .http
            .client()
            .post(self.http.url("/api/admin/token"))
            .form(&[
                ("grant_type", "password"),
                ("username", self.username.as_str()),
                ("password", self.password.as_str()),
            ])
            .send()
            .await
            .map_err(|e| http_error(backend, e))?;

        let token: TokenResponse = self.http.json(response, "admin token endpoint").await?;
        if token.access_token.is_empty() {
            return Err(FleetError::protocol(backend, "login response carried no token"));
        }

        tracing::debug!("backend {}: logged in", backend);
        Ok(token.access_token)
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        resource: &str,
    ) -> Result<T> {
        let response = self.http.send(request, || self.login()).await?;
        self.http.json(response, resource).await
    }

    async fn call_empty(&self, request: reqwest::RequestBuilder, resource: &str) -> Result<()> {
        let response = self.http.send(request, || self.login()).await?;
        self.http.check_status(response, resource).await?;
        Ok(())
    }

    /// `/api/user/{username}[/tail]` with the username escaped.
    fn user_url(&self, username: &str, tail: Option<&str>) -> Result<reqwest::Url> {
        match tail {
            Some(tail) => self.http.segment_url("/api/user", &[username, tail]),
            None => self.http.segment_url("/api/user", &[username]),
        }
    }

    async fn fetch_users(&self) -> Result<Vec<MarzbanUser>> {
        let request = self.http.client().get(self.http.url("/api/users"));
        let list: UserList = self.call(request, "user list").await?;
        Ok(list.into_users())
    }
}

#[async_trait]
impl PanelClient for MarzbanPanelClient {
    fn backend_id(&self) -> &str {
        self.http.backend_id()
    }

    fn kind(&self) -> PanelKind {
        PanelKind::Marzban
    }

    async fn authenticate(&self) -> Result<()> {
        self.http.session().renew(|| self.login()).await?;
        Ok(())
    }

    async fn list_targets(&self) -> Result<Vec<Target>> {
        let request = self.http.client().get(self.http.url("/api/inbounds"));
        let inbounds: InboundList = self.call(request, "inbound list").await?;
        Ok(inbounds.into_targets())
    }

    async fn list_clients(&self, target_id: &str) -> Result<Vec<RemoteClient>> {
        let users = self.fetch_users().await?;
        Ok(users
            .into_iter()
            .filter(|u| u.proxies.contains_key(target_id))
            .map(MarzbanUser::into_remote)
            .collect())
    }

    // Users span protocols, so one listing covers the whole backend.
    async fn list_all_clients(&self) -> Result<Vec<RemoteClient>> {
        let users = self.fetch_users().await?;
        Ok(users.into_iter().map(MarzbanUser::into_remote).collect())
    }

    async fn get_client(&self, _target_id: &str, client_id: &str) -> Result<RemoteClient> {
        let request = self.http.client().get(self.user_url(client_id, None)?);
        let user: MarzbanUser = self.call(request, &format!("user {}", client_id)).await?;
        Ok(user.into_remote())
    }

    async fn add_client(&self, target_id: &str, spec: &ClientSpec) -> Result<RemoteClient> {
        let uuid = spec
            .uuid
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let mut proxies = Map::new();
        proxies.insert(target_id.to_string(), proxy_settings(target_id, &uuid));

        let body = json!({
            "username": spec.user_key,
            "expire": spec.expires_at.filter(|at| *at > 0),
            "data_limit": spec.quota_bytes,
            "status": status_for(spec.enabled),
            "proxies": proxies,
            "inbounds": {},
            "note": spec.note.clone().unwrap_or_default(),
        });
        let request = self.http.client().post(self.http.url("/api/user")).json(&body);
        let user: MarzbanUser = self.call(request, &format!("user {}", spec.user_key)).await?;

        tracing::info!(
            "backend {}: user {} created ({})",
            self.backend_id(),
            spec.user_key,
            target_id
        );
        Ok(user.into_remote())
    }

    async fn update_client(
        &self,
        _target_id: &str,
        client_id: &str,
        spec: &ClientSpec,
    ) -> Result<RemoteClient> {
        let mut body = json!({
            "expire": spec.expires_at.filter(|at| *at > 0).unwrap_or(0),
            "data_limit": spec.quota_bytes,
            "status": status_for(spec.enabled),
        });
        if let Some(note) = &spec.note {
            body["note"] = json!(note);
        }

        let request = self
            .http
            .client()
            .put(self.user_url(client_id, None)?)
            .json(&body);
        let user: MarzbanUser = self.call(request, &format!("user {}", client_id)).await?;
        Ok(user.into_remote())
    }

    async fn delete_client(&self, _target_id: &str, client_id: &str) -> Result<()> {
        let request = self
            .http
            .client()
            .delete(self.user_url(client_id, None)?);
        self.call_empty(request, &format!("user {}", client_id)).await?;

        tracing::info!("backend {}: user {} deleted", self.backend_id(), client_id);
        Ok(())
    }

    async fn client_usage(&self, _target_id: &str, client_id: &str) -> Result<ClientUsage> {
        let request = self
            .http
            .client()
            .get(self.user_url(client_id, Some("usage"))?);
        let usage: UsageResponse = self.call(request, &format!("user {}", client_id)).await?;

        let nodes: Vec<NodeUsage> = usage
            .usages
            .into_iter()
            .map(|u| NodeUsage {
                node: u.node_name,
                used_bytes: u.used_traffic,
            })
            .collect();
        Ok(ClientUsage {
            client_id: client_id.to_string(),
            used_bytes: nodes.iter().map(|n| n.used_bytes).sum(),
            nodes,
        })
    }

    async fn reset_client_traffic(&self, _target_id: &str, client_id: &str) -> Result<()> {
        let request = self
            .http
            .client()
            .post(self.user_url(client_id, Some("reset"))?);
        self.call_empty(request, &format!("user {}", client_id)).await
    }

    async fn system_info(&self) -> Result<Value> {
        let request = self.http.client().get(self.http.url("/api/system"));
        self.call(request, "system info").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::Credentials;
    use wiremock::matchers::{body_partial_json, body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    // ===== Test Helpers =====

    fn create_client(server: &MockServer) -> MarzbanPanelClient {
        let backend = Backend {
            id: "mz-1".to_string(),
            name: "Marzban 1".to_string(),
            kind: PanelKind::Marzban,
            base_url: server.uri(),
            credentials: Credentials::new("admin", "secret"),
            enabled: true,
            priority: Some(1),
            capacity: 100,
            region: Some("eu".to_string()),
            current_clients: 0,
        };
        MarzbanPanelClient::new(&backend, reqwest::Client::new(), Duration::from_secs(3600))
    }

    async fn mount_login(server: &MockServer, token: &str) {
        Mock::given(method("POST"))
            .and(path("/api/admin/token"))
            .and(header("content-type", "application/x-www-form-urlencoded"))
            .and(body_string_contains("username=admin"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": token,
                "token_type": "bearer"
            })))
            .mount(server)
            .await;
    }

    fn user_json(username: &str, status: &str, protocol: &str) -> Value {
        json!({
            "username": username,
            "status": status,
            "expire": 1_700_000_000,
            "data_limit": 5_000_000_000_u64,
            "used_traffic": 1_000,
            "proxies": { protocol: { "id": format!("uuid-{}", username) } },
            "inbounds": {},
            "note": ""
        })
    }

    // ===== Login Tests =====

    #[tokio::test]
    async fn test_authenticate_uses_form_login() {
        let server = MockServer::start().await;
        mount_login(&server, "jwt").await;

        let client = create_client(&server);
        client.authenticate().await.unwrap();
        assert!(client.http.session().is_authenticated().await);
    }

    #[tokio::test]
    async fn test_authenticate_bad_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/admin/token"))
            .respond_with(
                ResponseTemplate::new(401)
                    .set_body_json(json!({"detail": "Incorrect username or password"})),
            )
            .mount(&server)
            .await;

        let err = create_client(&server).authenticate().await.unwrap_err();
        assert!(err.is_authentication());
        assert!(err.to_string().contains("Incorrect username or password"));
    }

    // ===== Target / Listing Tests =====

    #[tokio::test]
    async fn test_list_targets_protocol_keyed() {
        let server = MockServer::start().await;
        mount_login(&server, "jwt").await;
        Mock::given(method("GET"))
            .and(path("/api/inbounds"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "vless": [
                    {"tag": "VLESS TCP REALITY", "protocol": "vless", "network": "tcp", "tls": "reality", "port": 443},
                    {"tag": "VLESS WS", "protocol": "vless", "network": "ws", "tls": "none", "port": 8080}
                ],
                "trojan": [
                    {"tag": "TROJAN", "protocol": "trojan", "network": "tcp", "tls": "tls", "port": 8443}
                ]
            })))
            .mount(&server)
            .await;

        let targets = create_client(&server).list_targets().await.unwrap();

        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].id, "trojan");
        assert_eq!(targets[1].id, "vless");
        assert_eq!(targets[1].remark, "VLESS TCP REALITY,VLESS WS");
        assert_eq!(targets[1].port, Some(443));
    }

    #[tokio::test]
    async fn test_list_targets_bare_array() {
        let server = MockServer::start().await;
        mount_login(&server, "jwt").await;
        Mock::given(method("GET"))
            .and(path("/api/inbounds"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"tag": "VMESS", "protocol": "vmess", "port": 2083}
            ])))
            .mount(&server)
            .await;

        let targets = create_client(&server).list_targets().await.unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].protocol, "vmess");
    }

    #[tokio::test]
    async fn test_list_clients_accepts_both_shapes() {
        let wrapped = MockServer::start().await;
        mount_login(&wrapped, "jwt").await;
        Mock::given(method("GET"))
            .and(path("/api/users"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "users": [user_json("alice", "active", "vless"), user_json("bob", "disabled", "vmess")],
                "total": 2
            })))
            .mount(&wrapped)
            .await;

        let bare = MockServer::start().await;
        mount_login(&bare, "jwt").await;
        Mock::given(method("GET"))
            .and(path("/api/users"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                user_json("alice", "active", "vless"),
                user_json("bob", "disabled", "vmess")
            ])))
            .mount(&bare)
            .await;

        for server in [&wrapped, &bare] {
            let client = create_client(server);
            let vless = client.list_clients("vless").await.unwrap();
            assert_eq!(vless.len(), 1);
            assert_eq!(vless[0].id, "alice");
            assert_eq!(vless[0].uuid.as_deref(), Some("uuid-alice"));

            assert_eq!(client.list_all_clients().await.unwrap().len(), 2);
            assert_eq!(client.active_client_count().await.unwrap(), 1);
        }
    }

    #[tokio::test]
    async fn test_get_client_maps_fields() {
        let server = MockServer::start().await;
        mount_login(&server, "jwt").await;
        Mock::given(method("GET"))
            .and(path("/api/user/alice"))
            .and(header("authorization", "Bearer jwt"))
            .respond_with(ResponseTemplate::new(200).set_body_json(user_json("alice", "active", "vless")))
            .mount(&server)
            .await;

        let alice = create_client(&server).get_client("vless", "alice").await.unwrap();

        assert_eq!(alice.email, "alice");
        assert_eq!(alice.quota_bytes, 5_000_000_000);
        assert_eq!(alice.used_bytes, 1_000);
        assert_eq!(alice.expires_at, Some(1_700_000_000));
        assert_eq!(alice.status.as_deref(), Some("active"));
        assert!(alice.enabled);
    }

    #[tokio::test]
    async fn test_username_stays_one_path_segment() {
        let server = MockServer::start().await;
        mount_login(&server, "jwt").await;
        Mock::given(method("DELETE"))
            .and(path("/api/user/eve%2F..%3Fx"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        create_client(&server).delete_client("vless", "eve/..?x").await.unwrap();
    }

    #[tokio::test]
    async fn test_get_client_not_found() {
        let server = MockServer::start().await;
        mount_login(&server, "jwt").await;
        Mock::given(method("GET"))
            .and(path("/api/user/ghost"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({"detail": "User not found"})))
            .mount(&server)
            .await;

        let err = create_client(&server).get_client("vless", "ghost").await.unwrap_err();
        assert_eq!(err, FleetError::not_found("mz-1", "user ghost"));
    }

    // ===== Mutation Tests =====

    #[tokio::test]
    async fn test_add_client_payload() {
        let server = MockServer::start().await;
        mount_login(&server, "jwt").await;
        Mock::given(method("POST"))
            .and(path("/api/user"))
            .and(body_partial_json(json!({
                "username": "carol",
                "expire": 1_800_000_000,
                "data_limit": 1_073_741_824_u64,
                "status": "active",
                "proxies": {"vless": {"id": "fixed"}}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "username": "carol",
                "status": "active",
                "expire": 1_800_000_000,
                "data_limit": 1_073_741_824_u64,
                "used_traffic": 0,
                "proxies": {"vless": {"id": "fixed"}}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let spec = ClientSpec::new("carol")
            .with_uuid("fixed")
            .with_quota_bytes(1_073_741_824)
            .with_expiry(1_800_000_000);
        let created = create_client(&server).add_client("vless", &spec).await.unwrap();

        assert_eq!(created.id, "carol");
        assert_eq!(created.uuid.as_deref(), Some("fixed"));
    }

    #[tokio::test]
    async fn test_add_existing_user_rejected() {
        let server = MockServer::start().await;
        mount_login(&server, "jwt").await;
        Mock::given(method("POST"))
            .and(path("/api/user"))
            .respond_with(ResponseTemplate::new(409).set_body_json(json!({"detail": "User already exists"})))
            .mount(&server)
            .await;

        let err = create_client(&server)
            .add_client("vless", &ClientSpec::new("carol"))
            .await
            .unwrap_err();
        match err {
            FleetError::Rejected { message, .. } => assert!(message.contains("User already exists")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_update_client_disables() {
        let server = MockServer::start().await;
        mount_login(&server, "jwt").await;
        Mock::given(method("PUT"))
            .and(path("/api/user/alice"))
            .and(body_partial_json(json!({"status": "disabled", "expire": 0})))
            .respond_with(ResponseTemplate::new(200).set_body_json(user_json("alice", "disabled", "vless")))
            .expect(1)
            .mount(&server)
            .await;

        let spec = ClientSpec::new("alice").with_enabled(false);
        let updated = create_client(&server)
            .update_client("vless", "alice", &spec)
            .await
            .unwrap();
        assert!(!updated.enabled);
    }

    #[tokio::test]
    async fn test_delete_missing_user_is_not_found() {
        let server = MockServer::start().await;
        mount_login(&server, "jwt").await;
        Mock::given(method("DELETE"))
            .and(path("/api/user/ghost"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = create_client(&server).delete_client("vless", "ghost").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_usage_sums_nodes() {
        let server = MockServer::start().await;
        mount_login(&server, "jwt").await;
        Mock::given(method("GET"))
            .and(path("/api/user/alice/usage"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "username": "alice",
                "usages": [
                    {"node_id": null, "node_name": "Master", "used_traffic": 300},
                    {"node_id": 1, "node_name": "edge-1", "used_traffic": 700}
                ]
            })))
            .mount(&server)
            .await;

        let usage = create_client(&server).client_usage("vless", "alice").await.unwrap();
        assert_eq!(usage.used_bytes, 1_000);
        assert_eq!(usage.nodes.len(), 2);
        assert_eq!(usage.nodes[1].node, "edge-1");
    }

    #[tokio::test]
    async fn test_reset_and_system_info() {
        let server = MockServer::start().await;
        mount_login(&server, "jwt").await;
        Mock::given(method("POST"))
            .and(path("/api/user/alice/reset"))
            .respond_with(ResponseTemplate::new(200).set_body_json(user_json("alice", "active", "vless")))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/system"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "version": "0.4.9",
                "total_user": 12,
                "users_active": 9
            })))
            .mount(&server)
            .await;

        let client = create_client(&server);
        client.reset_client_traffic("vless", "alice").await.unwrap();
        let info = client.system_info().await.unwrap();
        assert_eq!(info["users_active"], 9);
    }

    // ===== Re-authentication Tests =====

    #[tokio::test]
    async fn test_401_triggers_single_relogin() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/admin/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "first",
                "token_type": "bearer"
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/admin/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "second",
                "token_type": "bearer"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/user/alice"))
            .and(header("authorization", "Bearer first"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/user/alice"))
            .and(header("authorization", "Bearer second"))
            .respond_with(ResponseTemplate::new(200).set_body_json(user_json("alice", "active", "vless")))
            .expect(1)
            .mount(&server)
            .await;

        let alice = create_client(&server).get_client("vless", "alice").await.unwrap();
        assert_eq!(alice.id, "alice");
    }

    #[tokio::test]
    async fn test_persistent_401_is_authentication_error() {
        let server = MockServer::start().await;
        mount_login(&server, "jwt").await;
        Mock::given(method("GET"))
            .and(path("/api/user/alice"))
            .respond_with(ResponseTemplate::new(401))
            .expect(2)
            .mount(&server)
            .await;

        let err = create_client(&server).get_client("vless", "alice").await.unwrap_err();
        assert!(err.is_authentication());
    }
}
