mod marzban_client;
mod memory_backend_repo;
mod panel_http;
mod xui_client;

pub use marzban_client::MarzbanPanelClient;
pub use memory_backend_repo::MemoryBackendRepository;
pub use panel_http::{http_error, PanelHttp};
pub use xui_client::XuiPanelClient;

use crate::domain::entities::Backend;
use crate::domain::ports::PanelClient;
use crate::domain::value_objects::PanelKind;
use std::sync::Arc;
use std::time::Duration;

/// Build the panel client matching a backend's configured kind.
pub fn build_panel(
    backend: &Backend,
    client: reqwest::Client,
    token_ttl: Duration,
) -> Arc<dyn PanelClient> {
    match backend.kind {
        PanelKind::Xui => Arc::new(XuiPanelClient::new(backend, client, token_ttl)),
        PanelKind::Marzban => Arc::new(MarzbanPanelClient::new(backend, client, token_ttl)),
    }
}
