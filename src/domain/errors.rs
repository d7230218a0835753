//! Fleet error taxonomy.
//!
//! Single-backend operations surface these directly to the caller, which
//! owns compensation. Whole-fleet operations never fail because of one
//! backend; they report `PartialFleet` alongside a complete result map.

use thiserror::Error;

/// Errors produced by the fleet core.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FleetError {
    /// Bad credentials, or still unauthorized after the single re-login.
    #[error("authentication failed on backend {backend}: {message}")]
    Authentication { backend: String, message: String },

    /// The panel does not know the requested resource.
    #[error("{resource} not found on backend {backend}")]
    NotFound { backend: String, resource: String },

    /// Selection found zero eligible candidates.
    #[error("no available server")]
    NoAvailableServer,

    /// Malformed payload or unexpected status. Not retried.
    #[error("protocol error on backend {backend}: {message}")]
    Protocol { backend: String, message: String },

    /// The panel understood the request and refused it.
    #[error("backend {backend} rejected the request: {message}")]
    Rejected { backend: String, message: String },

    /// Connection, TLS or timeout failure from the HTTP client.
    #[error("transport error on backend {backend}: {message}")]
    Transport { backend: String, message: String },

    /// No panel client is configured for this backend id.
    #[error("unknown backend: {0}")]
    UnknownBackend(String),

    /// The panel kind lacks this capability.
    #[error("{operation} is not supported by backend {backend}")]
    Unsupported { backend: String, operation: String },

    /// One or more backends failed during a whole-fleet call.
    #[error("{} of {total} backends failed: {}", .failed.len(), .failed.join(", "))]
    PartialFleet { failed: Vec<String>, total: usize },

    /// The health monitor loop is already running.
    #[error("health monitoring is already active")]
    MonitorAlreadyRunning,

    #[error("configuration error: {0}")]
    Config(String),
}

impl FleetError {
    pub fn auth(backend: &str, message: impl Into<String>) -> Self {
        Self::Authentication {
            backend: backend.to_string(),
            message: message.into(),
        }
    }

    pub fn not_found(backend: &str, resource: impl Into<String>) -> Self {
        Self::NotFound {
            backend: backend.to_string(),
            resource: resource.into(),
        }
    }

    pub fn protocol(backend: &str, message: impl Into<String>) -> Self {
        Self::Protocol {
            backend: backend.to_string(),
            message: message.into(),
        }
    }

    pub fn rejected(backend: &str, message: impl Into<String>) -> Self {
        Self::Rejected {
            backend: backend.to_string(),
            message: message.into(),
        }
    }

    pub fn unsupported(backend: &str, operation: impl Into<String>) -> Self {
        Self::Unsupported {
            backend: backend.to_string(),
            operation: operation.into(),
        }
    }

    /// `PartialFleet` for the failed ids of a whole-fleet call, or `None`
    /// when every backend succeeded.
    pub fn partial(mut failed: Vec<String>, total: usize) -> Option<Self> {
        if failed.is_empty() {
            return None;
        }
        failed.sort();
        Some(Self::PartialFleet { failed, total })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_authentication(&self) -> bool {
        matches!(self, Self::Authentication { .. })
    }
}

/// Result alias for fleet operations.
pub type Result<T> = std::result::Result<T, FleetError>;
