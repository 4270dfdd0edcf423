// ── Core error types ──
//
// User-facing errors from roverlink-core. Consumers never see raw nmcli
// stderr or reqwest errors directly; the `From<NetError>` impl translates
// transport-layer failures into domain-appropriate variants.

use roverlink_net::NetError;
use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Interface lifecycle ──────────────────────────────────────────
    #[error("interface '{0}' not found")]
    InterfaceNotFound(String),

    #[error("a connect is already in progress on '{interface}'")]
    AlreadyInProgress { interface: String },

    #[error("interface '{interface}' is busy with a state transition")]
    Busy { interface: String },

    #[error("association rejected: {reason}")]
    AssociationRejected { reason: String },

    #[error("association timed out after {attempts} attempt(s)")]
    AssociationTimeout { attempts: u32 },

    #[error("no password given and no saved credentials for '{ssid}'")]
    NoCredentials { ssid: String },

    #[error("interface '{interface}' has no gateway address")]
    NoGateway { interface: String },

    // ── Transport ────────────────────────────────────────────────────
    #[error("gateway unreachable: {reason}")]
    GatewayUnreachable { reason: String },

    #[error("network management backend unavailable: {reason}")]
    StationUnavailable { reason: String },

    #[error("station command failed: {0}")]
    StationCommand(String),

    // ── Persistence ──────────────────────────────────────────────────
    #[error("credential store error: {0}")]
    Store(String),

    // ── Internal ─────────────────────────────────────────────────────
    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Returns `true` if the failure is the gateway (not the operator
    /// machine) being unreachable.
    pub fn is_gateway_unreachable(&self) -> bool {
        matches!(self, Self::GatewayUnreachable { .. })
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<NetError> for CoreError {
    fn from(err: NetError) -> Self {
        match err {
            NetError::StationUnavailable { reason } => CoreError::StationUnavailable { reason },
            NetError::CommandFailed { command, stderr } => {
                CoreError::StationCommand(format!("{command}: {stderr}"))
            }
            NetError::ParseFailed(msg) => CoreError::Internal(msg),
            NetError::LinkNotFound(name) => CoreError::InterfaceNotFound(name),
            NetError::AssociationRejected { reason } => CoreError::AssociationRejected { reason },
            NetError::AssociationTimeout { .. } => CoreError::AssociationTimeout { attempts: 1 },
            NetError::GatewayUnreachable { reason } => CoreError::GatewayUnreachable { reason },
            NetError::InvalidUrl(e) => CoreError::Internal(format!("invalid URL: {e}")),
        }
    }
}
