use std::time::Duration;

use thiserror::Error;

/// Top-level error type for the `roverlink-net` crate.
///
/// Covers both failure surfaces: the wireless station backend (nmcli)
/// and the gateway HTTP transport. `roverlink-core` maps these into
/// domain-appropriate variants.
#[derive(Debug, Error)]
pub enum NetError {
    // ── Station backend ─────────────────────────────────────────────
    /// The network management facility itself is missing or broken
    /// (nmcli not installed, NetworkManager not running). Fatal at
    /// startup, never retried.
    #[error("network management backend unavailable: {reason}")]
    StationUnavailable { reason: String },

    /// An nmcli invocation exited non-zero.
    #[error("nmcli {command} failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    /// Unexpected terse-output shape from nmcli.
    #[error("failed to parse nmcli output: {0}")]
    ParseFailed(String),

    /// The named interface does not exist or is not a wifi device.
    #[error("interface '{0}' not found")]
    LinkNotFound(String),

    // ── Association ─────────────────────────────────────────────────
    /// The access point refused the association (bad password, etc.)
    #[error("association rejected: {reason}")]
    AssociationRejected { reason: String },

    /// The association attempt did not complete in time.
    #[error("association timed out after {timeout:?}")]
    AssociationTimeout { timeout: Duration },

    // ── Gateway transport ───────────────────────────────────────────
    /// The device gateway could not be reached after retries.
    #[error("gateway unreachable: {reason}")]
    GatewayUnreachable { reason: String },

    /// Gateway URL construction failed.
    #[error("invalid gateway URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl NetError {
    /// Returns `true` if this error is an association timeout, the only
    /// association failure worth an automatic retry.
    pub fn is_association_timeout(&self) -> bool {
        matches!(self, Self::AssociationTimeout { .. })
    }

    /// Returns `true` if this is a transient transport error.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::AssociationTimeout { .. } | Self::GatewayUnreachable { .. }
        )
    }
}
