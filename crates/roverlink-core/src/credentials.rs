// ── Credential store contract ──
//
// The engine reads and writes saved network credentials through this
// seam; roverlink-config provides the TOML-backed implementation.

use crate::error::CoreError;

/// A saved network credential, unique by (ssid, interface).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkCredential {
    pub ssid: String,
    pub password: String,
    /// Preferred interface, or `None` for any.
    pub interface: Option<String>,
}

/// Key-value persistence for network credentials.
///
/// Saves are infrequent and serialized with `connect`, so implementations
/// need not handle concurrent writers.
pub trait CredentialStore: Send + Sync {
    /// Look up a credential for `ssid`, preferring an entry bound to
    /// `interface` over an unbound one.
    fn find(&self, ssid: &str, interface: &str) -> Result<Option<NetworkCredential>, CoreError>;

    /// Insert or overwrite the entry for the credential's (ssid, interface).
    fn save(&self, credential: &NetworkCredential) -> Result<(), CoreError>;
}
