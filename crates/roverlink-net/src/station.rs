// ── Wireless station backend contract ──
//
// The `Station` trait is the seam between the connection engine and the
// host's network management facility. Production uses `NmcliStation`;
// tests substitute scripted fakes.

use async_trait::async_trait;

use crate::error::NetError;

/// A wifi-capable link as reported by the station backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StationLink {
    /// Interface name (e.g. "wlan1").
    pub name: String,
    /// Raw backend state string (e.g. "connected", "disconnected").
    pub state: String,
    /// Whether the adapter hangs off a USB bus. Secondary adapters are
    /// typically USB sticks, so this drives interface auto-detection.
    pub is_usb: bool,
}

/// An access point observed during a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessPoint {
    pub ssid: String,
    /// Signal strength percentage, 0..=100.
    pub signal: u8,
    /// Security descriptor ("WPA2", "WPA1 WPA2", "" for open).
    pub security: String,
}

/// Point-in-time link information for one interface.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkStatus {
    pub interface: String,
    /// Raw backend state (e.g. "100 (connected)").
    pub state: String,
    /// Active connection profile name, if associated.
    pub connection: Option<String>,
    /// Assigned IPv4 address in CIDR form (e.g. "192.168.4.2/24").
    pub ip_address: Option<String>,
    /// IPv4 gateway address — the device itself on an AP-mode network.
    pub gateway: Option<String>,
}

impl LinkStatus {
    /// NetworkManager encodes state as `"<code> (<label>)"`; codes at or
    /// above 100 mean fully activated.
    pub fn is_connected(&self) -> bool {
        self.state
            .split_whitespace()
            .next()
            .and_then(|code| code.parse::<u32>().ok())
            .is_some_and(|code| code >= 100)
    }

    /// The assigned address without its CIDR suffix.
    pub fn local_address(&self) -> Option<&str> {
        self.ip_address
            .as_deref()
            .map(|ip| ip.split('/').next().unwrap_or(ip))
    }
}

/// Backend operations against the host's network management facility.
///
/// Implementations must be safe to call concurrently; serialization of
/// connect/disconnect per interface is the caller's responsibility.
#[async_trait]
pub trait Station: Send + Sync {
    /// List all wifi-capable links on the system.
    async fn list_links(&self) -> Result<Vec<StationLink>, NetError>;

    /// Scan for access points visible to `interface`. Read-only.
    async fn scan(&self, interface: &str) -> Result<Vec<AccessPoint>, NetError>;

    /// Associate `interface` with the access point broadcasting `ssid`.
    async fn associate(&self, interface: &str, ssid: &str, psk: &str) -> Result<(), NetError>;

    /// Drop the current association. Succeeds if already disassociated.
    async fn disassociate(&self, interface: &str) -> Result<(), NetError>;

    /// Inspect the current link state of `interface`.
    async fn link_status(&self, interface: &str) -> Result<LinkStatus, NetError>;
}
