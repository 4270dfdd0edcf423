// roverlink-net: network plumbing for the roverlink bridge.
//
// Two concerns live here, both deliberately free of domain logic:
//
// - the `Station` backend: association, scanning, and link inspection for
//   a named wireless interface, implemented against NetworkManager's
//   `nmcli` tool;
// - the `GatewayClient`: an HTTP client whose egress is pinned to the
//   secondary interface's local address, so device traffic never leaks
//   onto the default route.
//
// roverlink-core builds the connection/relay engine on top of these.

pub mod error;
pub mod gateway;
pub mod nmcli;
pub mod station;

// ── Primary re-exports ──────────────────────────────────────────────
pub use error::NetError;
pub use gateway::{GatewayClient, GatewayConfig, GatewayResponse, MediaStream};
pub use nmcli::NmcliStation;
pub use station::{AccessPoint, LinkStatus, Station, StationLink};
