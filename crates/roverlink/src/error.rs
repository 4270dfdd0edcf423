//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` variants into user-facing errors
//! with actionable help text and stable exit codes.

use miette::Diagnostic;
use thiserror::Error;

use roverlink_config::ConfigError;
use roverlink_core::CoreError;

/// Exit codes for process termination.
#[allow(dead_code)]
pub mod exit_code {
    pub const SUCCESS: i32 = 0;
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const CONNECTION: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const TIMEOUT: i32 = 5;
    pub const CONFIG: i32 = 6;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Interfaces ───────────────────────────────────────────────────

    #[error("interface '{name}' not found")]
    #[diagnostic(
        code(roverlink::interface_not_found),
        help("Run: roverlink list-interfaces to see available wifi interfaces")
    )]
    InterfaceNotFound { name: String },

    #[error("no USB wifi interface found")]
    #[diagnostic(
        code(roverlink::no_usb_interface),
        help(
            "Plug in the secondary USB wifi adapter, or pick an interface\n\
             explicitly with --interface / ROVERLINK_INTERFACE."
        )
    )]
    NoUsbInterface,

    #[error("interface '{interface}' is not connected")]
    #[diagnostic(
        code(roverlink::not_connected),
        help("Connect first: roverlink connect <ssid> --password <p> --interface {interface}")
    )]
    NotConnected { interface: String },

    #[error("interface '{interface}' has no gateway address")]
    #[diagnostic(
        code(roverlink::no_gateway),
        help(
            "The access point did not hand out a gateway. Check that the\n\
             device's AP is up and DHCP completed (roverlink status)."
        )
    )]
    NoGateway { interface: String },

    // ── Connection lifecycle ─────────────────────────────────────────

    #[error("could not connect to '{ssid}': {reason}")]
    #[diagnostic(
        code(roverlink::connection_failed),
        help(
            "Check the password and that the access point is in range\n\
             (roverlink scan)."
        )
    )]
    ConnectionFailed { ssid: String, reason: String },

    #[error("association timed out after {attempts} attempt(s)")]
    #[diagnostic(
        code(roverlink::association_timeout),
        help("The access point did not answer in time. Move closer and retry.")
    )]
    AssociationTimeout { attempts: u32 },

    #[error("a connect is already in progress on '{interface}'")]
    #[diagnostic(code(roverlink::already_in_progress))]
    AlreadyInProgress { interface: String },

    #[error("interface '{interface}' is busy with a state transition")]
    #[diagnostic(
        code(roverlink::busy),
        help("Wait for the in-flight connect to finish and retry.")
    )]
    Busy { interface: String },

    #[error("no password given and no saved credentials for '{ssid}'")]
    #[diagnostic(
        code(roverlink::no_credentials),
        help(
            "Pass --password, or save one first:\n\
             roverlink save-network {ssid} --password <p>"
        )
    )]
    NoCredentials { ssid: String },

    // ── Transport ────────────────────────────────────────────────────

    #[error("gateway unreachable: {reason}")]
    #[diagnostic(
        code(roverlink::gateway_unreachable),
        help("Check the wifi association (roverlink status) and that the device is powered.")
    )]
    GatewayUnreachable { reason: String },

    #[error("network management backend unavailable: {reason}")]
    #[diagnostic(
        code(roverlink::station_unavailable),
        help("roverlink drives NetworkManager via nmcli. Install NetworkManager and ensure nmcli is in PATH.")
    )]
    StationUnavailable { reason: String },

    // ── Configuration ────────────────────────────────────────────────

    #[error("configuration error")]
    #[diagnostic(code(roverlink::config))]
    Config(#[from] ConfigError),

    // ── IO / internal ────────────────────────────────────────────────

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    #[diagnostic(code(roverlink::internal))]
    Internal(String),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. }
            | Self::NotConnected { .. }
            | Self::NoGateway { .. }
            | Self::GatewayUnreachable { .. } => exit_code::CONNECTION,
            Self::InterfaceNotFound { .. } | Self::NoUsbInterface => exit_code::NOT_FOUND,
            Self::AssociationTimeout { .. } => exit_code::TIMEOUT,
            Self::NoCredentials { .. } => exit_code::USAGE,
            Self::Config(_) => exit_code::CONFIG,
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::InterfaceNotFound(name) => CliError::InterfaceNotFound { name },

            CoreError::AlreadyInProgress { interface } => {
                CliError::AlreadyInProgress { interface }
            }

            CoreError::Busy { interface } => CliError::Busy { interface },

            CoreError::AssociationRejected { reason } => CliError::ConnectionFailed {
                ssid: "<requested network>".into(),
                reason,
            },

            CoreError::AssociationTimeout { attempts } => {
                CliError::AssociationTimeout { attempts }
            }

            CoreError::NoCredentials { ssid } => CliError::NoCredentials { ssid },

            CoreError::NoGateway { interface } => CliError::NoGateway { interface },

            CoreError::GatewayUnreachable { reason } => CliError::GatewayUnreachable { reason },

            CoreError::StationUnavailable { reason } => CliError::StationUnavailable { reason },

            CoreError::StationCommand(message)
            | CoreError::Store(message)
            | CoreError::Internal(message) => CliError::Internal(message),
        }
    }
}
