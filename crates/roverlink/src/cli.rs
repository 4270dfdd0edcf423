//! Clap derive structures for the `roverlink` CLI.
//!
//! Defines the complete command tree, global flags, and shared enums.

use std::net::IpAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// roverlink -- drive an IoT device through a secondary wifi interface
#[derive(Debug, Parser)]
#[command(
    name = "roverlink",
    version,
    about = "Bridge a secondary wifi interface to an IoT device gateway",
    long_about = "Connects a secondary (typically USB) wifi adapter to a device's\n\
        onboard access point while the primary network stays untouched, then\n\
        relays the device's live stream and control channel to the browser.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Secondary wireless interface (default: configured interface, else
    /// the first USB wifi adapter)
    #[arg(long, short = 'i', env = "ROVERLINK_INTERFACE", global = true)]
    pub interface: Option<String>,

    /// Output format
    #[arg(long, short = 'f', default_value = "table", global = true)]
    pub format: OutputFormat,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Plain text, one value per line (scripting)
    Plain,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List wifi-capable interfaces on this machine
    #[command(alias = "ifaces")]
    ListInterfaces,

    /// Scan for access points visible to the interface
    Scan,

    /// Connect the interface to an access point
    Connect {
        /// SSID of the device's access point
        ssid: String,

        /// Password; falls back to saved credentials when omitted
        #[arg(long, short)]
        password: Option<String>,

        /// Save the credentials after a successful connection
        #[arg(long, short)]
        save: bool,
    },

    /// Show the interface's connection status
    Status,

    /// Disconnect the interface from its network
    Disconnect,

    /// Run the browser-facing proxy server
    Serve {
        /// TCP port to listen on
        #[arg(long, short, default_value_t = 8080)]
        port: u16,

        /// Address to bind
        #[arg(long, default_value = "0.0.0.0")]
        bind: IpAddr,
    },

    /// Save network credentials without connecting
    SaveNetwork {
        /// SSID to save
        ssid: String,

        /// Password to save
        #[arg(long, short)]
        password: String,
    },

    /// Show the saved configuration (passwords masked)
    ShowConfig,

    /// Fetch the gateway's page over the pinned interface and save it
    FetchGateway {
        /// Output file
        #[arg(long, short, default_value = "gateway.html")]
        output: PathBuf,

        /// Custom URL instead of the gateway root
        #[arg(long, short)]
        url: Option<String>,
    },

    /// Generate shell completions
    Completions {
        /// Target shell
        shell: clap_complete::Shell,
    },
}
