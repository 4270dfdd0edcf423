//! Configuration command handlers: save-network, show-config.
//!
//! These operate purely on the config file and never touch the station
//! backend.

use serde::Serialize;
use tabled::Tabled;

use roverlink_config::{Config, NetworkEntry};

use crate::cli::GlobalOpts;
use crate::error::CliError;
use crate::output;

#[derive(Tabled, Serialize)]
struct NetworkRow {
    #[tabled(rename = "SSID")]
    ssid: String,
    #[tabled(rename = "INTERFACE")]
    interface: String,
    #[tabled(rename = "PASSWORD")]
    password: String,
}

pub fn save_network(global: &GlobalOpts, ssid: String, password: String) -> Result<(), CliError> {
    let mut config = roverlink_config::load_config()?;
    config.upsert_network(NetworkEntry {
        ssid: ssid.clone(),
        password,
        interface: global.interface.clone(),
    });
    roverlink_config::save_config(&config)?;

    let path = roverlink_config::config_path();
    output::note(
        &format!("Saved network '{ssid}' to {}", path.display()),
        global.quiet,
    );
    Ok(())
}

pub fn show_config(global: &GlobalOpts) -> Result<(), CliError> {
    let path = roverlink_config::config_path();
    let config: Config = roverlink_config::load_config()?;

    output::note(&format!("Config file: {}", path.display()), global.quiet);
    if let Some(ref iface) = config.default_interface {
        output::note(&format!("Default interface: {iface}"), global.quiet);
    }

    if config.networks.is_empty() {
        output::note("No saved networks.", global.quiet);
        return Ok(());
    }

    let rows: Vec<NetworkRow> = config
        .networks
        .iter()
        .map(|n| NetworkRow {
            ssid: n.ssid.clone(),
            interface: n.interface.clone().unwrap_or_else(|| "-".into()),
            password: output::mask_password(&n.password),
        })
        .collect();
    let out = output::render_list(&global.format, &rows, |r| r.ssid.clone());
    output::print_output(&out, global.quiet);
    Ok(())
}
