//! Command dispatch: bridges CLI args -> engine calls -> output formatting.

pub mod config_cmd;
pub mod fetch;
pub mod link;
pub mod serve;

use std::sync::Arc;

use roverlink_config::SavedNetworks;
use roverlink_core::InterfaceController;
use roverlink_net::NmcliStation;

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

/// Dispatch a station-backed command to the appropriate handler.
pub async fn dispatch(cmd: Command, global: &GlobalOpts) -> Result<(), CliError> {
    match cmd {
        Command::ListInterfaces => link::list_interfaces(global).await,
        Command::Scan => link::scan(global).await,
        Command::Connect {
            ssid,
            password,
            save,
        } => link::connect(global, ssid, password, save).await,
        Command::Status => link::status(global).await,
        Command::Disconnect => link::disconnect(global).await,
        Command::Serve { port, bind } => serve::handle(global, port, bind).await,
        Command::FetchGateway { output, url } => {
            fetch::handle(global, &output, url.as_deref()).await
        }
        // Config and completions commands are handled before dispatch
        Command::SaveNetwork { .. } | Command::ShowConfig | Command::Completions { .. } => {
            unreachable!()
        }
    }
}

/// Build the production engine: nmcli station + file-backed credentials.
pub fn controller() -> InterfaceController {
    InterfaceController::new(
        Arc::new(NmcliStation::new()),
        Some(Arc::new(SavedNetworks::new())),
    )
}

/// Resolve which interface to operate on: explicit flag, then the
/// configured default, then the first USB wifi adapter.
pub async fn resolve_interface(
    global: &GlobalOpts,
    controller: &InterfaceController,
) -> Result<String, CliError> {
    let links = controller.list_links().await?;

    if let Some(ref name) = global.interface {
        return if links.iter().any(|l| &l.name == name) {
            Ok(name.clone())
        } else {
            Err(CliError::InterfaceNotFound { name: name.clone() })
        };
    }

    let config = roverlink_config::load_config()?;
    if let Some(name) = config.default_interface {
        return if links.iter().any(|l| l.name == name) {
            Ok(name)
        } else {
            Err(CliError::InterfaceNotFound { name })
        };
    }

    links
        .into_iter()
        .find(|l| l.is_usb)
        .map(|l| l.name)
        .ok_or(CliError::NoUsbInterface)
}
