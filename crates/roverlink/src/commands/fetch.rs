//! The `fetch-gateway` command: grab the gateway's page over the pinned
//! interface and save it locally, for debugging or capturing the
//! device's own control page.

use std::net::IpAddr;
use std::path::Path;

use url::Url;

use roverlink_core::InterfaceState;
use roverlink_net::{GatewayClient, GatewayConfig};

use crate::cli::GlobalOpts;
use crate::error::CliError;
use crate::output;

use super::{controller, resolve_interface};

pub async fn handle(global: &GlobalOpts, output_path: &Path, url: Option<&str>) -> Result<(), CliError> {
    let controller = controller();
    let interface = resolve_interface(global, &controller).await?;

    let snapshot = controller.sync(&interface).await?;
    if snapshot.state != InterfaceState::Connected {
        return Err(CliError::NotConnected { interface });
    }
    let gateway_addr = snapshot
        .gateway
        .clone()
        .ok_or_else(|| CliError::NoGateway {
            interface: interface.clone(),
        })?;
    let local_address: Option<IpAddr> =
        snapshot.local_address().and_then(|ip| ip.parse().ok());

    let config = GatewayConfig::for_gateway(&gateway_addr, local_address)
        .map_err(|e| CliError::Internal(e.to_string()))?;
    let client = GatewayClient::new(config).map_err(|e| CliError::GatewayUnreachable {
        reason: e.to_string(),
    })?;

    let fetch_url: Url = match url {
        Some(custom) => custom
            .parse()
            .map_err(|e| CliError::Internal(format!("invalid URL '{custom}': {e}")))?,
        None => client.base_url().clone(),
    };

    output::note(&format!("Fetching {fetch_url} ..."), global.quiet);
    let content = client
        .fetch_text(&fetch_url)
        .await
        .map_err(|e| CliError::GatewayUnreachable {
            reason: e.to_string(),
        })?;

    tokio::fs::write(output_path, &content).await?;
    output::note(
        &format!("Saved {} bytes to {}", content.len(), output_path.display()),
        global.quiet,
    );
    Ok(())
}
