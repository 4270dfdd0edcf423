//! The `serve` command: wire the engine together and run the proxy.

use std::net::IpAddr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use roverlink_core::{
    CommandSink, ControlConfig, ControlTranslator, InterfaceState, MediaSource, RelayConfig,
    StreamRelay,
};
use roverlink_net::{GatewayClient, GatewayConfig};
use roverlink_proxy::{ProxyConfig, ProxyState};

use crate::cli::GlobalOpts;
use crate::error::CliError;
use crate::output;

use super::{controller, resolve_interface};

pub async fn handle(global: &GlobalOpts, port: u16, bind: IpAddr) -> Result<(), CliError> {
    let controller = controller();
    let interface = resolve_interface(global, &controller).await?;

    // The proxy needs a live association with a gateway address before
    // it can pin egress to the secondary interface.
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

    let gateway_config = GatewayConfig::for_gateway(&gateway_addr, local_address)
        .map_err(|e| CliError::Internal(e.to_string()))?;
    let gateway = Arc::new(GatewayClient::new(gateway_config).map_err(|e| {
        CliError::GatewayUnreachable {
            reason: e.to_string(),
        }
    })?);

    let media: Arc<dyn MediaSource> = gateway.clone();
    let sink: Arc<dyn CommandSink> = gateway.clone();
    let state = ProxyState {
        relay: StreamRelay::new(media, RelayConfig::default()),
        translator: ControlTranslator::new(sink, ControlConfig::default()),
        gateway,
    };

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            signal_cancel.cancel();
        }
    });

    output::note(
        &format!(
            "Serving at http://localhost:{port} (gateway {gateway_addr} via {interface})"
        ),
        global.quiet,
    );
    roverlink_proxy::serve(&ProxyConfig { bind, port }, state, cancel).await?;
    Ok(())
}
