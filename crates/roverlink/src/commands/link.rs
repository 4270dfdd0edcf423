//! Interface lifecycle command handlers: list, scan, connect, status,
//! disconnect.

use serde::Serialize;
use tabled::Tabled;

use roverlink_core::{ConnectRequest, CoreError, Interface, InterfaceState};

use crate::cli::GlobalOpts;
use crate::error::CliError;
use crate::output;

use super::{controller, resolve_interface};

// ── Table rows ──────────────────────────────────────────────────────

#[derive(Tabled, Serialize)]
struct LinkRow {
    #[tabled(rename = "INTERFACE")]
    name: String,
    #[tabled(rename = "STATE")]
    state: String,
    #[tabled(rename = "TYPE")]
    kind: String,
}

#[derive(Tabled, Serialize)]
struct AccessPointRow {
    #[tabled(rename = "SSID")]
    ssid: String,
    #[tabled(rename = "SIGNAL")]
    signal: String,
    #[tabled(rename = "SECURITY")]
    security: String,
}

fn status_detail(iface: &Interface) -> String {
    let mut lines = vec![
        format!("Interface: {}", iface.name),
        format!("State:     {}", iface.state),
    ];
    lines.push(format!(
        "Network:   {}",
        iface.ssid.as_deref().unwrap_or("(none)")
    ));
    if let Some(ref ip) = iface.ip_address {
        lines.push(format!("IP:        {ip}"));
    }
    if let Some(ref gw) = iface.gateway {
        lines.push(format!("Gateway:   {gw}"));
    }
    if let Some(ref err) = iface.last_error {
        lines.push(format!("Error:     {err}"));
    }
    lines.join("\n")
}

// ── Handlers ────────────────────────────────────────────────────────

pub async fn list_interfaces(global: &GlobalOpts) -> Result<(), CliError> {
    let links = controller().list_links().await?;
    if links.is_empty() {
        output::note("No wifi interfaces found.", global.quiet);
        return Ok(());
    }

    let rows: Vec<LinkRow> = links
        .into_iter()
        .map(|l| LinkRow {
            name: l.name,
            state: l.state,
            kind: if l.is_usb { "USB" } else { "Built-in" }.into(),
        })
        .collect();
    let out = output::render_list(&global.format, &rows, |r| r.name.clone());
    output::print_output(&out, global.quiet);
    Ok(())
}

pub async fn scan(global: &GlobalOpts) -> Result<(), CliError> {
    let controller = controller();
    let interface = resolve_interface(global, &controller).await?;
    output::note(&format!("Scanning on interface {interface}..."), global.quiet);

    let points = controller.scan(&interface).await?;
    if points.is_empty() {
        output::note("No networks found.", global.quiet);
        return Ok(());
    }

    let rows: Vec<AccessPointRow> = points
        .into_iter()
        .map(|p| AccessPointRow {
            signal: format!("{:>3}% {}", p.signal, output::signal_bar(p.signal)),
            ssid: p.ssid,
            security: p.security,
        })
        .collect();
    let out = output::render_list(&global.format, &rows, |r| r.ssid.clone());
    output::print_output(&out, global.quiet);
    Ok(())
}

pub async fn connect(
    global: &GlobalOpts,
    ssid: String,
    password: Option<String>,
    save: bool,
) -> Result<(), CliError> {
    let controller = controller();
    let interface = resolve_interface(global, &controller).await?;
    output::note(
        &format!("Connecting to '{ssid}' on interface {interface}..."),
        global.quiet,
    );

    let snapshot = controller
        .connect(ConnectRequest {
            interface,
            ssid: ssid.clone(),
            password,
            save,
        })
        .await
        .map_err(|e| match e {
            CoreError::AssociationRejected { reason } => {
                CliError::ConnectionFailed { ssid: ssid.clone(), reason }
            }
            other => other.into(),
        })?;

    if save {
        output::note("Credentials saved to config.", global.quiet);
    }

    let out = output::render_single(&global.format, &snapshot, status_detail, |s| s.name.clone());
    output::print_output(&out, global.quiet);
    Ok(())
}

pub async fn status(global: &GlobalOpts) -> Result<(), CliError> {
    let controller = controller();
    let interface = resolve_interface(global, &controller).await?;
    let snapshot = controller.sync(&interface).await?;

    let out = output::render_single(&global.format, &snapshot, status_detail, |s| {
        s.state.to_string()
    });
    output::print_output(&out, global.quiet);
    Ok(())
}

pub async fn disconnect(global: &GlobalOpts) -> Result<(), CliError> {
    let controller = controller();
    let interface = resolve_interface(global, &controller).await?;

    // Reconcile first so an association made out-of-band is torn down
    // rather than skipped by the idempotency fast path.
    let current = controller.sync(&interface).await?;
    if current.state == InterfaceState::Disconnected {
        output::note(&format!("Interface {interface} already disconnected."), global.quiet);
        return Ok(());
    }

    controller.disconnect(&interface).await?;
    output::note(&format!("Interface {interface} disconnected."), global.quiet);
    Ok(())
}
