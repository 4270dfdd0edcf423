// ── NetworkManager (nmcli) station backend ──
//
// Shells out to `nmcli` with terse output (`-t`) and parses the
// colon-separated key:value lines. Association runs under a hard
// timeout so a wedged NetworkManager surfaces as a timeout instead of
// hanging the connect state machine.

use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::NetError;
use crate::station::{AccessPoint, LinkStatus, Station, StationLink};

/// How long a scan is given to settle before listing results.
const SCAN_SETTLE: Duration = Duration::from_millis(500);

/// Hard ceiling on a single association attempt.
const ASSOCIATE_TIMEOUT: Duration = Duration::from_secs(25);

/// `Station` backed by NetworkManager's `nmcli` tool.
#[derive(Debug, Clone)]
pub struct NmcliStation {
    binary: String,
}

impl NmcliStation {
    pub fn new() -> Self {
        Self {
            binary: "nmcli".into(),
        }
    }

    /// Use a different binary name/path (tests, unusual installs).
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Run nmcli with `args`, returning stdout on success.
    async fn run(&self, args: &[&str]) -> Result<String, NetError> {
        debug!(binary = %self.binary, ?args, "running nmcli");

        let output = Command::new(&self.binary)
            .args(args)
            .output()
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => NetError::StationUnavailable {
                    reason: format!("'{}' not found in PATH", self.binary),
                },
                _ => NetError::StationUnavailable {
                    reason: e.to_string(),
                },
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_owned();
            let command = args.first().copied().unwrap_or_default().to_owned();
            return Err(NetError::CommandFailed { command, stderr });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Default for NmcliStation {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Station for NmcliStation {
    async fn list_links(&self) -> Result<Vec<StationLink>, NetError> {
        let stdout = self
            .run(&["-t", "-f", "DEVICE,TYPE,STATE", "device"])
            .await?;
        Ok(parse_links(&stdout, is_usb_interface))
    }

    async fn scan(&self, interface: &str) -> Result<Vec<AccessPoint>, NetError> {
        // Trigger a fresh scan; failures here are non-fatal since the
        // list command below returns cached results anyway.
        if let Err(e) = self
            .run(&["device", "wifi", "rescan", "ifname", interface])
            .await
        {
            warn!(interface, error = %e, "rescan request failed, listing cached results");
        }
        tokio::time::sleep(SCAN_SETTLE).await;

        let stdout = self
            .run(&[
                "-t",
                "-f",
                "SSID,SIGNAL,SECURITY",
                "device",
                "wifi",
                "list",
                "ifname",
                interface,
            ])
            .await?;
        Ok(parse_access_points(&stdout))
    }

    async fn associate(&self, interface: &str, ssid: &str, psk: &str) -> Result<(), NetError> {
        let args = [
            "device", "wifi", "connect", ssid, "password", psk, "ifname", interface,
        ];
        let attempt = self.run(&args);

        match tokio::time::timeout(ASSOCIATE_TIMEOUT, attempt).await {
            Err(_) => Err(NetError::AssociationTimeout {
                timeout: ASSOCIATE_TIMEOUT,
            }),
            Ok(Err(NetError::CommandFailed { stderr, .. })) => {
                Err(classify_associate_failure(&stderr))
            }
            Ok(result) => result.map(|_| ()),
        }
    }

    async fn disassociate(&self, interface: &str) -> Result<(), NetError> {
        match self.run(&["device", "disconnect", interface]).await {
            Ok(_) => Ok(()),
            // nmcli refuses to disconnect an already-inactive device;
            // that is success for our idempotent contract.
            Err(NetError::CommandFailed { stderr, .. })
                if stderr.contains("not active") || stderr.contains("not connected") =>
            {
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn link_status(&self, interface: &str) -> Result<LinkStatus, NetError> {
        match self.run(&["-t", "device", "show", interface]).await {
            Ok(stdout) => Ok(parse_link_status(interface, &stdout)),
            Err(NetError::CommandFailed { stderr, .. }) if stderr.contains("not found") => {
                Err(NetError::LinkNotFound(interface.to_owned()))
            }
            Err(e) => Err(e),
        }
    }
}

// ── Output parsing ──────────────────────────────────────────────────

/// Parse `nmcli -t -f DEVICE,TYPE,STATE device` output, keeping only
/// wifi links. `usb_probe` is injected so the sysfs lookup can be
/// stubbed in tests.
fn parse_links(stdout: &str, usb_probe: impl Fn(&str) -> bool) -> Vec<StationLink> {
    stdout
        .lines()
        .filter_map(|line| {
            let mut parts = line.splitn(3, ':');
            let name = parts.next()?;
            let ty = parts.next()?;
            let state = parts.next()?;
            (ty == "wifi").then(|| StationLink {
                name: name.to_owned(),
                state: state.to_owned(),
                is_usb: usb_probe(name),
            })
        })
        .collect()
}

/// Parse `nmcli -t -f SSID,SIGNAL,SECURITY device wifi list` output.
/// Hidden networks are skipped, duplicate SSIDs keep the strongest
/// entry, and results are sorted by signal descending.
fn parse_access_points(stdout: &str) -> Vec<AccessPoint> {
    let mut points: Vec<AccessPoint> = Vec::new();

    for line in stdout.lines() {
        let mut parts = line.splitn(3, ':');
        let (Some(ssid), Some(signal), Some(security)) =
            (parts.next(), parts.next(), parts.next())
        else {
            continue;
        };
        if ssid.is_empty() {
            continue;
        }

        let signal: u8 = signal.parse().unwrap_or(0);
        match points.iter_mut().find(|p| p.ssid == ssid) {
            Some(existing) => existing.signal = existing.signal.max(signal),
            None => points.push(AccessPoint {
                ssid: ssid.to_owned(),
                signal,
                security: security.to_owned(),
            }),
        }
    }

    points.sort_by(|a, b| b.signal.cmp(&a.signal));
    points
}

/// Parse `nmcli -t device show <iface>` terse output into a status.
/// Values may themselves contain colons, so splitting is first-colon only.
fn parse_link_status(interface: &str, stdout: &str) -> LinkStatus {
    let mut status = LinkStatus {
        interface: interface.to_owned(),
        state: "unknown".into(),
        ..LinkStatus::default()
    };

    for line in stdout.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let present = !value.is_empty() && value != "--";

        match key {
            "GENERAL.STATE" => status.state = value.to_owned(),
            "GENERAL.CONNECTION" if present => status.connection = Some(value.to_owned()),
            "IP4.ADDRESS[1]" if present => status.ip_address = Some(value.to_owned()),
            "IP4.GATEWAY" if present => status.gateway = Some(value.to_owned()),
            _ => {}
        }
    }

    status
}

/// Distinguish a credential rejection from everything else. NetworkManager
/// reports bad passwords as "Secrets were required" and activation
/// failures carry numeric codes in parentheses.
fn classify_associate_failure(stderr: &str) -> NetError {
    let lowered = stderr.to_lowercase();
    if lowered.contains("secrets were required")
        || lowered.contains("invalid password")
        || lowered.contains("802-11-wireless-security")
    {
        NetError::AssociationRejected {
            reason: stderr.to_owned(),
        }
    } else if lowered.contains("timeout") || lowered.contains("timed out") {
        NetError::AssociationTimeout {
            timeout: ASSOCIATE_TIMEOUT,
        }
    } else {
        NetError::AssociationRejected {
            reason: stderr.to_owned(),
        }
    }
}

/// A link is considered USB when its sysfs device path resolves through
/// a usb bus segment, with the uevent file as a fallback probe.
fn is_usb_interface(interface: &str) -> bool {
    let device = format!("/sys/class/net/{interface}/device");
    let path = Path::new(&device);
    if !path.exists() {
        return false;
    }

    if let Ok(resolved) = std::fs::read_link(path) {
        if let Some(resolved) = resolved.to_str() {
            return resolved.contains("usb");
        }
    }

    std::fs::read_to_string(format!("{device}/uevent"))
        .map(|content| content.contains("usb"))
        .unwrap_or(false)
}
