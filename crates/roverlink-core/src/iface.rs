// ── Interface connection controller ──
//
// Owns the lifecycle of each named wireless interface. All state
// transitions for one interface run under that interface's lock, so
// concurrent connect calls can never race the underlying association.
// The in-memory snapshot is the single source of truth for `status`;
// `sync` reconciles it against the station backend on demand.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};

use roverlink_net::{AccessPoint, LinkStatus, NetError, Station, StationLink};

use crate::credentials::{CredentialStore, NetworkCredential};
use crate::error::CoreError;
use crate::model::{Interface, InterfaceState};

/// Bounded association retry: up to 3 attempts, base delay doubling.
/// Only timeouts are retried; a rejection fails immediately.
const ASSOCIATION_ATTEMPTS: u32 = 3;
const ASSOCIATION_BACKOFF: Duration = Duration::from_millis(500);

/// Parameters for one connect call.
#[derive(Debug, Clone)]
pub struct ConnectRequest {
    pub interface: String,
    pub ssid: String,
    /// Explicit password. When absent, saved credentials are consulted;
    /// an explicit value always wins over a saved one.
    pub password: Option<String>,
    /// Persist the credential after a successful association.
    pub save: bool,
}

/// Manages association state for any number of named interfaces.
///
/// Cheaply cloneable via `Arc`. One lock and one observable snapshot
/// exist per interface name, created lazily on first use.
#[derive(Clone)]
pub struct InterfaceController {
    inner: Arc<ControllerInner>,
}

struct ControllerInner {
    station: Arc<dyn Station>,
    store: Option<Arc<dyn CredentialStore>>,
    entries: DashMap<String, Arc<InterfaceEntry>>,
}

struct InterfaceEntry {
    /// Single-writer lock serializing transitions on this interface.
    lock: Mutex<()>,
    state: watch::Sender<Interface>,
}

impl InterfaceController {
    pub fn new(station: Arc<dyn Station>, store: Option<Arc<dyn CredentialStore>>) -> Self {
        Self {
            inner: Arc::new(ControllerInner {
                station,
                store,
                entries: DashMap::new(),
            }),
        }
    }

    fn entry(&self, interface: &str) -> Arc<InterfaceEntry> {
        self.inner
            .entries
            .entry(interface.to_owned())
            .or_insert_with(|| {
                let (state, _) = watch::channel(Interface::disconnected(interface));
                Arc::new(InterfaceEntry {
                    lock: Mutex::new(()),
                    state,
                })
            })
            .clone()
    }

    // ── Read-only operations ─────────────────────────────────────────

    /// Current snapshot for `interface`. Purely a local state read.
    pub fn status(&self, interface: &str) -> Interface {
        self.entry(interface).state.borrow().clone()
    }

    /// Subscribe to snapshot changes for `interface`.
    pub fn watch(&self, interface: &str) -> watch::Receiver<Interface> {
        self.entry(interface).state.subscribe()
    }

    /// All wifi-capable links known to the station backend.
    pub async fn list_links(&self) -> Result<Vec<StationLink>, CoreError> {
        Ok(self.inner.station.list_links().await?)
    }

    /// Scan for access points. Refused while the interface is mid-transition.
    pub async fn scan(&self, interface: &str) -> Result<Vec<AccessPoint>, CoreError> {
        let entry = self.entry(interface);
        if entry.state.borrow().state == InterfaceState::Connecting {
            return Err(CoreError::Busy {
                interface: interface.to_owned(),
            });
        }
        Ok(self.inner.station.scan(interface).await?)
    }

    /// Reconcile the in-memory snapshot with the station backend.
    ///
    /// Skipped (returning the current snapshot) if a transition holds the
    /// interface lock. A sticky `Failed` state is preserved while the
    /// link stays down so the last error remains visible.
    pub async fn sync(&self, interface: &str) -> Result<Interface, CoreError> {
        let entry = self.entry(interface);
        let Ok(_guard) = entry.lock.try_lock() else {
            return Ok(entry.state.borrow().clone());
        };

        let link = self.inner.station.link_status(interface).await?;
        let current = entry.state.borrow().clone();
        let snapshot = if link.is_connected() {
            connected_snapshot(interface, &link)
        } else if current.state == InterfaceState::Failed {
            current
        } else {
            Interface::disconnected(interface)
        };

        entry.state.send_replace(snapshot.clone());
        Ok(snapshot)
    }

    // ── Transitions ──────────────────────────────────────────────────

    /// Connect `interface` to the access point broadcasting `ssid`.
    ///
    /// Fails fast with `AlreadyInProgress` if another connect holds this
    /// interface's lock. Association timeouts are retried with doubling
    /// backoff; a rejection surfaces immediately. The credential is
    /// persisted only after success, and only when requested.
    pub async fn connect(&self, request: ConnectRequest) -> Result<Interface, CoreError> {
        let entry = self.entry(&request.interface);
        let Ok(_guard) = entry.lock.try_lock() else {
            return Err(CoreError::AlreadyInProgress {
                interface: request.interface.clone(),
            });
        };

        let password = self.resolve_password(&request)?;

        entry.state.send_replace(Interface {
            name: request.interface.clone(),
            state: InterfaceState::Connecting,
            ssid: Some(request.ssid.clone()),
            ip_address: None,
            gateway: None,
            last_error: None,
        });

        // Already associated with the requested network? Then there is
        // nothing to negotiate — record addresses and finish.
        if let Ok(link) = self.inner.station.link_status(&request.interface).await {
            if link.is_connected() && link.connection.as_deref() == Some(request.ssid.as_str()) {
                debug!(
                    interface = %request.interface,
                    ssid = %request.ssid,
                    "already associated, skipping negotiation"
                );
                return self.finish_connect(&entry, &request, &password, link);
            }
        }

        let mut backoff = ASSOCIATION_BACKOFF;
        let mut attempt = 0u32;
        let failure = loop {
            attempt += 1;
            match self
                .inner
                .station
                .associate(&request.interface, &request.ssid, &password)
                .await
            {
                Ok(()) => break None,
                Err(e) if e.is_association_timeout() && attempt < ASSOCIATION_ATTEMPTS => {
                    warn!(
                        interface = %request.interface,
                        ssid = %request.ssid,
                        attempt,
                        "association timed out, retrying in {backoff:?}"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
                Err(e) => break Some(e),
            }
        };

        if let Some(err) = failure {
            let mapped = match err {
                NetError::AssociationTimeout { .. } => {
                    CoreError::AssociationTimeout { attempts: attempt }
                }
                other => other.into(),
            };
            entry.state.send_replace(Interface {
                name: request.interface.clone(),
                state: InterfaceState::Failed,
                ssid: Some(request.ssid.clone()),
                ip_address: None,
                gateway: None,
                last_error: Some(mapped.to_string()),
            });
            return Err(mapped);
        }

        let link = self
            .inner
            .station
            .link_status(&request.interface)
            .await
            .unwrap_or_else(|e| {
                warn!(interface = %request.interface, error = %e, "status read after association failed");
                LinkStatus::default()
            });

        self.finish_connect(&entry, &request, &password, link)
    }

    /// Disconnect `interface`. Idempotent: a no-op when already
    /// disconnected.
    pub async fn disconnect(&self, interface: &str) -> Result<Interface, CoreError> {
        let entry = self.entry(interface);
        let _guard = entry.lock.lock().await;

        if entry.state.borrow().state == InterfaceState::Disconnected {
            return Ok(entry.state.borrow().clone());
        }

        self.inner.station.disassociate(interface).await?;
        let snapshot = Interface::disconnected(interface);
        entry.state.send_replace(snapshot.clone());
        info!(interface, "disconnected");
        Ok(snapshot)
    }

    // ── Helpers ──────────────────────────────────────────────────────

    fn resolve_password(&self, request: &ConnectRequest) -> Result<String, CoreError> {
        if let Some(ref password) = request.password {
            return Ok(password.clone());
        }

        if let Some(ref store) = self.inner.store {
            if let Some(saved) = store.find(&request.ssid, &request.interface)? {
                debug!(ssid = %request.ssid, "using saved credentials");
                return Ok(saved.password);
            }
        }

        Err(CoreError::NoCredentials {
            ssid: request.ssid.clone(),
        })
    }

    fn finish_connect(
        &self,
        entry: &InterfaceEntry,
        request: &ConnectRequest,
        password: &str,
        link: LinkStatus,
    ) -> Result<Interface, CoreError> {
        let snapshot = Interface {
            name: request.interface.clone(),
            state: InterfaceState::Connected,
            ssid: Some(request.ssid.clone()),
            ip_address: link.ip_address,
            gateway: link.gateway,
            last_error: None,
        };
        entry.state.send_replace(snapshot.clone());
        info!(
            interface = %request.interface,
            ssid = %request.ssid,
            gateway = snapshot.gateway.as_deref().unwrap_or("-"),
            "connected"
        );

        if request.save {
            if let Some(ref store) = self.inner.store {
                store.save(&NetworkCredential {
                    ssid: request.ssid.clone(),
                    password: password.to_owned(),
                    interface: Some(request.interface.clone()),
                })?;
                debug!(ssid = %request.ssid, "credentials saved");
            }
        }

        Ok(snapshot)
    }
}

fn connected_snapshot(interface: &str, link: &LinkStatus) -> Interface {
    Interface {
        name: interface.to_owned(),
        state: InterfaceState::Connected,
        ssid: link.connection.clone(),
        ip_address: link.ip_address.clone(),
        gateway: link.gateway.clone(),
        last_error: None,
    }
}
