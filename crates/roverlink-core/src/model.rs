// ── Domain model ──
//
// Interface lifecycle snapshots, relayed media frames, and the canonical
// control command vocabulary shared by the translator and the gateway
// command sink.

use std::fmt;
use std::time::Instant;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

// ── Interface lifecycle ─────────────────────────────────────────────

/// Lifecycle state of one managed wireless interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InterfaceState {
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

impl fmt::Display for InterfaceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Snapshot of one interface's association state. Exactly one live value
/// exists per interface name, mutated only by the `InterfaceController`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Interface {
    pub name: String,
    pub state: InterfaceState,
    /// SSID of the associated (or in-progress) network.
    pub ssid: Option<String>,
    /// Assigned IPv4 address in CIDR form.
    pub ip_address: Option<String>,
    /// IPv4 gateway — the device endpoint on an AP-mode network.
    pub gateway: Option<String>,
    /// Reason for the most recent failure, if any.
    pub last_error: Option<String>,
}

impl Interface {
    pub fn disconnected(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: InterfaceState::Disconnected,
            ssid: None,
            ip_address: None,
            gateway: None,
            last_error: None,
        }
    }

    /// The assigned address without its CIDR suffix.
    pub fn local_address(&self) -> Option<&str> {
        self.ip_address
            .as_deref()
            .map(|ip| ip.split('/').next().unwrap_or(ip))
    }
}

// ── Media frames ────────────────────────────────────────────────────

/// One relayed media frame. The sequence number is relay-local and
/// strictly monotonic; subscribers may observe gaps but never reordering.
#[derive(Debug, Clone)]
pub struct StreamFrame {
    pub seq: u64,
    pub payload: Bytes,
    pub captured_at: Instant,
}

// ── Control vocabulary ──────────────────────────────────────────────

/// Discrete device actions. `Stop` doubles as the neutral command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Stop,
    Sit,
    Stand,
    Wave,
}

impl Action {
    /// Wire name used in the gateway's query-parameter protocol.
    pub fn wire_name(self) -> &'static str {
        match self {
            Self::Stop => "stop",
            Self::Sit => "sit",
            Self::Stand => "stand",
            Self::Wave => "wave",
        }
    }
}

/// Keys the browser control page reports. Movement keys contribute to
/// the composed vector; the rest map to discrete actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyCode {
    Forward,
    Backward,
    Left,
    Right,
    Stop,
    Sit,
    Stand,
    Wave,
}

impl KeyCode {
    /// Per-axis contribution of a movement key, if it is one.
    pub fn movement(self) -> Option<(f32, f32)> {
        match self {
            Self::Forward => Some((0.0, 1.0)),
            Self::Backward => Some((0.0, -1.0)),
            Self::Left => Some((-1.0, 0.0)),
            Self::Right => Some((1.0, 0.0)),
            _ => None,
        }
    }

    /// The discrete action bound to a non-movement key, if any.
    pub fn action(self) -> Option<Action> {
        match self {
            Self::Stop => Some(Action::Stop),
            Self::Sit => Some(Action::Sit),
            Self::Stand => Some(Action::Stand),
            Self::Wave => Some(Action::Wave),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GamepadAxis {
    X,
    Y,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GamepadButton {
    A,
    B,
    X,
    Y,
}

impl GamepadButton {
    /// Fixed button→action table.
    pub fn action(self) -> Action {
        match self {
            Self::A => Action::Stand,
            Self::B => Action::Stop,
            Self::X => Action::Sit,
            Self::Y => Action::Wave,
        }
    }
}

/// A raw input event from a browser control session.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputEvent {
    KeyDown { key: KeyCode },
    KeyUp { key: KeyCode },
    Axis { axis: GamepadAxis, value: f32 },
    Button { button: GamepadButton, pressed: bool },
    /// Explicit session teardown from the client.
    Close,
}

/// A continuous movement vector, each axis clamped to [-1.0, 1.0].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MoveVector {
    pub dx: f32,
    pub dy: f32,
}

impl MoveVector {
    pub const NEUTRAL: Self = Self { dx: 0.0, dy: 0.0 };

    pub fn clamped(dx: f32, dy: f32) -> Self {
        Self {
            dx: dx.clamp(-1.0, 1.0),
            dy: dy.clamp(-1.0, 1.0),
        }
    }

    pub fn is_neutral(&self) -> bool {
        self.dx == 0.0 && self.dy == 0.0
    }
}

/// The canonical command forwarded to the device. Superseded by the next
/// command per session — no history is retained.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlCommand {
    Action(Action),
    Move(MoveVector),
}

impl ControlCommand {
    /// The neutral/fail-safe command sent on session teardown.
    pub fn neutral() -> Self {
        Self::Action(Action::Stop)
    }

    /// Encode as query parameters for the gateway's control endpoint.
    pub fn to_query(&self) -> Vec<(String, String)> {
        match self {
            Self::Action(action) => vec![("cmd".into(), action.wire_name().into())],
            Self::Move(v) => vec![
                ("cmd".into(), "move".into()),
                ("dx".into(), format!("{:.2}", v.dx)),
                ("dy".into(), format!("{:.2}", v.dy)),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn move_vector_clamps_each_axis() {
        let v = MoveVector::clamped(1.7, -2.0);
        assert_eq!(v, MoveVector { dx: 1.0, dy: -1.0 });
        assert!(!v.is_neutral());
        assert!(MoveVector::NEUTRAL.is_neutral());
    }

    #[test]
    fn command_query_encoding() {
        assert_eq!(
            ControlCommand::Action(Action::Sit).to_query(),
            vec![("cmd".to_owned(), "sit".to_owned())]
        );
        assert_eq!(
            ControlCommand::Move(MoveVector { dx: -1.0, dy: 0.5 }).to_query(),
            vec![
                ("cmd".to_owned(), "move".to_owned()),
                ("dx".to_owned(), "-1.00".to_owned()),
                ("dy".to_owned(), "0.50".to_owned()),
            ]
        );
    }

    #[test]
    fn input_events_round_trip_as_tagged_json() {
        let event = InputEvent::KeyDown {
            key: KeyCode::Forward,
        };
        let json = serde_json::to_string(&event).expect("serialize");
        assert_eq!(json, r#"{"type":"key_down","key":"forward"}"#);

        let back: InputEvent = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, event);
    }

    #[test]
    fn interface_local_address_strips_cidr() {
        let mut iface = Interface::disconnected("wlan1");
        assert_eq!(iface.local_address(), None);

        iface.ip_address = Some("192.168.4.2/24".into());
        assert_eq!(iface.local_address(), Some("192.168.4.2"));
    }
}
