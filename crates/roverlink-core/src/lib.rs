// roverlink-core: the connection-and-relay engine between roverlink-net
// and the user-facing surfaces (CLI, proxy server).

pub mod control;
pub mod credentials;
pub mod error;
pub mod gateway;
pub mod iface;
pub mod mjpeg;
pub mod model;
pub mod relay;

// ── Primary re-exports ──────────────────────────────────────────────
pub use control::{CommandSink, ControlConfig, ControlTranslator};
pub use credentials::{CredentialStore, NetworkCredential};
pub use error::CoreError;
pub use iface::{ConnectRequest, InterfaceController};
pub use relay::{MediaFeed, MediaSource, RelayConfig, RelayStatus, StreamRelay, Subscription};

// Re-export model types at the crate root for ergonomics.
pub use model::{
    Action, ControlCommand, GamepadAxis, GamepadButton, InputEvent, Interface, InterfaceState,
    KeyCode, MoveVector, StreamFrame,
};
