// ── Browser input → device command translation ──
//
// Each control session owns a small task consuming a bounded queue of
// input events. The task keeps the composed command current, forwards it
// on change (subject to a coalescing floor), re-forwards it on a fixed
// heartbeat so a lost packet cannot leave the device running stale
// state, and fires a best-effort neutral command when the session ends.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::CoreError;
use crate::model::{ControlCommand, InputEvent, KeyCode, MoveVector};

/// Stick/D-pad values inside this radius read as zero.
const DEADZONE: f32 = 0.15;

/// Destination for translated commands. Production is the pinned
/// `GatewayClient`; tests record what was forwarded.
#[async_trait]
pub trait CommandSink: Send + Sync {
    async fn send(&self, command: &ControlCommand) -> Result<(), CoreError>;
}

/// Forwarding cadence tuning.
#[derive(Debug, Clone)]
pub struct ControlConfig {
    /// Keep-alive: re-forward the unchanged command this often.
    pub heartbeat: Duration,
    /// Coalescing floor: never forward more often than this.
    pub min_send_interval: Duration,
    /// Sessions without events for this long are reaped.
    pub idle_timeout: Duration,
    /// Per-session input event queue depth.
    pub queue_capacity: usize,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            heartbeat: Duration::from_millis(250),
            min_send_interval: Duration::from_millis(50),
            idle_timeout: Duration::from_secs(10),
            queue_capacity: 32,
        }
    }
}

/// Fans per-session input events into per-session forwarding tasks.
/// Cheaply cloneable.
#[derive(Clone)]
pub struct ControlTranslator {
    inner: Arc<TranslatorInner>,
}

struct TranslatorInner {
    sink: Arc<dyn CommandSink>,
    config: ControlConfig,
    sessions: DashMap<Uuid, SessionHandle>,
    cancel: CancellationToken,
}

struct SessionHandle {
    tx: mpsc::Sender<InputEvent>,
    task: JoinHandle<()>,
}

impl ControlTranslator {
    pub fn new(sink: Arc<dyn CommandSink>, config: ControlConfig) -> Self {
        Self {
            inner: Arc::new(TranslatorInner {
                sink,
                config,
                sessions: DashMap::new(),
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// Route one input event to its session, creating the session on
    /// first contact. A full queue drops the event: the channel is
    /// loss-tolerant by design and the heartbeat repairs any gap.
    pub fn submit(&self, session: Uuid, event: InputEvent) {
        if self.inner.cancel.is_cancelled() {
            return;
        }
        loop {
            let handle = self
                .inner
                .sessions
                .entry(session)
                .or_insert_with(|| spawn_session(Arc::clone(&self.inner), session));

            match handle.tx.try_send(event) {
                Ok(()) => return,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(session = %session, "control queue full, dropping event");
                    return;
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    // The session was reaped between lookup and send;
                    // forget it and start a fresh one.
                    drop(handle);
                    self.inner.sessions.remove(&session);
                }
            }
        }
    }

    pub fn session_count(&self) -> usize {
        self.inner.sessions.len()
    }

    /// Stop every session, letting each fire its neutral command.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        let ids: Vec<Uuid> = self.inner.sessions.iter().map(|e| *e.key()).collect();
        for id in ids {
            if let Some((_, handle)) = self.inner.sessions.remove(&id) {
                let _ = handle.task.await;
            }
        }
    }
}

fn spawn_session(inner: Arc<TranslatorInner>, id: Uuid) -> SessionHandle {
    let (tx, rx) = mpsc::channel(inner.config.queue_capacity);
    debug!(session = %id, "control session opened");
    let task = tokio::spawn(session_task(inner, id, rx));
    SessionHandle { tx, task }
}

// ── Per-session forwarding loop ─────────────────────────────────────

async fn session_task(
    inner: Arc<TranslatorInner>,
    id: Uuid,
    mut rx: mpsc::Receiver<InputEvent>,
) {
    let config = inner.config.clone();
    let mut state = SessionState::default();
    let mut last_cmd: Option<ControlCommand> = None;
    let mut last_sent: Option<Instant> = None;

    let mut heartbeat = tokio::time::interval(config.heartbeat);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut idle_deadline = Instant::now() + config.idle_timeout;

    loop {
        tokio::select! {
            biased;
            () = inner.cancel.cancelled() => break,
            event = rx.recv() => {
                let Some(event) = event else { break };
                idle_deadline = Instant::now() + config.idle_timeout;
                if matches!(event, InputEvent::Close) {
                    debug!(session = %id, "control session closed by client");
                    break;
                }

                state.apply(event);
                let cmd = state.command();
                if last_cmd.as_ref() != Some(&cmd) {
                    if let Some(at) = last_sent {
                        let since = at.elapsed();
                        if since < config.min_send_interval {
                            tokio::time::sleep(config.min_send_interval - since).await;
                        }
                    }
                    forward(&inner, id, &cmd).await;
                    last_cmd = Some(cmd);
                    last_sent = Some(Instant::now());
                }
            }
            _ = heartbeat.tick() => {
                if let Some(ref cmd) = last_cmd {
                    if last_sent.is_none_or(|at| at.elapsed() >= config.min_send_interval) {
                        forward(&inner, id, cmd).await;
                        last_sent = Some(Instant::now());
                    }
                }
            }
            () = tokio::time::sleep_until(idle_deadline) => {
                debug!(session = %id, "control session idle, reaping");
                break;
            }
        }
    }

    // Fail-safe: leave the device stopped, best-effort.
    if let Err(e) = inner.sink.send(&ControlCommand::neutral()).await {
        debug!(session = %id, error = %e, "neutral command on teardown failed");
    }
    inner.sessions.remove(&id);
}

async fn forward(inner: &TranslatorInner, id: Uuid, cmd: &ControlCommand) {
    if let Err(e) = inner.sink.send(cmd).await {
        // Loss-tolerant: the next change or heartbeat retries.
        warn!(session = %id, error = %e, "command forward failed");
    }
}

// ── Session input state ─────────────────────────────────────────────

#[derive(Debug, Default)]
struct SessionState {
    /// Currently held movement keys.
    pressed: HashSet<KeyCode>,
    /// Latest gamepad vector, post-deadzone.
    pad: MoveVector,
    /// Last discrete action, if it supersedes the movement vector.
    action: Option<crate::model::Action>,
}

impl SessionState {
    fn apply(&mut self, event: InputEvent) {
        match event {
            InputEvent::KeyDown { key } => match key.action() {
                Some(action) => self.action = Some(action),
                None => {
                    self.pressed.insert(key);
                    self.action = None;
                }
            },
            InputEvent::KeyUp { key } => {
                if key.movement().is_some() {
                    self.pressed.remove(&key);
                    self.action = None;
                }
            }
            InputEvent::Axis { axis, value } => {
                let value = apply_deadzone(value);
                match axis {
                    crate::model::GamepadAxis::X => self.pad.dx = value,
                    crate::model::GamepadAxis::Y => self.pad.dy = value,
                }
                self.action = None;
            }
            InputEvent::Button { button, pressed } => {
                if pressed {
                    self.action = Some(button.action());
                }
            }
            InputEvent::Close => {}
        }
    }

    /// The authoritative command for the current input state. Movement
    /// keys compose additively per axis, then clamp; an all-neutral
    /// vector degrades to the neutral command.
    fn command(&self) -> ControlCommand {
        if let Some(action) = self.action {
            return ControlCommand::Action(action);
        }

        let mut dx = self.pad.dx;
        let mut dy = self.pad.dy;
        for key in &self.pressed {
            if let Some((kx, ky)) = key.movement() {
                dx += kx;
                dy += ky;
            }
        }

        let vector = MoveVector::clamped(dx, dy);
        if vector.is_neutral() {
            ControlCommand::neutral()
        } else {
            ControlCommand::Move(vector)
        }
    }
}

fn apply_deadzone(value: f32) -> f32 {
    if value.abs() < DEADZONE {
        0.0
    } else {
        value.clamp(-1.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use std::sync::Mutex as StdMutex;

    use crate::model::{Action, GamepadAxis, GamepadButton};

    use super::*;

    /// Sink recording every forwarded command with its send time.
    #[derive(Default)]
    struct RecordingSink {
        sent: StdMutex<Vec<(Instant, ControlCommand)>>,
    }

    impl RecordingSink {
        fn commands(&self) -> Vec<ControlCommand> {
            self.sent.lock().unwrap().iter().map(|(_, c)| c.clone()).collect()
        }

        fn timestamps(&self) -> Vec<Instant> {
            self.sent.lock().unwrap().iter().map(|(t, _)| *t).collect()
        }
    }

    #[async_trait]
    impl CommandSink for RecordingSink {
        async fn send(&self, command: &ControlCommand) -> Result<(), CoreError> {
            self.sent
                .lock()
                .unwrap()
                .push((Instant::now(), command.clone()));
            Ok(())
        }
    }

    fn fast_config() -> ControlConfig {
        ControlConfig {
            heartbeat: Duration::from_millis(250),
            min_send_interval: Duration::from_millis(50),
            idle_timeout: Duration::from_secs(10),
            queue_capacity: 32,
        }
    }

    fn translator() -> (ControlTranslator, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let translator =
            ControlTranslator::new(Arc::clone(&sink) as Arc<dyn CommandSink>, fast_config());
        (translator, sink)
    }

    fn move_cmd(dx: f32, dy: f32) -> ControlCommand {
        ControlCommand::Move(MoveVector { dx, dy })
    }

    // ── Pure composition ─────────────────────────────────────────────

    #[test]
    fn forward_key_yields_unit_vector() {
        let mut state = SessionState::default();
        state.apply(InputEvent::KeyDown {
            key: KeyCode::Forward,
        });
        assert_eq!(state.command(), move_cmd(0.0, 1.0));
    }

    #[test]
    fn simultaneous_keys_compose_then_clamp() {
        let mut state = SessionState::default();
        state.apply(InputEvent::KeyDown {
            key: KeyCode::Forward,
        });
        state.apply(InputEvent::KeyDown { key: KeyCode::Left });
        assert_eq!(state.command(), move_cmd(-1.0, 1.0));

        // Pushing the same axis past 1.0 stays clamped.
        state.apply(InputEvent::Axis {
            axis: GamepadAxis::Y,
            value: 0.9,
        });
        assert_eq!(state.command(), move_cmd(-1.0, 1.0));
    }

    #[test]
    fn releasing_all_movement_keys_is_neutral() {
        let mut state = SessionState::default();
        state.apply(InputEvent::KeyDown {
            key: KeyCode::Forward,
        });
        state.apply(InputEvent::KeyUp {
            key: KeyCode::Forward,
        });
        assert_eq!(state.command(), ControlCommand::neutral());
    }

    #[test]
    fn action_key_supersedes_movement() {
        let mut state = SessionState::default();
        state.apply(InputEvent::KeyDown {
            key: KeyCode::Forward,
        });
        state.apply(InputEvent::KeyDown { key: KeyCode::Sit });
        assert_eq!(state.command(), ControlCommand::Action(Action::Sit));

        // New movement input takes back over.
        state.apply(InputEvent::KeyDown { key: KeyCode::Left });
        assert_eq!(state.command(), move_cmd(-1.0, 1.0));
    }

    #[test]
    fn gamepad_deadzone_and_buttons() {
        let mut state = SessionState::default();
        state.apply(InputEvent::Axis {
            axis: GamepadAxis::X,
            value: 0.1,
        });
        assert_eq!(state.command(), ControlCommand::neutral());

        state.apply(InputEvent::Axis {
            axis: GamepadAxis::X,
            value: 0.7,
        });
        assert_eq!(state.command(), move_cmd(0.7, 0.0));

        state.apply(InputEvent::Button {
            button: GamepadButton::B,
            pressed: true,
        });
        assert_eq!(state.command(), ControlCommand::Action(Action::Stop));
    }

    // ── Forwarding cadence ───────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn change_forwards_immediately() {
        let (translator, sink) = translator();
        let session = Uuid::new_v4();

        translator.submit(
            session,
            InputEvent::KeyDown {
                key: KeyCode::Forward,
            },
        );
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(sink.commands(), vec![move_cmd(0.0, 1.0)]);
    }

    #[tokio::test(start_paused = true)]
    async fn unchanged_command_is_heartbeaten() {
        let (translator, sink) = translator();
        let session = Uuid::new_v4();

        translator.submit(
            session,
            InputEvent::KeyDown {
                key: KeyCode::Forward,
            },
        );
        tokio::time::sleep(Duration::from_millis(600)).await;

        let commands = sink.commands();
        assert!(
            commands.len() >= 3,
            "expected initial send plus at least two heartbeats, got {commands:?}"
        );
        assert!(commands.iter().all(|c| *c == move_cmd(0.0, 1.0)));
    }

    #[tokio::test(start_paused = true)]
    async fn rapid_changes_respect_coalescing_floor() {
        let (translator, sink) = translator();
        let session = Uuid::new_v4();

        translator.submit(
            session,
            InputEvent::KeyDown {
                key: KeyCode::Forward,
            },
        );
        translator.submit(session, InputEvent::KeyDown { key: KeyCode::Left });
        tokio::time::sleep(Duration::from_millis(200)).await;

        let stamps = sink.timestamps();
        assert!(stamps.len() >= 2);
        assert!(
            stamps[1] - stamps[0] >= Duration::from_millis(50),
            "second send arrived before the coalescing floor elapsed"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn release_reaches_neutral_within_a_heartbeat() {
        let (translator, sink) = translator();
        let session = Uuid::new_v4();

        translator.submit(
            session,
            InputEvent::KeyDown {
                key: KeyCode::Forward,
            },
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
        translator.submit(
            session,
            InputEvent::KeyUp {
                key: KeyCode::Forward,
            },
        );
        tokio::time::sleep(Duration::from_millis(250)).await;

        let commands = sink.commands();
        assert!(commands.contains(&ControlCommand::neutral()));
    }

    #[tokio::test(start_paused = true)]
    async fn close_fires_neutral_and_reaps_session() {
        let (translator, sink) = translator();
        let session = Uuid::new_v4();

        translator.submit(
            session,
            InputEvent::KeyDown {
                key: KeyCode::Forward,
            },
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(translator.session_count(), 1);

        translator.submit(session, InputEvent::Close);
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(translator.session_count(), 0);
        assert_eq!(sink.commands().last(), Some(&ControlCommand::neutral()));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_session_is_reaped_with_neutral() {
        let sink = Arc::new(RecordingSink::default());
        let translator = ControlTranslator::new(
            Arc::clone(&sink) as Arc<dyn CommandSink>,
            ControlConfig {
                idle_timeout: Duration::from_millis(300),
                ..fast_config()
            },
        );
        let session = Uuid::new_v4();

        translator.submit(
            session,
            InputEvent::KeyDown {
                key: KeyCode::Forward,
            },
        );
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert_eq!(translator.session_count(), 0);
        assert_eq!(sink.commands().last(), Some(&ControlCommand::neutral()));
    }
}
