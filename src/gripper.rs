//! Gripper action coordination.
//!
//! Gripper commands are asynchronous actions: issuing one returns an
//! [`ActionHandle`] that is polled for completion later. The
//! [`GripperCoordinator`] toggles between open and closed on each grip button
//! press and refuses to issue a new action while the previous one is still
//! running, so a held button or a slow action server cannot flood the gripper.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use tokio::sync::watch;

use crate::config::GripperConfig;

/// Final result reported by a finished action.
#[derive(Clone, Debug, PartialEq)]
pub struct ActionResult {
    pub success: bool,
    pub message: String,
}

impl ActionResult {
    pub fn success() -> Self {
        Self {
            success: true,
            message: String::new(),
        }
    }

    pub fn failure(message: &str) -> Self {
        Self {
            success: false,
            message: message.to_string(),
        }
    }
}

/// Observable state of an in-flight action.
#[derive(Clone, Debug, PartialEq)]
pub enum ActionStatus {
    Pending,
    Done(ActionResult),
    Cancelled,
}

/// Non-blocking view of an asynchronous actuator request.
pub trait ActionHandle: Send + Sync {
    /// Current status. Must return immediately.
    fn status(&self) -> ActionStatus;

    fn is_done(&self) -> bool {
        matches!(self.status(), ActionStatus::Done(_))
    }

    fn is_cancelled(&self) -> bool {
        matches!(self.status(), ActionStatus::Cancelled)
    }

    /// Done or cancelled.
    fn is_finished(&self) -> bool {
        !matches!(self.status(), ActionStatus::Pending)
    }

    /// Result once the action is done.
    fn result(&self) -> Option<ActionResult> {
        match self.status() {
            ActionStatus::Done(result) => Some(result),
            _ => None,
        }
    }
}

/// Action handle fed by an [`ActionCompleter`] over a watch channel.
#[derive(Debug)]
pub struct WatchedAction {
    rx: watch::Receiver<ActionStatus>,
}

impl ActionHandle for WatchedAction {
    fn status(&self) -> ActionStatus {
        // Check for closure before reading: a completer always sends its
        // final status before it drops.
        let closed = self.rx.has_changed().is_err();
        let status = self.rx.borrow().clone();
        // A completer dropped without reporting counts as cancelled.
        if closed && status == ActionStatus::Pending {
            return ActionStatus::Cancelled;
        }
        status
    }
}

/// Transport-side end of an action: reports how it finished.
#[derive(Debug)]
pub struct ActionCompleter {
    tx: watch::Sender<ActionStatus>,
}

impl ActionCompleter {
    pub fn complete(self, result: ActionResult) {
        self.tx.send_replace(ActionStatus::Done(result));
    }

    pub fn cancel(self) {
        self.tx.send_replace(ActionStatus::Cancelled);
    }
}

/// Create a pending action and the completer that finishes it.
pub fn action_channel() -> (ActionCompleter, WatchedAction) {
    let (tx, rx) = watch::channel(ActionStatus::Pending);
    (ActionCompleter { tx }, WatchedAction { rx })
}

/// Wait for an action to finish, polling at `poll_interval`.
///
/// Fails if the action is cancelled or does not finish within `timeout`.
pub async fn wait_for(
    handle: &dyn ActionHandle,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<ActionResult> {
    let wait = async {
        loop {
            match handle.status() {
                ActionStatus::Pending => tokio::time::sleep(poll_interval).await,
                ActionStatus::Done(result) => return Ok(result),
                ActionStatus::Cancelled => anyhow::bail!("action was cancelled"),
            }
        }
    };
    tokio::time::timeout(timeout, wait)
        .await
        .map_err(|_| anyhow::anyhow!("action did not finish within {:?}", timeout))?
}

/// A gripper command.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum GripperCommand {
    Home,
    Grasp {
        width: f64,
        speed: f64,
        force_margin: f64,
    },
    Move {
        width: f64,
        speed: f64,
    },
}

/// Sends gripper commands to the actuator.
///
/// An `Err` means the request was not accepted at all (e.g. the action
/// server is unavailable).
pub trait GripperTransport: Send {
    fn home(&mut self) -> Result<Box<dyn ActionHandle>>;

    fn grasp(&mut self, width: f64, speed: f64, force_margin: f64)
        -> Result<Box<dyn ActionHandle>>;

    fn move_to(&mut self, width: f64, speed: f64) -> Result<Box<dyn ActionHandle>>;

    fn send(&mut self, command: GripperCommand) -> Result<Box<dyn ActionHandle>> {
        match command {
            GripperCommand::Home => self.home(),
            GripperCommand::Grasp {
                width,
                speed,
                force_margin,
            } => self.grasp(width, speed, force_margin),
            GripperCommand::Move { width, speed } => self.move_to(width, speed),
        }
    }
}

/// Open/closed intent of the gripper.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GripperIntent {
    Open,
    Closed,
}

/// What the coordinator did on a tick.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum GripperEvent {
    /// No new press
    Idle,
    /// A command was issued
    Issued(GripperCommand),
    /// Press ignored because an action is still running
    Dropped,
    /// The transport refused the command
    Rejected,
}

/// Toggles the gripper on grip button presses, one action at a time.
pub struct GripperCoordinator {
    config: GripperConfig,
    transport: Box<dyn GripperTransport>,
    intent: GripperIntent,
    pending: Option<Box<dyn ActionHandle>>,
    button_was_pressed: bool,
}

impl GripperCoordinator {
    pub fn new(config: GripperConfig, transport: Box<dyn GripperTransport>) -> Self {
        Self {
            config,
            transport,
            intent: GripperIntent::Open,
            pending: None,
            button_was_pressed: false,
        }
    }

    pub fn intent(&self) -> GripperIntent {
        self.intent
    }

    /// Home the gripper and wait for it to finish.
    ///
    /// This is the only place the coordinator blocks on an action; it is meant
    /// to run once before the control loop starts.
    pub async fn home(&mut self) -> Result<()> {
        tracing::info!("Homing gripper...");
        let handle = self.transport.home()?;
        let result = wait_for(
            handle.as_ref(),
            self.config.homing_timeout(),
            self.config.poll_interval(),
        )
        .await
        .map_err(|e| anyhow::anyhow!("Gripper homing failed: {}", e))?;
        if !result.success {
            anyhow::bail!("Gripper homing failed: {}", result.message);
        }
        self.intent = GripperIntent::Open;
        self.pending = None;
        tracing::info!("Gripper homed");
        Ok(())
    }

    /// True while a previously issued action has not finished.
    pub fn is_busy(&mut self) -> bool {
        self.poll_pending();
        self.pending.is_some()
    }

    fn poll_pending(&mut self) {
        let Some(handle) = &self.pending else {
            return;
        };
        match handle.status() {
            ActionStatus::Pending => {}
            ActionStatus::Done(result) => {
                if !result.success {
                    tracing::warn!("Gripper action failed: {}", result.message);
                }
                self.pending = None;
            }
            ActionStatus::Cancelled => {
                tracing::debug!("Gripper action cancelled");
                self.pending = None;
            }
        }
    }

    /// Feed this tick's grip button state.
    pub fn update(&mut self, grip_pressed: bool) -> GripperEvent {
        self.poll_pending();

        let rising = grip_pressed && !self.button_was_pressed;
        self.button_was_pressed = grip_pressed;
        if !rising {
            return GripperEvent::Idle;
        }

        if self.pending.is_some() {
            tracing::debug!("Gripper busy, ignoring grip press");
            return GripperEvent::Dropped;
        }

        let (command, next) = match self.intent {
            GripperIntent::Open => (
                GripperCommand::Grasp {
                    width: self.config.grasp_width,
                    speed: self.config.grasp_speed,
                    force_margin: self.config.force_margin,
                },
                GripperIntent::Closed,
            ),
            GripperIntent::Closed => (
                GripperCommand::Move {
                    width: self.config.open_width,
                    speed: self.config.open_speed,
                },
                GripperIntent::Open,
            ),
        };

        match self.transport.send(command) {
            Ok(handle) => {
                match next {
                    GripperIntent::Closed => tracing::info!("Closing gripper"),
                    GripperIntent::Open => tracing::info!("Opening gripper"),
                }
                self.pending = Some(handle);
                self.intent = next;
                GripperEvent::Issued(command)
            }
            Err(e) => {
                tracing::warn!("Gripper rejected {:?}: {}", command, e);
                GripperEvent::Rejected
            }
        }
    }
}

/// Gripper stand-in that finishes every action after a fixed latency.
///
/// Actions run on spawned tokio tasks, so commands must be sent from inside a
/// tokio runtime.
#[derive(Clone, Debug)]
pub struct SimulatedGripper {
    latency: Duration,
    max_width: f64,
    width: Arc<Mutex<f64>>,
}

impl SimulatedGripper {
    pub fn new(latency: Duration) -> Self {
        Self {
            latency,
            max_width: 0.08,
            width: Arc::new(Mutex::new(0.0)),
        }
    }

    /// Current finger width (meters).
    pub fn width(&self) -> f64 {
        self.width.lock().map(|w| *w).unwrap_or(0.0)
    }

    fn spawn_action(&self, target_width: f64) -> Result<Box<dyn ActionHandle>> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| anyhow::anyhow!("simulated gripper needs a tokio runtime"))?;
        let (completer, handle) = action_channel();
        let width = Arc::clone(&self.width);
        let latency = self.latency;
        let target_width = target_width.clamp(0.0, self.max_width);

        runtime.spawn(async move {
            tokio::time::sleep(latency).await;
            if let Ok(mut w) = width.lock() {
                *w = target_width;
            }
            completer.complete(ActionResult::success());
        });

        Ok(Box::new(handle))
    }
}

impl GripperTransport for SimulatedGripper {
    fn home(&mut self) -> Result<Box<dyn ActionHandle>> {
        self.spawn_action(self.max_width)
    }

    fn grasp(
        &mut self,
        width: f64,
        _speed: f64,
        _force_margin: f64,
    ) -> Result<Box<dyn ActionHandle>> {
        self.spawn_action(width)
    }

    fn move_to(&mut self, width: f64, _speed: f64) -> Result<Box<dyn ActionHandle>> {
        self.spawn_action(width)
    }
}
