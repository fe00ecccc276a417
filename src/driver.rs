//! The fixed-rate teleoperation loop.
//!
//! Each tick reads the newest controller sample and, in order: updates the
//! calibration or integrates motion, feeds the grip button to the gripper
//! coordinator, then solves IK for the target if it moved. A tick never
//! blocks; the only waits are the tick interval itself and the back-off while
//! the controller is missing.

use std::panic::AssertUnwindSafe;

use anyhow::Result;
use nalgebra::Isometry3;
use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::calibration::CalibrationFrame;
use crate::client::PoseStreamClient;
use crate::config::{ControlConfig, TeleopConfig};
use crate::gripper::{GripperCoordinator, GripperEvent};
use crate::integrator::{Motion, PoseIntegrator};
use crate::kinematics::{IkOutcome, KinematicsBridge};
use crate::sample::TrackerSample;

/// Everything one tick did.
#[derive(Clone, Debug, PartialEq)]
pub struct TickReport {
    pub motion: Motion,
    /// The calibration frame was re-captured this tick
    pub calibrated: bool,
    pub gripper: GripperEvent,
    pub ik: IkOutcome,
}

/// Counters accumulated over a run.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct LoopStats {
    pub ticks: u64,
    pub missing: u64,
    pub moved: u64,
    pub calibrations: u64,
    pub ik_solved: u64,
    pub ik_failed: u64,
    pub gripper_commands: u64,
    pub gripper_dropped: u64,
    pub gripper_rejected: u64,
}

impl LoopStats {
    fn record(&mut self, report: &TickReport) {
        self.ticks += 1;
        match report.motion {
            Motion::Lost => self.missing += 1,
            Motion::Moved { .. } => self.moved += 1,
            Motion::Acquired | Motion::Idle => {}
        }
        if report.calibrated {
            self.calibrations += 1;
        }
        match report.gripper {
            GripperEvent::Issued(_) => self.gripper_commands += 1,
            GripperEvent::Dropped => self.gripper_dropped += 1,
            GripperEvent::Rejected => self.gripper_rejected += 1,
            GripperEvent::Idle => {}
        }
        match report.ik {
            IkOutcome::Solved => self.ik_solved += 1,
            IkOutcome::Failed(_) => self.ik_failed += 1,
            IkOutcome::Skipped => {}
        }
    }
}

/// Owns all per-run teleoperation state.
pub struct ControlLoop {
    config: ControlConfig,
    integrator: PoseIntegrator,
    calibration: CalibrationFrame,
    target: Isometry3<f64>,
    bridge: KinematicsBridge,
    gripper: GripperCoordinator,
    menu_held: bool,
    stats: LoopStats,
}

impl ControlLoop {
    /// The target pose starts at the arm's current pose.
    pub fn new(config: &TeleopConfig, bridge: KinematicsBridge, gripper: GripperCoordinator) -> Self {
        let target = bridge.current_pose();
        Self {
            config: config.control.clone(),
            integrator: PoseIntegrator::new(config.motion.clone()),
            calibration: CalibrationFrame::identity(),
            target,
            bridge,
            gripper,
            menu_held: false,
            stats: LoopStats::default(),
        }
    }

    pub fn target(&self) -> &Isometry3<f64> {
        &self.target
    }

    pub fn calibration(&self) -> &CalibrationFrame {
        &self.calibration
    }

    pub fn bridge(&self) -> &KinematicsBridge {
        &self.bridge
    }

    pub fn gripper(&self) -> &GripperCoordinator {
        &self.gripper
    }

    pub fn stats(&self) -> &LoopStats {
        &self.stats
    }

    /// Run one tick against `sample` (`None` when the controller is missing).
    pub fn tick(&mut self, sample: Option<&TrackerSample>) -> TickReport {
        let report = match sample.filter(|s| s.valid) {
            None => {
                self.integrator.reset();
                self.menu_held = false;
                TickReport {
                    motion: Motion::Lost,
                    calibrated: false,
                    gripper: GripperEvent::Idle,
                    ik: IkOutcome::Skipped,
                }
            }
            Some(sample) => {
                let calibrated = sample.buttons.menu;
                let motion = if calibrated {
                    self.calibration.capture(sample);
                    if !self.menu_held {
                        tracing::info!("Capturing calibration frame");
                    }
                    self.integrator.hold(Some(sample))
                } else {
                    self.integrator
                        .step(Some(sample), &self.calibration, &mut self.target)
                };

                self.menu_held = calibrated;
                let gripper = self.gripper.update(sample.buttons.grip);

                let ik = if motion.moved() {
                    self.bridge.drive(&self.target)
                } else {
                    IkOutcome::Skipped
                };

                TickReport {
                    motion,
                    calibrated,
                    gripper,
                    ik,
                }
            }
        };
        self.stats.record(&report);
        report
    }

    /// Tick at the configured period until `cancel` fires.
    ///
    /// The client is always stopped before returning, including when a tick
    /// panics (reported as an error).
    pub async fn run(mut self, mut client: PoseStreamClient, cancel: CancellationToken) -> Result<LoopStats> {
        tracing::info!("Control loop running at {:?} per tick", self.config.period());

        let result = self.run_ticks(&client, &cancel).await;
        let stopped = client.stop().await;

        tracing::info!(
            "Control loop finished: {} ticks, {} moved, {} missing, {} IK failures, {} gripper commands",
            self.stats.ticks,
            self.stats.moved,
            self.stats.missing,
            self.stats.ik_failed,
            self.stats.gripper_commands
        );

        result?;
        stopped?;
        Ok(self.stats)
    }

    async fn run_ticks(&mut self, client: &PoseStreamClient, cancel: &CancellationToken) -> Result<()> {
        let mut interval = tokio::time::interval(self.config.period());
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                _ = interval.tick() => {}
            }

            let stamped = client.latest_fresh();
            let sample = stamped.as_ref().map(|s| &s.sample);

            let report = std::panic::catch_unwind(AssertUnwindSafe(|| self.tick(sample)))
                .map_err(|payload| anyhow::anyhow!("Control tick panicked: {}", panic_message(&*payload)))?;

            if report.motion == Motion::Lost {
                tracing::warn!("Controller not found, retrying in {:?}", self.config.missing_backoff());
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Ok(()),
                    _ = tokio::time::sleep(self.config.missing_backoff()) => {}
                }
                interval.reset();
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
