//! Kinematics bridge between the target pose and joint commands.
//!
//! The solver itself is pluggable through [`ArmKinematics`]; the bridge only
//! owns the last good joint solution, which doubles as the seed for the next
//! solve. A failed solve publishes nothing and keeps that solution, so the
//! robot simply holds position.

use std::f64::consts::{FRAC_PI_2, PI, TAU};

use anyhow::Result;
use nalgebra::{Isometry3, Translation3, UnitQuaternion};
use thiserror::Error;
use tokio::sync::mpsc;

/// Why an IK solve produced no joint solution.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum IkFailure {
    #[error("joint {joint} would need {value:.4}, outside [{min:.4}, {max:.4}]")]
    OutOfReach {
        joint: usize,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("seed has {got} joints, model has {expected}")]
    SeedMismatch { expected: usize, got: usize },

    #[error("solver did not converge")]
    NoConvergence,
}

/// Robot kinematic model.
pub trait ArmKinematics: Send {
    /// Number of joints.
    fn dof(&self) -> usize;

    /// End-effector pose for the given joint angles.
    fn forward(&self, joints: &[f64]) -> Isometry3<f64>;

    /// Joint angles reaching `target`, biased towards `seed`.
    fn solve(&self, target: &Isometry3<f64>, seed: &[f64]) -> Result<Vec<f64>, IkFailure>;
}

/// Destination for joint commands. Publishing is fire-and-forget.
pub trait JointCommandSink: Send {
    fn publish(&mut self, joints: &[f64]) -> Result<()>;
}

/// Joint sink backed by a bounded tokio channel.
///
/// When the consumer falls behind, new commands are dropped rather than
/// queued; the next tick sends a fresher one anyway.
pub struct ChannelJointSink {
    tx: mpsc::Sender<Vec<f64>>,
}

impl ChannelJointSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Vec<f64>>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

impl JointCommandSink for ChannelJointSink {
    fn publish(&mut self, joints: &[f64]) -> Result<()> {
        match self.tx.try_send(joints.to_vec()) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::debug!("Joint command queue full, dropping command");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                anyhow::bail!("joint command receiver closed")
            }
        }
    }
}

/// Result of one pass through the bridge.
#[derive(Clone, Debug, PartialEq)]
pub enum IkOutcome {
    /// Nothing to solve this tick
    Skipped,
    /// Solved and published
    Solved,
    /// Solve failed; previous joints kept
    Failed(IkFailure),
}

const FAILURE_WARN_EVERY: u64 = 50;

/// Drives the IK solver and publishes successful solutions.
pub struct KinematicsBridge {
    model: Box<dyn ArmKinematics>,
    sink: Box<dyn JointCommandSink>,
    joints: Vec<f64>,
    consecutive_failures: u64,
}

impl KinematicsBridge {
    /// Create a bridge starting from the robot's measured joint angles.
    pub fn new(
        model: Box<dyn ArmKinematics>,
        sink: Box<dyn JointCommandSink>,
        initial_joints: Vec<f64>,
    ) -> Result<Self> {
        if initial_joints.len() != model.dof() {
            anyhow::bail!(
                "Initial joint vector has {} entries, model has {} joints",
                initial_joints.len(),
                model.dof()
            );
        }
        Ok(Self {
            model,
            sink,
            joints: initial_joints,
            consecutive_failures: 0,
        })
    }

    /// Last successful joint solution (also the next IK seed).
    pub fn joints(&self) -> &[f64] {
        &self.joints
    }

    /// Pose of the last successful joint solution.
    pub fn current_pose(&self) -> Isometry3<f64> {
        self.model.forward(&self.joints)
    }

    pub fn consecutive_failures(&self) -> u64 {
        self.consecutive_failures
    }

    /// Solve for `target` and publish the result on success.
    pub fn drive(&mut self, target: &Isometry3<f64>) -> IkOutcome {
        match self.model.solve(target, &self.joints) {
            Ok(solution) => {
                if self.consecutive_failures > 0 {
                    tracing::debug!(
                        "IK recovered after {} failed solves",
                        self.consecutive_failures
                    );
                }
                self.consecutive_failures = 0;
                if let Err(e) = self.sink.publish(&solution) {
                    tracing::warn!("Failed to publish joint command: {}", e);
                }
                self.joints = solution;
                IkOutcome::Solved
            }
            Err(failure) => {
                self.consecutive_failures += 1;
                tracing::debug!("IK failed: {}", failure);
                if self.consecutive_failures % FAILURE_WARN_EVERY == 0 {
                    tracing::warn!(
                        "IK has failed {} ticks in a row (last: {}), robot holding position",
                        self.consecutive_failures,
                        failure
                    );
                }
                IkOutcome::Failed(failure)
            }
        }
    }
}

/// Cartesian gantry (x, y, z prismatic axes) carrying a Z-Y-X spherical wrist.
///
/// Joint order is `[x, y, z, yaw, pitch, roll]`. Closed-form IK, used by the
/// simulator and tests.
#[derive(Clone, Debug, PartialEq)]
pub struct GantryKinematics {
    pub lower: [f64; 6],
    pub upper: [f64; 6],
}

impl Default for GantryKinematics {
    fn default() -> Self {
        Self {
            lower: [0.1, -0.6, 0.0, -2.9, -1.7, -2.9],
            upper: [0.9, 0.6, 1.0, 2.9, 1.7, 2.9],
        }
    }
}

/// Below this cos(pitch) the wrist is treated as singular.
const GIMBAL_EPS: f64 = 1e-9;

/// Shift `angle` by whole turns to land as close as possible to `near`.
fn wrap_near(angle: f64, near: f64) -> f64 {
    angle + TAU * ((near - angle) / TAU).round()
}

fn wrap_pi(angle: f64) -> f64 {
    wrap_near(angle, 0.0)
}

impl GantryKinematics {
    pub fn new(lower: [f64; 6], upper: [f64; 6]) -> Self {
        Self { lower, upper }
    }

    fn check_limits(&self, joints: &[f64]) -> Result<(), IkFailure> {
        for (joint, &value) in joints.iter().enumerate() {
            let (min, max) = (self.lower[joint], self.upper[joint]);
            if value < min || value > max {
                return Err(IkFailure::OutOfReach {
                    joint,
                    value,
                    min,
                    max,
                });
            }
        }
        Ok(())
    }

    /// Candidate wrist solutions `[yaw, pitch, roll]` for an orientation.
    fn wrist_candidates(rotation: &UnitQuaternion<f64>, seed: &[f64]) -> Vec<[f64; 3]> {
        let (seed_yaw, seed_pitch, seed_roll) = (seed[3], seed[4], seed[5]);
        let m = rotation.to_rotation_matrix();
        let m = m.matrix();

        if m[(0, 0)].hypot(m[(1, 0)]) < GIMBAL_EPS {
            // Gimbal lock: only roll - yaw (pitch up) or roll + yaw (pitch
            // down) is defined. Keep the seed's roll and solve for yaw.
            let (pitch, yaw) = if m[(2, 0)] < 0.0 {
                let roll_minus_yaw = m[(0, 1)].atan2(m[(0, 2)]);
                (FRAC_PI_2, seed_roll - roll_minus_yaw)
            } else {
                let roll_plus_yaw = (-m[(0, 1)]).atan2(-m[(0, 2)]);
                (-FRAC_PI_2, roll_plus_yaw - seed_roll)
            };
            return vec![[wrap_near(yaw, seed_yaw), pitch, seed_roll]];
        }

        let (roll, pitch, yaw) = rotation.euler_angles();
        let flipped = [yaw + PI, wrap_pi(PI - pitch), roll + PI];
        [[yaw, pitch, roll], flipped]
            .into_iter()
            .map(|[y, p, r]| {
                [
                    wrap_near(y, seed_yaw),
                    wrap_near(p, seed_pitch),
                    wrap_near(r, seed_roll),
                ]
            })
            .collect()
    }
}

impl ArmKinematics for GantryKinematics {
    fn dof(&self) -> usize {
        6
    }

    fn forward(&self, joints: &[f64]) -> Isometry3<f64> {
        Isometry3::from_parts(
            Translation3::new(joints[0], joints[1], joints[2]),
            UnitQuaternion::from_euler_angles(joints[5], joints[4], joints[3]),
        )
    }

    fn solve(&self, target: &Isometry3<f64>, seed: &[f64]) -> Result<Vec<f64>, IkFailure> {
        if seed.len() != self.dof() {
            return Err(IkFailure::SeedMismatch {
                expected: self.dof(),
                got: seed.len(),
            });
        }

        let t = target.translation.vector;
        let mut best: Option<(f64, Vec<f64>)> = None;
        let mut first_error = None;

        for [yaw, pitch, roll] in Self::wrist_candidates(&target.rotation, seed) {
            let candidate = vec![t.x, t.y, t.z, yaw, pitch, roll];
            if let Err(e) = self.check_limits(&candidate) {
                first_error.get_or_insert(e);
                continue;
            }
            // Reject candidates that do not actually reach the orientation.
            let reached = self.forward(&candidate).rotation;
            if reached.angle_to(&target.rotation) > 1e-6 {
                continue;
            }
            let distance: f64 = candidate[3..]
                .iter()
                .zip(&seed[3..])
                .map(|(a, b)| (a - b).abs())
                .sum();
            if best.as_ref().map_or(true, |(d, _)| distance < *d) {
                best = Some((distance, candidate));
            }
        }

        match best {
            Some((_, joints)) => Ok(joints),
            None => Err(first_error.unwrap_or(IkFailure::NoConvergence)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;
    use std::sync::{Arc, Mutex};

    const HOME: [f64; 6] = [0.5, 0.0, 0.4, 0.0, 0.0, 0.0];

    #[derive(Clone, Default)]
    struct RecordingSink {
        published: Arc<Mutex<Vec<Vec<f64>>>>,
    }

    impl JointCommandSink for RecordingSink {
        fn publish(&mut self, joints: &[f64]) -> Result<()> {
            self.published.lock().unwrap().push(joints.to_vec());
            Ok(())
        }
    }

    fn assert_reaches(model: &GantryKinematics, joints: &[f64], target: &Isometry3<f64>) {
        let reached = model.forward(joints);
        assert!((reached.translation.vector - target.translation.vector).norm() < 1e-9);
        assert!(reached.rotation.angle_to(&target.rotation) < 1e-6);
    }

    #[test]
    fn test_forward_then_solve() {
        let model = GantryKinematics::default();
        let joints = [0.6, -0.2, 0.3, 0.4, -0.3, 1.2];
        let target = model.forward(&joints);
        let solution = model.solve(&target, &HOME).unwrap();
        assert_reaches(&model, &solution, &target);
        for (a, b) in solution.iter().zip(joints.iter()) {
            assert!((a - b).abs() < 1e-9);
        }
    }

    #[test]
    fn test_solve_prefers_branch_near_seed() {
        let model = GantryKinematics::default();
        let target = model.forward(&[0.5, 0.0, 0.4, 0.5, 0.2, 0.3]);
        // Seed sitting on the flipped wrist branch
        let seed = [0.5, 0.0, 0.4, 0.5 + PI - TAU, PI - 0.2 - TAU, 0.3 + PI - TAU];
        let mut wide = GantryKinematics::default();
        wide.lower[3..].copy_from_slice(&[-4.0, -4.0, -4.0]);
        wide.upper[3..].copy_from_slice(&[4.0, 4.0, 4.0]);

        let solution = wide.solve(&target, &seed).unwrap();
        assert_reaches(&wide, &solution, &target);
        assert!((solution[4] - seed[4]).abs() < 1e-6);

        let solution = model.solve(&target, &HOME).unwrap();
        assert!((solution[4] - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_out_of_reach() {
        let model = GantryKinematics::default();
        let target = Isometry3::translation(2.0, 0.0, 0.4);
        assert_eq!(
            model.solve(&target, &HOME),
            Err(IkFailure::OutOfReach {
                joint: 0,
                value: 2.0,
                min: 0.1,
                max: 0.9
            })
        );
    }

    #[test]
    fn test_gimbal_lock_solution_reaches_target() {
        let model = GantryKinematics::default();
        for pitch in [FRAC_PI_2, -FRAC_PI_2] {
            let target = model.forward(&[0.5, 0.0, 0.4, 0.3, pitch, 0.1]);
            let seed = [0.5, 0.0, 0.4, 0.0, 1.0f64.copysign(pitch), 0.1];
            let solution = model.solve(&target, &seed).unwrap();
            assert_reaches(&model, &solution, &target);
            assert_eq!(solution[5], seed[5]);
            assert_eq!(solution[4], pitch);
        }
    }

    #[test]
    fn test_gimbal_lock_keeps_seed_roll() {
        let model = GantryKinematics::default();
        // Same orientation as yaw 0.7 / roll 0.2 at pitch up, reached with the seed's roll.
        let target = model.forward(&[0.5, 0.0, 0.4, 0.7, FRAC_PI_2, 0.2]);
        let seed = [0.5, 0.0, 0.4, 0.0, 1.2, -0.4];
        let solution = model.solve(&target, &seed).unwrap();
        assert_reaches(&model, &solution, &target);
        assert_eq!(solution[5], -0.4);
        assert!((solution[3] - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_seed_mismatch() {
        let model = GantryKinematics::default();
        assert_eq!(
            model.solve(&Isometry3::identity(), &[0.0; 3]),
            Err(IkFailure::SeedMismatch {
                expected: 6,
                got: 3
            })
        );
    }

    #[test]
    fn test_bridge_publishes_and_reseeds_on_success() {
        let sink = RecordingSink::default();
        let published = Arc::clone(&sink.published);
        let mut bridge = KinematicsBridge::new(
            Box::new(GantryKinematics::default()),
            Box::new(sink),
            HOME.to_vec(),
        )
        .unwrap();

        let mut target = bridge.current_pose();
        target.translation.vector += Vector3::new(0.1, 0.0, 0.0);
        assert_eq!(bridge.drive(&target), IkOutcome::Solved);
        assert!((bridge.joints()[0] - 0.6).abs() < 1e-12);
        assert_eq!(published.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_bridge_holds_on_failure() {
        let sink = RecordingSink::default();
        let published = Arc::clone(&sink.published);
        let mut bridge = KinematicsBridge::new(
            Box::new(GantryKinematics::default()),
            Box::new(sink),
            HOME.to_vec(),
        )
        .unwrap();

        let target = Isometry3::translation(5.0, 0.0, 0.4);
        assert!(matches!(
            bridge.drive(&target),
            IkOutcome::Failed(IkFailure::OutOfReach { .. })
        ));
        assert_eq!(bridge.joints(), &HOME);
        assert_eq!(bridge.consecutive_failures(), 1);
        assert!(published.lock().unwrap().is_empty());
    }

    #[test]
    fn test_bridge_rejects_wrong_dof() {
        let result = KinematicsBridge::new(
            Box::new(GantryKinematics::default()),
            Box::new(RecordingSink::default()),
            vec![0.0; 7],
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_channel_sink_drops_when_full() {
        let (mut sink, mut rx) = ChannelJointSink::new(1);
        sink.publish(&[1.0]).unwrap();
        sink.publish(&[2.0]).unwrap();
        assert_eq!(rx.recv().await, Some(vec![1.0]));
        assert!(rx.try_recv().is_err());

        drop(rx);
        assert!(sink.publish(&[3.0]).is_err());
    }
}
