//! Incremental pose integration.
//!
//! Turns consecutive controller samples into small Cartesian and angular
//! increments and accumulates them onto the robot's target pose. Motion is
//! relative: only the change in controller position between ticks moves the
//! target, so the operator can release the trigger, reposition their hand and
//! continue without the robot jumping.

use nalgebra::{Isometry3, UnitQuaternion, Vector3};

use crate::calibration::CalibrationFrame;
use crate::config::MotionConfig;
use crate::sample::TrackerSample;

/// What a single integration step did.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Motion {
    /// No valid sample: the reference was dropped and must be re-acquired.
    Lost,
    /// First valid sample after a gap; it only seeds the reference.
    Acquired,
    /// Trigger released (or motion suspended); only the reference advanced.
    Idle,
    /// The target pose was moved.
    Moved {
        /// World-frame translation added to the target (meters)
        translation: Vector3<f64>,
        /// Roll-pitch-yaw increment applied to the target orientation (degrees)
        rpy_deg: Vector3<f64>,
    },
}

impl Motion {
    pub fn moved(&self) -> bool {
        matches!(self, Motion::Moved { .. })
    }
}

/// Accumulates controller motion onto a target pose.
#[derive(Clone, Debug)]
pub struct PoseIntegrator {
    config: MotionConfig,
    reference: Option<Vector3<f64>>,
}

impl PoseIntegrator {
    pub fn new(config: MotionConfig) -> Self {
        Self {
            config,
            reference: None,
        }
    }

    pub fn config(&self) -> &MotionConfig {
        &self.config
    }

    /// Position the next delta will be measured against.
    pub fn reference(&self) -> Option<Vector3<f64>> {
        self.reference
    }

    /// Forget the reference; the next valid sample re-acquires it.
    pub fn reset(&mut self) {
        self.reference = None;
    }

    /// Integrate one tick.
    ///
    /// Absent or invalid samples drop the reference. Otherwise the reference
    /// always advances to the sample's position, and the target only moves
    /// while the trigger is held.
    pub fn step(
        &mut self,
        sample: Option<&TrackerSample>,
        calibration: &CalibrationFrame,
        target: &mut Isometry3<f64>,
    ) -> Motion {
        self.advance(sample, true, calibration, target)
    }

    /// Advance the reference without moving the target.
    pub fn hold(&mut self, sample: Option<&TrackerSample>) -> Motion {
        let mut scratch = Isometry3::identity();
        self.advance(sample, false, &CalibrationFrame::identity(), &mut scratch)
    }

    fn advance(
        &mut self,
        sample: Option<&TrackerSample>,
        engage: bool,
        calibration: &CalibrationFrame,
        target: &mut Isometry3<f64>,
    ) -> Motion {
        let Some(sample) = sample.filter(|s| s.valid) else {
            self.reference = None;
            return Motion::Lost;
        };

        let current = sample.position;
        let Some(previous) = self.reference.replace(current) else {
            return Motion::Acquired;
        };

        if !engage || !sample.buttons.trigger {
            return Motion::Idle;
        }

        let delta = current - previous;
        let rates = self.condition_rates(&sample.angular_rate);

        // Controller axes -> robot axes
        let translation = calibration
            .apply(&Vector3::new(-delta.x, delta.z, delta.y))
            * self.config.velocity_scale;
        let rpy_deg = calibration.apply(&Vector3::new(-rates.y, -rates.z, rates.x))
            * self.config.rot_vel_scale;

        compose(target, &translation, &rpy_deg);

        Motion::Moved {
            translation,
            rpy_deg,
        }
    }

    /// Clamp each rate to `[-clamp, clamp]`, then zero anything inside the deadband.
    pub fn condition_rates(&self, rates: &Vector3<f64>) -> Vector3<f64> {
        let clamp = self.config.clamp;
        let deadband = self.config.deadband;
        rates.map(|v| {
            let v = v.clamp(-clamp, clamp);
            if v.abs() <= deadband {
                0.0
            } else {
                v
            }
        })
    }
}

/// Roll-pitch-yaw rotation in "xyz" (arm) order, degrees: `Rx(rpy[2]) * Ry(rpy[1]) * Rz(rpy[0])`.
pub fn rpy_xyz_deg(rpy_deg: &Vector3<f64>) -> UnitQuaternion<f64> {
    let r = rpy_deg.map(f64::to_radians);
    UnitQuaternion::from_axis_angle(&Vector3::x_axis(), r.z)
        * UnitQuaternion::from_axis_angle(&Vector3::y_axis(), r.y)
        * UnitQuaternion::from_axis_angle(&Vector3::z_axis(), r.x)
}

/// Translate in the world frame, rotate in the tool frame.
pub fn compose(target: &mut Isometry3<f64>, translation: &Vector3<f64>, rpy_deg: &Vector3<f64>) {
    target.translation.vector += translation;
    target.rotation *= rpy_xyz_deg(rpy_deg);
}
