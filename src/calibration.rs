//! User-selected rotation applied to controller motion.

use nalgebra::{Matrix3, Rotation3, Vector3};

use crate::sample::TrackerSample;

/// Rotation that aligns controller-relative motion with the robot's axes.
///
/// Starts as identity and only changes when the operator captures a new frame
/// (menu button), at which point the controller's current orientation becomes
/// the frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CalibrationFrame {
    rotation: Rotation3<f64>,
}

impl Default for CalibrationFrame {
    fn default() -> Self {
        Self::identity()
    }
}

impl CalibrationFrame {
    pub fn identity() -> Self {
        Self {
            rotation: Rotation3::identity(),
        }
    }

    pub fn from_rotation(rotation: Rotation3<f64>) -> Self {
        Self { rotation }
    }

    /// Capture the sample's orientation as the new frame.
    pub fn capture(&mut self, sample: &TrackerSample) {
        self.rotation = sample.rotation;
    }

    pub fn matrix(&self) -> &Matrix3<f64> {
        self.rotation.matrix()
    }

    /// Rotate a motion vector into the calibrated frame.
    pub fn apply(&self, v: &Vector3<f64>) -> Vector3<f64> {
        self.rotation * v
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::FRAC_PI_2;

    #[test]
    fn test_identity_is_noop() {
        let frame = CalibrationFrame::default();
        let v = Vector3::new(1.0, -2.0, 3.0);
        assert_eq!(frame.apply(&v), v);
    }

    #[test]
    fn test_capture_uses_sample_orientation() {
        let mut frame = CalibrationFrame::default();
        let sample = TrackerSample::new("controller_1")
            .rotation(Rotation3::from_euler_angles(0.0, 0.0, FRAC_PI_2));
        frame.capture(&sample);

        let rotated = frame.apply(&Vector3::x());
        assert!((rotated - Vector3::y()).norm() < 1e-12);
    }
}
