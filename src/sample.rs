//! Controller samples as seen by the control loop.
//!
//! A [`TrackerSample`] is one decoded reading of the hand-held controller:
//! position, orientation, body angular rates and button state. Samples are
//! immutable once built and are replaced, never edited, when the next one
//! arrives.

use nalgebra::{Rotation3, Vector3};

/// Button state carried by a controller sample.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Buttons {
    /// Trigger fully pressed (enables motion)
    pub trigger: bool,
    /// Side grip button (toggles the gripper)
    pub grip: bool,
    /// Menu button (captures the calibration frame)
    pub menu: bool,
}

/// One pose + button reading from the tracked controller.
///
/// Orientation is kept as a rotation matrix; the wire quaternion is converted
/// at decode time and not stored.
///
/// # Example
///
/// ```
/// use vive_teleop::TrackerSample;
///
/// let sample = TrackerSample::new("controller_1")
///     .position(0.1, 0.0, 0.2)
///     .rates(0.0, 0.5, 0.0)
///     .trigger(true);
/// assert!(sample.buttons.trigger);
/// assert_eq!(sample.x(), 0.1);
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct TrackerSample {
    /// Device name the stream publishes this sample under (e.g. "controller_1")
    pub device_name: String,
    /// Hardware serial number of the device
    pub serial_num: String,
    /// Position in the tracking frame (meters)
    pub position: Vector3<f64>,
    /// Orientation in the tracking frame
    pub rotation: Rotation3<f64>,
    /// Body angular rates (p, q, r)
    pub angular_rate: Vector3<f64>,
    /// Button state
    pub buttons: Buttons,
    /// False when the tracking system reports the pose as untrusted
    pub valid: bool,
}

impl TrackerSample {
    /// Create a valid sample at the origin with identity orientation and no buttons pressed.
    pub fn new(device_name: &str) -> Self {
        Self {
            device_name: device_name.to_string(),
            serial_num: String::new(),
            position: Vector3::zeros(),
            rotation: Rotation3::identity(),
            angular_rate: Vector3::zeros(),
            buttons: Buttons::default(),
            valid: true,
        }
    }

    pub fn serial(mut self, serial_num: &str) -> Self {
        self.serial_num = serial_num.to_string();
        self
    }

    pub fn position(mut self, x: f64, y: f64, z: f64) -> Self {
        self.position = Vector3::new(x, y, z);
        self
    }

    pub fn rotation(mut self, rotation: Rotation3<f64>) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn rates(mut self, p: f64, q: f64, r: f64) -> Self {
        self.angular_rate = Vector3::new(p, q, r);
        self
    }

    pub fn trigger(mut self, pressed: bool) -> Self {
        self.buttons.trigger = pressed;
        self
    }

    pub fn grip(mut self, pressed: bool) -> Self {
        self.buttons.grip = pressed;
        self
    }

    pub fn menu(mut self, pressed: bool) -> Self {
        self.buttons.menu = pressed;
        self
    }

    pub fn valid(mut self, valid: bool) -> Self {
        self.valid = valid;
        self
    }

    pub fn x(&self) -> f64 {
        self.position.x
    }

    pub fn y(&self) -> f64 {
        self.position.y
    }

    pub fn z(&self) -> f64 {
        self.position.z
    }

    /// Orientation as a 3x3 rotation matrix.
    pub fn rotation_matrix(&self) -> nalgebra::Matrix3<f64> {
        *self.rotation.matrix()
    }
}
