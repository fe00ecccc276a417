//! Pose stream wire encoding.
//!
//! Each UDP datagram carries one JSON object:
//!
//! ```text
//! {
//!   "device_name": "controller_1", "serial_num": "LHR-1234",
//!   "x": 0.1, "y": 1.2, "z": -0.3,            // meters
//!   "qx": 0.0, "qy": 0.0, "qz": 0.0, "qw": 1.0, // orientation
//!   "p": 0.0, "q": 0.0, "r": 0.0,             // angular rates
//!   "trigger": false, "grip_button": false, "menu_button": false,
//!   "valid": true                              // optional, defaults to true
//! }
//! ```
//!
//! Clients subscribe by sending `{"subscribe": "<device_name>"}` to the server.

use nalgebra::{Quaternion, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sample::{Buttons, TrackerSample};

/// Reasons a datagram could not be turned into a sample.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed sample: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("non-finite value in field {0}")]
    NonFinite(&'static str),

    #[error("orientation quaternion has zero norm")]
    DegenerateQuaternion,
}

/// Turns one received datagram into a sample.
///
/// The pose stream client is generic over this so other stream formats can be
/// plugged in without touching the receive loop.
pub trait SampleDecoder: Send + 'static {
    fn decode(&mut self, datagram: &[u8]) -> Result<TrackerSample, DecodeError>;
}

/// Decoder for the JSON datagram format described in the module docs.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonSampleDecoder;

impl SampleDecoder for JsonSampleDecoder {
    fn decode(&mut self, datagram: &[u8]) -> Result<TrackerSample, DecodeError> {
        decode(datagram)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct WireSample {
    device_name: String,
    #[serde(default)]
    serial_num: String,
    x: f64,
    y: f64,
    z: f64,
    qx: f64,
    qy: f64,
    qz: f64,
    qw: f64,
    p: f64,
    q: f64,
    r: f64,
    #[serde(default)]
    trigger: bool,
    #[serde(default)]
    grip_button: bool,
    #[serde(default)]
    menu_button: bool,
    #[serde(default = "default_valid")]
    valid: bool,
}

fn default_valid() -> bool {
    true
}

#[derive(Debug, Serialize, Deserialize)]
struct Subscribe {
    subscribe: String,
}

fn finite(field: &'static str, value: f64) -> Result<f64, DecodeError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(DecodeError::NonFinite(field))
    }
}

/// Decode one sample datagram.
pub fn decode(datagram: &[u8]) -> Result<TrackerSample, DecodeError> {
    let wire: WireSample = serde_json::from_slice(datagram)?;

    let position = Vector3::new(
        finite("x", wire.x)?,
        finite("y", wire.y)?,
        finite("z", wire.z)?,
    );
    let angular_rate = Vector3::new(
        finite("p", wire.p)?,
        finite("q", wire.q)?,
        finite("r", wire.r)?,
    );
    let quat = Quaternion::new(
        finite("qw", wire.qw)?,
        finite("qx", wire.qx)?,
        finite("qy", wire.qy)?,
        finite("qz", wire.qz)?,
    );
    let unit = UnitQuaternion::try_new(quat, 1e-9).ok_or(DecodeError::DegenerateQuaternion)?;

    Ok(TrackerSample {
        device_name: wire.device_name,
        serial_num: wire.serial_num,
        position,
        rotation: unit.to_rotation_matrix(),
        angular_rate,
        buttons: Buttons {
            trigger: wire.trigger,
            grip: wire.grip_button,
            menu: wire.menu_button,
        },
        valid: wire.valid,
    })
}

/// Encode a sample as one datagram.
pub fn encode(sample: &TrackerSample) -> Vec<u8> {
    let q = UnitQuaternion::from_rotation_matrix(&sample.rotation);
    let wire = WireSample {
        device_name: sample.device_name.clone(),
        serial_num: sample.serial_num.clone(),
        x: sample.position.x,
        y: sample.position.y,
        z: sample.position.z,
        qx: q.i,
        qy: q.j,
        qz: q.k,
        qw: q.w,
        p: sample.angular_rate.x,
        q: sample.angular_rate.y,
        r: sample.angular_rate.z,
        trigger: sample.buttons.trigger,
        grip_button: sample.buttons.grip,
        menu_button: sample.buttons.menu,
        valid: sample.valid,
    };
    // Serializing plain numbers and strings cannot fail.
    serde_json::to_vec(&wire).unwrap_or_default()
}

/// Encode a subscribe request for `device_name`.
pub fn encode_subscribe(device_name: &str) -> Vec<u8> {
    serde_json::to_vec(&Subscribe {
        subscribe: device_name.to_string(),
    })
    .unwrap_or_default()
}

/// Decode a subscribe request, returning the requested device name.
pub fn decode_subscribe(datagram: &[u8]) -> Option<String> {
    serde_json::from_slice::<Subscribe>(datagram)
        .ok()
        .map(|s| s.subscribe)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Rotation3;

    const SAMPLE: &str = r#"{
        "device_name": "controller_1", "serial_num": "LHR-1234",
        "x": 0.1, "y": 1.2, "z": -0.3,
        "qx": 0.0, "qy": 0.0, "qz": 0.7071067811865476, "qw": 0.7071067811865476,
        "p": 0.5, "q": -0.2, "r": 0.0,
        "trigger": true, "grip_button": false, "menu_button": true
    }"#;

    #[test]
    fn test_decode_json_sample() {
        let sample = decode(SAMPLE.as_bytes()).unwrap();
        assert_eq!(sample.device_name, "controller_1");
        assert_eq!(sample.serial_num, "LHR-1234");
        assert_eq!(sample.x(), 0.1);
        assert_eq!(sample.angular_rate, Vector3::new(0.5, -0.2, 0.0));
        assert!(sample.buttons.trigger);
        assert!(!sample.buttons.grip);
        assert!(sample.buttons.menu);
        assert!(sample.valid);

        // 90 degrees about z
        let expected = Rotation3::from_euler_angles(0.0, 0.0, std::f64::consts::FRAC_PI_2);
        assert!((sample.rotation.matrix() - expected.matrix()).norm() < 1e-9);
    }

    #[test]
    fn test_decode_normalizes_quaternion() {
        let json = SAMPLE.replace("0.7071067811865476", "2.0");
        let sample = decode(json.as_bytes()).unwrap();
        let m = sample.rotation_matrix();
        assert!((m * m.transpose() - nalgebra::Matrix3::identity()).norm() < 1e-9);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(decode(b"not json"), Err(DecodeError::Malformed(_))));
        assert!(matches!(
            decode(br#"{"device_name": "controller_1"}"#),
            Err(DecodeError::Malformed(_))
        ));
    }

    #[test]
    fn test_decode_rejects_zero_quaternion() {
        let json = SAMPLE.replace("0.7071067811865476", "0.0");
        assert!(matches!(
            decode(json.as_bytes()),
            Err(DecodeError::DegenerateQuaternion)
        ));
    }

    #[test]
    fn test_encode_keeps_fields() {
        let sample = TrackerSample::new("tracker_1")
            .serial("LHR-9")
            .position(1.0, 2.0, 3.0)
            .rates(0.2, 0.3, 0.4)
            .grip(true)
            .valid(false);
        let decoded = decode(&encode(&sample)).unwrap();
        assert_eq!(decoded.device_name, "tracker_1");
        assert_eq!(decoded.position, sample.position);
        assert!(decoded.buttons.grip);
        assert!(!decoded.valid);
    }

    #[test]
    fn test_subscribe_message() {
        let msg = encode_subscribe("controller_1");
        assert_eq!(decode_subscribe(&msg).as_deref(), Some("controller_1"));
        assert_eq!(decode_subscribe(SAMPLE.as_bytes()), None);
    }
}
