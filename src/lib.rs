//! vive-teleop - Teleoperate a robot arm with a tracked VR controller.
//!
//! A [`PoseStreamClient`] subscribes to a tracker pose server and keeps the
//! newest controller sample. The [`ControlLoop`] turns the change in
//! controller pose between ticks into motion of a target end-effector pose,
//! solves inverse kinematics for it and publishes joint commands, while the
//! grip button toggles the gripper.
//!
//! # Controls
//!
//! - **Trigger** (held): robot follows controller motion
//! - **Grip** (press): toggle gripper open/closed
//! - **Menu** (held): capture the controller orientation as the motion frame
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//! use vive_teleop::{
//!     ChannelJointSink, ControlLoop, GantryKinematics, GripperCoordinator, KinematicsBridge,
//!     PoseStreamClient, SimulatedGripper, TeleopConfig,
//! };
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = TeleopConfig::load("teleop.json")?;
//!
//! let (sink, _joint_rx) = ChannelJointSink::new(16);
//! let bridge = KinematicsBridge::new(
//!     Box::new(GantryKinematics::default()),
//!     Box::new(sink),
//!     vec![0.5, 0.0, 0.4, 0.0, 0.0, 0.0],
//! )?;
//!
//! let mut gripper = GripperCoordinator::new(
//!     config.gripper.clone(),
//!     Box::new(SimulatedGripper::new(Duration::from_millis(200))),
//! );
//! gripper.home().await?;
//!
//! let client = PoseStreamClient::start(&config.stream).await?;
//! let stats = ControlLoop::new(&config, bridge, gripper)
//!     .run(client, CancellationToken::new())
//!     .await?;
//! println!("{} ticks", stats.ticks);
//! # Ok(())
//! # }
//! ```

pub mod calibration;
pub mod client;
pub mod config;
pub mod driver;
pub mod gripper;
pub mod integrator;
pub mod kinematics;
pub mod sample;
pub mod slot;
pub mod wire;

pub use calibration::CalibrationFrame;
pub use client::PoseStreamClient;
pub use config::{
    ConfigError, ControlConfig, GripperConfig, MotionConfig, StreamConfig, TeleopConfig,
};
pub use driver::{ControlLoop, LoopStats, TickReport};
pub use gripper::{
    action_channel, ActionCompleter, ActionHandle, ActionResult, ActionStatus, GripperCommand,
    GripperCoordinator, GripperEvent, GripperIntent, GripperTransport, SimulatedGripper,
    WatchedAction,
};
pub use integrator::{Motion, PoseIntegrator};
pub use kinematics::{
    ArmKinematics, ChannelJointSink, GantryKinematics, IkFailure, IkOutcome, JointCommandSink,
    KinematicsBridge,
};
pub use sample::{Buttons, TrackerSample};
pub use slot::{SampleSlot, StampedSample};
pub use wire::{DecodeError, JsonSampleDecoder, SampleDecoder};
