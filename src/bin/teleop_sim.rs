//! Teleop simulator - drives a simulated gantry arm from a live pose stream.
//!
//! Runs the full teleoperation stack: pose stream client, pose integration,
//! IK against a gantry model and a simulated gripper. Joint commands are
//! logged instead of sent to hardware.
//!
//! Usage:
//!   teleop-sim [OPTIONS]
//!
//! Options:
//!   --config <path>      JSON config file (defaults used when omitted)
//!   --host <host>        Pose stream server host
//!   --port <port>        Pose stream server port
//!   --device <name>      Tracked device to follow (e.g. controller_1)
//!   --gripper-ms <ms>    Simulated gripper action latency (default: 300)
//!
//! Examples:
//!   teleop-sim --host 127.0.0.1                       # with fake-tracker-server
//!   teleop-sim --config teleop.json --device controller_2

use anyhow::Result;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use vive_teleop::{
    ChannelJointSink, ControlLoop, GantryKinematics, GripperCoordinator, KinematicsBridge,
    PoseStreamClient, SimulatedGripper, TeleopConfig,
};

/// Gantry centred in its workspace, wrist level.
const HOME_JOINTS: [f64; 6] = [0.5, 0.0, 0.4, 0.0, 0.0, 0.0];

struct Args {
    config: Option<String>,
    host: Option<String>,
    port: Option<u16>,
    device: Option<String>,
    gripper_ms: u64,
}

fn parse_args() -> Args {
    let args: Vec<String> = std::env::args().collect();
    let mut result = Args {
        config: None,
        host: None,
        port: None,
        device: None,
        gripper_ms: 300,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" if i + 1 < args.len() => {
                result.config = Some(args[i + 1].clone());
                i += 2;
            }
            "--host" if i + 1 < args.len() => {
                result.host = Some(args[i + 1].clone());
                i += 2;
            }
            "--port" if i + 1 < args.len() => {
                result.port = args[i + 1].parse().ok();
                i += 2;
            }
            "--device" if i + 1 < args.len() => {
                result.device = Some(args[i + 1].clone());
                i += 2;
            }
            "--gripper-ms" if i + 1 < args.len() => {
                result.gripper_ms = args[i + 1].parse().unwrap_or(300);
                i += 2;
            }
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            _ => {
                i += 1;
            }
        }
    }

    result
}

fn print_usage() {
    println!("Teleop Simulator - drive a simulated arm from a tracked controller");
    println!();
    println!("Usage: teleop-sim [OPTIONS]");
    println!();
    println!("Options:");
    println!("  --config <path>      JSON config file (defaults used when omitted)");
    println!("  --host <host>        Pose stream server host");
    println!("  --port <port>        Pose stream server port");
    println!("  --device <name>      Tracked device to follow (e.g. controller_1)");
    println!("  --gripper-ms <ms>    Simulated gripper action latency (default: 300)");
    println!();
    println!("Controls:");
    println!("  Trigger (hold)       Robot follows controller motion");
    println!("  Grip (press)         Toggle gripper");
    println!("  Menu (hold)          Capture controller orientation as motion frame");
}

fn load_config(args: &Args) -> Result<TeleopConfig> {
    let mut config = match &args.config {
        Some(path) => TeleopConfig::load(path)?,
        None => TeleopConfig::default(),
    };
    if let Some(ref host) = args.host {
        config.stream.host = host.clone();
    }
    if let Some(port) = args.port {
        config.stream.port = port;
    }
    if let Some(ref device) = args.device {
        config.stream.device_name = device.clone();
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("vive_teleop=info".parse()?)
                .add_directive("info".parse()?),
        )
        .init();

    let args = parse_args();
    let config = load_config(&args)?;

    println!();
    println!("========================================");
    println!("Teleop Simulator");
    println!("========================================");
    println!("Stream:    {}:{}", config.stream.host, config.stream.port);
    println!("Device:    {}", config.stream.device_name);
    println!("Period:    {} ms", config.control.period_ms);
    println!("Scale:     {} (rot {})", config.motion.velocity_scale, config.motion.rot_vel_scale);
    println!("Gripper:   simulated, {} ms per action", args.gripper_ms);
    println!("========================================");
    println!();

    let cancel = CancellationToken::new();

    // Joint commands are logged in place of a robot driver
    let (sink, mut joint_rx) = ChannelJointSink::new(64);
    let sink_cancel = cancel.clone();
    let sink_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                _ = sink_cancel.cancelled() => break,
                joints = joint_rx.recv() => {
                    let Some(joints) = joints else { break };
                    tracing::debug!(
                        "Joint command: [{}]",
                        joints.iter().map(|j| format!("{:.4}", j)).collect::<Vec<_>>().join(", ")
                    );
                }
            }
        }
    });

    let bridge = KinematicsBridge::new(
        Box::new(GantryKinematics::default()),
        Box::new(sink),
        HOME_JOINTS.to_vec(),
    )?;

    let mut gripper = GripperCoordinator::new(
        config.gripper.clone(),
        Box::new(SimulatedGripper::new(Duration::from_millis(args.gripper_ms))),
    );
    gripper.home().await?;

    let client = PoseStreamClient::start(&config.stream).await?;

    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Shutting down...");
        cancel_clone.cancel();
    });

    let stats = ControlLoop::new(&config, bridge, gripper)
        .run(client, cancel.clone())
        .await;

    cancel.cancel();
    let _ = sink_task.await;

    let stats = stats?;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}
