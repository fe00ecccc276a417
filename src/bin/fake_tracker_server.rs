//! Fake tracker server - streams a synthetic VR controller over UDP.
//!
//! Drop-in replacement for a tracker pose server that doesn't need a headset.
//! Waits for subscribe datagrams and streams samples for the requested device
//! to every subscriber: the controller moves in a slow horizontal circle, the
//! trigger is held for most of each lap and the grip button is pressed once
//! per lap.
//!
//! Clients renew their subscription every few seconds. A subscriber that has
//! not renewed for `SUBSCRIBER_TIMEOUT` is dropped.
//!
//! Usage:
//!   fake-tracker-server [OPTIONS]
//!
//! Options:
//!   --bind <addr>        Address to listen on (default: 0.0.0.0:8000)
//!   --rate <hz>          Samples per second (default: 100)
//!   --radius <m>         Circle radius in meters (default: 0.1)
//!   --lap <secs>         Seconds per lap (default: 8)
//!
//! Examples:
//!   fake-tracker-server
//!   fake-tracker-server --bind 127.0.0.1:9000 --rate 250

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::f64::consts::TAU;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use vive_teleop::wire;
use vive_teleop::TrackerSample;

/// Five default client keepalive periods.
const SUBSCRIBER_TIMEOUT: Duration = Duration::from_secs(10);

struct Subscriber {
    device_name: String,
    last_seen: Instant,
}

/// Drop subscribers that have not renewed since `now - timeout`.
fn evict_stale(
    subscribers: &mut HashMap<SocketAddr, Subscriber>,
    now: Instant,
    timeout: Duration,
) {
    subscribers.retain(|addr, sub| {
        let alive = now.duration_since(sub.last_seen) < timeout;
        if !alive {
            tracing::info!("{} stopped renewing {}, dropping", addr, sub.device_name);
        }
        alive
    });
}

struct Args {
    bind: String,
    rate: f64,
    radius: f64,
    lap: f64,
}

fn parse_args() -> Args {
    let args: Vec<String> = std::env::args().collect();
    let mut result = Args {
        bind: "0.0.0.0:8000".to_string(),
        rate: 100.0,
        radius: 0.1,
        lap: 8.0,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--bind" if i + 1 < args.len() => {
                result.bind = args[i + 1].clone();
                i += 2;
            }
            "--rate" if i + 1 < args.len() => {
                result.rate = args[i + 1].parse().unwrap_or(100.0);
                i += 2;
            }
            "--radius" if i + 1 < args.len() => {
                result.radius = args[i + 1].parse().unwrap_or(0.1);
                i += 2;
            }
            "--lap" if i + 1 < args.len() => {
                result.lap = args[i + 1].parse().unwrap_or(8.0);
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
    println!("Fake Tracker Server - streams a synthetic VR controller over UDP");
    println!();
    println!("Usage: fake-tracker-server [OPTIONS]");
    println!();
    println!("Options:");
    println!("  --bind <addr>        Address to listen on (default: 0.0.0.0:8000)");
    println!("  --rate <hz>          Samples per second (default: 100)");
    println!("  --radius <m>         Circle radius in meters (default: 0.1)");
    println!("  --lap <secs>         Seconds per lap (default: 8)");
}

/// Synthetic controller state `t` seconds into the stream.
fn synthesize(device_name: &str, t: f64, radius: f64, lap: f64) -> TrackerSample {
    let phase = (t / lap).fract();
    let angle = phase * TAU;
    let omega = TAU / lap;

    TrackerSample::new(device_name)
        .serial("LHR-FAKE0001")
        .position(radius * angle.cos(), 1.0, radius * angle.sin())
        // Slow wrist roll so the rotational path has something to do
        .rates(0.0, 0.0, 0.5 * (omega * t).sin())
        .trigger(phase < 0.8)
        .grip((0.85..0.9).contains(&phase))
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
    if !(args.rate > 0.0) || !(args.lap > 0.0) {
        anyhow::bail!("--rate and --lap must be positive");
    }

    let socket = UdpSocket::bind(&args.bind)
        .await
        .with_context(|| format!("Failed to bind {}", args.bind))?;

    println!();
    println!("========================================");
    println!("Fake Tracker Server");
    println!("========================================");
    println!("Listening: {}", socket.local_addr()?);
    println!("Rate:      {} Hz", args.rate);
    println!("Motion:    circle r={} m, {} s per lap", args.radius, args.lap);
    println!("========================================");
    println!();

    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Shutting down...");
        cancel_clone.cancel();
    });

    let mut subscribers: HashMap<SocketAddr, Subscriber> = HashMap::new();
    let mut interval = tokio::time::interval(Duration::from_secs_f64(1.0 / args.rate));
    let mut buf = vec![0u8; 1024];
    let start = Instant::now();

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = socket.recv_from(&mut buf) => {
                match result {
                    Ok((n, from)) => match wire::decode_subscribe(&buf[..n]) {
                        Some(device) => {
                            let renewed = Subscriber {
                                device_name: device.clone(),
                                last_seen: Instant::now(),
                            };
                            if subscribers.insert(from, renewed).is_none() {
                                tracing::info!("{} subscribed to {}", from, device);
                            } else {
                                tracing::trace!("{} renewed {}", from, device);
                            }
                        }
                        None => tracing::debug!("Ignoring {} bytes from {}", n, from),
                    },
                    Err(e) => tracing::debug!("Receive error: {}", e),
                }
            }
            _ = interval.tick() => {
                evict_stale(&mut subscribers, Instant::now(), SUBSCRIBER_TIMEOUT);
                let t = start.elapsed().as_secs_f64();
                let mut gone = Vec::new();
                for (addr, sub) in &subscribers {
                    let sample = synthesize(&sub.device_name, t, args.radius, args.lap);
                    if let Err(e) = socket.send_to(&wire::encode(&sample), *addr).await {
                        tracing::info!("Dropping subscriber {}: {}", addr, e);
                        gone.push(*addr);
                    }
                }
                for addr in gone {
                    subscribers.remove(&addr);
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subscriber(device_name: &str, last_seen: Instant) -> Subscriber {
        Subscriber {
            device_name: device_name.to_string(),
            last_seen,
        }
    }

    #[test]
    fn test_evicts_only_silent_subscribers() {
        let start = Instant::now();
        let now = start + Duration::from_secs(12);
        let timeout = Duration::from_secs(10);
        let fresh: SocketAddr = "127.0.0.1:5000".parse().unwrap();
        let silent: SocketAddr = "127.0.0.1:5001".parse().unwrap();

        let mut subscribers = HashMap::new();
        subscribers.insert(fresh, subscriber("controller_1", start + Duration::from_secs(10)));
        subscribers.insert(silent, subscriber("controller_2", start));

        evict_stale(&mut subscribers, now, timeout);
        assert!(subscribers.contains_key(&fresh));
        assert!(!subscribers.contains_key(&silent));
    }

    #[test]
    fn test_renewal_keeps_subscriber() {
        let start = Instant::now();
        let timeout = Duration::from_secs(10);
        let addr: SocketAddr = "127.0.0.1:5000".parse().unwrap();
        let mut subscribers = HashMap::new();
        subscribers.insert(addr, subscriber("controller_1", start));

        // Renewed at 8 s, checked at 15 s.
        subscribers.insert(addr, subscriber("controller_1", start + Duration::from_secs(8)));
        evict_stale(&mut subscribers, start + Duration::from_secs(15), timeout);
        assert_eq!(subscribers.len(), 1);

        evict_stale(&mut subscribers, start + Duration::from_secs(18), timeout);
        assert!(subscribers.is_empty());
    }

    #[test]
    fn test_synthesized_sample_names_device() {
        let sample = synthesize("controller_2", 1.0, 0.1, 8.0);
        assert_eq!(sample.device_name, "controller_2");
        assert!(sample.buttons.trigger);
    }
}
