//! Pose stream client.
//!
//! Subscribes to a tracker pose server over UDP and keeps the newest sample
//! for one device in a [`SampleSlot`]. Receiving runs on its own tokio task;
//! the control loop only ever reads the slot.
//!
//! The subscription is renewed every `keepalive_ms`, and re-sent early when
//! no sample for the device has arrived for `resubscribe_ms`.
//!
//! # Example
//!
//! ```no_run
//! use vive_teleop::{PoseStreamClient, StreamConfig};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = StreamConfig::new("192.168.1.103", 8000, "controller_1");
//! let mut client = PoseStreamClient::start(&config).await?;
//!
//! if let Some(stamped) = client.latest_fresh() {
//!     println!("controller at {:?}", stamped.sample.position);
//! }
//!
//! client.stop().await?;
//! # Ok(())
//! # }
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::StreamConfig;
use crate::slot::{SampleSlot, StampedSample};
use crate::wire::{self, JsonSampleDecoder, SampleDecoder};

const MAX_DATAGRAM: usize = 64 * 1024;

/// Background subscriber for one tracked device.
pub struct PoseStreamClient {
    slot: Arc<SampleSlot>,
    stale_after: Duration,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl PoseStreamClient {
    /// Bind a local socket, subscribe and start receiving with the JSON decoder.
    pub async fn start(config: &StreamConfig) -> Result<Self> {
        Self::start_with_decoder(config, JsonSampleDecoder).await
    }

    /// Like [`start`](Self::start) with a custom datagram decoder.
    ///
    /// Fails only if the local socket cannot be bound. An unreachable server
    /// is not an error: the receive task keeps re-subscribing until data
    /// arrives or the client is stopped.
    pub async fn start_with_decoder<D: SampleDecoder>(
        config: &StreamConfig,
        decoder: D,
    ) -> Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0")
            .await
            .context("Failed to bind pose stream socket")?;
        tracing::info!(
            "Pose stream client bound to {}, subscribing to {} at {}:{}",
            socket.local_addr()?,
            config.device_name,
            config.host,
            config.port
        );

        let slot = Arc::new(SampleSlot::new());
        let cancel = CancellationToken::new();
        let receiver = Receiver {
            socket,
            subscription: Subscription {
                server: format!("{}:{}", config.host, config.port),
                device_name: config.device_name.clone(),
            },
            resubscribe: config.resubscribe(),
            keepalive: config.keepalive(),
            retry_backoff: config.retry_backoff(),
            slot: Arc::clone(&slot),
            decoder,
        };

        let task_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            receiver.run(task_cancel).await;
        });

        Ok(Self {
            slot,
            stale_after: config.stale_after(),
            cancel,
            task: Some(task),
        })
    }

    /// Newest sample, however old.
    pub fn latest(&self) -> Option<Arc<StampedSample>> {
        self.slot.latest()
    }

    /// Newest sample if it is younger than the configured staleness limit.
    pub fn latest_fresh(&self) -> Option<Arc<StampedSample>> {
        self.slot.latest_fresh(self.stale_after)
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop receiving and wait for the receive task to exit.
    ///
    /// Safe to call more than once.
    pub async fn stop(&mut self) -> Result<()> {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.await.context("Pose stream receive task panicked")?;
            tracing::info!("Pose stream client stopped");
        }
        Ok(())
    }
}

impl Drop for PoseStreamClient {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Where and what to subscribe to.
struct Subscription {
    server: String,
    device_name: String,
}

impl Subscription {
    /// Send the subscription request. Returns the resolved server address.
    async fn send(&self, socket: &UdpSocket) -> Option<SocketAddr> {
        let addr = match tokio::net::lookup_host(&self.server).await {
            Ok(mut addrs) => addrs.find(|a| a.is_ipv4()),
            Err(e) => {
                tracing::debug!("Failed to resolve {}: {}", self.server, e);
                None
            }
        };
        let addr = addr?;
        let request = wire::encode_subscribe(&self.device_name);
        if let Err(e) = socket.send_to(&request, addr).await {
            tracing::debug!("Failed to subscribe at {}: {}", addr, e);
        }
        Some(addr)
    }
}

struct Receiver<D> {
    socket: UdpSocket,
    subscription: Subscription,
    resubscribe: Duration,
    keepalive: Duration,
    retry_backoff: Duration,
    slot: Arc<SampleSlot>,
    decoder: D,
}

impl<D: SampleDecoder> Receiver<D> {
    async fn run(mut self, cancel: CancellationToken) {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let mut server_addr = None;
        let mut subscribe_due = true;

        // Restarted only when a sample for our device is stored.
        let silence = tokio::time::sleep(self.resubscribe);
        tokio::pin!(silence);
        let mut keepalive =
            tokio::time::interval_at(Instant::now() + self.keepalive, self.keepalive);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if subscribe_due {
                server_addr = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    addr = self.subscription.send(&self.socket) => addr,
                };
                subscribe_due = false;
                silence.as_mut().reset(Instant::now() + self.resubscribe);
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = &mut silence => {
                    tracing::debug!("No pose data for {:?}, re-subscribing", self.resubscribe);
                    subscribe_due = true;
                }
                _ = keepalive.tick() => {
                    tracing::trace!("Renewing subscription");
                    subscribe_due = true;
                }
                result = self.socket.recv_from(&mut buf) => {
                    match result {
                        Ok((n, from)) => {
                            if server_addr.is_some_and(|addr| addr != from) {
                                tracing::trace!("Ignoring datagram from {}", from);
                                continue;
                            }
                            if self.handle_datagram(&buf[..n]) {
                                silence.as_mut().reset(Instant::now() + self.resubscribe);
                            }
                        }
                        Err(e) => {
                            tracing::debug!("Pose stream receive error: {}", e);
                            tokio::select! {
                                biased;
                                _ = cancel.cancelled() => break,
                                _ = tokio::time::sleep(self.retry_backoff) => {}
                            }
                        }
                    }
                }
            }
        }
    }

    /// Decode and store one datagram. Returns true if a sample was stored.
    fn handle_datagram(&mut self, datagram: &[u8]) -> bool {
        match self.decoder.decode(datagram) {
            Ok(sample) if sample.device_name == self.subscription.device_name => {
                self.slot.replace(sample);
                true
            }
            Ok(sample) => {
                tracing::trace!("Ignoring sample for {}", sample.device_name);
                false
            }
            Err(e) => {
                tracing::debug!("Dropping undecodable datagram: {}", e);
                false
            }
        }
    }
}
