//! Pose stream client over a real loopback UDP socket.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use vive_teleop::{wire, PoseStreamClient, StreamConfig, TrackerSample};

async fn server() -> (UdpSocket, StreamConfig) {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let port = socket.local_addr().unwrap().port();
    let mut config = StreamConfig::new("127.0.0.1", port, "controller_1");
    config.resubscribe_ms = 100;
    (socket, config)
}

/// Wait for the next subscribe request and return the subscriber.
async fn accept(socket: &UdpSocket) -> (SocketAddr, String) {
    let mut buf = [0u8; 1024];
    let (n, from) = tokio::time::timeout(Duration::from_secs(2), socket.recv_from(&mut buf))
        .await
        .expect("no subscribe request")
        .unwrap();
    let device = wire::decode_subscribe(&buf[..n]).expect("not a subscribe request");
    (from, device)
}

async fn wait_until(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..400 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}

#[tokio::test]
async fn test_subscribes_and_receives_samples() {
    let (socket, config) = server().await;
    let mut client = PoseStreamClient::start(&config).await.unwrap();

    let (subscriber, device) = accept(&socket).await;
    assert_eq!(device, "controller_1");
    assert!(client.latest().is_none());

    let sample = TrackerSample::new("controller_1")
        .position(0.1, 1.2, -0.3)
        .trigger(true);
    socket.send_to(&wire::encode(&sample), subscriber).await.unwrap();

    assert!(wait_until(|| client.latest().is_some()).await);
    let stamped = client.latest_fresh().unwrap();
    assert!((stamped.sample.x() - 0.1).abs() < 1e-12);
    assert!((stamped.sample.y() - 1.2).abs() < 1e-12);
    assert!(stamped.sample.buttons.trigger);

    client.stop().await.unwrap();
}

#[tokio::test]
async fn test_ignores_other_devices_and_garbage() {
    let (socket, config) = server().await;
    let mut client = PoseStreamClient::start(&config).await.unwrap();
    let (subscriber, _) = accept(&socket).await;

    let other = TrackerSample::new("controller_2").position(9.0, 9.0, 9.0);
    socket.send_to(&wire::encode(&other), subscriber).await.unwrap();
    socket.send_to(b"not json", subscriber).await.unwrap();
    socket.send_to(br#"{"device_name":"controller_1"}"#, subscriber).await.unwrap();

    let good = TrackerSample::new("controller_1").position(0.5, 0.0, 0.0);
    socket.send_to(&wire::encode(&good), subscriber).await.unwrap();

    assert!(wait_until(|| client.latest().is_some()).await);
    assert_eq!(client.latest().unwrap().sample.device_name, "controller_1");
    assert!((client.latest().unwrap().sample.x() - 0.5).abs() < 1e-12);
    assert!(client.is_running());

    client.stop().await.unwrap();
}

#[tokio::test]
async fn test_newest_sample_wins() {
    let (socket, config) = server().await;
    let mut client = PoseStreamClient::start(&config).await.unwrap();
    let (subscriber, _) = accept(&socket).await;

    for i in 1..=20 {
        let sample = TrackerSample::new("controller_1").position(i as f64, 0.0, 0.0);
        socket.send_to(&wire::encode(&sample), subscriber).await.unwrap();
    }

    assert!(
        wait_until(|| client
            .latest()
            .is_some_and(|s| (s.sample.x() - 20.0).abs() < 1e-12))
        .await
    );

    client.stop().await.unwrap();
}

#[tokio::test]
async fn test_resubscribes_when_silent() {
    let (socket, config) = server().await;
    let mut client = PoseStreamClient::start(&config).await.unwrap();

    let (first, _) = accept(&socket).await;
    // No data sent: the client asks again after resubscribe_ms.
    let (second, device) = accept(&socket).await;
    assert_eq!(first, second);
    assert_eq!(device, "controller_1");

    client.stop().await.unwrap();
}

#[tokio::test]
async fn test_other_device_traffic_does_not_hold_off_resubscribe() {
    let (socket, config) = server().await;
    let socket = Arc::new(socket);
    let mut client = PoseStreamClient::start(&config).await.unwrap();
    let (subscriber, _) = accept(&socket).await;

    // Steady traffic for another device, faster than resubscribe_ms.
    let sender = Arc::clone(&socket);
    let flood = tokio::spawn(async move {
        let other = wire::encode(&TrackerSample::new("controller_2"));
        loop {
            let _ = sender.send_to(&other, subscriber).await;
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    });

    let (second, device) = accept(&socket).await;
    assert_eq!(second, subscriber);
    assert_eq!(device, "controller_1");
    assert!(client.latest().is_none());

    flood.abort();
    client.stop().await.unwrap();
}

#[tokio::test]
async fn test_renews_subscription_while_data_flows() {
    let (socket, mut config) = server().await;
    config.resubscribe_ms = 10_000;
    config.keepalive_ms = 50;
    let socket = Arc::new(socket);
    let mut client = PoseStreamClient::start(&config).await.unwrap();
    let (subscriber, _) = accept(&socket).await;

    let sender = Arc::clone(&socket);
    let stream = tokio::spawn(async move {
        let sample = wire::encode(&TrackerSample::new("controller_1"));
        loop {
            let _ = sender.send_to(&sample, subscriber).await;
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    });

    // Data keeps the silence timer quiet; only the keepalive can send this.
    let (renewed, device) = accept(&socket).await;
    assert_eq!(renewed, subscriber);
    assert_eq!(device, "controller_1");
    assert!(client.latest().is_some());

    stream.abort();
    client.stop().await.unwrap();
}

#[tokio::test]
async fn test_subscribes_by_hostname() {
    let (socket, mut config) = server().await;
    config.host = "localhost".to_string();
    let mut client = PoseStreamClient::start(&config).await.unwrap();

    let (subscriber, device) = accept(&socket).await;
    assert_eq!(device, "controller_1");
    let sample = TrackerSample::new("controller_1").position(0.2, 0.0, 0.0);
    socket.send_to(&wire::encode(&sample), subscriber).await.unwrap();
    assert!(wait_until(|| client.latest().is_some()).await);

    tokio::time::timeout(Duration::from_secs(1), client.stop())
        .await
        .expect("stop blocked")
        .unwrap();
    assert!(!client.is_running());
}

#[tokio::test]
async fn test_stop_during_unresolvable_subscribe_is_prompt() {
    let (_socket, mut config) = server().await;
    // Reserved TLD: resolution fails or stalls, it never succeeds.
    config.host = "pose-server.invalid".to_string();
    let mut client = PoseStreamClient::start(&config).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    tokio::time::timeout(Duration::from_secs(1), client.stop())
        .await
        .expect("stop blocked")
        .unwrap();
    assert!(!client.is_running());
}

#[tokio::test]
async fn test_stale_sample_is_not_fresh() {
    let (socket, mut config) = server().await;
    config.stale_after_ms = 30;
    let mut client = PoseStreamClient::start(&config).await.unwrap();
    let (subscriber, _) = accept(&socket).await;

    let sample = TrackerSample::new("controller_1");
    socket.send_to(&wire::encode(&sample), subscriber).await.unwrap();
    assert!(wait_until(|| client.latest().is_some()).await);

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(client.latest().is_some());
    assert!(client.latest_fresh().is_none());

    client.stop().await.unwrap();
}

#[tokio::test]
async fn test_stop_is_prompt_and_idempotent() {
    // Nothing listens on the far end; the receive task sits in recv.
    let (socket, config) = server().await;
    drop(socket);
    let mut client = PoseStreamClient::start(&config).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    tokio::time::timeout(Duration::from_secs(1), client.stop())
        .await
        .expect("stop blocked")
        .unwrap();
    assert!(!client.is_running());
    client.stop().await.unwrap();
}
