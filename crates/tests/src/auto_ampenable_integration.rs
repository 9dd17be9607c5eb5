//! Integration tests for the auto-ampenable service
//!
//! These run the real WebSocket sources and REST sink against the fake
//! device, so they use the wall clock with short intervals.

use crate::fake_device::{datapoll, level, wait_until, FakeDevice, Received, TOKEN};
use axum::http::StatusCode;
use maxxctl_core::domain::config::{AutoAmpenableConfig, DATAPOLL_PATH, LEVEL_PATH};
use maxxctl_core::domain::service::{AutoAmpenable, EngineError};
use maxxctl_core::domain::stream::StreamError;
use maxxctl_infra::device::{RestCommandSink, WebSocketSource};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const TIMEOUT: Duration = Duration::from_secs(5);

fn config() -> AutoAmpenableConfig {
    AutoAmpenableConfig {
        hold_time_ms: 1000,
        reconnect_interval_ms: 100,
        command_interval_ms: 200,
        ..AutoAmpenableConfig::default()
    }
}

fn command(device_id: usize, enabled: bool) -> Received {
    Received {
        device_id,
        token: Some(TOKEN.to_string()),
        value: serde_json::json!({ "value": enabled }),
    }
}

async fn start(
    device: &FakeDevice,
    config: &AutoAmpenableConfig,
) -> (CancellationToken, JoinHandle<Result<(), EngineError>>) {
    let sink = RestCommandSink::new(device.rest_addr(), TOKEN).unwrap();
    let service = AutoAmpenable::new(
        Arc::new(WebSocketSource::level(device.ws_addr())),
        Arc::new(WebSocketSource::datapoll(device.ws_addr())),
        Arc::new(sink),
        config,
    );

    let cancel = CancellationToken::new();
    let handle = tokio::spawn(service.run(cancel.clone()));

    wait_until(TIMEOUT, || {
        device.connections(LEVEL_PATH) == 1 && device.connections(DATAPOLL_PATH) == 1
    })
    .await;

    (cancel, handle)
}

async fn stop(cancel: CancellationToken, handle: JoinHandle<Result<(), EngineError>>) {
    cancel.cancel();
    handle.await.unwrap().unwrap();
}

// ============================================================================
// END-TO-END
// ============================================================================

#[tokio::test]
async fn test_enables_immediately_and_mutes_after_hold() {
    let device = FakeDevice::start().await;
    let (cancel, handle) = start(&device, &config()).await;

    // Channel 1 enabled but silent, channel 2 playing but disabled
    device.push(DATAPOLL_PATH, datapoll(&[true, false]));
    device.push(LEVEL_PATH, level(&[-150.0, -20.0]));

    wait_until(TIMEOUT, || device.received().len() == 1).await;
    assert_eq!(device.received(), vec![command(2, true)]);

    // Still inside the hold time
    tokio::time::sleep(Duration::from_millis(300)).await;
    device.push(LEVEL_PATH, level(&[-150.0, -20.0]));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(device.received().len(), 1);

    tokio::time::sleep(Duration::from_millis(800)).await;
    device.push(LEVEL_PATH, level(&[-150.0, -20.0]));

    wait_until(TIMEOUT, || device.received().len() == 2).await;
    assert_eq!(device.received(), vec![command(2, true), command(1, false)]);

    stop(cancel, handle).await;
}

#[tokio::test]
async fn test_signal_returning_cancels_pending_mute() {
    let device = FakeDevice::start().await;
    let (cancel, handle) = start(&device, &config()).await;

    device.push(DATAPOLL_PATH, datapoll(&[true]));
    device.push(LEVEL_PATH, level(&[-150.0]));
    tokio::time::sleep(Duration::from_millis(600)).await;

    device.push(LEVEL_PATH, level(&[-30.0]));
    tokio::time::sleep(Duration::from_millis(600)).await;

    // Silence restarts the hold time from here
    device.push(LEVEL_PATH, level(&[-150.0]));
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(device.received().is_empty());

    stop(cancel, handle).await;
}

// ============================================================================
// FAILURE HANDLING
// ============================================================================

#[tokio::test]
async fn test_reconnects_after_device_closes_stream() {
    let device = FakeDevice::start().await;
    let (cancel, handle) = start(&device, &config()).await;

    device.disconnect(LEVEL_PATH);
    wait_until(TIMEOUT, || device.connections(LEVEL_PATH) == 2).await;

    device.push(DATAPOLL_PATH, datapoll(&[false]));
    device.push(LEVEL_PATH, level(&[-10.0]));

    wait_until(TIMEOUT, || device.received().len() == 1).await;
    assert_eq!(device.received(), vec![command(1, true)]);
    assert!(!handle.is_finished());

    stop(cancel, handle).await;
}

#[tokio::test]
async fn test_rejected_command_is_retried() {
    let device = FakeDevice::start().await;
    device.set_status(StatusCode::UNAUTHORIZED);
    let (cancel, handle) = start(&device, &config()).await;

    device.push(DATAPOLL_PATH, datapoll(&[false]));
    device.push(LEVEL_PATH, level(&[-10.0]));
    wait_until(TIMEOUT, || device.received().len() == 1).await;

    device.set_status(StatusCode::NO_CONTENT);
    tokio::time::sleep(Duration::from_millis(250)).await;
    device.push(LEVEL_PATH, level(&[-10.0]));
    wait_until(TIMEOUT, || device.received().len() == 2).await;

    // Accepted, so the channel now counts as enabled
    tokio::time::sleep(Duration::from_millis(250)).await;
    device.push(LEVEL_PATH, level(&[-10.0]));
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(device.received(), vec![command(1, true), command(1, true)]);
    stop(cancel, handle).await;
}

#[tokio::test]
async fn test_malformed_message_is_skipped() {
    let device = FakeDevice::start().await;
    let (cancel, handle) = start(&device, &config()).await;

    device.push(LEVEL_PATH, "{\"level\": [[");
    device.push(DATAPOLL_PATH, datapoll(&[false]));
    device.push(LEVEL_PATH, level(&[-10.0]));

    wait_until(TIMEOUT, || device.received().len() == 1).await;
    assert_eq!(device.connections(LEVEL_PATH), 1);

    stop(cancel, handle).await;
}

#[tokio::test]
async fn test_strict_decoding_stops_service() {
    let device = FakeDevice::start().await;
    let config = AutoAmpenableConfig {
        strict_decoding: true,
        ..config()
    };
    let (cancel, handle) = start(&device, &config).await;

    device.push(LEVEL_PATH, "not json");

    let result = tokio::time::timeout(TIMEOUT, handle).await.unwrap().unwrap();
    assert!(matches!(
        result,
        Err(EngineError::Stream {
            source: StreamError::Decode(_),
            ..
        })
    ));
    assert!(!cancel.is_cancelled());
    assert!(device.received().is_empty());
}
