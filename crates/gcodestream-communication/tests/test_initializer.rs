//! Connection handshake and streaming through the reader task

mod common;

use common::{grbl_device, wait_for, MockConnection, IDLE_STATUS};
use gcodestream_communication::{Capability, Controller, ControllerConfig, ControllerType};
use gcodestream_core::{ControllerError, ControllerEvent, ControllerState, Error};
use std::time::Duration;

fn config() -> ControllerConfig {
    ControllerConfig {
        status_poll_interval_ms: 50,
        status_timeout_ms: 300,
        command_timeout_ms: 1000,
        ..ControllerConfig::new(ControllerType::Grbl)
    }
}

#[tokio::test]
async fn test_handshake_learns_device() {
    let controller = Controller::new(config());
    let mock = MockConnection::with_responder(grbl_device(IDLE_STATUS));

    controller
        .open_connection(Box::new(mock.clone()))
        .await
        .unwrap();

    assert!(controller.is_ready());
    let version = controller.firmware_version().unwrap();
    assert_eq!(version.letter, Some('h'));
    assert!(controller
        .capabilities()
        .has_capability(Capability::V1StatusFormat));
    assert_eq!(controller.firmware_setting("$110").as_deref(), Some("500.000"));
    assert!(controller.parser_state().is_some());
    assert_eq!(controller.status().state, ControllerState::Idle);
    assert!(controller.poll_timer().is_running());

    let written = mock.written_lines();
    assert_eq!(written, vec!["$I", "$$", "$G"]);

    // A second handshake on the same connection does nothing
    assert!(!controller.initialize().await.unwrap());

    controller.close_connection().unwrap();
    assert!(!controller.poll_timer().is_running());
}

#[tokio::test]
async fn test_handshake_accepts_alarm_after_reset() {
    let controller = Controller::new(config());
    let alarm = "<Alarm|MPos:0.000,0.000,0.000|FS:0,0>";
    let mock = MockConnection::with_responder(grbl_device(alarm));

    controller
        .open_connection(Box::new(mock.clone()))
        .await
        .unwrap();

    assert!(controller.is_ready());
    assert_eq!(controller.status().state, ControllerState::Alarm);
    assert!(mock.realtime_bytes().contains(&0x18));
    controller.close_connection().unwrap();
}

#[tokio::test]
async fn test_silent_device_is_unresponsive() {
    let controller = Controller::new(ControllerConfig {
        status_timeout_ms: 50,
        ..config()
    });
    let mock = MockConnection::new();

    let err = controller
        .open_connection(Box::new(mock.clone()))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::Controller(ControllerError::Unresponsive { attempts: 3 })
    ));
    assert!(!controller.is_connected());
    assert!(!mock.is_open());
    assert_eq!(
        mock.realtime_bytes()
            .iter()
            .filter(|&&b| b == b'?')
            .count(),
        3
    );
}

#[tokio::test]
async fn test_double_connect_rejected() {
    let controller = Controller::new(config());
    let mock = MockConnection::with_responder(grbl_device(IDLE_STATUS));
    controller
        .open_connection(Box::new(mock.clone()))
        .await
        .unwrap();

    let err = controller
        .open_connection(Box::new(MockConnection::new()))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Controller(ControllerError::AlreadyConnected)
    ));
    controller.close_connection().unwrap();
}

#[tokio::test]
async fn test_stream_against_device() {
    let controller = Controller::new(config());
    let mock = MockConnection::with_responder(grbl_device(IDLE_STATUS));
    controller
        .open_connection(Box::new(mock.clone()))
        .await
        .unwrap();
    let mut events = controller.subscribe();

    for i in 0..25 {
        controller
            .queue_command(controller.create_command(format!("G1 X{} F500", i)))
            .unwrap();
    }
    controller.begin_streaming().unwrap();

    let done = wait_for(&mut events, Duration::from_secs(5), |e| {
        matches!(e, ControllerEvent::StreamComplete { .. })
    })
    .await;
    assert!(matches!(done, Some(ControllerEvent::StreamComplete { success: true })));
    assert_eq!(controller.rows_completed(), 25);
    assert_eq!(controller.rows_remaining(), 0);
    controller.close_connection().unwrap();
}

#[tokio::test]
async fn test_poll_timer_keeps_status_fresh() {
    let controller = Controller::new(config());
    let running = "<Run|MPos:3.000,0.000,0.000|FS:500,0>";
    let mock = MockConnection::with_responder(grbl_device(running));

    controller
        .open_connection(Box::new(mock.clone()))
        .await
        .unwrap();
    mock.clear_written();
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert!(mock.realtime_bytes().iter().filter(|&&b| b == b'?').count() >= 2);
    assert_eq!(controller.status().machine_position.x, 3.0);
    controller.close_connection().unwrap();
}

#[tokio::test]
async fn test_dropped_link_disconnects() {
    let controller = Controller::new(config());
    let mock = MockConnection::with_responder(grbl_device(IDLE_STATUS));
    controller
        .open_connection(Box::new(mock.clone()))
        .await
        .unwrap();
    let mut events = controller.subscribe();

    mock.set_fail_writes(true);
    let _ = controller.send_command_immediately("G0 X1");

    let gone = wait_for(&mut events, Duration::from_secs(1), |e| {
        matches!(e, ControllerEvent::Disconnected)
    })
    .await;
    assert!(gone.is_some());
    assert!(!controller.is_connected());
}
