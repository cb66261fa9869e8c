//! Headless capture console toggles.

use detector_core::{AcquisitionStatus, DetectorError, ExposureConfig, SessionState};
use detector_driver::{
    AcquisitionController, CaptureConsole, ConsoleCommand, ConsoleEvent, ConsoleState,
    ControllerSettings,
};
use detector_driver_mock::MockDetector;
use std::sync::Arc;
use std::time::Duration;

fn console() -> (Arc<MockDetector>, CaptureConsole) {
    let mock = Arc::new(MockDetector::new(8, 4));
    let controller = AcquisitionController::new(mock.clone(), ControllerSettings::default());
    let console = CaptureConsole::new(controller, ExposureConfig::default(), Duration::from_secs(2));
    (mock, console)
}

#[tokio::test]
async fn test_commands_rejected_while_off() {
    let (_mock, mut console) = console();

    assert!(matches!(
        console.apply(ConsoleCommand::Capture).await,
        Err(DetectorError::InvalidState { .. })
    ));
    assert!(matches!(
        console.apply(ConsoleCommand::Streaming(true)).await,
        Err(DetectorError::InvalidState { .. })
    ));
    assert_eq!(console.state(), ConsoleState::default());
    assert_eq!(console.controller().state(), SessionState::Closed);
}

#[tokio::test]
async fn test_capture_requires_stream() {
    let (_mock, mut console) = console();
    console.apply(ConsoleCommand::CameraPower(true)).await.unwrap();

    assert!(matches!(
        console.apply(ConsoleCommand::Capture).await,
        Err(DetectorError::InvalidState { .. })
    ));
    assert_eq!(
        console.state(),
        ConsoleState {
            camera_open: true,
            streaming: false,
            armed_for_capture: false,
        }
    );
}

#[tokio::test]
async fn test_power_stream_capture_cycle() {
    let (mock, mut console) = console();

    console.apply(ConsoleCommand::CameraPower(true)).await.unwrap();
    assert_eq!(console.controller().state(), SessionState::Configured);

    let event = console.apply(ConsoleCommand::Streaming(true)).await.unwrap();
    assert_eq!(
        event,
        ConsoleEvent::State(ConsoleState {
            camera_open: true,
            streaming: true,
            armed_for_capture: true,
        })
    );

    for expected in 1..=2u64 {
        match console.apply(ConsoleCommand::Capture).await.unwrap() {
            ConsoleEvent::Captured { frame, info } => {
                assert_eq!(info.status(), AcquisitionStatus::Success);
                assert_eq!(info.frame_count(), expected);
                assert_eq!(frame.dimensions(), (8, 4));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    console.apply(ConsoleCommand::Streaming(false)).await.unwrap();
    assert!(!mock.is_streaming());
    assert!(!console.state().armed_for_capture);

    console.apply(ConsoleCommand::CameraPower(false)).await.unwrap();
    assert!(!mock.is_open());
    assert_eq!(console.state(), ConsoleState::default());
}

#[tokio::test]
async fn test_power_off_while_streaming_stops_stream() {
    let (mock, mut console) = console();
    console.apply(ConsoleCommand::CameraPower(true)).await.unwrap();
    console.apply(ConsoleCommand::Streaming(true)).await.unwrap();

    console.apply(ConsoleCommand::CameraPower(false)).await.unwrap();
    assert!(!mock.is_streaming());
    assert!(!mock.is_open());
    assert_eq!(console.controller().state(), SessionState::Closed);

    // Powering back on starts from a clean slate.
    console.apply(ConsoleCommand::CameraPower(true)).await.unwrap();
    assert!(!console.state().streaming);
    console.shutdown().await.unwrap();
}
