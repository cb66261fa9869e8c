//! Capture loops for the sequence, external-trigger and free-running workflows.

use detector_core::limits::sequence_timeout;
use detector_core::{
    AcquisitionErrorKind, DetectorError, ExposureConfig, ExposureMode, Frame, FrameSequence,
};
use detector_correction::CorrectionPipeline;
use detector_driver::{
    acquire_for, acquire_frames, acquire_sequence, trigger_and_acquire, AcquisitionController,
    ControllerSettings, StopReason,
};
use detector_driver_mock::{FrameFault, MockDetector, MockMode, TimingConfig};
use std::sync::Arc;
use std::time::Duration;

const W: u32 = 8;
const H: u32 = 4;
const SHORT: Duration = Duration::from_millis(50);
const LONG: Duration = Duration::from_secs(2);

async fn streaming(
    mock: MockDetector,
    config: ExposureConfig,
) -> (Arc<MockDetector>, AcquisitionController) {
    let mock = Arc::new(mock);
    let controller = AcquisitionController::new(
        mock.clone(),
        ControllerSettings {
            pool_slots: 32,
            queue_depth: 32,
            ..ControllerSettings::default()
        },
    );
    controller.open().await.unwrap();
    controller.configure(config).await.unwrap();
    controller.start_stream().await.unwrap();
    (mock, controller)
}

fn sequence_of(frames: u32) -> ExposureConfig {
    ExposureConfig {
        mode: ExposureMode::Sequence,
        exposure_time: Duration::from_millis(1),
        frame_count: frames,
        ..ExposureConfig::default()
    }
}

#[tokio::test]
async fn test_sequence_trims_unfilled_tail() {
    let (_mock, controller) = streaming(MockDetector::new(W, H), sequence_of(14)).await;
    let mut sequence = FrameSequence::new(W, H, 20).unwrap();

    controller.software_trigger().await.unwrap();
    let outcome = acquire_sequence(&controller, &mut sequence, SHORT, None)
        .await
        .unwrap();

    assert_eq!(outcome.requested, 20);
    assert_eq!(outcome.received, 14);
    assert_eq!(outcome.stop, StopReason::TimedOut);
    assert!(outcome.stop.escalate(14).is_ok());
    assert_eq!(sequence.depth(), 14);
    let firsts: Vec<u16> = sequence.iter().map(|s| s.get(0, 0).unwrap()).collect();
    assert_eq!(firsts, (1..=14).collect::<Vec<u16>>());
}

#[tokio::test]
async fn test_sequence_without_frames_is_empty() {
    let (_mock, controller) = streaming(MockDetector::new(W, H), sequence_of(5)).await;
    let mut sequence = FrameSequence::new(W, H, 5).unwrap();

    let outcome = acquire_sequence(&controller, &mut sequence, SHORT, None)
        .await
        .unwrap();
    assert_eq!(outcome.received, 0);
    assert!(sequence.is_empty());
}

#[tokio::test]
async fn test_sequence_complete_with_missing_packets() {
    let mock = MockDetector::new(W, H);
    mock.push_script([FrameFault::None, FrameFault::MissingPackets(2), FrameFault::None]);
    let (_mock, controller) = streaming(mock, sequence_of(3)).await;
    let mut sequence = FrameSequence::new(W, H, 3).unwrap();

    controller.software_trigger().await.unwrap();
    let timeout = sequence_timeout(controller.exposure().exposure_time);
    let outcome = acquire_sequence(&controller, &mut sequence, timeout, None)
        .await
        .unwrap();
    assert_eq!(outcome.stop, StopReason::Completed);
    assert_eq!(outcome.received, 3);
    assert_eq!(outcome.missing_packet_frames, 1);
    assert_eq!(sequence.depth(), 3);
}

#[tokio::test]
async fn test_sequence_stops_at_fatal() {
    let mock = MockDetector::new(W, H);
    mock.push_script([FrameFault::None, FrameFault::None, FrameFault::Fatal(-5)]);
    let (_mock, controller) = streaming(mock, sequence_of(6)).await;
    let mut sequence = FrameSequence::new(W, H, 6).unwrap();

    controller.software_trigger().await.unwrap();
    let outcome = acquire_sequence(&controller, &mut sequence, LONG, None)
        .await
        .unwrap();
    assert_eq!(outcome.stop, StopReason::Fatal);
    assert_eq!(outcome.received, 2);
    assert_eq!(sequence.depth(), 2);

    let err = outcome
        .stop
        .escalate(controller.last_frame_count())
        .unwrap_err();
    assert!(matches!(
        err,
        DetectorError::Acquisition {
            kind: AcquisitionErrorKind::Fatal,
            ..
        }
    ));
    assert_eq!(err.code(), 22);
}

#[tokio::test]
async fn test_sequence_stopped_midway_keeps_only_received_slices() {
    let mock = MockDetector::builder(W, H)
        .mode(MockMode::Realistic)
        .timing(TimingConfig::detector())
        .build();
    let config = ExposureConfig {
        exposure_time: Duration::from_millis(20),
        ..sequence_of(6)
    };
    let (_mock, controller) = streaming(mock, config).await;
    let mut sequence = FrameSequence::new(W, H, 6).unwrap();

    controller.software_trigger().await.unwrap();
    let (result, stopped) = tokio::join!(
        acquire_sequence(&controller, &mut sequence, LONG, None),
        async {
            tokio::time::sleep(Duration::from_millis(75)).await;
            controller.stop_stream().await
        }
    );
    stopped.unwrap();
    assert!(matches!(result, Err(DetectorError::InvalidState { .. })));

    let depth = sequence.depth();
    assert!(depth < 6, "depth {}", depth);
    let firsts: Vec<u16> = sequence.iter().map(|s| s.get(0, 0).unwrap()).collect();
    assert_eq!(firsts, (1..=depth as u16).collect::<Vec<u16>>());
}

#[tokio::test]
async fn test_sequence_correction_failure_trims_slice() {
    let (_mock, controller) = streaming(MockDetector::new(W, H), sequence_of(3)).await;
    let pipeline = CorrectionPipeline::new().with_dark(Frame::new(W * 2, H).unwrap(), 0);
    let mut sequence = FrameSequence::new(W, H, 3).unwrap();

    controller.software_trigger().await.unwrap();
    let err = acquire_sequence(&controller, &mut sequence, LONG, Some(&pipeline))
        .await
        .unwrap_err();
    assert!(matches!(err, DetectorError::DimensionMismatch { .. }));
    assert!(sequence.is_empty());
}

#[tokio::test]
async fn test_external_trigger_frames_up_to_limit() {
    let mock = MockDetector::builder(W, H)
        .external_trigger_interval(Duration::from_millis(5))
        .build();
    let config = ExposureConfig {
        mode: ExposureMode::ExternalTrigger,
        exposure_time: Duration::from_millis(1),
        ..ExposureConfig::default()
    };
    let (_mock, controller) = streaming(mock, config).await;

    let mut frame = Frame::new(W, H).unwrap();
    let mut seen = Vec::new();
    let summary = acquire_frames(&controller, &mut frame, 3, LONG, None, |frame, info| {
        assert_eq!(frame.get(0, 0), Some(info.frame_count() as u16));
        seen.push(info.frame_count());
        Ok(())
    })
    .await
    .unwrap();

    assert_eq!(summary.stop, StopReason::Completed);
    assert_eq!(summary.received, 3);
    assert_eq!(seen, vec![1, 2, 3]);
}

#[tokio::test]
async fn test_frame_loop_never_exceeds_limit() {
    let (_mock, controller) = streaming(MockDetector::new(W, H), sequence_of(5)).await;
    controller.software_trigger().await.unwrap();

    let mut frame = Frame::new(W, H).unwrap();
    let mut calls = 0;
    let summary = acquire_frames(&controller, &mut frame, 2, LONG, None, |_, _| {
        calls += 1;
        Ok(())
    })
    .await
    .unwrap();
    assert_eq!(summary.received, 2);
    assert_eq!(calls, 2);
}

#[tokio::test]
async fn test_frame_loop_stops_at_timeout() {
    let (_mock, controller) = streaming(MockDetector::new(W, H), ExposureConfig::default()).await;
    let mut frame = Frame::new(W, H).unwrap();
    let summary = acquire_frames(&controller, &mut frame, 10, SHORT, None, |_, _| Ok(()))
        .await
        .unwrap();
    assert_eq!(summary.stop, StopReason::TimedOut);
    assert_eq!(summary.received, 0);
}

#[tokio::test]
async fn test_correction_applied_per_frame() {
    let (_mock, controller) = streaming(MockDetector::new(W, H), sequence_of(2)).await;
    let mut dark = Frame::new(W, H).unwrap();
    dark.fill(u16::MAX);
    let pipeline = CorrectionPipeline::new().with_dark(dark, 0);

    controller.software_trigger().await.unwrap();
    let mut frame = Frame::new(W, H).unwrap();
    let summary = acquire_frames(&controller, &mut frame, 2, LONG, Some(&pipeline), |frame, _| {
        assert!(frame.pixels().iter().all(|&v| v == 0));
        Ok(())
    })
    .await
    .unwrap();
    assert_eq!(summary.received, 2);
}

#[tokio::test]
async fn test_correction_failure_aborts_loop() {
    let (_mock, controller) = streaming(MockDetector::new(W, H), sequence_of(2)).await;
    let pipeline = CorrectionPipeline::new().with_dark(Frame::new(W * 2, H).unwrap(), 0);

    controller.software_trigger().await.unwrap();
    let mut frame = Frame::new(W, H).unwrap();
    let err = acquire_frames(&controller, &mut frame, 2, LONG, Some(&pipeline), |_, _| Ok(()))
        .await
        .unwrap_err();
    assert!(matches!(err, DetectorError::DimensionMismatch { .. }));
}

#[tokio::test]
async fn test_free_running_for_duration() {
    let config = ExposureConfig {
        mode: ExposureMode::ExtendedFrameRate,
        exposure_time: Duration::from_millis(5),
        ..ExposureConfig::default()
    };
    let (_mock, controller) = streaming(MockDetector::new(W, H), config).await;

    let mut frame = Frame::new(W, H).unwrap();
    let mut last = 0;
    let summary = acquire_for(
        &controller,
        &mut frame,
        Duration::from_millis(150),
        SHORT,
        None,
        |_, info| {
            assert!(info.frame_count() > last);
            last = info.frame_count();
            Ok(())
        },
    )
    .await
    .unwrap();
    assert_eq!(summary.stop, StopReason::DurationElapsed);
    assert!(summary.received > 0);
}

#[tokio::test]
async fn test_trigger_and_acquire() {
    let (_mock, controller) = streaming(MockDetector::new(W, H), ExposureConfig::default()).await;
    let mut frame = Frame::new(W, H).unwrap();
    let info = trigger_and_acquire(&controller, &mut frame, LONG).await.unwrap();
    assert!(info.is_usable());
    assert_eq!(info.frame_count(), 1);
}
