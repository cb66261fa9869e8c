//! One function per CLI workflow, each driving a simulated detector.
//!
//! Every acquisition workflow opens a session, configures it for its
//! exposure mode, runs, and closes the session even when the run fails.

use crate::config::Settings;
use anyhow::{Context, Result};
use detector_core::limits::sequence_timeout;
use detector_core::{
    AcquisitionErrorKind, AcquisitionStatus, BufferInfo, DetectorError, DetectorResult,
    ExposureConfig, ExposureMode, Frame, FrameSequence, FrameView,
};
use detector_driver::{
    acquire_for, acquire_frames, acquire_sequence, trigger_and_acquire, AcquisitionController,
    CaptureConsole, CaptureSummary, ConsoleCommand, ConsoleEvent,
};
use detector_driver_mock::MockDetector;
use detector_storage::{
    capture_path, corrected_path, dark_correct_directory, CorrectionMaps, RasterDepth,
    TiffStorage, EXTERNAL_TRIGGER_PREFIX, SEQUENCE_CAPTURE_FILE, SOFTWARE_TRIGGER_PREFIX,
    STREAM_CALLBACK_PREFIX, XFPS_PREFIX,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

fn exposure_for(settings: &Settings, mode: ExposureMode) -> ExposureConfig {
    ExposureConfig {
        mode,
        exposure_time: settings.acquisition.exposure_time,
        dds: settings.acquisition.dds,
        frame_count: match mode {
            ExposureMode::Sequence => settings.acquisition.frame_count,
            _ => 1,
        },
    }
}

fn build_controller(settings: &Settings, mode: ExposureMode) -> Result<AcquisitionController> {
    let mut mock = settings.mock.clone();
    if mode == ExposureMode::ExternalTrigger && mock.external_trigger_interval.is_none() {
        mock.external_trigger_interval = Some(settings.acquisition.external_trigger_period);
    }
    let backend = MockDetector::from_config(mock).context("Invalid [mock] configuration")?;
    Ok(AcquisitionController::new(
        Arc::new(backend),
        settings.controller,
    ))
}

async fn open_session(settings: &Settings, mode: ExposureMode) -> Result<AcquisitionController> {
    std::fs::create_dir_all(&settings.paths.output_dir).with_context(|| {
        format!(
            "Cannot create output directory {}",
            settings.paths.output_dir.display()
        )
    })?;

    let controller = build_controller(settings, mode)?;
    controller.open().await.context("Failed to open camera")?;
    if let Err(e) = controller.configure(exposure_for(settings, mode)).await {
        controller.close().await.ok();
        return Err(e).context("Failed to configure camera");
    }
    Ok(controller)
}

/// Close the session and return the run's result, preferring the run error.
async fn finish(controller: &AcquisitionController, result: Result<()>) -> Result<()> {
    let closed = controller.close().await.context("Failed to close camera");
    result?;
    closed?;
    info!("Successfully closed camera");
    Ok(())
}

fn blank_frame(controller: &AcquisitionController) -> Result<Frame> {
    let device = controller
        .device_info()
        .context("Camera reported no geometry")?;
    Ok(Frame::with_bit_depth(
        device.width,
        device.height,
        device.bit_depth,
    )?)
}

fn save_frame(frame: &Frame, path: &Path) -> DetectorResult<()> {
    TiffStorage::write_frame(path, frame, RasterDepth::Sixteen)
}

fn report(workflow: &str, summary: &CaptureSummary) {
    info!(
        workflow,
        received = summary.received,
        missing_packet_frames = summary.missing_packet_frames,
        stop = ?summary.stop,
        "Capture finished"
    );
}

// =============================================================================
// Trigger workflows
// =============================================================================

/// Capture up to `frame_count` frames on (simulated) hardware triggers.
pub async fn external_trigger(settings: &Settings) -> Result<()> {
    let controller = open_session(settings, ExposureMode::ExternalTrigger).await?;
    let result = run_external_trigger(&controller, settings).await;
    finish(&controller, result).await
}

async fn run_external_trigger(controller: &AcquisitionController, settings: &Settings) -> Result<()> {
    let mut frame = blank_frame(controller)?;
    let dir = &settings.paths.output_dir;
    controller.start_stream().await?;
    info!("Awaiting hardware triggers");

    let summary = acquire_frames(
        controller,
        &mut frame,
        settings.acquisition.frame_count as usize,
        settings.acquisition.timeout,
        None,
        |frame, info| save_frame(frame, &capture_path(dir, EXTERNAL_TRIGGER_PREFIX, info.frame_count())),
    )
    .await?;
    controller.stop_stream().await?;
    report("external-trigger", &summary);
    summary.stop.escalate(controller.last_frame_count())?;
    Ok(())
}

/// Fire `frame_count` software triggers, saving each frame.
pub async fn software_trigger(settings: &Settings) -> Result<()> {
    let controller = open_session(settings, ExposureMode::SoftwareTrigger).await?;
    let result = run_software_trigger(&controller, settings).await;
    finish(&controller, result).await
}

async fn run_software_trigger(controller: &AcquisitionController, settings: &Settings) -> Result<()> {
    let mut frame = blank_frame(controller)?;
    controller.start_stream().await?;

    let mut saved = 0u32;
    for _ in 0..settings.acquisition.frame_count {
        let info = trigger_and_acquire(controller, &mut frame, settings.acquisition.timeout).await?;
        if info.status() == AcquisitionStatus::Fatal {
            return Err(DetectorError::acquisition(
                AcquisitionErrorKind::Fatal,
                info.frame_count(),
                "software-trigger capture",
            )
            .into());
        }
        if !info.is_usable() {
            warn!(%info, "Stopping software-trigger capture");
            break;
        }
        let path = capture_path(
            &settings.paths.output_dir,
            SOFTWARE_TRIGGER_PREFIX,
            info.frame_count(),
        );
        save_frame(&frame, &path)?;
        saved += 1;
    }
    controller.stop_stream().await?;
    info!(saved, "Software-trigger capture finished");
    Ok(())
}

/// One software-triggered burst into a multi-page `SequenceCapture.tif`.
pub async fn sequence(settings: &Settings) -> Result<()> {
    let controller = open_session(settings, ExposureMode::Sequence).await?;
    let result = run_sequence(&controller, settings).await;
    finish(&controller, result).await
}

async fn run_sequence(controller: &AcquisitionController, settings: &Settings) -> Result<()> {
    let device = controller
        .device_info()
        .context("Camera reported no geometry")?;
    let mut sequence = FrameSequence::with_bit_depth(
        device.width,
        device.height,
        device.bit_depth,
        settings.acquisition.frame_count as usize,
    )?;
    let timeout = sequence_timeout(settings.acquisition.exposure_time);

    controller.start_stream().await?;
    controller.software_trigger().await?;
    let outcome = acquire_sequence(controller, &mut sequence, timeout, None).await?;
    controller.stop_stream().await?;

    info!(
        requested = outcome.requested,
        received = outcome.received,
        missing_packet_frames = outcome.missing_packet_frames,
        stop = ?outcome.stop,
        "Sequence finished"
    );
    if sequence.is_empty() {
        warn!("No frames received, nothing to save");
    } else {
        let path = settings.paths.output_dir.join(SEQUENCE_CAPTURE_FILE);
        TiffStorage::write_sequence(&path, &sequence, RasterDepth::Sixteen)?;
        info!(path = %path.display(), "Saved sequence");
    }
    // Frames received before a fatal error are saved first.
    outcome.stop.escalate(controller.last_frame_count())?;
    Ok(())
}

// =============================================================================
// Free-running workflows
// =============================================================================

/// Free-running capture for `stream_duration`, saving every frame.
pub async fn xfps(settings: &Settings) -> Result<()> {
    let controller = open_session(settings, ExposureMode::ExtendedFrameRate).await?;
    let result = run_xfps(&controller, settings).await;
    finish(&controller, result).await
}

async fn run_xfps(controller: &AcquisitionController, settings: &Settings) -> Result<()> {
    let mut frame = blank_frame(controller)?;
    let dir = &settings.paths.output_dir;
    controller.start_stream().await?;

    let summary = acquire_for(
        controller,
        &mut frame,
        settings.acquisition.stream_duration,
        settings.acquisition.timeout,
        None,
        |frame, info| save_frame(frame, &capture_path(dir, XFPS_PREFIX, info.frame_count())),
    )
    .await?;
    controller.stop_stream().await?;
    report("xfps", &summary);
    summary.stop.escalate(controller.last_frame_count())?;
    Ok(())
}

/// Frames the callback may hand to the writer before it starts dropping.
const CALLBACK_WRITE_QUEUE: usize = 64;

/// Per-stream user context for the callback workflow.
///
/// The callback only copies frames into the write queue; files are written by
/// a blocking writer task.
#[derive(Debug)]
struct CallbackCounter {
    writes: mpsc::Sender<(u64, Frame)>,
    queued: u64,
    dropped: u64,
    errors: u64,
}

impl CallbackCounter {
    fn on_frame(&mut self, view: &FrameView<'_>, info: &BufferInfo) {
        if !info.is_usable() {
            error!(%info, "Received error in callback");
            self.errors += 1;
            return;
        }
        let frame = match view.to_frame() {
            Ok(frame) => frame,
            Err(e) => {
                error!(error = %e, code = e.code(), "Failed to copy callback frame");
                self.errors += 1;
                return;
            }
        };
        match self.writes.try_send((info.frame_count(), frame)) {
            Ok(()) => self.queued += 1,
            Err(TrySendError::Full(_)) | Err(TrySendError::Closed(_)) => {
                self.dropped += 1;
                warn!(
                    frame_count = info.frame_count(),
                    dropped = self.dropped,
                    "Write queue full, dropping callback frame"
                );
            }
        }
    }
}

#[derive(Debug, Default)]
struct WriterSummary {
    saved: u64,
    failed: u64,
}

fn spawn_writer(
    dir: PathBuf,
    mut writes: mpsc::Receiver<(u64, Frame)>,
) -> JoinHandle<WriterSummary> {
    tokio::task::spawn_blocking(move || {
        let mut summary = WriterSummary::default();
        while let Some((frame_count, frame)) = writes.blocking_recv() {
            let path = capture_path(&dir, STREAM_CALLBACK_PREFIX, frame_count);
            match save_frame(&frame, &path) {
                Ok(()) => summary.saved += 1,
                Err(e) => {
                    error!(error = %e, code = e.code(), "Failed to save callback frame");
                    summary.failed += 1;
                }
            }
        }
        summary
    })
}

/// Free-running stream delivered through a callback for `stream_duration`.
pub async fn callback(settings: &Settings) -> Result<()> {
    let controller = open_session(settings, ExposureMode::ExtendedFrameRate).await?;
    let result = run_callback(&controller, settings).await;
    finish(&controller, result).await
}

async fn run_callback(controller: &AcquisitionController, settings: &Settings) -> Result<()> {
    let (writes, queue) = mpsc::channel(CALLBACK_WRITE_QUEUE);
    let writer = spawn_writer(settings.paths.output_dir.clone(), queue);
    let counter = CallbackCounter {
        writes,
        queued: 0,
        dropped: 0,
        errors: 0,
    };
    let handle = controller
        .start_stream_with_callback(counter, |view, info, counter: &mut CallbackCounter| {
            counter.on_frame(view, info)
        })
        .await?;

    tokio::time::sleep(settings.acquisition.stream_duration).await;
    controller.stop_stream().await?;

    // Taking the counter apart drops its sender, closing the write queue.
    let finished = handle.finish().await.map(|(counter, summary)| {
        (counter.queued, counter.dropped, counter.errors, summary)
    });
    let written = writer.await.context("Callback writer task failed")?;

    match finished {
        Some((queued, dropped, errors, summary)) => info!(
            queued,
            dropped,
            errors,
            saved = written.saved,
            write_failures = written.failed,
            invoked = summary.invoked,
            out_of_order = summary.out_of_order,
            "Callback stream finished"
        ),
        None => warn!(
            saved = written.saved,
            "Callback consumer was aborted before it drained"
        ),
    }
    Ok(())
}

// =============================================================================
// Offline correction
// =============================================================================

/// Offset -> gain -> defect correction of the configured source image.
pub async fn correct(settings: &Settings) -> Result<()> {
    let paths = settings.paths.clone();
    let correction = settings.correction;
    tokio::task::spawn_blocking(move || -> Result<()> {
        let maps = CorrectionMaps::load(&paths.dark_map, &paths.gain_map, &paths.defect_map)
            .context("Failed to load correction maps")?;
        let mut image = TiffStorage::read_frame(&paths.source_image)
            .context("Failed to read source image")?;

        let pipeline = maps.into_pipeline(correction.dark_offset, correction.gain_reference_offset);
        let report = pipeline.apply(&mut image)?;
        info!(?report, "Correction applied");

        std::fs::create_dir_all(&paths.output_dir)?;
        let out = corrected_path(&paths.output_dir, &paths.source_image);
        save_frame(&image, &out)?;
        info!(path = %out.display(), "Saved corrected image");
        Ok(())
    })
    .await
    .context("Correction task panicked")?
}

/// Dark-correct, crop and invert every tagged exposure in the batch directory.
pub async fn batch_dark(settings: &Settings) -> Result<()> {
    let paths = settings.paths.clone();
    let config = settings.correction.batch;
    let summary = tokio::task::spawn_blocking(move || {
        std::fs::create_dir_all(&paths.output_dir)?;
        dark_correct_directory(
            &paths.batch_source_dir,
            &paths.dark_library_dir,
            &paths.output_dir,
            &config,
        )
    })
    .await
    .context("Batch task panicked")??;

    info!(
        written = summary.written.len(),
        skipped = summary.skipped,
        "Batch dark correction complete"
    );
    Ok(())
}

// =============================================================================
// Console
// =============================================================================

fn parse_command(line: &str) -> Option<Option<ConsoleCommand>> {
    match line.trim().to_ascii_lowercase().as_str() {
        "on" => Some(Some(ConsoleCommand::CameraPower(true))),
        "off" => Some(Some(ConsoleCommand::CameraPower(false))),
        "stream" => Some(Some(ConsoleCommand::Streaming(true))),
        "nostream" => Some(Some(ConsoleCommand::Streaming(false))),
        "capture" => Some(Some(ConsoleCommand::Capture)),
        "quit" | "exit" => Some(None),
        _ => None,
    }
}

/// Drive the capture console from stdin, one command per line.
pub async fn console(settings: &Settings) -> Result<()> {
    std::fs::create_dir_all(&settings.paths.output_dir)?;
    let controller = build_controller(settings, ExposureMode::SoftwareTrigger)?;
    let mut console = CaptureConsole::new(
        controller,
        exposure_for(settings, ExposureMode::SoftwareTrigger),
        settings.acquisition.timeout,
    );
    info!("Commands: on, off, stream, nostream, capture, quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let command = match parse_command(&line) {
            Some(Some(command)) => command,
            Some(None) => break,
            None => {
                warn!(input = line.trim(), "Unknown command");
                continue;
            }
        };
        match console.apply(command).await {
            Ok(ConsoleEvent::State(state)) => info!(?state, "Console state"),
            Ok(ConsoleEvent::Captured { frame, info }) => {
                let path = capture_path(
                    &settings.paths.output_dir,
                    SOFTWARE_TRIGGER_PREFIX,
                    info.frame_count(),
                );
                if info.is_usable() {
                    save_frame(&frame, &path)?;
                    info!(path = %path.display(), "Saved capture");
                } else {
                    warn!(%info, "Capture produced no frame");
                }
            }
            Err(e) => error!(?command, code = e.code(), error = %e, "Command rejected"),
        }
    }

    console.shutdown().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn test_settings(dir: &Path) -> Settings {
        let mut settings = Settings::default();
        settings.paths.output_dir = dir.to_path_buf();
        settings.mock.width = 16;
        settings.mock.height = 8;
        settings.acquisition.frame_count = 3;
        settings.acquisition.exposure_time = Duration::from_millis(1);
        settings.acquisition.timeout = Duration::from_millis(500);
        settings.acquisition.stream_duration = Duration::from_millis(100);
        settings.acquisition.external_trigger_period = Duration::from_millis(5);
        settings
    }

    #[test]
    fn test_parse_command() {
        assert_eq!(parse_command(" ON "), Some(Some(ConsoleCommand::CameraPower(true))));
        assert_eq!(parse_command("nostream"), Some(Some(ConsoleCommand::Streaming(false))));
        assert_eq!(parse_command("quit"), Some(None));
        assert_eq!(parse_command("launch"), None);
    }

    #[tokio::test]
    async fn test_software_trigger_writes_one_file_per_frame() {
        let dir = TempDir::new().unwrap();
        software_trigger(&test_settings(dir.path())).await.unwrap();
        for fc in 1..=3 {
            assert!(dir.path().join(format!("SoftwareTriggerCapture{}.tif", fc)).is_file());
        }
    }

    #[tokio::test]
    async fn test_external_trigger_uses_simulated_pulses() {
        let dir = TempDir::new().unwrap();
        external_trigger(&test_settings(dir.path())).await.unwrap();
        assert!(dir.path().join("ExternalTriggerCapture3.tif").is_file());
    }

    #[tokio::test]
    async fn test_sequence_writes_multi_page_file() {
        let dir = TempDir::new().unwrap();
        sequence(&test_settings(dir.path())).await.unwrap();

        let saved = TiffStorage::read_sequence(dir.path().join(SEQUENCE_CAPTURE_FILE)).unwrap();
        assert_eq!(saved.depth(), 3);
        assert_eq!(saved.dimensions(), (16, 8));
    }

    #[tokio::test]
    async fn test_sequence_saves_frames_before_fatal_error() {
        let dir = TempDir::new().unwrap();
        let mut settings = test_settings(dir.path());
        settings.mock.fatal_at_frame = Some(3);
        settings.acquisition.frame_count = 5;

        let err = sequence(&settings).await.unwrap_err();
        let cause = err.downcast_ref::<DetectorError>().unwrap();
        assert!(matches!(
            cause,
            DetectorError::Acquisition {
                kind: AcquisitionErrorKind::Fatal,
                ..
            }
        ));

        let saved = TiffStorage::read_sequence(dir.path().join(SEQUENCE_CAPTURE_FILE)).unwrap();
        assert_eq!(saved.depth(), 2);
    }

    #[tokio::test]
    async fn test_software_trigger_escalates_fatal_frame() {
        let dir = TempDir::new().unwrap();
        let mut settings = test_settings(dir.path());
        settings.mock.fatal_at_frame = Some(2);

        let err = software_trigger(&settings).await.unwrap_err();
        assert_eq!(err.downcast_ref::<DetectorError>().unwrap().code(), 22);
        assert!(dir.path().join("SoftwareTriggerCapture1.tif").is_file());
        assert!(!dir.path().join("SoftwareTriggerCapture2.tif").exists());
    }

    #[test]
    fn test_callback_counter_only_queues_frames() {
        let (writes, mut queue) = mpsc::channel(1);
        let mut counter = CallbackCounter {
            writes,
            queued: 0,
            dropped: 0,
            errors: 0,
        };
        let mut frame = Frame::new(4, 2).unwrap();
        frame.fill(9);

        counter.on_frame(&frame.view(), &BufferInfo::success(1, 4, 2));
        counter.on_frame(&frame.view(), &BufferInfo::success(2, 4, 2));
        counter.on_frame(&FrameView::empty(), &BufferInfo::fatal(2, 4, 2));
        assert_eq!((counter.queued, counter.dropped, counter.errors), (1, 1, 1));

        let (frame_count, queued) = queue.try_recv().unwrap();
        assert_eq!(frame_count, 1);
        assert_eq!(queued.get(3, 1), Some(9));
        assert!(queue.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_callback_frames_are_written_after_stop() {
        let dir = TempDir::new().unwrap();
        callback(&test_settings(dir.path())).await.unwrap();

        assert!(dir.path().join("StreamCallbackCapture1.tif").is_file());
        let saved = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|entry| entry.ok())
            .filter(|entry| {
                entry
                    .file_name()
                    .to_string_lossy()
                    .starts_with(STREAM_CALLBACK_PREFIX)
            })
            .count();
        assert!(saved >= 2, "only {} callback frames saved", saved);
    }

    #[tokio::test]
    async fn test_correct_writes_corrected_image() {
        let dir = TempDir::new().unwrap();
        let mut settings = test_settings(dir.path());
        settings.paths.dark_map = dir.path().join("dark.tif");
        settings.paths.gain_map = dir.path().join("gain.tif");
        settings.paths.defect_map = dir.path().join("defect.tif");
        settings.paths.source_image = dir.path().join("PCB.tif");
        settings.correction.dark_offset = 0;
        settings.correction.gain_reference_offset = 0;

        let mut flat = Frame::new(4, 4).unwrap();
        flat.fill(100);
        let mut source = Frame::new(4, 4).unwrap();
        source.fill(700);
        save_frame(&Frame::new(4, 4).unwrap(), &settings.paths.dark_map).unwrap();
        save_frame(&flat, &settings.paths.gain_map).unwrap();
        save_frame(&Frame::new(4, 4).unwrap(), &settings.paths.defect_map).unwrap();
        save_frame(&source, &settings.paths.source_image).unwrap();

        correct(&settings).await.unwrap();
        let corrected = TiffStorage::read_frame(dir.path().join("Corrected_PCB.tif")).unwrap();
        assert!(corrected.pixels().iter().all(|&v| v == 700));
    }

    #[tokio::test]
    async fn test_correct_reports_missing_maps() {
        let dir = TempDir::new().unwrap();
        let mut settings = test_settings(dir.path());
        settings.paths.dark_map = dir.path().join("missing.tif");
        let err = correct(&settings).await.unwrap_err();
        assert!(err.to_string().contains("correction maps"));
    }
}
