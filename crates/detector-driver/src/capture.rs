//! Acquisition loops for the standard workflows
//!
//! Each loop drives [`AcquisitionController::acquire`] repeatedly, optionally
//! corrects every usable frame in place, and reports why it stopped.
//! Frames with missing packets are usable and counted separately.

use crate::AcquisitionController;
use detector_core::{
    AcquisitionErrorKind, AcquisitionStatus, BufferInfo, DetectorError, DetectorResult, Frame,
    FrameCorrection, FrameSequence,
};
use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Why a capture loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The requested number of frames arrived.
    Completed,
    /// An acquire timed out before the target was reached.
    TimedOut,
    /// The backend reported a fatal transfer error.
    Fatal,
    /// The time budget ran out.
    DurationElapsed,
}

impl StopReason {
    /// Escalate a loop that ended on a fatal transfer error to
    /// [`DetectorError::Acquisition`]. Every other reason is a normal end.
    pub fn escalate(self, frame_count: u64) -> DetectorResult<()> {
        match self {
            StopReason::Fatal => Err(DetectorError::acquisition(
                AcquisitionErrorKind::Fatal,
                frame_count,
                "capture ended on a fatal transfer error",
            )),
            StopReason::Completed | StopReason::TimedOut | StopReason::DurationElapsed => Ok(()),
        }
    }
}

/// Result of a single-frame capture loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CaptureSummary {
    /// Usable frames processed.
    pub received: usize,
    /// Usable frames that reported missing packets.
    pub missing_packet_frames: usize,
    /// Why the loop ended.
    pub stop: StopReason,
}

/// Result of [`acquire_sequence`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SequenceOutcome {
    /// Depth of the sequence on entry.
    pub requested: usize,
    /// Slices kept (the sequence depth on return).
    pub received: usize,
    /// Kept slices that reported missing packets.
    pub missing_packet_frames: usize,
    /// Why the loop ended.
    pub stop: StopReason,
}

enum Step {
    Usable { missing_packets: bool },
    Stop(StopReason),
}

fn classify(info: &BufferInfo) -> Step {
    match info.status() {
        AcquisitionStatus::Success => Step::Usable {
            missing_packets: false,
        },
        AcquisitionStatus::MissingPackets => Step::Usable {
            missing_packets: true,
        },
        AcquisitionStatus::Timeout => Step::Stop(StopReason::TimedOut),
        AcquisitionStatus::Fatal => Step::Stop(StopReason::Fatal),
    }
}

/// Fill every slice of `sequence` in order.
///
/// Stops at the first timeout or fatal status, then removes the unfilled tail
/// so the sequence holds exactly the frames received. The tail is also removed
/// before an error is returned, so a failed call leaves only complete slices.
pub async fn acquire_sequence(
    controller: &AcquisitionController,
    sequence: &mut FrameSequence,
    timeout: Duration,
    correction: Option<&dyn FrameCorrection>,
) -> DetectorResult<SequenceOutcome> {
    let requested = sequence.depth();
    let mut received = 0;
    let mut missing_packet_frames = 0;
    let mut stop = StopReason::Completed;

    while received < requested {
        let info = match controller.acquire_slice(sequence, received, timeout).await {
            Ok(info) => info,
            Err(e) => {
                trim_unfilled(sequence, requested, received)?;
                return Err(e);
            }
        };
        match classify(&info) {
            Step::Usable { missing_packets } => {
                if let (Some(correction), Some(slice)) = (correction, sequence.slice_mut(received))
                {
                    if let Err(e) = correction.correct(slice) {
                        trim_unfilled(sequence, requested, received)?;
                        return Err(e);
                    }
                }
                if missing_packets {
                    missing_packet_frames += 1;
                }
                received += 1;
            }
            Step::Stop(reason) => {
                stop = reason;
                break;
            }
        }
    }

    trim_unfilled(sequence, requested, received)?;
    debug!(requested, received, ?stop, "Sequence capture finished");

    Ok(SequenceOutcome {
        requested,
        received,
        missing_packet_frames,
        stop,
    })
}

fn trim_unfilled(
    sequence: &mut FrameSequence,
    requested: usize,
    received: usize,
) -> DetectorResult<()> {
    let unfilled = requested - received;
    if unfilled > 0 {
        sequence.delete_last_n_slices(unfilled)?;
        info!(requested, received, trimmed = unfilled, "Trimmed unfilled sequence slices");
    }
    Ok(())
}

/// Acquire up to `limit` usable frames into `frame`, calling `on_frame` after
/// each one.
///
/// Stops at the first timeout or fatal status. An error from `correction` or
/// `on_frame` ends the loop with that error.
pub async fn acquire_frames<F>(
    controller: &AcquisitionController,
    frame: &mut Frame,
    limit: usize,
    timeout: Duration,
    correction: Option<&dyn FrameCorrection>,
    mut on_frame: F,
) -> DetectorResult<CaptureSummary>
where
    F: FnMut(&Frame, &BufferInfo) -> DetectorResult<()>,
{
    let mut summary = CaptureSummary {
        received: 0,
        missing_packet_frames: 0,
        stop: StopReason::Completed,
    };

    while summary.received < limit {
        let info = controller.acquire(frame, timeout).await?;
        match classify(&info) {
            Step::Usable { missing_packets } => {
                process(frame, &info, missing_packets, correction, &mut on_frame, &mut summary)?;
            }
            Step::Stop(reason) => {
                summary.stop = reason;
                break;
            }
        }
    }

    debug!(received = summary.received, stop = ?summary.stop, "Frame capture finished");
    Ok(summary)
}

/// Acquire free-running frames for `duration`.
///
/// Timeouts inside the window are skipped; a fatal status ends the loop.
pub async fn acquire_for<F>(
    controller: &AcquisitionController,
    frame: &mut Frame,
    duration: Duration,
    timeout: Duration,
    correction: Option<&dyn FrameCorrection>,
    mut on_frame: F,
) -> DetectorResult<CaptureSummary>
where
    F: FnMut(&Frame, &BufferInfo) -> DetectorResult<()>,
{
    let deadline = Instant::now() + duration;
    let mut summary = CaptureSummary {
        received: 0,
        missing_packet_frames: 0,
        stop: StopReason::DurationElapsed,
    };

    loop {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        let wait = timeout.min(deadline - now);
        let info = controller.acquire(frame, wait).await?;
        match classify(&info) {
            Step::Usable { missing_packets } => {
                process(frame, &info, missing_packets, correction, &mut on_frame, &mut summary)?;
            }
            Step::Stop(StopReason::TimedOut) => continue,
            Step::Stop(reason) => {
                summary.stop = reason;
                break;
            }
        }
    }

    debug!(received = summary.received, stop = ?summary.stop, "Timed capture finished");
    Ok(summary)
}

/// Fire one software trigger and wait for the resulting frame.
pub async fn trigger_and_acquire(
    controller: &AcquisitionController,
    frame: &mut Frame,
    timeout: Duration,
) -> DetectorResult<BufferInfo> {
    controller.software_trigger().await?;
    controller.acquire(frame, timeout).await
}

fn process<F>(
    frame: &mut Frame,
    info: &BufferInfo,
    missing_packets: bool,
    correction: Option<&dyn FrameCorrection>,
    on_frame: &mut F,
    summary: &mut CaptureSummary,
) -> DetectorResult<()>
where
    F: FnMut(&Frame, &BufferInfo) -> DetectorResult<()>,
{
    if let Some(correction) = correction {
        correction.correct(frame)?;
    }
    on_frame(frame, info)?;
    summary.received += 1;
    if missing_packets {
        summary.missing_packet_frames += 1;
    }
    Ok(())
}
