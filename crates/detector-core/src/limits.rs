//! Shared hard limits to prevent unbounded allocations.
//!
//! Every frame, sequence and pool allocation goes through
//! [`validate_frame_size`] so that a bogus width/height reported by a device
//! or read from a file cannot trigger a multi-gigabyte allocation.

use crate::error::{DetectorError, DetectorResult};
use std::time::Duration;

// =============================================================================
// Timeout Constants
// =============================================================================

/// Default bound on how long `stop_stream` waits for the callback consumer
/// to drain (2 seconds).
pub const STOP_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Default blocking-acquire timeout used by external-trigger workflows.
pub const EXTERNAL_TRIGGER_TIMEOUT: Duration = Duration::from_secs(10);

/// Fixed slack added to sequence-mode timeouts on top of ten exposures.
pub const SEQUENCE_TIMEOUT_SLACK: Duration = Duration::from_millis(1000);

// =============================================================================
// Size Limits
// =============================================================================

/// Maximum supported width/height for frames.
pub const MAX_FRAME_DIMENSION: u32 = 16_384;

/// Maximum allowed single-plane payload in bytes (default: 512MB).
pub const MAX_FRAME_BYTES: usize = 512 * 1024 * 1024;

/// Maximum allowed sequence payload in bytes (default: 8GB).
pub const MAX_SEQUENCE_BYTES: usize = 8 * 1024 * 1024 * 1024;

/// Bytes per stored sample. Planes are always held as `u16`.
pub const BYTES_PER_SAMPLE: usize = std::mem::size_of::<u16>();

/// Validated frame sizing information.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSize {
    /// Number of pixels in one plane.
    pub pixels: usize,
    /// Bytes needed to hold one plane.
    pub bytes: usize,
}

/// Validate frame dimensions and calculate pixel/byte sizes safely.
pub fn validate_frame_size(width: u32, height: u32) -> DetectorResult<FrameSize> {
    if width == 0 || height == 0 {
        return Err(DetectorError::invalid_parameter(
            "validate_frame_size",
            format!("frame dimensions must be non-zero, got {}x{}", width, height),
        ));
    }
    if width > MAX_FRAME_DIMENSION || height > MAX_FRAME_DIMENSION {
        return Err(DetectorError::invalid_parameter(
            "validate_frame_size",
            format!(
                "frame dimensions {}x{} exceed maximum {}",
                width, height, MAX_FRAME_DIMENSION
            ),
        ));
    }

    let pixels = (width as usize)
        .checked_mul(height as usize)
        .ok_or_else(|| DetectorError::ResourceExhausted {
            context: "frame pixel count overflow".into(),
            requested_bytes: usize::MAX,
        })?;

    let bytes = pixels
        .checked_mul(BYTES_PER_SAMPLE)
        .ok_or_else(|| DetectorError::ResourceExhausted {
            context: "frame byte size overflow".into(),
            requested_bytes: usize::MAX,
        })?;

    if bytes > MAX_FRAME_BYTES {
        return Err(DetectorError::ResourceExhausted {
            context: format!("frame exceeds {} byte limit", MAX_FRAME_BYTES),
            requested_bytes: bytes,
        });
    }

    Ok(FrameSize { pixels, bytes })
}

/// Validate the total size of a `depth`-slice sequence.
pub fn validate_sequence_size(width: u32, height: u32, depth: usize) -> DetectorResult<FrameSize> {
    let plane = validate_frame_size(width, height)?;
    let total = plane
        .bytes
        .checked_mul(depth)
        .filter(|total| *total <= MAX_SEQUENCE_BYTES)
        .ok_or_else(|| DetectorError::ResourceExhausted {
            context: format!("sequence of {} slices exceeds {} byte limit", depth, MAX_SEQUENCE_BYTES),
            requested_bytes: plane.bytes.saturating_mul(depth),
        })?;
    Ok(FrameSize {
        pixels: plane.pixels * depth,
        bytes: total,
    })
}

/// Timeout for one sequence-mode acquire: ten exposures plus fixed slack.
#[must_use]
pub fn sequence_timeout(exposure_time: Duration) -> Duration {
    exposure_time.saturating_mul(10) + SEQUENCE_TIMEOUT_SLACK
}
