//! Error types for detector control and image correction.
//!
//! [`DetectorError`] is the single error type returned by every fallible
//! operation in the workspace. Each variant carries enough context to diagnose
//! a failure from a log line alone: the operation that failed, a stable numeric
//! code ([`DetectorError::code`]) and the offending parameter or dimensions.
//!
//! ## Error Taxonomy
//!
//! Variants group into the categories returned by [`DetectorError::category`]:
//!
//! - **Configuration**: `InvalidParameter`, `InvalidState`
//! - **Acquisition**: `Acquisition` (Timeout / MissingPackets / Fatal), `ResourceExhausted`
//! - **Correction**: `DimensionMismatch`
//! - **Io**: `Io`, `Storage`
//! - **Hardware**: `HardwareUnavailable`, `Hardware`
//!
//! Per-frame acquisition outcomes are normally *not* errors. `acquire` reports
//! Timeout, MissingPackets and Fatal through [`crate::BufferInfo::status`] and
//! only returns `Err` when the call could not be attempted at all. The
//! `Acquisition` variant exists for callers that want to escalate an outcome
//! (for example a capture loop that must fail on a Fatal frame).
//!
//! Nothing in this crate retries. Retry policy is a caller-level decision.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Convenience alias for results using the detector error type.
pub type DetectorResult<T> = std::result::Result<T, DetectorError>;

/// Broad error category used for reporting and exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Invalid parameter or wrong session state for the call.
    Configuration,
    /// Frame delivery failed or could not be set up.
    Acquisition,
    /// Correction stage rejected its inputs.
    Correction,
    /// File read/write failure.
    Io,
    /// Device missing, owned elsewhere or reporting a fault.
    Hardware,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorCategory::Configuration => "configuration",
            ErrorCategory::Acquisition => "acquisition",
            ErrorCategory::Correction => "correction",
            ErrorCategory::Io => "io",
            ErrorCategory::Hardware => "hardware",
        };
        write!(f, "{}", label)
    }
}

/// Kind of an escalated acquisition failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AcquisitionErrorKind {
    /// No frame arrived within the timeout.
    Timeout,
    /// Frame arrived with lost packets.
    MissingPackets,
    /// Unrecoverable delivery failure.
    Fatal,
}

impl fmt::Display for AcquisitionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            AcquisitionErrorKind::Timeout => "timeout",
            AcquisitionErrorKind::MissingPackets => "missing_packets",
            AcquisitionErrorKind::Fatal => "fatal",
        };
        write!(f, "{}", label)
    }
}

/// Primary error type for detector-daq.
///
/// # Example
///
/// ```rust
/// use detector_core::{DetectorError, ErrorCategory};
///
/// let err = DetectorError::dimension_mismatch("offset_correction", (4, 4), (2, 2));
/// assert_eq!(err.category(), ErrorCategory::Correction);
/// assert!(err.to_string().contains("expected 4x4"));
/// ```
#[derive(Error, Debug)]
pub enum DetectorError {
    /// A parameter is outside the range the device or operation supports.
    ///
    /// **Error Type**: Permanent for the given value.
    ///
    /// **Recovery Strategy**: Fix the value and call again. Session state is
    /// unchanged.
    #[error("{operation}: invalid parameter: {message}")]
    InvalidParameter {
        /// Operation that rejected the parameter.
        operation: &'static str,
        /// Which parameter and why.
        message: String,
    },

    /// The call is not valid in the current session state.
    ///
    /// Examples: configuring while streaming, acquiring while not streaming,
    /// software trigger in external-trigger mode, closing mid-acquire.
    ///
    /// **Error Type**: State-related, usually transient.
    ///
    /// **Recovery Strategy**: Drive the session into the required state first.
    #[error("{operation}: invalid state: {message}")]
    InvalidState {
        /// Operation that was rejected.
        operation: &'static str,
        /// Current state and what was expected.
        message: String,
    },

    /// No device responded, or the device is already owned by another session.
    ///
    /// **Recovery Strategy**: Check cabling and power, or close the other
    /// session.
    #[error("hardware unavailable: {message}")]
    HardwareUnavailable {
        /// Description from the backend.
        message: String,
    },

    /// Frame buffers could not be allocated.
    ///
    /// **Recovery Strategy**: Reduce pool slot count or frame size.
    #[error("resource exhausted: {context} (requested {requested_bytes} bytes)")]
    ResourceExhausted {
        /// What was being allocated.
        context: String,
        /// Size of the failed allocation.
        requested_bytes: usize,
    },

    /// Two planes that must share dimensions do not.
    ///
    /// The target image is never modified when this is returned.
    #[error(
        "{operation}: dimension mismatch: expected {}x{}, got {}x{}",
        expected.0, expected.1, actual.0, actual.1
    )]
    DimensionMismatch {
        /// Operation that detected the mismatch.
        operation: &'static str,
        /// Dimensions of the target (width, height).
        expected: (u32, u32),
        /// Dimensions of the offending plane (width, height).
        actual: (u32, u32),
    },

    /// An acquisition outcome escalated to an error by the caller.
    #[error("acquisition {kind} at frame {frame_count}: {message}")]
    Acquisition {
        /// Outcome kind.
        kind: AcquisitionErrorKind,
        /// Last hardware frame counter seen.
        frame_count: u64,
        /// Additional context.
        message: String,
    },

    /// The backend reported a device fault.
    ///
    /// `vendor_code` is the numeric code reported by the device and is kept
    /// verbatim for support requests.
    #[error("{operation}: hardware error {vendor_code}: {message}")]
    Hardware {
        /// Backend operation that failed.
        operation: &'static str,
        /// Device-reported error code.
        vendor_code: i32,
        /// Device-reported message.
        message: String,
    },

    /// Standard I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Raster encode/decode failed.
    #[error("storage error for {}: {message}", path.display())]
    Storage {
        /// File being read or written.
        path: PathBuf,
        /// Codec message.
        message: String,
    },
}

impl DetectorError {
    /// Build an `InvalidParameter` error.
    pub fn invalid_parameter(operation: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            operation,
            message: message.into(),
        }
    }

    /// Build an `InvalidState` error.
    pub fn invalid_state(operation: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidState {
            operation,
            message: message.into(),
        }
    }

    /// Build a `DimensionMismatch` error from (width, height) pairs.
    pub fn dimension_mismatch(
        operation: &'static str,
        expected: (u32, u32),
        actual: (u32, u32),
    ) -> Self {
        Self::DimensionMismatch {
            operation,
            expected,
            actual,
        }
    }

    /// Build an `Acquisition` error for an outcome the caller escalates.
    pub fn acquisition(
        kind: AcquisitionErrorKind,
        frame_count: u64,
        message: impl Into<String>,
    ) -> Self {
        Self::Acquisition {
            kind,
            frame_count,
            message: message.into(),
        }
    }

    /// Build a `HardwareUnavailable` error.
    pub fn hardware_unavailable(message: impl Into<String>) -> Self {
        Self::HardwareUnavailable {
            message: message.into(),
        }
    }

    /// Build a `Hardware` error carrying the device's own code.
    pub fn hardware(operation: &'static str, vendor_code: i32, message: impl Into<String>) -> Self {
        Self::Hardware {
            operation,
            vendor_code,
            message: message.into(),
        }
    }

    /// Build a `Storage` error for `path`.
    pub fn storage(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Storage {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Taxonomy category of this error.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidParameter { .. } | Self::InvalidState { .. } => {
                ErrorCategory::Configuration
            }
            Self::Acquisition { .. } | Self::ResourceExhausted { .. } => {
                ErrorCategory::Acquisition
            }
            Self::DimensionMismatch { .. } => ErrorCategory::Correction,
            Self::Io(_) | Self::Storage { .. } => ErrorCategory::Io,
            Self::HardwareUnavailable { .. } | Self::Hardware { .. } => ErrorCategory::Hardware,
        }
    }

    /// Stable numeric code, suitable for logs and process exit status.
    ///
    /// | Range | Category |
    /// |-------|----------|
    /// | 10-19 | Configuration |
    /// | 20-29 | Acquisition |
    /// | 30-39 | Correction |
    /// | 40-49 | Io |
    /// | 50-59 | Hardware |
    #[must_use]
    pub fn code(&self) -> i32 {
        match self {
            Self::InvalidParameter { .. } => 10,
            Self::InvalidState { .. } => 11,
            Self::Acquisition { kind, .. } => match kind {
                AcquisitionErrorKind::Timeout => 20,
                AcquisitionErrorKind::MissingPackets => 21,
                AcquisitionErrorKind::Fatal => 22,
            },
            Self::ResourceExhausted { .. } => 23,
            Self::DimensionMismatch { .. } => 30,
            Self::Io(_) => 40,
            Self::Storage { .. } => 41,
            Self::HardwareUnavailable { .. } => 50,
            Self::Hardware { .. } => 51,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_parameter_display() {
        let err = DetectorError::invalid_parameter("configure", "exposure_time 0 ms below 1 ms");
        assert_eq!(
            err.to_string(),
            "configure: invalid parameter: exposure_time 0 ms below 1 ms"
        );
        assert_eq!(err.category(), ErrorCategory::Configuration);
        assert_eq!(err.code(), 10);
    }

    #[test]
    fn test_dimension_mismatch_display() {
        let err = DetectorError::dimension_mismatch("gain_correction", (640, 480), (320, 240));
        assert_eq!(
            err.to_string(),
            "gain_correction: dimension mismatch: expected 640x480, got 320x240"
        );
        assert_eq!(err.category(), ErrorCategory::Correction);
    }

    #[test]
    fn test_hardware_error_keeps_vendor_code() {
        let err = DetectorError::hardware("start_stream", -1007, "link down");
        assert!(err.to_string().contains("-1007"));
        assert_eq!(err.category(), ErrorCategory::Hardware);
        assert_eq!(err.code(), 51);
    }

    #[test]
    fn test_io_error_from() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "dark.tif");
        let err: DetectorError = io.into();
        assert_eq!(err.category(), ErrorCategory::Io);
        assert!(err.to_string().starts_with("I/O error"));
    }

    #[test]
    fn test_acquisition_codes_are_distinct() {
        let codes: Vec<i32> = [
            AcquisitionErrorKind::Timeout,
            AcquisitionErrorKind::MissingPackets,
            AcquisitionErrorKind::Fatal,
        ]
        .into_iter()
        .map(|kind| DetectorError::acquisition(kind, 3, "").code())
        .collect();
        assert_eq!(codes, vec![20, 21, 22]);

        let err = DetectorError::acquisition(AcquisitionErrorKind::Fatal, 7, "link lost");
        assert_eq!(err.category(), ErrorCategory::Acquisition);
        assert_eq!(err.to_string(), "acquisition fatal at frame 7: link lost");
    }
}
