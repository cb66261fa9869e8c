//! Per-acquisition result metadata.

use serde::Serialize;
use std::fmt;

/// Outcome classification of one acquisition attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AcquisitionStatus {
    /// A complete frame was delivered.
    Success,
    /// A frame was delivered with lost packets. Still usable.
    MissingPackets,
    /// No frame arrived within the timeout. The target holds no fresh data.
    Timeout,
    /// Unrecoverable delivery failure. Acquisition loops must stop.
    Fatal,
}

impl AcquisitionStatus {
    /// True when the target buffer holds fresh data (Success or MissingPackets).
    #[must_use]
    pub fn is_usable(self) -> bool {
        matches!(self, Self::Success | Self::MissingPackets)
    }

    /// Numeric status code (0 = success).
    #[must_use]
    pub fn code(self) -> i32 {
        match self {
            Self::Success => 0,
            Self::MissingPackets => 1,
            Self::Timeout => 2,
            Self::Fatal => 3,
        }
    }
}

impl fmt::Display for AcquisitionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Success => "success",
            Self::MissingPackets => "missing_packets",
            Self::Timeout => "timeout",
            Self::Fatal => "fatal",
        };
        write!(f, "{}", label)
    }
}

/// Immutable result of one acquisition attempt.
///
/// `frame_count` is the hardware-side counter. It increases monotonically for
/// the lifetime of the session and is not reset by stream restarts. On
/// `Timeout` it repeats the last counter the session has seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BufferInfo {
    status: AcquisitionStatus,
    frame_count: u64,
    width: u32,
    height: u32,
    missing_packets: u32,
}

impl BufferInfo {
    /// Complete frame.
    #[must_use]
    pub fn success(frame_count: u64, width: u32, height: u32) -> Self {
        Self {
            status: AcquisitionStatus::Success,
            frame_count,
            width,
            height,
            missing_packets: 0,
        }
    }

    /// Frame with `missing_packets` lost packets. A count of zero is
    /// reported as Success.
    #[must_use]
    pub fn with_missing_packets(
        frame_count: u64,
        width: u32,
        height: u32,
        missing_packets: u32,
    ) -> Self {
        if missing_packets == 0 {
            return Self::success(frame_count, width, height);
        }
        Self {
            status: AcquisitionStatus::MissingPackets,
            frame_count,
            width,
            height,
            missing_packets,
        }
    }

    /// No frame within the timeout.
    #[must_use]
    pub fn timeout(last_frame_count: u64, width: u32, height: u32) -> Self {
        Self {
            status: AcquisitionStatus::Timeout,
            frame_count: last_frame_count,
            width,
            height,
            missing_packets: 0,
        }
    }

    /// Unrecoverable delivery failure.
    #[must_use]
    pub fn fatal(frame_count: u64, width: u32, height: u32) -> Self {
        Self {
            status: AcquisitionStatus::Fatal,
            frame_count,
            width,
            height,
            missing_packets: 0,
        }
    }

    /// Outcome classification.
    #[must_use]
    pub fn status(&self) -> AcquisitionStatus {
        self.status
    }

    /// Hardware frame counter.
    #[must_use]
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Frame width.
    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Frame height.
    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Lost packet count; zero unless status is MissingPackets.
    #[must_use]
    pub fn missing_packets(&self) -> u32 {
        self.missing_packets
    }

    /// Shorthand for `status().is_usable()`.
    #[must_use]
    pub fn is_usable(&self) -> bool {
        self.status.is_usable()
    }
}

impl fmt::Display for BufferInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} frame={} {}x{}",
            self.status, self.frame_count, self.width, self.height
        )?;
        if self.status == AcquisitionStatus::MissingPackets {
            write!(f, " missing_packets={}", self.missing_packets)?;
        }
        Ok(())
    }
}
