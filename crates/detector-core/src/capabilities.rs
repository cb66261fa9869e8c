//! Hardware session and processing traits.
//!
//! [`DetectorBackend`] is the seam between the acquisition controller and a
//! concrete device. The controller owns all state-machine checks; a backend
//! only has to execute the request and report failures. This keeps every
//! backend small and lets a simulated device drive the controller in tests.
//!
//! # Contract
//!
//! - Calls arrive in a valid lifecycle order. The controller never calls
//!   `start_stream` on a closed session or `configure` while streaming.
//! - `start_stream` must return promptly. Frame production happens on the
//!   backend's own task or thread and goes through the supplied [`FrameSink`].
//! - After `stop_stream` returns, the backend must not submit further frames.
//!   It drops its sink clones so the consumer can observe end-of-stream.
//! - Frame counters submitted to a sink increase strictly and are never reset
//!   by a stream restart within one open session.
//! - Failures use [`DetectorError::HardwareUnavailable`] for open/ownership
//!   problems and [`DetectorError::Hardware`] for device-reported faults.
//!
//! [`DetectorError::HardwareUnavailable`]: crate::DetectorError::HardwareUnavailable
//! [`DetectorError::Hardware`]: crate::DetectorError::Hardware

use crate::delivery::FrameSink;
use crate::error::DetectorResult;
use crate::exposure::{DeviceInfo, ExposureConfig};
use crate::frame::Frame;
use async_trait::async_trait;

/// Abstract hardware session: `{open, close, configure, start_stream, stop_stream, software_trigger}`.
#[async_trait]
pub trait DetectorBackend: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    /// Acquire the device handle and report its geometry and limits.
    async fn open(&self) -> DetectorResult<DeviceInfo>;

    /// Release the device handle. Called only after `stop_stream`.
    async fn close(&self) -> DetectorResult<()>;

    /// Apply a complete exposure configuration.
    async fn configure(&self, config: &ExposureConfig) -> DetectorResult<()>;

    /// Begin delivering frames into `sink`.
    async fn start_stream(&self, sink: FrameSink) -> DetectorResult<()>;

    /// Stop delivering frames. Must not submit to the sink after returning.
    async fn stop_stream(&self) -> DetectorResult<()>;

    /// Fire one software trigger.
    async fn software_trigger(&self) -> DetectorResult<()>;
}

/// In-place frame processing applied by capture loops.
///
/// Implementations must leave `frame` untouched when they return a
/// dimension error.
pub trait FrameCorrection: Send + Sync {
    /// Correct `frame` in place.
    fn correct(&self, frame: &mut Frame) -> DetectorResult<()>;
}
