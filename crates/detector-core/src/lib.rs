//! `detector-core`
//!
//! Core types and traits shared by every detector-daq crate.
//!
//! ## Key Types
//!
//! - [`Frame`] / [`FrameSequence`]: owned 16-bit pixel planes with fixed dimensions
//! - [`FrameView`]: borrowed, read-only plane handed to stream callbacks
//! - [`BufferInfo`]: immutable per-acquisition metadata (status, frame counter, size)
//! - [`ExposureConfig`]: session configuration (mode, exposure time, DDS, frame count)
//! - [`SessionState`]: `Closed -> Opened -> Configured -> Streaming`
//! - [`DetectorError`]: error taxonomy with stable numeric codes
//! - [`DetectorBackend`]: the abstract hardware session implemented by drivers
//! - [`FrameSink`]: bounded producer/consumer delivery path backed by a [`FramePool`]

pub mod buffer;
pub mod capabilities;
pub mod delivery;
pub mod error;
pub mod exposure;
pub mod frame;
pub mod limits;
pub mod pool;
pub mod state;

pub use buffer::{AcquisitionStatus, BufferInfo};
pub use capabilities::{DetectorBackend, FrameCorrection};
pub use delivery::{
    delivery_channel, DeliveredFrame, DeliveryEvent, DeliveryReceiver, DeliveryStats,
    DeliveryStatsHandle, FrameSink,
};
pub use error::{AcquisitionErrorKind, DetectorError, DetectorResult, ErrorCategory};
pub use exposure::{DeviceInfo, DeviceLimits, ExposureConfig, ExposureMode};
pub use frame::{Frame, FrameSequence, FrameView, DEFAULT_BIT_DEPTH};
pub use pool::{FramePool, PooledBuffer};
pub use state::SessionState;
