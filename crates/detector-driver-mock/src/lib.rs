//! Simulated detector hardware for detector-daq.
//!
//! [`MockDetector`] implements [`detector_core::DetectorBackend`] without any
//! physical device and is the test double for the acquisition controller.
//!
//! # Features
//!
//! - All four exposure modes, including sequence bursts and free-running XFPS
//! - Hardware frame counter that survives stream restarts
//! - Scripted per-frame outcomes (missing packets, drops, fatal errors)
//! - Seeded random fault injection and operation failure scenarios
//! - Instant (no delays) and realistic timing
//!
//! # Example
//!
//! ```rust,ignore
//! use detector_driver_mock::{MockDetector, MockMode};
//!
//! let detector = MockDetector::builder(640, 480)
//!     .mode(MockMode::Realistic)
//!     .bit_depth(14)
//!     .build();
//! ```

pub mod common;
pub mod mock_detector;
pub mod pattern;

pub use common::{FaultConfig, FaultScenario, FrameFault, MockMode, MockRng, TimingConfig};
pub use mock_detector::{MockDetector, MockDetectorBuilder, MockDetectorConfig};
