//! Operational modes for the simulated detector.
//!
//! - **Instant**: no readout or command delays, for unit tests
//! - **Realistic**: exposure plus readout time per frame, for demos
//! - **Chaos**: realistic timing with default frame faults enabled

use serde::{Deserialize, Serialize};

/// Operational modes for the simulated detector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MockMode {
    /// Zero delays, deterministic - for unit tests
    #[default]
    Instant,
    /// Hardware-like timing - for integration tests and demos
    Realistic,
    /// Hardware-like timing with injected frame faults - for resilience testing
    Chaos,
}

impl MockMode {
    /// True when commands and frames should take hardware-like time.
    #[must_use]
    pub fn simulates_timing(self) -> bool {
        !matches!(self, MockMode::Instant)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_mode() {
        assert_eq!(MockMode::default(), MockMode::Instant);
        assert!(!MockMode::Instant.simulates_timing());
        assert!(MockMode::Chaos.simulates_timing());
    }
}
