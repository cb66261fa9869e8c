//! Timing configuration for realistic mode.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Hardware-like delays applied when the mode simulates timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Sensor readout time added after each exposure.
    #[serde(with = "humantime_serde")]
    pub readout: Duration,
    /// Latency of every control command (open, configure, trigger...).
    #[serde(with = "humantime_serde")]
    pub command_latency: Duration,
}

impl TimingConfig {
    /// Timing for a small scientific CMOS sensor.
    #[must_use]
    pub fn detector() -> Self {
        Self {
            readout: Duration::from_millis(10),
            command_latency: Duration::from_millis(2),
        }
    }

    /// Time between successive frames for a given exposure.
    #[must_use]
    pub fn frame_period(&self, exposure: Duration) -> Duration {
        exposure + self.readout
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            readout: Duration::ZERO,
            command_latency: Duration::ZERO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_period() {
        let timing = TimingConfig::detector();
        assert_eq!(
            timing.frame_period(Duration::from_millis(20)),
            Duration::from_millis(30)
        );
        assert_eq!(TimingConfig::default().readout, Duration::ZERO);
    }
}
