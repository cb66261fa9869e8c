//! Fault injection for the simulated detector.
//!
//! Two independent layers:
//!
//! - **Operation faults** fail control commands (`open`, `configure`,
//!   `start_stream`, `software_trigger`, ...) through [`FaultConfig::check_operation`].
//! - **Frame faults** decide, per produced frame, whether it arrives intact,
//!   with missing packets, not at all, or as a fatal transfer error
//!   ([`FaultConfig::frame_fault`]).

use super::rng::MockRng;
use detector_core::{DetectorError, DetectorResult};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Vendor code reported for injected operation failures.
pub const INJECTED_FAULT_CODE: i32 = -100;

/// Vendor code reported once communication is lost.
pub const COMMUNICATION_LOST_CODE: i32 = -101;

/// Deterministic failure scenarios.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaultScenario {
    /// `operation` succeeds `count` times, then fails every time.
    FailAfterN {
        /// Operation name as passed to `check_operation`.
        operation: &'static str,
        /// Successful calls before failures start.
        count: u32,
    },
    /// The device stops responding after `count` operations of any kind.
    CommunicationLoss {
        /// Successful operations before the link drops.
        count: u32,
    },
    /// The `frame`-th produced frame (1-based, per session) is a fatal error.
    FatalAtFrame {
        /// Frame number that fails.
        frame: u64,
        /// Vendor code carried by the fault.
        code: i32,
    },
}

/// Outcome chosen for one produced frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameFault {
    /// Frame arrives complete.
    None,
    /// Frame arrives with this many packets lost.
    MissingPackets(u32),
    /// Frame is lost in transport; its counter is consumed.
    Dropped,
    /// Transfer fails; streaming ends.
    Fatal(i32),
}

#[derive(Debug, Default)]
struct FaultState {
    operation_counts: HashMap<&'static str, u32>,
    total_operations: u32,
    communication_lost: bool,
}

/// Fault injection configuration.
#[derive(Clone, Debug)]
pub struct FaultConfig {
    operation_failure_rate: f64,
    missing_packet_rate: f64,
    drop_rate: f64,
    scenarios: Arc<Vec<FaultScenario>>,
    rng: Arc<MockRng>,
    state: Arc<Mutex<FaultState>>,
}

impl Default for FaultConfig {
    fn default() -> Self {
        Self::none()
    }
}

impl FaultConfig {
    /// No faults.
    #[must_use]
    pub fn none() -> Self {
        Self::seeded(None)
    }

    /// No faults, with a fixed RNG seed for any rates added later.
    #[must_use]
    pub fn seeded(seed: Option<u64>) -> Self {
        Self {
            operation_failure_rate: 0.0,
            missing_packet_rate: 0.0,
            drop_rate: 0.0,
            scenarios: Arc::new(Vec::new()),
            rng: Arc::new(MockRng::new(seed)),
            state: Arc::new(Mutex::new(FaultState::default())),
        }
    }

    /// Random frame faults at the given rates.
    #[must_use]
    pub fn random_frames(missing_packet_rate: f64, drop_rate: f64, seed: Option<u64>) -> Self {
        Self {
            missing_packet_rate,
            drop_rate,
            ..Self::seeded(seed)
        }
    }

    /// Add deterministic scenarios.
    #[must_use]
    pub fn with_scenarios(mut self, scenarios: Vec<FaultScenario>) -> Self {
        self.scenarios = Arc::new(scenarios);
        self
    }

    /// Fail any control operation with probability `rate`.
    #[must_use]
    pub fn with_operation_failure_rate(mut self, rate: f64) -> Self {
        self.operation_failure_rate = rate;
        self
    }

    /// True when any frame-level fault can occur.
    #[must_use]
    pub fn has_frame_faults(&self) -> bool {
        self.missing_packet_rate > 0.0
            || self.drop_rate > 0.0
            || self
                .scenarios
                .iter()
                .any(|s| matches!(s, FaultScenario::FatalAtFrame { .. }))
    }

    /// Check whether `operation` should fail.
    pub fn check_operation(&self, operation: &'static str) -> DetectorResult<()> {
        let mut state = self.state.lock();

        if state.communication_lost {
            return Err(DetectorError::hardware(
                operation,
                COMMUNICATION_LOST_CODE,
                "communication lost",
            ));
        }

        state.total_operations += 1;
        let total = state.total_operations;
        let current = {
            let count = state.operation_counts.entry(operation).or_insert(0);
            *count += 1;
            *count
        };

        for scenario in self.scenarios.iter() {
            match scenario {
                FaultScenario::FailAfterN {
                    operation: op,
                    count,
                } if *op == operation && current > *count => {
                    return Err(DetectorError::hardware(
                        operation,
                        INJECTED_FAULT_CODE,
                        format!("injected failure after {} operations", count),
                    ));
                }
                FaultScenario::CommunicationLoss { count } if total > *count => {
                    state.communication_lost = true;
                    return Err(DetectorError::hardware(
                        operation,
                        COMMUNICATION_LOST_CODE,
                        "communication lost",
                    ));
                }
                _ => {}
            }
        }

        if self.rng.roll(self.operation_failure_rate) {
            return Err(DetectorError::hardware(
                operation,
                INJECTED_FAULT_CODE,
                format!("random failure on operation '{}'", operation),
            ));
        }

        Ok(())
    }

    /// Decide the fate of the `frame_index`-th frame of the session (1-based).
    pub fn frame_fault(&self, frame_index: u64) -> FrameFault {
        for scenario in self.scenarios.iter() {
            if let FaultScenario::FatalAtFrame { frame, code } = scenario {
                if *frame == frame_index {
                    return FrameFault::Fatal(*code);
                }
            }
        }
        if self.rng.roll(self.drop_rate) {
            return FrameFault::Dropped;
        }
        if self.rng.roll(self.missing_packet_rate) {
            return FrameFault::MissingPackets(self.rng.missing_packets());
        }
        FrameFault::None
    }

    /// Forget operation counters and restore communication.
    pub fn reset(&self) {
        *self.state.lock() = FaultState::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_faults() {
        let faults = FaultConfig::none();
        for _ in 0..50 {
            faults.check_operation("configure").unwrap();
            assert_eq!(faults.frame_fault(1), FrameFault::None);
        }
    }

    #[test]
    fn test_fail_after_n() {
        let faults = FaultConfig::none().with_scenarios(vec![FaultScenario::FailAfterN {
            operation: "software_trigger",
            count: 2,
        }]);
        faults.check_operation("software_trigger").unwrap();
        faults.check_operation("configure").unwrap();
        faults.check_operation("software_trigger").unwrap();
        let err = faults.check_operation("software_trigger").unwrap_err();
        assert!(matches!(
            err,
            DetectorError::Hardware {
                vendor_code: INJECTED_FAULT_CODE,
                ..
            }
        ));
    }

    #[test]
    fn test_communication_loss_is_sticky() {
        let faults =
            FaultConfig::none().with_scenarios(vec![FaultScenario::CommunicationLoss { count: 1 }]);
        faults.check_operation("open").unwrap();
        assert!(faults.check_operation("configure").is_err());
        assert!(faults.check_operation("close").is_err());
        faults.reset();
        assert!(faults.check_operation("open").is_ok());
    }

    #[test]
    fn test_fatal_at_frame() {
        let faults = FaultConfig::none().with_scenarios(vec![FaultScenario::FatalAtFrame {
            frame: 3,
            code: -7,
        }]);
        assert!(faults.has_frame_faults());
        assert_eq!(faults.frame_fault(2), FrameFault::None);
        assert_eq!(faults.frame_fault(3), FrameFault::Fatal(-7));
    }

    #[test]
    fn test_random_frame_faults_seeded() {
        let a = FaultConfig::random_frames(0.3, 0.1, Some(5));
        let b = FaultConfig::random_frames(0.3, 0.1, Some(5));
        let xs: Vec<FrameFault> = (1..=50).map(|i| a.frame_fault(i)).collect();
        let ys: Vec<FrameFault> = (1..=50).map(|i| b.frame_fault(i)).collect();
        assert_eq!(xs, ys);
        assert!(xs.iter().any(|f| matches!(f, FrameFault::MissingPackets(_))));
    }
}
