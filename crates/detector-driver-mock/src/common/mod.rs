//! Shared simulation infrastructure: operating modes, seeded RNG, fault
//! injection and timing.

pub mod faults;
pub mod mode;
pub mod rng;
pub mod timing;

pub use faults::{FaultConfig, FaultScenario, FrameFault};
pub use mode::MockMode;
pub use rng::MockRng;
pub use timing::TimingConfig;
