//! Controller components
//!
//! - [`session`]: lifecycle state, device description and applied exposure
//! - [`dispatcher`]: callback delivery on a dedicated consumer task

pub mod dispatcher;
pub mod session;
