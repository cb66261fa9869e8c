//! Session bookkeeping
//!
//! Holds the lifecycle state, the device description reported on open and the
//! exposure configuration last applied to the backend. Every controller
//! operation checks its precondition here before touching hardware.

use detector_core::{DetectorError, DetectorResult, DeviceInfo, ExposureConfig, SessionState};
use tracing::info;

/// True when `from -> to` is a legal lifecycle edge.
#[must_use]
pub fn is_valid_transition(from: SessionState, to: SessionState) -> bool {
    use SessionState::*;
    matches!(
        (from, to),
        (Closed, Opened)
            | (Opened, Configured)
            | (Configured, Configured)
            | (Configured, Streaming)
            | (Streaming, Configured)
            | (Opened, Closed)
            | (Configured, Closed)
    )
}

/// Mutable session record owned by the controller.
#[derive(Debug, Default)]
pub struct Session {
    state: SessionState,
    device: Option<DeviceInfo>,
    exposure: ExposureConfig,
    callback_active: bool,
}

impl Session {
    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Device reported by the last successful open.
    #[must_use]
    pub fn device(&self) -> Option<&DeviceInfo> {
        self.device.as_ref()
    }

    /// Exposure last applied to the backend.
    #[must_use]
    pub fn exposure(&self) -> ExposureConfig {
        self.exposure
    }

    /// True while frames are routed to a registered callback.
    #[must_use]
    pub fn callback_active(&self) -> bool {
        self.callback_active
    }

    /// Fail with `InvalidState` unless the session is in one of `allowed`.
    pub fn require(&self, operation: &'static str, allowed: &[SessionState]) -> DetectorResult<()> {
        if allowed.contains(&self.state) {
            return Ok(());
        }
        let expected: Vec<String> = allowed.iter().map(ToString::to_string).collect();
        Err(DetectorError::invalid_state(
            operation,
            format!(
                "session is {}, expected {}",
                self.state,
                expected.join(" or ")
            ),
        ))
    }

    /// Readout geometry `(width, height, bit_depth)` of the open device.
    pub fn readout(&self, operation: &'static str) -> DetectorResult<(u32, u32, u8)> {
        self.device
            .as_ref()
            .map(|d| (d.width, d.height, d.bit_depth))
            .ok_or_else(|| DetectorError::invalid_state(operation, "session is closed"))
    }

    /// Record a successful open.
    pub fn opened(&mut self, device: DeviceInfo) {
        self.device = Some(device);
        self.transition(SessionState::Opened);
    }

    /// Record a successfully applied configuration.
    pub fn configured(&mut self, exposure: ExposureConfig) {
        self.exposure = exposure;
        self.transition(SessionState::Configured);
    }

    /// Record stream start.
    pub fn streaming(&mut self, callback: bool) {
        self.callback_active = callback;
        self.transition(SessionState::Streaming);
    }

    /// Record stream stop.
    pub fn stopped(&mut self) {
        self.callback_active = false;
        self.transition(SessionState::Configured);
    }

    /// Record close. The exposure is kept as the base for later setters.
    pub fn closed(&mut self) {
        self.device = None;
        self.callback_active = false;
        self.transition(SessionState::Closed);
    }

    fn transition(&mut self, to: SessionState) {
        let from = self.state;
        debug_assert!(
            is_valid_transition(from, to),
            "illegal session transition {from} -> {to}"
        );
        if from != to {
            info!(%from, %to, "Session state changed");
        }
        self.state = to;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use detector_core::DeviceLimits;

    fn device() -> DeviceInfo {
        DeviceInfo {
            model: "SIM".into(),
            serial: "0001".into(),
            width: 8,
            height: 4,
            bit_depth: 14,
            limits: DeviceLimits::default(),
        }
    }

    #[test]
    fn test_lifecycle_edges() {
        use SessionState::*;
        assert!(is_valid_transition(Closed, Opened));
        assert!(is_valid_transition(Streaming, Configured));
        assert!(!is_valid_transition(Closed, Streaming));
        assert!(!is_valid_transition(Opened, Streaming));
        assert!(!is_valid_transition(Streaming, Closed));
    }

    #[test]
    fn test_full_cycle() {
        let mut session = Session::default();
        assert!(session.readout("acquire").is_err());

        session.opened(device());
        assert_eq!(session.readout("acquire").unwrap(), (8, 4, 14));

        session.configured(ExposureConfig::default());
        session.streaming(true);
        assert!(session.callback_active());
        session.stopped();
        assert!(!session.callback_active());
        assert_eq!(session.state(), SessionState::Configured);

        session.closed();
        assert!(session.device().is_none());
    }

    #[test]
    fn test_require_names_states() {
        let session = Session::default();
        let err = session
            .require("start_stream", &[SessionState::Configured])
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "start_stream: invalid state: session is closed, expected configured"
        );
    }
}
