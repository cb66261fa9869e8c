//! Hardware session lifecycle states.

use serde::Serialize;
use std::fmt;

/// Session lifecycle: `Closed -> Opened -> Configured -> Streaming`.
///
/// `Streaming -> Configured` on stop, `Opened | Configured -> Closed` on close.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No hardware handle held.
    #[default]
    Closed,
    /// Handle held, exposure not yet applied.
    Opened,
    /// Exposure applied, not streaming.
    Configured,
    /// Frame delivery active.
    Streaming,
}

impl SessionState {
    /// True for every state except `Closed`.
    #[must_use]
    pub fn is_open(self) -> bool {
        self != Self::Closed
    }

    /// True in states where exposure settings may change.
    #[must_use]
    pub fn accepts_configuration(self) -> bool {
        matches!(self, Self::Opened | Self::Configured)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Closed => "closed",
            Self::Opened => "opened",
            Self::Configured => "configured",
            Self::Streaming => "streaming",
        };
        write!(f, "{}", label)
    }
}
