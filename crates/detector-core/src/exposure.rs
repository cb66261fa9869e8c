//! Exposure configuration and device-reported limits.

use crate::error::{DetectorError, DetectorResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// How frames are triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExposureMode {
    /// One frame per external trigger pulse.
    ExternalTrigger,
    /// One frame per software trigger.
    #[default]
    SoftwareTrigger,
    /// A fixed-count burst of frames per software trigger.
    Sequence,
    /// Continuous free-running acquisition (XFPS).
    #[serde(alias = "xfps")]
    ExtendedFrameRate,
}

impl ExposureMode {
    /// True for modes in which `software_trigger` is accepted.
    #[must_use]
    pub fn accepts_software_trigger(self) -> bool {
        matches!(self, Self::SoftwareTrigger | Self::Sequence)
    }
}

impl fmt::Display for ExposureMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::ExternalTrigger => "external-trigger",
            Self::SoftwareTrigger => "software-trigger",
            Self::Sequence => "sequence",
            Self::ExtendedFrameRate => "xfps",
        };
        write!(f, "{}", label)
    }
}

/// Session exposure configuration.
///
/// Exposure time is written as a human-readable duration in config files
/// (`exposure_time = "100ms"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExposureConfig {
    /// Trigger mode.
    pub mode: ExposureMode,
    /// Per-frame exposure time.
    #[serde(with = "humantime_serde")]
    pub exposure_time: Duration,
    /// Digital data suppression.
    pub dds: bool,
    /// Frames per trigger in sequence mode.
    pub frame_count: u32,
}

impl Default for ExposureConfig {
    fn default() -> Self {
        Self {
            mode: ExposureMode::SoftwareTrigger,
            exposure_time: Duration::from_millis(100),
            dds: false,
            frame_count: 1,
        }
    }
}

impl ExposureConfig {
    /// Check every field against the device's supported ranges.
    pub fn validate(&self, limits: &DeviceLimits) -> DetectorResult<()> {
        limits.check_exposure_time(self.exposure_time)?;
        limits.check_frame_count(self.mode, self.frame_count)
    }
}

/// Ranges the device supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceLimits {
    /// Shortest supported exposure.
    #[serde(with = "humantime_serde")]
    pub min_exposure: Duration,
    /// Longest supported exposure.
    #[serde(with = "humantime_serde")]
    pub max_exposure: Duration,
    /// Largest sequence-mode burst.
    pub max_sequence_frames: u32,
}

impl Default for DeviceLimits {
    fn default() -> Self {
        Self {
            min_exposure: Duration::from_millis(1),
            max_exposure: Duration::from_secs(10),
            max_sequence_frames: 1_000,
        }
    }
}

impl DeviceLimits {
    /// `InvalidParameter` unless `exposure` is in `[min_exposure, max_exposure]`.
    pub fn check_exposure_time(&self, exposure: Duration) -> DetectorResult<()> {
        if exposure < self.min_exposure || exposure > self.max_exposure {
            return Err(DetectorError::invalid_parameter(
                "set_exposure_time",
                format!(
                    "exposure_time {:?} outside supported range {:?}..={:?}",
                    exposure, self.min_exposure, self.max_exposure
                ),
            ));
        }
        Ok(())
    }

    /// `InvalidParameter` unless `frame_count` fits the mode.
    ///
    /// Sequence mode requires `1..=max_sequence_frames`; other modes ignore the
    /// value but still reject counts above the device maximum.
    pub fn check_frame_count(&self, mode: ExposureMode, frame_count: u32) -> DetectorResult<()> {
        if mode == ExposureMode::Sequence && frame_count == 0 {
            return Err(DetectorError::invalid_parameter(
                "set_number_of_frames",
                "frame_count must be at least 1 in sequence mode",
            ));
        }
        if frame_count > self.max_sequence_frames {
            return Err(DetectorError::invalid_parameter(
                "set_number_of_frames",
                format!(
                    "frame_count {} exceeds device maximum {}",
                    frame_count, self.max_sequence_frames
                ),
            ));
        }
        Ok(())
    }
}

/// Identity and geometry reported by a backend on open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Model name.
    pub model: String,
    /// Serial number.
    pub serial: String,
    /// Readout width.
    pub width: u32,
    /// Readout height.
    pub height: u32,
    /// Sample bit depth.
    pub bit_depth: u8,
    /// Supported ranges.
    pub limits: DeviceLimits,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        ExposureConfig::default()
            .validate(&DeviceLimits::default())
            .unwrap();
    }

    #[test]
    fn test_exposure_out_of_range() {
        let cfg = ExposureConfig {
            exposure_time: Duration::from_secs(60),
            ..Default::default()
        };
        let err = cfg.validate(&DeviceLimits::default()).unwrap_err();
        assert!(matches!(err, DetectorError::InvalidParameter { .. }));
    }

    #[test]
    fn test_sequence_needs_frames() {
        let limits = DeviceLimits::default();
        assert!(limits.check_frame_count(ExposureMode::Sequence, 0).is_err());
        assert!(limits.check_frame_count(ExposureMode::SoftwareTrigger, 0).is_ok());
        assert!(limits.check_frame_count(ExposureMode::Sequence, 1_001).is_err());
    }

    #[test]
    fn test_software_trigger_modes() {
        assert!(ExposureMode::SoftwareTrigger.accepts_software_trigger());
        assert!(ExposureMode::Sequence.accepts_software_trigger());
        assert!(!ExposureMode::ExternalTrigger.accepts_software_trigger());
        assert!(!ExposureMode::ExtendedFrameRate.accepts_software_trigger());
    }

    #[test]
    fn test_config_from_toml() {
        let cfg: ExposureConfig = toml::from_str(
            r#"
            mode = "xfps"
            exposure_time = "20ms"
            dds = true
            "#,
        )
        .unwrap();
        assert_eq!(cfg.mode, ExposureMode::ExtendedFrameRate);
        assert_eq!(cfg.exposure_time, Duration::from_millis(20));
        assert!(cfg.dds);
        assert_eq!(cfg.frame_count, 1);
    }
}
