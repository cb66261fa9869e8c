//! Layered configuration for the `detector-daq` binary.
//!
//! Layers, lowest priority first:
//! 1. Library defaults (`Settings::default()`)
//! 2. TOML file passed with `--config`
//! 3. Environment variables prefixed `DETECTOR_`, nested with `__`
//!    (`DETECTOR_ACQUISITION__TIMEOUT=5s`, `DETECTOR_MOCK__SEED=7`)
//!
//! ## Schema
//!
//! - **`log_level`**: tracing filter used when `RUST_LOG` is unset
//! - **`paths`**: output directory, correction maps, batch directories
//! - **`acquisition`**: frame counts, exposure time, timeouts, stream duration
//! - **`correction`**: dark offset, gain reference offset, batch dark settings
//! - **`controller`**: pool and delivery queue sizing (see [`ControllerSettings`])
//! - **`mock`**: simulated detector geometry, timing and faults
//!   (see [`MockDetectorConfig`])

use anyhow::{bail, Context, Result};
use detector_driver::ControllerSettings;
use detector_driver_mock::{MockDetectorConfig, MockMode, TimingConfig};
use detector_storage::BatchDarkConfig;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const VALID_LOG_LEVELS: &[&str] = &["error", "warn", "info", "debug", "trace"];

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Logging verbosity when `RUST_LOG` is unset.
    pub log_level: String,
    /// File locations.
    pub paths: PathSettings,
    /// Acquisition workflow parameters.
    pub acquisition: AcquisitionSettings,
    /// Correction parameters.
    pub correction: CorrectionSettings,
    /// Delivery path sizing.
    pub controller: ControllerSettings,
    /// Simulated detector. Defaults to realistic timing.
    pub mock: MockDetectorConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            paths: PathSettings::default(),
            acquisition: AcquisitionSettings::default(),
            correction: CorrectionSettings::default(),
            controller: ControllerSettings::default(),
            mock: MockDetectorConfig {
                mode: MockMode::Realistic,
                timing: TimingConfig::detector(),
                ..MockDetectorConfig::default()
            },
        }
    }
}

/// File locations. Relative paths resolve against the working directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathSettings {
    /// Where captured and corrected images are written.
    pub output_dir: PathBuf,
    /// Dark (offset) map.
    pub dark_map: PathBuf,
    /// Flat-field gain map.
    pub gain_map: PathBuf,
    /// Defect map.
    pub defect_map: PathBuf,
    /// Image corrected by the `correct` command.
    pub source_image: PathBuf,
    /// Exposures processed by `batch-dark`.
    pub batch_source_dir: PathBuf,
    /// Library of `dark_frame_<exp>.tif` files.
    pub dark_library_dir: PathBuf,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("captured_images"),
            dark_map: PathBuf::from("maps/dark.tif"),
            gain_map: PathBuf::from("maps/gain.tif"),
            defect_map: PathBuf::from("maps/defect.tif"),
            source_image: PathBuf::from("images/source.tif"),
            batch_source_dir: PathBuf::from("exposures"),
            dark_library_dir: PathBuf::from("darks"),
        }
    }
}

/// Acquisition workflow parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionSettings {
    /// Frames captured by trigger and sequence workflows.
    pub frame_count: u32,
    /// Per-frame exposure.
    #[serde(with = "humantime_serde")]
    pub exposure_time: Duration,
    /// Digital data suppression.
    pub dds: bool,
    /// Blocking-acquire timeout for trigger workflows.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// How long the XFPS and callback workflows stream.
    #[serde(with = "humantime_serde")]
    pub stream_duration: Duration,
    /// Simulated external trigger period.
    #[serde(with = "humantime_serde")]
    pub external_trigger_period: Duration,
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        Self {
            frame_count: 20,
            exposure_time: Duration::from_millis(100),
            dds: false,
            timeout: Duration::from_secs(10),
            stream_duration: Duration::from_secs(5),
            external_trigger_period: Duration::from_millis(200),
        }
    }
}

/// Correction parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrectionSettings {
    /// Pedestal added after dark subtraction.
    pub dark_offset: u16,
    /// Pedestal present in the gain map and the offset-corrected image.
    pub gain_reference_offset: u16,
    /// `batch-dark` parameters.
    pub batch: BatchDarkConfig,
}

impl Default for CorrectionSettings {
    fn default() -> Self {
        Self {
            dark_offset: 300,
            gain_reference_offset: 300,
            batch: BatchDarkConfig::default(),
        }
    }
}

impl Settings {
    /// Merge defaults, the optional TOML file and `DETECTOR_` variables,
    /// then validate.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Settings::default()));

        if let Some(path) = config_path {
            if !path.is_file() {
                bail!("Config file not found: {}", path.display());
            }
            figment = figment.merge(Toml::file(path));
        }

        figment = figment.merge(Env::prefixed("DETECTOR_").split("__"));

        let settings: Settings = figment
            .extract()
            .context("Failed to extract configuration")?;
        settings
            .validate()
            .context("Configuration validation failed")?;
        Ok(settings)
    }

    /// Reject semantically invalid values, naming the offending field.
    pub fn validate(&self) -> Result<()> {
        if !VALID_LOG_LEVELS.contains(&self.log_level.to_lowercase().as_str()) {
            bail!(
                "log_level '{}' is not one of {}",
                self.log_level,
                VALID_LOG_LEVELS.join(", ")
            );
        }

        let acq = &self.acquisition;
        if acq.frame_count == 0 {
            bail!("acquisition.frame_count must be at least 1");
        }
        for (name, value) in [
            ("acquisition.exposure_time", acq.exposure_time),
            ("acquisition.timeout", acq.timeout),
            ("acquisition.stream_duration", acq.stream_duration),
            ("acquisition.external_trigger_period", acq.external_trigger_period),
        ] {
            if value.is_zero() {
                bail!("{} must be non-zero", name);
            }
        }

        let batch = &self.correction.batch;
        if batch.bit_depth == 0 || batch.bit_depth > 16 {
            bail!(
                "correction.batch.bit_depth must be in 1..=16, got {}",
                batch.bit_depth
            );
        }
        if batch.crop.width == 0 || batch.crop.height == 0 {
            bail!("correction.batch.crop must have a non-zero width and height");
        }

        self.controller
            .validate()
            .context("Invalid [controller] section")?;
        self.mock.validate().context("Invalid [mock] section")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        settings.validate().unwrap();
        assert_eq!(settings.acquisition.frame_count, 20);
        assert_eq!(settings.correction.dark_offset, 300);
    }

    #[test]
    #[serial]
    fn test_file_overrides_defaults() {
        let file = write_config(
            r#"
log_level = "debug"

[acquisition]
exposure_time = "250ms"
frame_count = 5

[mock]
width = 64
height = 32
seed = 42

[controller]
stop_drain_timeout = "500ms"
"#,
        );

        let settings = Settings::load(Some(file.path())).unwrap();
        assert_eq!(settings.log_level, "debug");
        assert_eq!(settings.acquisition.exposure_time, Duration::from_millis(250));
        assert_eq!(settings.acquisition.frame_count, 5);
        assert_eq!(settings.acquisition.timeout, Duration::from_secs(10));
        assert_eq!((settings.mock.width, settings.mock.height), (64, 32));
        assert_eq!(settings.mock.seed, Some(42));
        assert_eq!(
            settings.controller.stop_drain_timeout,
            Duration::from_millis(500)
        );
    }

    #[test]
    #[serial]
    fn test_shipped_config_matches_defaults() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../config/detector.toml");
        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    #[serial]
    fn test_env_overrides_file() {
        let file = write_config("[acquisition]\nframe_count = 5\n");
        std::env::set_var("DETECTOR_ACQUISITION__FRAME_COUNT", "9");
        let result = Settings::load(Some(file.path()));
        std::env::remove_var("DETECTOR_ACQUISITION__FRAME_COUNT");

        assert_eq!(result.unwrap().acquisition.frame_count, 9);
    }

    #[test]
    #[serial]
    fn test_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Settings::load(Some(&dir.path().join("absent.toml"))).unwrap_err();
        assert!(err.to_string().contains("Config file not found"));
    }

    #[test]
    fn test_validation_names_field() {
        let mut settings = Settings::default();
        settings.acquisition.timeout = Duration::ZERO;
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("acquisition.timeout"));

        let mut settings = Settings::default();
        settings.mock.drop_rate = 1.5;
        let err = settings.validate().unwrap_err();
        assert!(format!("{:#}", err).contains("drop_rate"));

        let mut settings = Settings::default();
        settings.log_level = "verbose".into();
        assert!(settings.validate().is_err());
    }
}
