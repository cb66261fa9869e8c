//! File naming for capture output and dark-frame libraries.

use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// External-trigger capture prefix.
pub const EXTERNAL_TRIGGER_PREFIX: &str = "ExternalTriggerCapture";
/// Software-trigger capture prefix.
pub const SOFTWARE_TRIGGER_PREFIX: &str = "SoftwareTriggerCapture";
/// Extended-frame-rate capture prefix.
pub const XFPS_PREFIX: &str = "XFPSCapture";
/// Stream-callback capture prefix.
pub const STREAM_CALLBACK_PREFIX: &str = "StreamCallbackCapture";
/// Multi-page file written by sequence captures.
pub const SEQUENCE_CAPTURE_FILE: &str = "SequenceCapture.tif";
/// Prefix of offline-corrected images.
pub const CORRECTED_PREFIX: &str = "Corrected_";

static EXPOSURE_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)ms").expect("valid exposure tag regex"));

/// `<dir>/<prefix><frame_count>.tif`
#[must_use]
pub fn capture_path(dir: &Path, prefix: &str, frame_count: u64) -> PathBuf {
    dir.join(format!("{}{}.tif", prefix, frame_count))
}

/// Exposure in milliseconds from the first `<digits>ms` tag in a file name.
///
/// Returns `None` when the name carries no tag or the number overflows.
#[must_use]
pub fn exposure_from_file_name(name: &str) -> Option<u32> {
    EXPOSURE_TAG
        .captures(name)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// `<dir>/dark_frame_<exposure_ms>.tif`
#[must_use]
pub fn dark_frame_path(dir: &Path, exposure_ms: u32) -> PathBuf {
    dir.join(format!("dark_frame_{}.tif", exposure_ms))
}

/// `<dir>/Corrected_<source stem>.tif`
#[must_use]
pub fn corrected_path(dir: &Path, source: &Path) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "Image".to_string());
    dir.join(format!("{}{}.tif", CORRECTED_PREFIX, stem))
}

/// `<dir>/cropped_<exposure_ms>ms.tif`
#[must_use]
pub fn cropped_output_path(dir: &Path, exposure_ms: u32) -> PathBuf {
    dir.join(format!("cropped_{}ms.tif", exposure_ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_path() {
        let path = capture_path(Path::new("/tmp/out"), SOFTWARE_TRIGGER_PREFIX, 7);
        assert_eq!(path, PathBuf::from("/tmp/out/SoftwareTriggerCapture7.tif"));
    }

    #[test]
    fn test_exposure_from_file_name() {
        assert_eq!(exposure_from_file_name("scan_250ms_a.tif"), Some(250));
        assert_eq!(exposure_from_file_name("1000ms.tif"), Some(1000));
        assert_eq!(exposure_from_file_name("scan_10ms_20ms.tif"), Some(10));
        assert_eq!(exposure_from_file_name("scan.tif"), None);
        assert_eq!(exposure_from_file_name("99999999999ms.tif"), None);
    }

    #[test]
    fn test_corrected_path_keeps_source_stem() {
        let path = corrected_path(Path::new("out"), Path::new("demo/PCB_2802_2400.tif"));
        assert_eq!(path, PathBuf::from("out/Corrected_PCB_2802_2400.tif"));
    }

    #[test]
    fn test_dark_and_cropped_paths() {
        let dir = Path::new("darks");
        assert_eq!(dark_frame_path(dir, 100), PathBuf::from("darks/dark_frame_100.tif"));
        assert_eq!(cropped_output_path(dir, 100), PathBuf::from("darks/cropped_100ms.tif"));
    }
}
