//! Offline dark correction over a directory of exposures.
//!
//! Every `*.tif` whose name carries an exposure tag (`250ms`) is matched
//! with `dark_frame_<exp>.tif`, offset-corrected, cropped to a region of
//! interest, inverted and written as `cropped_<exp>ms.tif`.

use crate::naming::{cropped_output_path, dark_frame_path, exposure_from_file_name};
use crate::tiff_storage::{RasterDepth, TiffStorage};
use detector_core::{DetectorResult, Frame};
use detector_correction::offset_correction;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Region of interest, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CropRegion {
    /// Left edge.
    pub x: u32,
    /// Top edge.
    pub y: u32,
    /// Region width.
    pub width: u32,
    /// Region height.
    pub height: u32,
}

impl Default for CropRegion {
    fn default() -> Self {
        Self {
            x: 370,
            y: 617,
            width: 500,
            height: 200,
        }
    }
}

/// Batch dark-correction parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchDarkConfig {
    /// Pedestal added after dark subtraction.
    pub dark_offset: u16,
    /// Region kept in the output.
    pub crop: CropRegion,
    /// Sensor bit depth. Inputs are clamped to it and inversion is relative
    /// to its maximum.
    pub bit_depth: u8,
}

impl Default for BatchDarkConfig {
    fn default() -> Self {
        Self {
            dark_offset: 50,
            crop: CropRegion::default(),
            bit_depth: 14,
        }
    }
}

/// What a batch run did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    /// Output files written, in processing order.
    pub written: Vec<PathBuf>,
    /// Inputs skipped for a missing exposure tag or dark frame.
    pub skipped: usize,
}

/// Dark-correct every tagged image in `source_dir`.
///
/// Inputs are processed in file-name order. Earlier outputs stay on disk if a
/// later file fails.
///
/// # Errors
///
/// - `Io` if a directory cannot be listed
/// - `Storage` if a raster cannot be read or written
/// - `DimensionMismatch` if an image and its dark frame differ
/// - `InvalidParameter` if the crop region falls outside an image
pub fn dark_correct_directory(
    source_dir: &Path,
    dark_dir: &Path,
    output_dir: &Path,
    config: &BatchDarkConfig,
) -> DetectorResult<BatchSummary> {
    let mut inputs = Vec::new();
    for entry in std::fs::read_dir(source_dir)? {
        let path = entry?.path();
        if is_candidate(&path) {
            inputs.push(path);
        }
    }
    inputs.sort();

    let depth = RasterDepth::for_bit_depth(config.bit_depth);
    let mut summary = BatchSummary::default();

    for path in inputs {
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        let Some(exposure_ms) = exposure_from_file_name(name) else {
            warn!(file = %path.display(), "No exposure tag in file name, skipping");
            summary.skipped += 1;
            continue;
        };
        let dark_path = dark_frame_path(dark_dir, exposure_ms);
        if !dark_path.is_file() {
            warn!(
                file = %path.display(),
                dark = %dark_path.display(),
                "Dark frame not found, skipping"
            );
            summary.skipped += 1;
            continue;
        }

        let mut image = load_at_depth(&path, config.bit_depth)?;
        let dark = load_at_depth(&dark_path, config.bit_depth)?;
        offset_correction(&mut image, &dark, config.dark_offset)?;

        let CropRegion { x, y, width, height } = config.crop;
        let output = image.sub_image(x, y, width, height)?.inverted();

        let out_path = cropped_output_path(output_dir, exposure_ms);
        TiffStorage::write_frame(&out_path, &output, depth)?;
        info!(
            input = %path.display(),
            output = %out_path.display(),
            exposure_ms,
            "Dark-corrected image written"
        );
        summary.written.push(out_path);
    }

    info!(
        written = summary.written.len(),
        skipped = summary.skipped,
        "Batch dark correction finished"
    );
    Ok(summary)
}

fn is_candidate(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    // Outputs of an earlier run in the same directory.
    if name.starts_with("cropped_") || name.starts_with("dark_frame_") {
        return false;
    }
    path.is_file()
        && path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("tif") || e.eq_ignore_ascii_case("tiff"))
}

fn load_at_depth(path: &Path, bit_depth: u8) -> DetectorResult<Frame> {
    let raw = TiffStorage::read_frame(path)?;
    let mut frame = Frame::with_bit_depth(raw.width(), raw.height(), bit_depth)?;
    frame.copy_from_view(&raw.view())?;
    Ok(frame)
}
