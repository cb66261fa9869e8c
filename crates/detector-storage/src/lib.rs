//! `detector-storage`
//!
//! Raster persistence for detector planes.
//!
//! - [`TiffStorage`]: 8/16-bit grayscale TIFF, multi-page for sequences
//! - [`CorrectionMaps`]: dark, gain and defect maps loaded as one unit
//! - [`naming`]: capture file names and exposure tags
//! - [`batch`]: offline dark correction over a directory of exposures

pub mod batch;
pub mod maps;
pub mod naming;
pub mod tiff_storage;

pub use batch::{dark_correct_directory, BatchDarkConfig, BatchSummary, CropRegion};
pub use maps::CorrectionMaps;
pub use naming::{
    capture_path, corrected_path, dark_frame_path, exposure_from_file_name, EXTERNAL_TRIGGER_PREFIX,
    SEQUENCE_CAPTURE_FILE, SOFTWARE_TRIGGER_PREFIX, STREAM_CALLBACK_PREFIX, XFPS_PREFIX,
};
pub use tiff_storage::{RasterDepth, TiffStorage};
