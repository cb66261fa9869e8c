//! Correction map loading.

use crate::tiff_storage::TiffStorage;
use detector_core::{DetectorError, DetectorResult, Frame};
use detector_correction::CorrectionPipeline;
use std::path::Path;
use tracing::info;

/// Dark, gain and defect maps read from disk.
#[derive(Debug, Clone)]
pub struct CorrectionMaps {
    /// Dark (offset) frame.
    pub dark: Frame,
    /// Flat-field gain map.
    pub gain: Frame,
    /// Defect map; nonzero marks a defective pixel.
    pub defect: Frame,
}

impl CorrectionMaps {
    /// Read the three maps and check they share dimensions.
    ///
    /// # Errors
    ///
    /// `Storage` if a file cannot be read; `DimensionMismatch` naming the
    /// first map that differs from the dark frame.
    pub fn load(dark: &Path, gain: &Path, defect: &Path) -> DetectorResult<Self> {
        let dark = TiffStorage::read_frame(dark)?;
        let gain = TiffStorage::read_frame(gain)?;
        let defect = TiffStorage::read_frame(defect)?;

        for (operation, map) in [("load_gain_map", &gain), ("load_defect_map", &defect)] {
            if !map.same_dimensions(&dark) {
                return Err(DetectorError::dimension_mismatch(
                    operation,
                    dark.dimensions(),
                    map.dimensions(),
                ));
            }
        }

        info!(
            width = dark.width(),
            height = dark.height(),
            "Loaded correction maps"
        );
        Ok(Self { dark, gain, defect })
    }

    /// Shared map dimensions.
    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        self.dark.dimensions()
    }

    /// Full Offset -> Gain -> Defect pipeline over these maps.
    #[must_use]
    pub fn into_pipeline(self, dark_offset: u16, gain_reference_offset: u16) -> CorrectionPipeline {
        CorrectionPipeline::new()
            .with_dark(self.dark, dark_offset)
            .with_gain(self.gain, gain_reference_offset)
            .with_defect_map(self.defect)
    }
}
