//! Fixed-order correction pipeline.

use crate::defect::{kernel_defect_correction, DefectReport};
use crate::gain::{gain_correction, GainReport};
use crate::offset::{offset_correction, ClampReport};
use detector_core::{DetectorError, DetectorResult, Frame, FrameCorrection};
use serde::Serialize;
use std::fmt;
use tracing::info;

/// Pipeline stage identifiers, in application order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrectionStage {
    /// Dark-frame subtraction.
    Offset,
    /// Flat-field normalization.
    Gain,
    /// Defect interpolation.
    Defect,
}

impl fmt::Display for CorrectionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Offset => "offset",
            Self::Gain => "gain",
            Self::Defect => "defect",
        };
        write!(f, "{}", label)
    }
}

/// What a pipeline run did.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CorrectionReport {
    /// Stages applied, in order.
    pub stages: Vec<CorrectionStage>,
    /// Offset stage result.
    pub offset: Option<ClampReport>,
    /// Gain stage result.
    pub gain: Option<GainReport>,
    /// Defect stage result.
    pub defect: Option<DefectReport>,
}

/// Offset -> Gain -> Defect over owned correction maps.
///
/// Stages without a map are skipped. Maps are never modified.
///
/// # Example
///
/// ```rust
/// use detector_core::Frame;
/// use detector_correction::CorrectionPipeline;
///
/// let dark = Frame::from_pixels(1, 1, 16, vec![100]).unwrap();
/// let pipeline = CorrectionPipeline::new().with_dark(dark, 300);
///
/// let mut image = Frame::from_pixels(1, 1, 16, vec![500]).unwrap();
/// pipeline.apply(&mut image).unwrap();
/// assert_eq!(image.pixels(), &[700]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct CorrectionPipeline {
    dark: Option<Frame>,
    dark_offset: u16,
    gain: Option<Frame>,
    gain_reference_offset: u16,
    defect: Option<Frame>,
}

impl CorrectionPipeline {
    /// Empty pipeline; `apply` is a no-op until maps are added.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable the offset stage.
    #[must_use]
    pub fn with_dark(mut self, dark: Frame, dark_offset: u16) -> Self {
        self.dark = Some(dark);
        self.dark_offset = dark_offset;
        self
    }

    /// Enable the gain stage.
    #[must_use]
    pub fn with_gain(mut self, gain: Frame, reference_offset: u16) -> Self {
        self.gain = Some(gain);
        self.gain_reference_offset = reference_offset;
        self
    }

    /// Enable the defect stage.
    #[must_use]
    pub fn with_defect_map(mut self, defect_map: Frame) -> Self {
        self.defect = Some(defect_map);
        self
    }

    /// Stages that `apply` will run, in order.
    #[must_use]
    pub fn stages(&self) -> Vec<CorrectionStage> {
        let mut stages = Vec::with_capacity(3);
        if self.dark.is_some() {
            stages.push(CorrectionStage::Offset);
        }
        if self.gain.is_some() {
            stages.push(CorrectionStage::Gain);
        }
        if self.defect.is_some() {
            stages.push(CorrectionStage::Defect);
        }
        stages
    }

    /// Check every configured map against a `width x height` readout.
    pub fn validate_against(&self, width: u32, height: u32) -> DetectorResult<()> {
        for map in [&self.dark, &self.gain, &self.defect].into_iter().flatten() {
            if map.dimensions() != (width, height) {
                return Err(DetectorError::dimension_mismatch(
                    "validate_correction_maps",
                    (width, height),
                    map.dimensions(),
                ));
            }
        }
        Ok(())
    }

    /// Run the configured stages in order.
    ///
    /// On error, stages that already ran stay applied and the failing stage
    /// leaves the image as it found it.
    pub fn apply(&self, image: &mut Frame) -> DetectorResult<CorrectionReport> {
        let mut report = CorrectionReport::default();

        if let Some(dark) = &self.dark {
            let clamp = offset_correction(image, dark, self.dark_offset)?;
            info!(
                stage = %CorrectionStage::Offset,
                dark_offset = self.dark_offset,
                clamped_low = clamp.clamped_low,
                clamped_high = clamp.clamped_high,
                "Correction stage applied"
            );
            report.offset = Some(clamp);
            report.stages.push(CorrectionStage::Offset);
        }

        if let Some(gain) = &self.gain {
            let result = gain_correction(image, gain, self.gain_reference_offset)?;
            info!(
                stage = %CorrectionStage::Gain,
                reference_level = result.reference_level,
                dead_pixels = result.dead_pixels,
                "Correction stage applied"
            );
            report.gain = Some(result);
            report.stages.push(CorrectionStage::Gain);
        }

        if let Some(defect) = &self.defect {
            let result = kernel_defect_correction(image, defect)?;
            info!(
                stage = %CorrectionStage::Defect,
                corrected = result.corrected,
                unrecoverable = result.unrecoverable,
                "Correction stage applied"
            );
            report.defect = Some(result);
            report.stages.push(CorrectionStage::Defect);
        }

        Ok(report)
    }
}

impl FrameCorrection for CorrectionPipeline {
    fn correct(&self, frame: &mut Frame) -> DetectorResult<()> {
        self.apply(frame).map(|_| ())
    }
}
