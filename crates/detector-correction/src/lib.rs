//! Pixel correction for detector frames.
//!
//! Three in-place transforms, applied in the fixed order
//! Offset -> Gain -> Defect by [`CorrectionPipeline`]:
//!
//! - [`offset_correction`]: dark-frame subtraction with a uniform pedestal
//! - [`gain_correction`]: flat-field normalization against a gain map
//! - [`kernel_defect_correction`]: replace flagged pixels by the mean of their
//!   valid 3x3 neighbours
//!
//! Every stage checks dimensions before touching the image and leaves it
//! byte-for-byte unchanged on `DimensionMismatch`. Stages do not roll back
//! each other: if the gain stage fails, the offset stage's result stays
//! applied. Callers needing atomicity clone the frame first.
//!
//! Correction maps are borrowed immutably and never modified.

pub mod defect;
pub mod gain;
pub mod offset;
pub mod pipeline;

pub use defect::{kernel_defect_correction, DefectReport, DEFECT_KERNEL_RADIUS};
pub use gain::{gain_correction, GainReport};
pub use offset::{offset_correction, ClampReport};
pub use pipeline::{CorrectionPipeline, CorrectionReport, CorrectionStage};
