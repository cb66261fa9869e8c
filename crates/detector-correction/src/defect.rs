//! Defective pixel interpolation.

use detector_core::{DetectorResult, Frame};
use serde::Serialize;
use tracing::{debug, warn};

/// Neighbourhood radius: a 3x3 window around each flagged pixel.
pub const DEFECT_KERNEL_RADIUS: u32 = 1;

/// Outcome of a defect correction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DefectReport {
    /// Flagged pixels replaced by their neighbourhood mean.
    pub corrected: usize,
    /// Flagged pixels with no valid neighbour, left unchanged.
    pub unrecoverable: usize,
}

/// Replace every pixel flagged in `defect_map` (non-zero) with the rounded
/// mean of its non-flagged neighbours inside the kernel window.
///
/// Only flagged pixels are written and only non-flagged pixels are read, so
/// the result does not depend on scan order.
///
/// # Errors
///
/// `DimensionMismatch` if `defect_map` differs from `image` in width or
/// height; `image` is not modified.
pub fn kernel_defect_correction(
    image: &mut Frame,
    defect_map: &Frame,
) -> DetectorResult<DefectReport> {
    image.ensure_same_dimensions("kernel_defect_correction", defect_map)?;

    let (width, height) = image.dimensions();
    let (w, h) = (width as usize, height as usize);
    let r = DEFECT_KERNEL_RADIUS as usize;
    let flags = defect_map.pixels();
    let pixels = image.pixels_mut();
    let mut report = DefectReport::default();

    for y in 0..h {
        for x in 0..w {
            let idx = y * w + x;
            if flags[idx] == 0 {
                continue;
            }
            let mut sum = 0u64;
            let mut count = 0u64;
            for ny in y.saturating_sub(r)..=(y + r).min(h - 1) {
                for nx in x.saturating_sub(r)..=(x + r).min(w - 1) {
                    let n = ny * w + nx;
                    if flags[n] == 0 {
                        sum += u64::from(pixels[n]);
                        count += 1;
                    }
                }
            }
            if count == 0 {
                report.unrecoverable += 1;
                continue;
            }
            pixels[idx] = ((sum + count / 2) / count) as u16;
            report.corrected += 1;
        }
    }

    if report.unrecoverable > 0 {
        warn!(
            unrecoverable = report.unrecoverable,
            "Defect pixels without valid neighbours left unchanged"
        );
    }
    debug!(corrected = report.corrected, "Defect correction applied");
    Ok(report)
}
