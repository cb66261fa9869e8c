//! Dark-frame (offset) subtraction.

use detector_core::{DetectorResult, Frame};
use serde::Serialize;
use tracing::debug;

/// Pixels that hit either end of the valid range.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ClampReport {
    /// Pixels clamped to 0.
    pub clamped_low: usize,
    /// Pixels clamped to the bit-depth maximum.
    pub clamped_high: usize,
}

/// `image[p] = clamp(image[p] - dark[p] + dark_offset, 0, max)` for every pixel.
///
/// `dark_offset` keeps dark-subtracted values above zero so that noise below
/// the dark level is not clipped.
///
/// # Errors
///
/// `DimensionMismatch` if `dark` differs from `image` in width or height;
/// `image` is not modified.
pub fn offset_correction(
    image: &mut Frame,
    dark: &Frame,
    dark_offset: u16,
) -> DetectorResult<ClampReport> {
    image.ensure_same_dimensions("offset_correction", dark)?;

    let max = i64::from(image.max_value());
    let offset = i64::from(dark_offset);
    let mut report = ClampReport::default();

    for (px, &d) in image.pixels_mut().iter_mut().zip(dark.pixels()) {
        let value = i64::from(*px) - i64::from(d) + offset;
        if value < 0 {
            report.clamped_low += 1;
        } else if value > max {
            report.clamped_high += 1;
        }
        *px = value.clamp(0, max) as u16;
    }

    debug!(
        dark_offset,
        clamped_low = report.clamped_low,
        clamped_high = report.clamped_high,
        "Offset correction applied"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use detector_core::DetectorError;

    #[test]
    fn test_documented_example() {
        let mut image = Frame::from_pixels(1, 1, 16, vec![500]).unwrap();
        let dark = Frame::from_pixels(1, 1, 16, vec![100]).unwrap();
        offset_correction(&mut image, &dark, 300).unwrap();
        assert_eq!(image.pixels(), &[700]);
    }

    #[test]
    fn test_clamps_both_ends() {
        let mut image = Frame::from_pixels(3, 1, 12, vec![10, 4000, 2000]).unwrap();
        let dark = Frame::from_pixels(3, 1, 12, vec![400, 0, 1000]).unwrap();
        let report = offset_correction(&mut image, &dark, 300).unwrap();
        assert_eq!(image.pixels(), &[0, 4095, 1300]);
        assert_eq!(report.clamped_low, 1);
        assert_eq!(report.clamped_high, 1);
    }

    #[test]
    fn test_mismatch_leaves_image() {
        let mut image = Frame::from_pixels(2, 2, 16, vec![1, 2, 3, 4]).unwrap();
        let before = image.clone();
        let dark = Frame::new(2, 1).unwrap();
        let err = offset_correction(&mut image, &dark, 300).unwrap_err();
        assert!(matches!(err, DetectorError::DimensionMismatch { .. }));
        assert_eq!(image, before);
    }
}
