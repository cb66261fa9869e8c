//! Flat-field (gain) normalization.
//!
//! The gain map is a flat-field exposure carrying the same pedestal as the
//! image (`reference_offset`, usually the dark offset used when the map was
//! offset-corrected). With `g(p) = gain[p] - reference_offset` and `G` the
//! mean of the positive `g(p)`:
//!
//! ```text
//! image[p] = clamp(round((image[p] - reference_offset) * G / g(p)) + reference_offset, 0, max)
//! ```
//!
//! Pixels with `g(p) <= 0` carry no sensitivity information. They are left
//! unchanged and reported in [`GainReport::dead_pixels`] so the defect stage
//! can repair them.

use detector_core::{DetectorError, DetectorResult, Frame};
use serde::Serialize;
use tracing::{debug, warn};

/// Outcome of a gain correction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct GainReport {
    /// Mean positive gain level the image was normalized to.
    pub reference_level: f64,
    /// Pixels left unchanged because their gain was at or below the pedestal.
    pub dead_pixels: usize,
    /// Pixels clamped to 0 or the bit-depth maximum.
    pub clamped: usize,
}

/// Normalize `image` against `gain` in place.
///
/// # Errors
///
/// - `DimensionMismatch` if `gain` differs from `image` in width or height
/// - `InvalidParameter` if no gain pixel lies above `reference_offset`
///
/// `image` is not modified when an error is returned.
pub fn gain_correction(
    image: &mut Frame,
    gain: &Frame,
    reference_offset: u16,
) -> DetectorResult<GainReport> {
    image.ensure_same_dimensions("gain_correction", gain)?;

    let pedestal = i64::from(reference_offset);
    let (sum, count) = gain
        .pixels()
        .iter()
        .map(|&g| i64::from(g) - pedestal)
        .filter(|&g| g > 0)
        .fold((0f64, 0usize), |(sum, count), g| (sum + g as f64, count + 1));
    if count == 0 {
        return Err(DetectorError::invalid_parameter(
            "gain_correction",
            format!(
                "gain map has no pixel above reference_offset {}",
                reference_offset
            ),
        ));
    }
    let reference_level = sum / count as f64;

    let max = f64::from(image.max_value());
    let mut report = GainReport {
        reference_level,
        ..GainReport::default()
    };

    for (px, &g) in image.pixels_mut().iter_mut().zip(gain.pixels()) {
        let local = i64::from(g) - pedestal;
        if local <= 0 {
            report.dead_pixels += 1;
            continue;
        }
        let signal = (i64::from(*px) - pedestal) as f64;
        let value = (signal * reference_level / local as f64).round() + pedestal as f64;
        if value < 0.0 || value > max {
            report.clamped += 1;
        }
        *px = value.clamp(0.0, max) as u16;
    }

    if report.dead_pixels > 0 {
        warn!(
            dead_pixels = report.dead_pixels,
            reference_offset, "Gain map has pixels at or below the pedestal; left uncorrected"
        );
    }
    debug!(
        reference_level,
        clamped = report.clamped,
        "Gain correction applied"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_gain_is_identity() {
        let mut image = Frame::from_pixels(2, 2, 16, vec![300, 400, 1000, 65_000]).unwrap();
        let before = image.clone();
        let gain = Frame::from_pixels(2, 2, 16, vec![1300; 4]).unwrap();
        let report = gain_correction(&mut image, &gain, 300).unwrap();
        assert_eq!(image, before);
        assert!((report.reference_level - 1000.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_normalizes_sensitivity() {
        // Gain above pedestal: 500 and 1500, mean 1000.
        let mut image = Frame::from_pixels(2, 1, 16, vec![400, 600]).unwrap();
        let gain = Frame::from_pixels(2, 1, 16, vec![600, 1600]).unwrap();
        gain_correction(&mut image, &gain, 100).unwrap();
        // (400-100)*1000/500+100 = 700; (600-100)*1000/1500+100 = 433.33 -> 433
        assert_eq!(image.pixels(), &[700, 433]);
    }

    #[test]
    fn test_dead_pixels_unchanged() {
        let mut image = Frame::from_pixels(3, 1, 16, vec![500, 500, 500]).unwrap();
        let gain = Frame::from_pixels(3, 1, 16, vec![1300, 300, 100]).unwrap();
        let report = gain_correction(&mut image, &gain, 300).unwrap();
        assert_eq!(report.dead_pixels, 2);
        assert_eq!(image.pixels(), &[500, 500, 500]);
    }

    #[test]
    fn test_clamps_to_bit_depth() {
        let mut image = Frame::from_pixels(2, 1, 8, vec![250, 250]).unwrap();
        let gain = Frame::from_pixels(2, 1, 8, vec![10, 250]).unwrap();
        let report = gain_correction(&mut image, &gain, 0).unwrap();
        assert_eq!(image.pixels()[0], 255);
        assert_eq!(report.clamped, 1);
    }

    #[test]
    fn test_all_dead_map_rejected() {
        let mut image = Frame::from_pixels(2, 1, 16, vec![7, 8]).unwrap();
        let gain = Frame::from_pixels(2, 1, 16, vec![50, 50]).unwrap();
        assert!(matches!(
            gain_correction(&mut image, &gain, 50),
            Err(DetectorError::InvalidParameter { .. })
        ));
        assert_eq!(image.pixels(), &[7, 8]);
    }
}
