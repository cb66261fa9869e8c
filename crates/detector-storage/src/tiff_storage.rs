//! TIFF raster persistence for frames and sequences.
//!
//! Planes are written as grayscale TIFF at 8 or 16 bits per sample. A
//! [`FrameSequence`] becomes one multi-page file, one page per slice.
//!
//! # Usage
//!
//! ```rust,ignore
//! use detector_storage::{RasterDepth, TiffStorage};
//!
//! TiffStorage::write_frame("frame.tif", &frame, RasterDepth::Sixteen)?;
//! let restored = TiffStorage::read_frame("frame.tif")?;
//!
//! TiffStorage::write_sequence("SequenceCapture.tif", &sequence, RasterDepth::Sixteen)?;
//! ```

use detector_core::{DetectorError, DetectorResult, Frame, FrameSequence};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Seek, Write};
use std::path::Path;
use tiff::decoder::{Decoder, DecodingResult};
use tiff::encoder::{colortype, TiffEncoder};
use tiff::ColorType;
use tracing::{debug, info};

/// Bits per stored sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RasterDepth {
    /// 8-bit grayscale. Every sample must be at most 255.
    Eight,
    /// 16-bit grayscale.
    Sixteen,
}

impl RasterDepth {
    /// Smallest raster depth that holds `bit_depth`-bit samples.
    #[must_use]
    pub fn for_bit_depth(bit_depth: u8) -> Self {
        if bit_depth <= 8 {
            Self::Eight
        } else {
            Self::Sixteen
        }
    }

    /// Bits per sample.
    #[must_use]
    pub fn bits(self) -> u8 {
        match self {
            Self::Eight => 8,
            Self::Sixteen => 16,
        }
    }
}

/// TIFF reader/writer for detector planes.
pub struct TiffStorage;

impl TiffStorage {
    /// Write one plane.
    ///
    /// # Errors
    ///
    /// - `InvalidParameter` if `depth` is [`RasterDepth::Eight`] and a sample
    ///   exceeds 255 (nothing is written)
    /// - `Storage` if the file cannot be created or encoded
    pub fn write_frame<P: AsRef<Path>>(path: P, frame: &Frame, depth: RasterDepth) -> DetectorResult<()> {
        let path = path.as_ref();
        check_fits("write_frame", frame, depth)?;

        let mut encoder = create_encoder(path)?;
        encode_page(&mut encoder, frame, depth, path)?;

        debug!(
            path = %path.display(),
            width = frame.width(),
            height = frame.height(),
            bits = depth.bits(),
            "Wrote TIFF frame"
        );
        Ok(())
    }

    /// Write every slice of `sequence` as one page of a multi-page file.
    ///
    /// # Errors
    ///
    /// - `InvalidParameter` for an empty sequence or an 8-bit overflow
    /// - `Storage` if the file cannot be created or encoded
    pub fn write_sequence<P: AsRef<Path>>(
        path: P,
        sequence: &FrameSequence,
        depth: RasterDepth,
    ) -> DetectorResult<()> {
        let path = path.as_ref();
        if sequence.is_empty() {
            return Err(DetectorError::invalid_parameter(
                "write_sequence",
                "cannot write an empty sequence",
            ));
        }
        for slice in sequence {
            check_fits("write_sequence", slice, depth)?;
        }

        let mut encoder = create_encoder(path)?;
        for slice in sequence {
            encode_page(&mut encoder, slice, depth, path)?;
        }

        info!(
            path = %path.display(),
            pages = sequence.depth(),
            width = sequence.width(),
            height = sequence.height(),
            bits = depth.bits(),
            "Wrote TIFF sequence"
        );
        Ok(())
    }

    /// Read the first page of a file.
    ///
    /// The frame's bit depth is the raster depth of the file (8 or 16).
    pub fn read_frame<P: AsRef<Path>>(path: P) -> DetectorResult<Frame> {
        let path = path.as_ref();
        let mut decoder = open_decoder(path)?;
        decode_page(&mut decoder, path)
    }

    /// Read the first page of a file into a pre-allocated frame.
    ///
    /// Samples above the target's maximum are clamped.
    ///
    /// # Errors
    ///
    /// `DimensionMismatch` (with `target` untouched) when the file's
    /// dimensions differ from the target's.
    pub fn read_frame_into<P: AsRef<Path>>(path: P, target: &mut Frame) -> DetectorResult<()> {
        let source = Self::read_frame(path)?;
        if !target.same_dimensions(&source) {
            return Err(DetectorError::dimension_mismatch(
                "read_frame_into",
                target.dimensions(),
                source.dimensions(),
            ));
        }
        target.copy_from_view(&source.view())
    }

    /// Read every page of a file.
    ///
    /// # Errors
    ///
    /// `DimensionMismatch` if the pages do not share dimensions.
    pub fn read_sequence<P: AsRef<Path>>(path: P) -> DetectorResult<FrameSequence> {
        let path = path.as_ref();
        let mut decoder = open_decoder(path)?;
        let mut frames = vec![decode_page(&mut decoder, path)?];
        while decoder.more_images() {
            decoder.next_image().map_err(|e| codec_error(path, e))?;
            frames.push(decode_page(&mut decoder, path)?);
        }
        debug!(path = %path.display(), pages = frames.len(), "Read TIFF sequence");
        FrameSequence::from_frames(frames)
    }
}

fn codec_error(path: &Path, err: tiff::TiffError) -> DetectorError {
    DetectorError::storage(path, err.to_string())
}

fn check_fits(operation: &'static str, frame: &Frame, depth: RasterDepth) -> DetectorResult<()> {
    if depth == RasterDepth::Eight {
        if let Some(&value) = frame.pixels().iter().find(|&&v| v > u16::from(u8::MAX)) {
            return Err(DetectorError::invalid_parameter(
                operation,
                format!("sample value {} does not fit an 8-bit raster", value),
            ));
        }
    }
    Ok(())
}

fn create_encoder(path: &Path) -> DetectorResult<TiffEncoder<BufWriter<File>>> {
    let file = File::create(path)
        .map_err(|e| DetectorError::storage(path, format!("cannot create file: {}", e)))?;
    TiffEncoder::new(BufWriter::new(file)).map_err(|e| codec_error(path, e))
}

fn encode_page<W: Write + Seek>(
    encoder: &mut TiffEncoder<W>,
    frame: &Frame,
    depth: RasterDepth,
    path: &Path,
) -> DetectorResult<()> {
    let (width, height) = frame.dimensions();
    match depth {
        RasterDepth::Eight => {
            // Range checked by `check_fits`.
            let samples: Vec<u8> = frame.pixels().iter().map(|&v| v as u8).collect();
            encoder.write_image::<colortype::Gray8>(width, height, &samples)
        }
        RasterDepth::Sixteen => {
            encoder.write_image::<colortype::Gray16>(width, height, frame.pixels())
        }
    }
    .map_err(|e| codec_error(path, e))
}

fn open_decoder(path: &Path) -> DetectorResult<Decoder<BufReader<File>>> {
    let file = File::open(path)
        .map_err(|e| DetectorError::storage(path, format!("cannot open file: {}", e)))?;
    Decoder::new(BufReader::new(file)).map_err(|e| codec_error(path, e))
}

fn decode_page<R: std::io::Read + Seek>(
    decoder: &mut Decoder<R>,
    path: &Path,
) -> DetectorResult<Frame> {
    let (width, height) = decoder.dimensions().map_err(|e| codec_error(path, e))?;
    let colortype = decoder.colortype().map_err(|e| codec_error(path, e))?;
    if !matches!(colortype, ColorType::Gray(8) | ColorType::Gray(16)) {
        return Err(DetectorError::storage(
            path,
            format!("unsupported color type {:?}, expected 8- or 16-bit grayscale", colortype),
        ));
    }

    match decoder.read_image().map_err(|e| codec_error(path, e))? {
        DecodingResult::U8(samples) => Frame::from_pixels(
            width,
            height,
            8,
            samples.into_iter().map(u16::from).collect(),
        ),
        DecodingResult::U16(samples) => Frame::from_pixels(width, height, 16, samples),
        _ => Err(DetectorError::storage(path, "unsupported sample format")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_raster_depth_for_bit_depth() {
        assert_eq!(RasterDepth::for_bit_depth(8), RasterDepth::Eight);
        assert_eq!(RasterDepth::for_bit_depth(12), RasterDepth::Sixteen);
        assert_eq!(RasterDepth::for_bit_depth(16).bits(), 16);
    }

    #[test]
    fn test_eight_bit_overflow_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("overflow.tif");
        let frame = Frame::from_pixels(2, 1, 16, vec![10, 300]).unwrap();

        let err = TiffStorage::write_frame(&path, &frame, RasterDepth::Eight).unwrap_err();
        assert!(matches!(err, DetectorError::InvalidParameter { .. }));
        assert!(!path.exists());
    }

    #[test]
    fn test_empty_sequence_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.tif");
        let sequence = FrameSequence::new(4, 4, 0).unwrap();

        let err = TiffStorage::write_sequence(&path, &sequence, RasterDepth::Sixteen).unwrap_err();
        assert!(matches!(err, DetectorError::InvalidParameter { .. }));
    }

    #[test]
    fn test_missing_file_is_storage_error() {
        let dir = TempDir::new().unwrap();
        let err = TiffStorage::read_frame(dir.path().join("absent.tif")).unwrap_err();
        assert!(matches!(err, DetectorError::Storage { .. }));
    }
}
