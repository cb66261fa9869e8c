//! Pixel planes and ordered plane sequences.
//!
//! A [`Frame`] is a `width x height` grid of unsigned samples stored as `u16`
//! regardless of the configured bit depth. The bit depth only defines the valid
//! range `[0, 2^depth - 1]` used for clamping. Dimensions are fixed at
//! construction and cannot be changed afterwards; mutation is limited to pixel
//! values.
//!
//! A [`FrameSequence`] is an ordered list of frames sharing width, height and
//! bit depth. Its depth may shrink (tail trimming after a short acquisition)
//! down to zero, which callers must treat as "nothing to persist".

use crate::error::{DetectorError, DetectorResult};
use crate::limits::{validate_frame_size, validate_sequence_size};

/// Canonical working bit depth.
pub const DEFAULT_BIT_DEPTH: u8 = 16;

fn check_bit_depth(operation: &'static str, bit_depth: u8) -> DetectorResult<()> {
    if bit_depth == 0 || bit_depth > 16 {
        return Err(DetectorError::invalid_parameter(
            operation,
            format!("bit_depth must be in 1..=16, got {}", bit_depth),
        ));
    }
    Ok(())
}

/// Largest sample value representable at `bit_depth`.
#[must_use]
pub fn max_value_for(bit_depth: u8) -> u16 {
    match bit_depth {
        0 => 0,
        16..=u8::MAX => u16::MAX,
        depth => (1u16 << depth) - 1,
    }
}

/// One owned image plane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    width: u32,
    height: u32,
    bit_depth: u8,
    pixels: Vec<u16>,
}

impl Frame {
    /// Allocate a zeroed 16-bit frame.
    pub fn new(width: u32, height: u32) -> DetectorResult<Self> {
        Self::with_bit_depth(width, height, DEFAULT_BIT_DEPTH)
    }

    /// Allocate a zeroed frame with an explicit bit depth.
    pub fn with_bit_depth(width: u32, height: u32, bit_depth: u8) -> DetectorResult<Self> {
        check_bit_depth("create_frame", bit_depth)?;
        let size = validate_frame_size(width, height)?;
        Ok(Self {
            width,
            height,
            bit_depth,
            pixels: vec![0; size.pixels],
        })
    }

    /// Wrap existing samples. Fails if the length does not match the
    /// dimensions or any sample exceeds the bit-depth range.
    pub fn from_pixels(
        width: u32,
        height: u32,
        bit_depth: u8,
        pixels: Vec<u16>,
    ) -> DetectorResult<Self> {
        check_bit_depth("create_frame", bit_depth)?;
        let size = validate_frame_size(width, height)?;
        if pixels.len() != size.pixels {
            return Err(DetectorError::invalid_parameter(
                "create_frame",
                format!(
                    "expected {} samples for {}x{}, got {}",
                    size.pixels,
                    width,
                    height,
                    pixels.len()
                ),
            ));
        }
        let max = max_value_for(bit_depth);
        if let Some(pos) = pixels.iter().position(|&v| v > max) {
            return Err(DetectorError::invalid_parameter(
                "create_frame",
                format!(
                    "sample {} at index {} exceeds {}-bit maximum {}",
                    pixels[pos], pos, bit_depth, max
                ),
            ));
        }
        Ok(Self {
            width,
            height,
            bit_depth,
            pixels,
        })
    }

    /// Width in pixels.
    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels.
    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// `(width, height)`.
    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Configured bit depth (1..=16).
    #[must_use]
    pub fn bit_depth(&self) -> u8 {
        self.bit_depth
    }

    /// Largest valid sample, `2^bit_depth - 1`.
    #[must_use]
    pub fn max_value(&self) -> u16 {
        max_value_for(self.bit_depth)
    }

    /// Number of pixels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    /// True when the frame holds no samples.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    /// Row-major samples.
    #[must_use]
    pub fn pixels(&self) -> &[u16] {
        &self.pixels
    }

    /// Mutable row-major samples. The slice length is fixed.
    pub fn pixels_mut(&mut self) -> &mut [u16] {
        &mut self.pixels
    }

    /// Sample at `(x, y)`, or `None` when out of bounds.
    #[must_use]
    pub fn get(&self, x: u32, y: u32) -> Option<u16> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.pixels
            .get(y as usize * self.width as usize + x as usize)
            .copied()
    }

    /// Overwrite the sample at `(x, y)`.
    pub fn set(&mut self, x: u32, y: u32, value: u16) -> DetectorResult<()> {
        if x >= self.width || y >= self.height {
            return Err(DetectorError::invalid_parameter(
                "set_pixel",
                format!("({}, {}) outside {}x{}", x, y, self.width, self.height),
            ));
        }
        if value > self.max_value() {
            return Err(DetectorError::invalid_parameter(
                "set_pixel",
                format!("value {} exceeds maximum {}", value, self.max_value()),
            ));
        }
        let idx = y as usize * self.width as usize + x as usize;
        self.pixels[idx] = value;
        Ok(())
    }

    /// True when `other` has the same width and height.
    #[must_use]
    pub fn same_dimensions(&self, other: &Frame) -> bool {
        self.dimensions() == other.dimensions()
    }

    /// Return `DimensionMismatch` for `operation` unless `other` matches.
    pub fn ensure_same_dimensions(
        &self,
        operation: &'static str,
        other: &Frame,
    ) -> DetectorResult<()> {
        if self.same_dimensions(other) {
            Ok(())
        } else {
            Err(DetectorError::dimension_mismatch(
                operation,
                self.dimensions(),
                other.dimensions(),
            ))
        }
    }

    /// Set every sample to `value` (clamped to the bit-depth range).
    pub fn fill(&mut self, value: u16) {
        let value = value.min(self.max_value());
        self.pixels.fill(value);
    }

    /// Copy delivered samples into this frame.
    ///
    /// Samples above the bit-depth maximum are clamped.
    pub fn copy_from_view(&mut self, view: &FrameView<'_>) -> DetectorResult<()> {
        if view.dimensions() != self.dimensions() || view.pixels().len() != self.pixels.len() {
            return Err(DetectorError::dimension_mismatch(
                "copy_frame",
                self.dimensions(),
                view.dimensions(),
            ));
        }
        let max = self.max_value();
        for (dst, &src) in self.pixels.iter_mut().zip(view.pixels()) {
            *dst = src.min(max);
        }
        Ok(())
    }

    /// Mean sample value.
    #[must_use]
    pub fn mean(&self) -> f64 {
        if self.pixels.is_empty() {
            return 0.0;
        }
        let sum: u64 = self.pixels.iter().map(|&v| u64::from(v)).sum();
        sum as f64 / self.pixels.len() as f64
    }

    /// Borrow as a read-only view.
    #[must_use]
    pub fn view(&self) -> FrameView<'_> {
        FrameView {
            width: self.width,
            height: self.height,
            bit_depth: self.bit_depth,
            pixels: &self.pixels,
        }
    }

    /// Copy out the `width x height` region starting at `(x, y)`.
    pub fn sub_image(&self, x: u32, y: u32, width: u32, height: u32) -> DetectorResult<Frame> {
        let fits = x
            .checked_add(width)
            .zip(y.checked_add(height))
            .is_some_and(|(right, bottom)| right <= self.width && bottom <= self.height);
        if !fits {
            return Err(DetectorError::invalid_parameter(
                "sub_image",
                format!(
                    "region {}x{}+{}+{} outside {}x{}",
                    width, height, x, y, self.width, self.height
                ),
            ));
        }
        let mut out = Frame::with_bit_depth(width, height, self.bit_depth)?;
        let src_stride = self.width as usize;
        let dst_stride = width as usize;
        for row in 0..height as usize {
            let src_start = (y as usize + row) * src_stride + x as usize;
            let dst_start = row * dst_stride;
            out.pixels[dst_start..dst_start + dst_stride]
                .copy_from_slice(&self.pixels[src_start..src_start + dst_stride]);
        }
        Ok(out)
    }

    /// Intensity-inverted copy: every sample becomes `max_value - sample`.
    #[must_use]
    pub fn inverted(&self) -> Frame {
        let max = self.max_value();
        Frame {
            width: self.width,
            height: self.height,
            bit_depth: self.bit_depth,
            pixels: self.pixels.iter().map(|&v| max.saturating_sub(v)).collect(),
        }
    }
}

/// Borrowed read-only plane, as delivered to stream callbacks.
///
/// A view produced for a Fatal delivery is empty (`0x0`, no samples).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameView<'a> {
    width: u32,
    height: u32,
    bit_depth: u8,
    pixels: &'a [u16],
}

impl<'a> FrameView<'a> {
    /// Wrap a sample slice. Fails if the length does not match the dimensions.
    pub fn new(width: u32, height: u32, bit_depth: u8, pixels: &'a [u16]) -> DetectorResult<Self> {
        let expected = width as usize * height as usize;
        if pixels.len() != expected {
            return Err(DetectorError::invalid_parameter(
                "frame_view",
                format!("expected {} samples, got {}", expected, pixels.len()),
            ));
        }
        Ok(Self {
            width,
            height,
            bit_depth,
            pixels,
        })
    }

    /// Wrap a slice whose length the caller has already checked.
    pub(crate) fn from_checked(width: u32, height: u32, bit_depth: u8, pixels: &'a [u16]) -> Self {
        debug_assert_eq!(pixels.len(), width as usize * height as usize);
        Self {
            width,
            height,
            bit_depth,
            pixels,
        }
    }

    /// Empty view used for fault notifications.
    #[must_use]
    pub fn empty() -> FrameView<'static> {
        FrameView {
            width: 0,
            height: 0,
            bit_depth: DEFAULT_BIT_DEPTH,
            pixels: &[],
        }
    }

    /// Width in pixels.
    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels.
    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// `(width, height)`.
    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Bit depth of the delivered data.
    #[must_use]
    pub fn bit_depth(&self) -> u8 {
        self.bit_depth
    }

    /// Row-major samples.
    #[must_use]
    pub fn pixels(&self) -> &'a [u16] {
        self.pixels
    }

    /// True for fault notifications.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    /// Sample at `(x, y)`.
    #[must_use]
    pub fn get(&self, x: u32, y: u32) -> Option<u16> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.pixels
            .get(y as usize * self.width as usize + x as usize)
            .copied()
    }

    /// Copy into an owned frame.
    pub fn to_frame(&self) -> DetectorResult<Frame> {
        let mut frame = Frame::with_bit_depth(self.width, self.height, self.bit_depth)?;
        frame.copy_from_view(self)?;
        Ok(frame)
    }
}

/// Ordered slices sharing width, height and bit depth.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameSequence {
    width: u32,
    height: u32,
    bit_depth: u8,
    slices: Vec<Frame>,
}

impl FrameSequence {
    /// Allocate `depth` zeroed 16-bit slices.
    pub fn new(width: u32, height: u32, depth: usize) -> DetectorResult<Self> {
        Self::with_bit_depth(width, height, DEFAULT_BIT_DEPTH, depth)
    }

    /// Allocate `depth` zeroed slices with an explicit bit depth.
    pub fn with_bit_depth(
        width: u32,
        height: u32,
        bit_depth: u8,
        depth: usize,
    ) -> DetectorResult<Self> {
        check_bit_depth("create_sequence", bit_depth)?;
        validate_sequence_size(width, height, depth)?;
        let slices = (0..depth)
            .map(|_| Frame::with_bit_depth(width, height, bit_depth))
            .collect::<DetectorResult<Vec<_>>>()?;
        Ok(Self {
            width,
            height,
            bit_depth,
            slices,
        })
    }

    /// Build from existing frames. All frames must share dimensions and bit depth.
    pub fn from_frames(frames: Vec<Frame>) -> DetectorResult<Self> {
        let first = frames.first().ok_or_else(|| {
            DetectorError::invalid_parameter(
                "create_sequence",
                "cannot infer dimensions from an empty frame list",
            )
        })?;
        let (width, height, bit_depth) = (first.width, first.height, first.bit_depth);
        let mut seq = Self {
            width,
            height,
            bit_depth,
            slices: Vec::with_capacity(frames.len()),
        };
        for frame in frames {
            seq.push(frame)?;
        }
        Ok(seq)
    }

    /// Slice width.
    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Slice height.
    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// `(width, height)` of every slice.
    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Bit depth of every slice.
    #[must_use]
    pub fn bit_depth(&self) -> u8 {
        self.bit_depth
    }

    /// Number of slices. Zero means there is nothing to persist.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.slices.len()
    }

    /// True when depth is zero.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }

    /// Remove the last `n` slices.
    pub fn delete_last_n_slices(&mut self, n: usize) -> DetectorResult<()> {
        if n > self.slices.len() {
            return Err(DetectorError::invalid_parameter(
                "delete_last_n_slices",
                format!("cannot delete {} slices from depth {}", n, self.slices.len()),
            ));
        }
        let keep = self.slices.len() - n;
        self.slices.truncate(keep);
        Ok(())
    }

    /// Owned copy of slice `index`.
    pub fn extract_plane(&self, index: usize) -> DetectorResult<Frame> {
        self.slices.get(index).cloned().ok_or_else(|| {
            DetectorError::invalid_parameter(
                "extract_plane",
                format!("slice {} out of range for depth {}", index, self.slices.len()),
            )
        })
    }

    /// Borrow slice `index`.
    #[must_use]
    pub fn slice(&self, index: usize) -> Option<&Frame> {
        self.slices.get(index)
    }

    /// Mutably borrow slice `index`.
    pub fn slice_mut(&mut self, index: usize) -> Option<&mut Frame> {
        self.slices.get_mut(index)
    }

    /// Append a slice with matching dimensions and bit depth.
    pub fn push(&mut self, frame: Frame) -> DetectorResult<()> {
        if frame.dimensions() != self.dimensions() {
            return Err(DetectorError::dimension_mismatch(
                "push_slice",
                self.dimensions(),
                frame.dimensions(),
            ));
        }
        if frame.bit_depth != self.bit_depth {
            return Err(DetectorError::invalid_parameter(
                "push_slice",
                format!(
                    "slice bit depth {} differs from sequence bit depth {}",
                    frame.bit_depth, self.bit_depth
                ),
            ));
        }
        validate_sequence_size(self.width, self.height, self.slices.len() + 1)?;
        self.slices.push(frame);
        Ok(())
    }

    /// Iterate slices in order.
    pub fn iter(&self) -> std::slice::Iter<'_, Frame> {
        self.slices.iter()
    }

    /// All slices in order.
    #[must_use]
    pub fn frames(&self) -> &[Frame] {
        &self.slices
    }
}

impl<'a> IntoIterator for &'a FrameSequence {
    type Item = &'a Frame;
    type IntoIter = std::slice::Iter<'a, Frame>;

    fn into_iter(self) -> Self::IntoIter {
        self.slices.iter()
    }
}
