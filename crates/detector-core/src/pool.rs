//! Pre-allocated frame buffers for the delivery path.
//!
//! The producer side of a stream copies each incoming frame into a slot
//! loaned from a [`FramePool`] instead of allocating. The slot travels through
//! the delivery queue inside a [`PooledBuffer`] and returns to the free list
//! when the consumer drops it.
//!
//! ## Memory Flow
//!
//! ```text
//! 1. FramePool pre-allocates `slots` buffers of width*height samples at start_stream
//! 2. try_acquire() loans a PooledBuffer (no allocation)
//! 3. Backend fills the buffer and submits it to the FrameSink
//! 4. Consumer copies into the caller's Frame or hands a FrameView to the callback
//! 5. PooledBuffer::drop() pushes the buffer back onto the free list
//! ```
//!
//! When every slot is loaned out, `try_acquire` returns `None` and the
//! producer drops the frame (drop-and-count backpressure).

use crate::error::{DetectorError, DetectorResult};
use crate::limits::validate_frame_size;
use crossbeam_queue::SegQueue;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::info;

/// Internal state shared between the pool and its loans.
struct PoolInner {
    /// Lock-free queue of available buffers
    free_buffers: SegQueue<Vec<u16>>,
    /// Samples per buffer
    slot_len: usize,
    /// Total number of buffers
    pool_size: usize,
    /// Number of buffers currently available
    available: AtomicUsize,
    /// Metrics: total loans
    total_acquires: AtomicU64,
}

/// Fixed-size pool of frame buffers.
#[derive(Clone)]
pub struct FramePool {
    inner: Arc<PoolInner>,
}

impl FramePool {
    /// Allocate `pool_size` buffers for `width x height` frames.
    ///
    /// # Errors
    ///
    /// - `InvalidParameter` if `pool_size` is zero or the dimensions are invalid
    /// - `ResourceExhausted` if the pool would exceed `max_total_bytes` or an
    ///   allocation fails
    pub fn new(
        pool_size: usize,
        width: u32,
        height: u32,
        max_total_bytes: usize,
    ) -> DetectorResult<Self> {
        if pool_size == 0 {
            return Err(DetectorError::invalid_parameter(
                "create_frame_pool",
                "pool_size must be > 0",
            ));
        }
        let size = validate_frame_size(width, height)?;
        let total_bytes = size
            .bytes
            .checked_mul(pool_size)
            .filter(|total| *total <= max_total_bytes)
            .ok_or_else(|| DetectorError::ResourceExhausted {
                context: format!(
                    "frame pool of {} x {}x{} buffers exceeds {} byte cap",
                    pool_size, width, height, max_total_bytes
                ),
                requested_bytes: size.bytes.saturating_mul(pool_size),
            })?;

        let free_buffers = SegQueue::new();
        for _ in 0..pool_size {
            let mut buffer: Vec<u16> = Vec::new();
            buffer
                .try_reserve_exact(size.pixels)
                .map_err(|e| DetectorError::ResourceExhausted {
                    context: format!("frame buffer allocation failed: {}", e),
                    requested_bytes: size.bytes,
                })?;
            buffer.resize(size.pixels, 0);
            free_buffers.push(buffer);
        }

        info!(
            pool_size,
            width,
            height,
            total_mb = total_bytes as f64 / (1024.0 * 1024.0),
            "FramePool created"
        );

        Ok(Self {
            inner: Arc::new(PoolInner {
                free_buffers,
                slot_len: size.pixels,
                pool_size,
                available: AtomicUsize::new(pool_size),
                total_acquires: AtomicU64::new(0),
            }),
        })
    }

    /// Loan a buffer without blocking. `None` means every slot is in use.
    #[must_use]
    pub fn try_acquire(&self) -> Option<PooledBuffer> {
        let buffer = self.inner.free_buffers.pop()?;
        self.inner.available.fetch_sub(1, Ordering::AcqRel);
        self.inner.total_acquires.fetch_add(1, Ordering::Relaxed);
        Some(PooledBuffer {
            buffer: Some(buffer),
            pool: Arc::clone(&self.inner),
        })
    }

    /// Buffers currently free.
    #[must_use]
    pub fn available(&self) -> usize {
        self.inner.available.load(Ordering::Acquire)
    }

    /// Total buffers.
    #[must_use]
    pub fn size(&self) -> usize {
        self.inner.pool_size
    }

    /// Samples per buffer.
    #[must_use]
    pub fn slot_len(&self) -> usize {
        self.inner.slot_len
    }

    /// Total loans since creation.
    #[must_use]
    pub fn total_acquires(&self) -> u64 {
        self.inner.total_acquires.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for FramePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FramePool")
            .field("size", &self.size())
            .field("available", &self.available())
            .field("slot_len", &self.slot_len())
            .finish()
    }
}

/// A loaned buffer. Returns to its pool on drop.
pub struct PooledBuffer {
    buffer: Option<Vec<u16>>,
    pool: Arc<PoolInner>,
}

impl Deref for PooledBuffer {
    type Target = [u16];

    fn deref(&self) -> &[u16] {
        self.buffer.as_deref().unwrap_or(&[])
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut [u16] {
        self.buffer.as_deref_mut().unwrap_or(&mut [])
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            self.pool.free_buffers.push(buffer);
            self.pool.available.fetch_add(1, Ordering::AcqRel);
        }
    }
}

impl std::fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("len", &self.len())
            .finish()
    }
}
