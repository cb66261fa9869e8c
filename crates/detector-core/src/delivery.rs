//! Bounded producer/consumer delivery path between a backend and the controller.
//!
//! A backend never calls user code directly. On `start_stream` it receives a
//! [`FrameSink`]; for every frame it loans a buffer with
//! [`FrameSink::checkout`], fills it, and hands it back with
//! [`FrameSink::submit`]. The controller owns the matching
//! [`DeliveryReceiver`] and either copies frames into caller buffers
//! (blocking acquire) or feeds them to a registered callback.
//!
//! ## Backpressure
//!
//! Both the pool and the queue are bounded. When either is full the frame is
//! dropped and counted in [`DeliveryStats::dropped`]; the producer is never
//! blocked. A slow consumer therefore loses frames rather than stalling the
//! hardware.

use crate::buffer::BufferInfo;
use crate::error::{DetectorError, DetectorResult};
use crate::frame::FrameView;
use crate::pool::{FramePool, PooledBuffer};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

/// One frame in flight.
#[derive(Debug)]
pub struct DeliveredFrame {
    buffer: PooledBuffer,
    frame_count: u64,
    width: u32,
    height: u32,
    bit_depth: u8,
    missing_packets: u32,
}

impl DeliveredFrame {
    /// Hardware frame counter.
    #[must_use]
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Lost packets reported by the backend.
    #[must_use]
    pub fn missing_packets(&self) -> u32 {
        self.missing_packets
    }

    /// `(width, height)`.
    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Read-only view of the pixels.
    #[must_use]
    pub fn view(&self) -> FrameView<'_> {
        FrameView::from_checked(self.width, self.height, self.bit_depth, &self.buffer)
    }

    /// Metadata for this delivery.
    #[must_use]
    pub fn info(&self) -> BufferInfo {
        BufferInfo::with_missing_packets(
            self.frame_count,
            self.width,
            self.height,
            self.missing_packets,
        )
    }
}

/// Item carried by the delivery queue.
#[derive(Debug)]
pub enum DeliveryEvent {
    /// A frame, complete or with missing packets.
    Frame(DeliveredFrame),
    /// An unrecoverable backend fault. Surfaces as `AcquisitionStatus::Fatal`.
    Fault {
        /// Last frame counter the backend produced.
        frame_count: u64,
        /// Device error code.
        code: i32,
        /// Device message.
        message: String,
    },
}

/// Snapshot of delivery counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryStats {
    /// Frames enqueued for the consumer.
    pub delivered: u64,
    /// Frames dropped because the pool or queue was full, or discarded by
    /// the consumer as stale.
    pub dropped: u64,
    /// Fault events enqueued.
    pub faults: u64,
}

#[derive(Debug, Default)]
struct StatsInner {
    delivered: AtomicU64,
    dropped: AtomicU64,
    faults: AtomicU64,
}

impl StatsInner {
    fn snapshot(&self) -> DeliveryStats {
        DeliveryStats {
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            faults: self.faults.load(Ordering::Relaxed),
        }
    }
}

/// Create a bounded delivery path for frames of the given geometry.
///
/// The pool must have been sized for `width x height`.
pub fn delivery_channel(
    pool: FramePool,
    width: u32,
    height: u32,
    bit_depth: u8,
    queue_depth: usize,
) -> DetectorResult<(FrameSink, DeliveryReceiver)> {
    if queue_depth == 0 {
        return Err(DetectorError::invalid_parameter(
            "delivery_channel",
            "queue_depth must be > 0",
        ));
    }
    let expected = width as usize * height as usize;
    if pool.slot_len() != expected {
        return Err(DetectorError::invalid_parameter(
            "delivery_channel",
            format!(
                "pool slots hold {} samples, frames need {}",
                pool.slot_len(),
                expected
            ),
        ));
    }
    let (tx, rx) = mpsc::channel(queue_depth);
    let stats = Arc::new(StatsInner::default());
    let sink = FrameSink {
        tx,
        pool,
        width,
        height,
        bit_depth,
        stats: Arc::clone(&stats),
    };
    Ok((sink, DeliveryReceiver { rx, stats }))
}

/// Producer half, owned by the backend while streaming.
#[derive(Debug, Clone)]
pub struct FrameSink {
    tx: mpsc::Sender<DeliveryEvent>,
    pool: FramePool,
    width: u32,
    height: u32,
    bit_depth: u8,
    stats: Arc<StatsInner>,
}

impl FrameSink {
    /// Frame width the consumer expects.
    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Frame height the consumer expects.
    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Sample bit depth.
    #[must_use]
    pub fn bit_depth(&self) -> u8 {
        self.bit_depth
    }

    /// True once the consumer has gone away.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Loan a buffer for the next frame.
    ///
    /// Returns `None` (and counts a drop) when every buffer is in use.
    #[must_use]
    pub fn checkout(&self) -> Option<PooledBuffer> {
        let buffer = self.pool.try_acquire();
        if buffer.is_none() {
            let dropped = self.stats.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            warn!(dropped, "Frame pool exhausted, dropping frame");
        }
        buffer
    }

    /// Enqueue a filled buffer.
    ///
    /// Returns `false` when the frame was dropped (queue full) or the consumer
    /// is gone.
    pub fn submit(&self, buffer: PooledBuffer, frame_count: u64, missing_packets: u32) -> bool {
        let frame = DeliveredFrame {
            buffer,
            frame_count,
            width: self.width,
            height: self.height,
            bit_depth: self.bit_depth,
            missing_packets,
        };
        match self.tx.try_send(DeliveryEvent::Frame(frame)) {
            Ok(()) => {
                self.stats.delivered.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Full(_)) => {
                let dropped = self.stats.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(frame_count, dropped, "Delivery queue full, dropping frame");
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!(frame_count, "Delivery receiver closed, discarding frame");
                false
            }
        }
    }

    /// Enqueue a fault notification.
    pub fn report_fault(&self, frame_count: u64, code: i32, message: impl Into<String>) -> bool {
        let event = DeliveryEvent::Fault {
            frame_count,
            code,
            message: message.into(),
        };
        match self.tx.try_send(event) {
            Ok(()) => {
                self.stats.faults.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Full(_)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(frame_count, code, "Delivery queue full, fault notification dropped");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> DeliveryStats {
        self.stats.snapshot()
    }
}

/// Consumer half, owned by the controller.
#[derive(Debug)]
pub struct DeliveryReceiver {
    rx: mpsc::Receiver<DeliveryEvent>,
    stats: Arc<StatsInner>,
}

impl DeliveryReceiver {
    /// Wait for the next event. `None` once every sink is dropped and the
    /// queue is empty.
    pub async fn recv(&mut self) -> Option<DeliveryEvent> {
        self.rx.recv().await
    }

    /// Take the next event if one is queued.
    pub fn try_recv(&mut self) -> Option<DeliveryEvent> {
        self.rx.try_recv().ok()
    }

    /// Drop every queued event, counting each one in
    /// [`DeliveryStats::dropped`]. Returns how many were dropped.
    pub fn discard_queued(&mut self) -> u64 {
        let mut discarded = 0;
        while self.rx.try_recv().is_ok() {
            discarded += 1;
        }
        if discarded > 0 {
            self.stats.dropped.fetch_add(discarded, Ordering::Relaxed);
        }
        discarded
    }

    /// Refuse further events. Already queued events can still be received.
    pub fn close(&mut self) {
        self.rx.close();
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> DeliveryStats {
        self.stats.snapshot()
    }

    /// Counter handle that stays readable while the receiver is borrowed or
    /// moved into a consumer task.
    #[must_use]
    pub fn stats_handle(&self) -> DeliveryStatsHandle {
        DeliveryStatsHandle {
            inner: Arc::clone(&self.stats),
        }
    }
}

/// Shared read-only view of a channel's counters.
#[derive(Debug, Clone)]
pub struct DeliveryStatsHandle {
    inner: Arc<StatsInner>,
}

impl DeliveryStatsHandle {
    /// Current counters.
    #[must_use]
    pub fn snapshot(&self) -> DeliveryStats {
        self.inner.snapshot()
    }
}
