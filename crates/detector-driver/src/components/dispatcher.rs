//! Callback delivery
//!
//! A single consumer task drains the delivery queue and invokes the user
//! handler once per event, in queue order. The handler runs on the task, never
//! on the backend's producer.
//!
//! ## Shutdown
//!
//! [`StreamingDispatcher::shutdown`] clears the `active` flag (checked before
//! every invocation), wakes the task and waits a bounded time for it to exit.
//! If the handler is still busy when the bound expires the task is aborted.
//! Either way no new invocation begins after `shutdown` returns.

use detector_core::{AcquisitionStatus, BufferInfo, DeliveryEvent, DeliveryReceiver, FrameView};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Counters reported when callback delivery ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchSummary {
    /// Handler invocations, including fault notifications.
    pub invoked: u64,
    /// Frames discarded because their counter did not increase.
    pub out_of_order: u64,
    /// False when the task had to be aborted at the drain bound.
    pub drained: bool,
}

#[derive(Debug, Default)]
struct Counters {
    invoked: AtomicU64,
    out_of_order: AtomicU64,
}

impl Counters {
    fn summary(&self, drained: bool) -> DispatchSummary {
        DispatchSummary {
            invoked: self.invoked.load(Ordering::Relaxed),
            out_of_order: self.out_of_order.load(Ordering::Relaxed),
            drained,
        }
    }
}

/// Returned to the caller that registered a callback.
///
/// Resolves once the dispatcher task has exited, handing back the user
/// context.
#[derive(Debug)]
pub struct CallbackHandle<C> {
    done: oneshot::Receiver<(C, DispatchSummary)>,
}

impl<C> CallbackHandle<C> {
    /// Wait for the dispatcher to finish and take back the context.
    ///
    /// Only completes after the stream stops (or the backend closes the
    /// delivery channel). Returns `None` if the task was aborted.
    pub async fn finish(self) -> Option<(C, DispatchSummary)> {
        self.done.await.ok()
    }

    /// Non-blocking variant of [`finish`](Self::finish).
    pub fn try_finish(&mut self) -> Option<(C, DispatchSummary)> {
        self.done.try_recv().ok()
    }
}

/// Consumer task feeding a user callback.
#[derive(Debug)]
pub struct StreamingDispatcher {
    active: Arc<AtomicBool>,
    wake: Arc<Notify>,
    counters: Arc<Counters>,
    task: JoinHandle<()>,
}

impl StreamingDispatcher {
    /// Spawn the consumer task.
    ///
    /// `width` and `height` fill the [`BufferInfo`] of fault notifications.
    pub fn spawn<C, F>(
        receiver: DeliveryReceiver,
        width: u32,
        height: u32,
        context: C,
        handler: F,
    ) -> (Self, CallbackHandle<C>)
    where
        C: Send + 'static,
        F: FnMut(&FrameView<'_>, &BufferInfo, &mut C) + Send + 'static,
    {
        let active = Arc::new(AtomicBool::new(true));
        let wake = Arc::new(Notify::new());
        let counters = Arc::new(Counters::default());
        let (done_tx, done_rx) = oneshot::channel();

        let worker = Worker {
            receiver,
            width,
            height,
            active: Arc::clone(&active),
            wake: Arc::clone(&wake),
            counters: Arc::clone(&counters),
            last_frame_count: None,
        };
        let task = tokio::spawn(worker.run(context, handler, done_tx));

        (
            Self {
                active,
                wake,
                counters,
                task,
            },
            CallbackHandle { done: done_rx },
        )
    }

    /// True until shutdown starts.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Counters so far.
    #[must_use]
    pub fn summary(&self) -> DispatchSummary {
        self.counters.summary(false)
    }

    /// Stop invoking the handler and wait at most `drain` for the task.
    pub async fn shutdown(self, drain: Duration) -> DispatchSummary {
        self.active.store(false, Ordering::Release);
        self.wake.notify_one();

        let mut task = self.task;
        let drained = match tokio::time::timeout(drain, &mut task).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                error!(error = %e, "Dispatcher task failed");
                false
            }
            Err(_) => {
                warn!(
                    drain_ms = drain.as_millis() as u64,
                    "Callback still running at drain bound, aborting dispatcher"
                );
                task.abort();
                false
            }
        };
        let summary = self.counters.summary(drained);
        debug!(
            invoked = summary.invoked,
            out_of_order = summary.out_of_order,
            drained,
            "Dispatcher shut down"
        );
        summary
    }
}

struct Worker {
    receiver: DeliveryReceiver,
    width: u32,
    height: u32,
    active: Arc<AtomicBool>,
    wake: Arc<Notify>,
    counters: Arc<Counters>,
    last_frame_count: Option<u64>,
}

impl Worker {
    async fn run<C, F>(
        mut self,
        mut context: C,
        mut handler: F,
        done: oneshot::Sender<(C, DispatchSummary)>,
    ) where
        F: FnMut(&FrameView<'_>, &BufferInfo, &mut C),
    {
        loop {
            let event = tokio::select! {
                biased;
                () = self.wake.notified() => break,
                event = self.receiver.recv() => match event {
                    Some(event) => event,
                    None => {
                        debug!("Delivery channel closed, dispatcher exiting");
                        break;
                    }
                },
            };
            if !self.active.load(Ordering::Acquire) {
                break;
            }

            match event {
                DeliveryEvent::Frame(frame) => {
                    let frame_count = frame.frame_count();
                    if let Some(last) = self.last_frame_count {
                        if frame_count <= last {
                            self.counters.out_of_order.fetch_add(1, Ordering::Relaxed);
                            warn!(frame_count, last, "Discarding out-of-order frame");
                            continue;
                        }
                    }
                    self.last_frame_count = Some(frame_count);

                    let info = frame.info();
                    if info.status() == AcquisitionStatus::MissingPackets {
                        info!(
                            frame_count,
                            missing_packets = info.missing_packets(),
                            "Frame delivered with missing packets"
                        );
                    } else {
                        debug!(frame_count, "Frame delivered");
                    }
                    handler(&frame.view(), &info, &mut context);
                }
                DeliveryEvent::Fault {
                    frame_count,
                    code,
                    message,
                } => {
                    error!(frame_count, code, %message, "Fatal acquisition error");
                    let info = BufferInfo::fatal(frame_count, self.width, self.height);
                    handler(&FrameView::empty(), &info, &mut context);
                }
            }
            self.counters.invoked.fetch_add(1, Ordering::Relaxed);
        }

        let _ = done.send((context, self.counters.summary(true)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use detector_core::{delivery_channel, FramePool, FrameSink};

    fn channel() -> (FrameSink, DeliveryReceiver) {
        let pool = FramePool::new(8, 2, 2, usize::MAX).unwrap();
        delivery_channel(pool, 2, 2, 12, 8).unwrap()
    }

    fn submit(sink: &FrameSink, frame_count: u64) {
        let mut buf = sink.checkout().unwrap();
        buf.fill(frame_count as u16);
        assert!(sink.submit(buf, frame_count, 0));
    }

    #[tokio::test]
    async fn test_invokes_in_order_and_returns_context() {
        let (sink, rx) = channel();
        let (dispatcher, handle) = StreamingDispatcher::spawn(
            rx,
            2,
            2,
            Vec::new(),
            |view: &FrameView<'_>, info: &BufferInfo, seen: &mut Vec<(u64, u16)>| {
                seen.push((info.frame_count(), view.pixels()[0]));
            },
        );
        for n in 1..=3 {
            submit(&sink, n);
        }
        drop(sink);

        let (seen, summary) = handle.finish().await.unwrap();
        assert_eq!(seen, vec![(1, 1), (2, 2), (3, 3)]);
        assert_eq!(summary.invoked, 3);
        assert!(dispatcher.shutdown(Duration::from_millis(100)).await.drained);
    }

    #[tokio::test]
    async fn test_discards_non_increasing_counters() {
        let (sink, rx) = channel();
        let (_dispatcher, handle) = StreamingDispatcher::spawn(
            rx,
            2,
            2,
            0u64,
            |_: &FrameView<'_>, _: &BufferInfo, count: &mut u64| *count += 1,
        );
        submit(&sink, 4);
        submit(&sink, 4);
        submit(&sink, 2);
        submit(&sink, 5);
        drop(sink);

        let (count, summary) = handle.finish().await.unwrap();
        assert_eq!(count, 2);
        assert_eq!(summary.out_of_order, 2);
    }

    #[tokio::test]
    async fn test_fault_invokes_with_empty_view() {
        let (sink, rx) = channel();
        let (_dispatcher, handle) = StreamingDispatcher::spawn(
            rx,
            2,
            2,
            Vec::new(),
            |view: &FrameView<'_>, info: &BufferInfo, seen: &mut Vec<(bool, AcquisitionStatus)>| {
                seen.push((view.is_empty(), info.status()));
            },
        );
        assert!(sink.report_fault(7, -2, "link down"));
        drop(sink);

        let (seen, _) = handle.finish().await.unwrap();
        assert_eq!(seen, vec![(true, AcquisitionStatus::Fatal)]);
    }

    #[tokio::test]
    async fn test_no_invocation_after_shutdown() {
        let (sink, rx) = channel();
        let (dispatcher, handle) = StreamingDispatcher::spawn(
            rx,
            2,
            2,
            0u64,
            |_: &FrameView<'_>, _: &BufferInfo, count: &mut u64| *count += 1,
        );
        let summary = dispatcher.shutdown(Duration::from_millis(200)).await;
        assert!(summary.drained);

        // Consumer is gone; the sink sees a closed channel.
        let buf = sink.checkout().unwrap();
        assert!(!sink.submit(buf, 1, 0));

        let (count, _) = handle.finish().await.unwrap();
        assert_eq!(count, 0);
    }
}
