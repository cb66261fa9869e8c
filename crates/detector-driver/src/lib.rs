//! Detector Acquisition Controller (Componentized)
//!
//! Drives a [`DetectorBackend`] through its session lifecycle and turns the
//! backend's frame stream into caller-visible acquisitions:
//! - Session: lifecycle state, device description and applied exposure
//! - Dispatcher: callback delivery on a dedicated consumer task
//! - Capture: acquisition loops for the standard workflows
//! - Console: headless power / stream / capture toggles
//!
//! # Delivery disciplines
//!
//! A stream is consumed either by blocking [`AcquisitionController::acquire`]
//! calls or by a callback registered with
//! [`AcquisitionController::start_stream_with_callback`], never both.
//!
//! # Example
//!
//! ```rust,ignore
//! let controller = AcquisitionController::new(backend, ControllerSettings::default());
//! controller.open().await?;
//! controller.set_exposure_mode(ExposureMode::SoftwareTrigger).await?;
//! controller.start_stream().await?;
//!
//! let (w, h) = controller.image_dimensions().unwrap_or_default();
//! let mut frame = Frame::new(w, h)?;
//! controller.software_trigger().await?;
//! let info = controller.acquire(&mut frame, Duration::from_secs(1)).await?;
//!
//! controller.close().await?;
//! ```

pub mod capture;
pub mod components;
pub mod console;

use detector_core::limits::{validate_frame_size, STOP_DRAIN_TIMEOUT};
use detector_core::{
    delivery_channel, BufferInfo, DeliveryEvent, DeliveryReceiver, DeliveryStats,
    DeliveryStatsHandle, DetectorBackend, DetectorError, DetectorResult, DeviceInfo,
    ExposureConfig, ExposureMode, Frame, FramePool, FrameSequence, FrameSink, FrameView,
    SessionState,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

pub use crate::capture::{
    acquire_for, acquire_frames, acquire_sequence, trigger_and_acquire, CaptureSummary,
    SequenceOutcome, StopReason,
};
pub use crate::components::dispatcher::{CallbackHandle, DispatchSummary, StreamingDispatcher};
pub use crate::console::{CaptureConsole, ConsoleCommand, ConsoleEvent, ConsoleState};

use crate::components::session::Session;

/// Buffering and teardown settings for the delivery path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerSettings {
    /// Pre-allocated frame buffers per stream.
    pub pool_slots: usize,
    /// Delivery queue capacity.
    pub queue_depth: usize,
    /// Upper bound on pool memory.
    pub max_pool_bytes: usize,
    /// How long `stop_stream` waits for a running callback.
    #[serde(with = "humantime_serde")]
    pub stop_drain_timeout: Duration,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            pool_slots: 16,
            queue_depth: 16,
            max_pool_bytes: 256 * 1024 * 1024,
            stop_drain_timeout: STOP_DRAIN_TIMEOUT,
        }
    }
}

impl ControllerSettings {
    /// Reject settings that cannot produce a working stream.
    pub fn validate(&self) -> DetectorResult<()> {
        if self.pool_slots == 0 {
            return Err(DetectorError::invalid_parameter(
                "controller_settings",
                "pool_slots must be > 0",
            ));
        }
        if self.queue_depth == 0 {
            return Err(DetectorError::invalid_parameter(
                "controller_settings",
                "queue_depth must be > 0",
            ));
        }
        if self.stop_drain_timeout.is_zero() {
            return Err(DetectorError::invalid_parameter(
                "controller_settings",
                "stop_drain_timeout must be > 0",
            ));
        }
        Ok(())
    }
}

struct ActiveStream {
    stats: DeliveryStatsHandle,
    dispatcher: Option<StreamingDispatcher>,
}

struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Session owner and single entry point for acquisition.
///
/// All methods take `&self`; lifecycle operations are serialized internally.
/// `stop_stream` may run concurrently with a pending `acquire`, which then
/// returns `InvalidState`.
pub struct AcquisitionController {
    backend: Arc<dyn DetectorBackend>,
    settings: ControllerSettings,
    session: Mutex<Session>,
    // Serializes open/configure/start/stop/close. Never held by acquire.
    lifecycle: tokio::sync::Mutex<()>,
    receiver: tokio::sync::Mutex<Option<DeliveryReceiver>>,
    stream: Mutex<Option<ActiveStream>>,
    last_stats: Mutex<DeliveryStats>,
    stop_signal: watch::Sender<u64>,
    last_frame_count: AtomicU64,
    acquires_in_flight: AtomicUsize,
    // Set by an acquire timeout: the abandoned transfer may still land in the queue.
    late_pending: AtomicBool,
}

impl AcquisitionController {
    /// Create a closed controller over `backend`.
    pub fn new(backend: Arc<dyn DetectorBackend>, settings: ControllerSettings) -> Self {
        let (stop_signal, _) = watch::channel(0);
        Self {
            backend,
            settings,
            session: Mutex::new(Session::default()),
            lifecycle: tokio::sync::Mutex::new(()),
            receiver: tokio::sync::Mutex::new(None),
            stream: Mutex::new(None),
            last_stats: Mutex::new(DeliveryStats::default()),
            stop_signal,
            last_frame_count: AtomicU64::new(0),
            acquires_in_flight: AtomicUsize::new(0),
            late_pending: AtomicBool::new(false),
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.session.lock().state()
    }

    /// Exposure last applied (or the default before the first configure).
    #[must_use]
    pub fn exposure(&self) -> ExposureConfig {
        self.session.lock().exposure()
    }

    /// Device reported on open.
    #[must_use]
    pub fn device_info(&self) -> Option<DeviceInfo> {
        self.session.lock().device().cloned()
    }

    /// Readout `(width, height)` of the open device.
    #[must_use]
    pub fn image_dimensions(&self) -> Option<(u32, u32)> {
        self.session.lock().device().map(|d| (d.width, d.height))
    }

    /// Delivery counters of the running stream, or of the last one.
    #[must_use]
    pub fn delivery_stats(&self) -> DeliveryStats {
        match self.stream.lock().as_ref() {
            Some(active) => active.stats.snapshot(),
            None => *self.last_stats.lock(),
        }
    }

    /// Hardware counter of the most recent frame returned by `acquire`.
    #[must_use]
    pub fn last_frame_count(&self) -> u64 {
        self.last_frame_count.load(Ordering::SeqCst)
    }

    /// Backend identifier.
    #[must_use]
    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Delivery path settings.
    #[must_use]
    pub fn settings(&self) -> &ControllerSettings {
        &self.settings
    }

    // =========================================================================
    // Session lifecycle
    // =========================================================================

    /// Open the device. Valid only when closed.
    pub async fn open(&self) -> DetectorResult<DeviceInfo> {
        let _lifecycle = self.lifecycle.lock().await;
        self.session.lock().require("open", &[SessionState::Closed])?;

        let device = self
            .backend
            .open()
            .await
            .map_err(|e| self.log_failure("open", e))?;
        if let Err(e) = validate_frame_size(device.width, device.height) {
            if let Err(close_err) = self.backend.close().await {
                warn!(error = %close_err, "Failed to release device after rejecting its geometry");
            }
            return Err(self.log_failure("open", e));
        }

        self.last_frame_count.store(0, Ordering::SeqCst);
        *self.last_stats.lock() = DeliveryStats::default();
        info!(
            backend = self.backend.name(),
            model = %device.model,
            serial = %device.serial,
            width = device.width,
            height = device.height,
            bit_depth = device.bit_depth,
            "Detector opened"
        );
        self.session.lock().opened(device.clone());
        Ok(device)
    }

    /// Apply a complete exposure configuration. Valid when opened or
    /// configured.
    pub async fn configure(&self, config: ExposureConfig) -> DetectorResult<()> {
        let _lifecycle = self.lifecycle.lock().await;
        self.apply_exposure("configure", config).await
    }

    /// Change the trigger mode.
    pub async fn set_exposure_mode(&self, mode: ExposureMode) -> DetectorResult<()> {
        self.update_exposure("set_exposure_mode", |c| c.mode = mode).await
    }

    /// Change the per-frame exposure time.
    pub async fn set_exposure_time(&self, exposure_time: Duration) -> DetectorResult<()> {
        self.update_exposure("set_exposure_time", |c| c.exposure_time = exposure_time)
            .await
    }

    /// Enable or disable digital data suppression.
    pub async fn set_dds(&self, dds: bool) -> DetectorResult<()> {
        self.update_exposure("set_dds", |c| c.dds = dds).await
    }

    /// Set the number of frames delivered per trigger in sequence mode.
    pub async fn set_number_of_frames(&self, frame_count: u32) -> DetectorResult<()> {
        self.update_exposure("set_number_of_frames", |c| c.frame_count = frame_count)
            .await
    }

    /// Start streaming for blocking `acquire` calls.
    ///
    /// Calling it while already streaming is a no-op.
    pub async fn start_stream(&self) -> DetectorResult<()> {
        let _lifecycle = self.lifecycle.lock().await;
        if self.state() == SessionState::Streaming {
            debug!("start_stream: already streaming");
            return Ok(());
        }

        let (sink, receiver) = self.prepare_stream("start_stream")?;
        let stats = receiver.stats_handle();
        self.late_pending.store(false, Ordering::SeqCst);
        *self.receiver.lock().await = Some(receiver);

        if let Err(e) = self.backend.start_stream(sink).await {
            self.receiver.lock().await.take();
            return Err(self.log_failure("start_stream", e));
        }

        *self.stream.lock() = Some(ActiveStream {
            stats,
            dispatcher: None,
        });
        self.session.lock().streaming(false);
        self.log_stream_started(false);
        Ok(())
    }

    /// Start streaming with every frame delivered to `handler`.
    ///
    /// `handler` runs on a dedicated task with exclusive access to `context`.
    /// Fault notifications arrive with an empty view and status `Fatal`.
    /// The returned handle gives the context back after the stream stops.
    pub async fn start_stream_with_callback<C, F>(
        &self,
        context: C,
        handler: F,
    ) -> DetectorResult<CallbackHandle<C>>
    where
        C: Send + 'static,
        F: FnMut(&FrameView<'_>, &BufferInfo, &mut C) + Send + 'static,
    {
        let _lifecycle = self.lifecycle.lock().await;
        let (sink, receiver) = self.prepare_stream("start_stream_with_callback")?;
        let stats = receiver.stats_handle();
        let (width, height) = (sink.width(), sink.height());
        let (dispatcher, handle) =
            StreamingDispatcher::spawn(receiver, width, height, context, handler);

        if let Err(e) = self.backend.start_stream(sink).await {
            dispatcher.shutdown(self.settings.stop_drain_timeout).await;
            return Err(self.log_failure("start_stream_with_callback", e));
        }

        *self.stream.lock() = Some(ActiveStream {
            stats,
            dispatcher: Some(dispatcher),
        });
        self.session.lock().streaming(true);
        self.log_stream_started(true);
        Ok(handle)
    }

    /// Stop streaming. A no-op when not streaming.
    ///
    /// Pending `acquire` calls return `InvalidState`. When a callback is
    /// registered, no invocation begins after this returns.
    pub async fn stop_stream(&self) -> DetectorResult<()> {
        let _lifecycle = self.lifecycle.lock().await;
        self.stop_inner().await
    }

    /// Fire a software trigger. Valid while streaming in software-trigger or
    /// sequence mode.
    ///
    /// Frames from transfers abandoned by an earlier timed-out `acquire` are
    /// discarded before the trigger is sent.
    pub async fn software_trigger(&self) -> DetectorResult<()> {
        {
            let session = self.session.lock();
            session.require("software_trigger", &[SessionState::Streaming])?;
            let mode = session.exposure().mode;
            if !mode.accepts_software_trigger() {
                return Err(DetectorError::invalid_state(
                    "software_trigger",
                    format!("software trigger not accepted in {} mode", mode),
                ));
            }
        }
        // A locked receiver means an acquire is already waiting and has
        // discarded stale frames itself.
        if let Ok(mut guard) = self.receiver.try_lock() {
            if let Some(receiver) = guard.as_mut() {
                self.discard_late_frames(receiver);
            }
        }
        self.backend
            .software_trigger()
            .await
            .map_err(|e| self.log_failure("software_trigger", e))?;
        debug!("Software trigger sent");
        Ok(())
    }

    /// Close the session, stopping the stream first if needed.
    ///
    /// A no-op when already closed. Fails with `InvalidState` while an
    /// `acquire` is pending.
    pub async fn close(&self) -> DetectorResult<()> {
        let _lifecycle = self.lifecycle.lock().await;
        if self.state() == SessionState::Closed {
            debug!("close: already closed");
            return Ok(());
        }
        if self.acquires_in_flight.load(Ordering::SeqCst) > 0 {
            return Err(DetectorError::invalid_state(
                "close",
                "an acquire is in progress",
            ));
        }

        self.stop_inner().await?;
        self.backend
            .close()
            .await
            .map_err(|e| self.log_failure("close", e))?;
        self.session.lock().closed();
        info!(backend = self.backend.name(), "Detector closed");
        Ok(())
    }

    // =========================================================================
    // Acquisition
    // =========================================================================

    /// Wait up to `timeout` for the next frame and copy it into `target`.
    ///
    /// Per-frame outcomes (including timeouts and fatal transfer errors) are
    /// reported in the returned [`BufferInfo`]. `Err` means the call could not
    /// be attempted: wrong state, a registered callback, a target of the wrong
    /// size, or the stream stopping underneath the call.
    ///
    /// A transfer abandoned by a timeout is discarded when it lands: the next
    /// `software_trigger` or `acquire` drops whatever is already queued.
    pub async fn acquire(&self, target: &mut Frame, timeout: Duration) -> DetectorResult<BufferInfo> {
        // Subscribe before the state check so a concurrent stop is never missed.
        let mut stop = self.stop_signal.subscribe();
        let (width, height) = {
            let session = self.session.lock();
            session.require("acquire", &[SessionState::Streaming])?;
            if session.callback_active() {
                return Err(DetectorError::invalid_state(
                    "acquire",
                    "frames are delivered to a registered callback",
                ));
            }
            let (width, height, _) = session.readout("acquire")?;
            (width, height)
        };
        if target.dimensions() != (width, height) {
            return Err(DetectorError::dimension_mismatch(
                "acquire",
                (width, height),
                target.dimensions(),
            ));
        }

        let _in_flight = InFlight::enter(&self.acquires_in_flight);
        let mut guard = self.receiver.lock().await;
        let Some(receiver) = guard.as_mut() else {
            return Err(DetectorError::invalid_state("acquire", "stream stopped"));
        };
        self.discard_late_frames(receiver);

        let received = tokio::select! {
            biased;
            _ = stop.changed() => {
                return Err(DetectorError::invalid_state(
                    "acquire",
                    "stream stopped while waiting for a frame",
                ));
            }
            received = tokio::time::timeout(timeout, receiver.recv()) => received,
        };

        let last = self.last_frame_count.load(Ordering::SeqCst);
        match received {
            Err(_) => {
                self.late_pending.store(true, Ordering::SeqCst);
                warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    last_frame_count = last,
                    "Acquire timed out"
                );
                Ok(BufferInfo::timeout(last, width, height))
            }
            Ok(None) => {
                error!(last_frame_count = last, "Delivery channel closed by backend");
                Ok(BufferInfo::fatal(last, width, height))
            }
            Ok(Some(DeliveryEvent::Frame(frame))) => {
                target.copy_from_view(&frame.view())?;
                let info = frame.info();
                self.last_frame_count
                    .store(info.frame_count(), Ordering::SeqCst);
                if info.missing_packets() > 0 {
                    info!(
                        frame_count = info.frame_count(),
                        missing_packets = info.missing_packets(),
                        "Frame acquired with missing packets"
                    );
                } else {
                    debug!(frame_count = info.frame_count(), "Frame acquired");
                }
                Ok(info)
            }
            Ok(Some(DeliveryEvent::Fault {
                frame_count,
                code,
                message,
            })) => {
                self.last_frame_count.store(frame_count, Ordering::SeqCst);
                error!(frame_count, code, %message, "Fatal acquisition error");
                Ok(BufferInfo::fatal(frame_count, width, height))
            }
        }
    }

    /// [`acquire`](Self::acquire) into slice `index` of `sequence`.
    pub async fn acquire_slice(
        &self,
        sequence: &mut FrameSequence,
        index: usize,
        timeout: Duration,
    ) -> DetectorResult<BufferInfo> {
        let depth = sequence.depth();
        let slice = sequence.slice_mut(index).ok_or_else(|| {
            DetectorError::invalid_parameter(
                "acquire_slice",
                format!("slice index {} out of range for depth {}", index, depth),
            )
        })?;
        self.acquire(slice, timeout).await
    }

    // =========================================================================
    // Internals
    // =========================================================================

    async fn update_exposure(
        &self,
        operation: &'static str,
        change: impl FnOnce(&mut ExposureConfig),
    ) -> DetectorResult<()> {
        let _lifecycle = self.lifecycle.lock().await;
        let mut config = self.session.lock().exposure();
        change(&mut config);
        self.apply_exposure(operation, config).await
    }

    async fn apply_exposure(
        &self,
        operation: &'static str,
        config: ExposureConfig,
    ) -> DetectorResult<()> {
        let limits = {
            let session = self.session.lock();
            session.require(operation, &[SessionState::Opened, SessionState::Configured])?;
            session
                .device()
                .map(|d| d.limits)
                .ok_or_else(|| DetectorError::invalid_state(operation, "session is closed"))?
        };
        config.validate(&limits)?;
        self.backend
            .configure(&config)
            .await
            .map_err(|e| self.log_failure(operation, e))?;

        info!(
            operation,
            mode = %config.mode,
            exposure_ms = config.exposure_time.as_millis() as u64,
            dds = config.dds,
            frame_count = config.frame_count,
            "Exposure configured"
        );
        self.session.lock().configured(config);
        Ok(())
    }

    fn prepare_stream(&self, operation: &'static str) -> DetectorResult<(FrameSink, DeliveryReceiver)> {
        let (width, height, bit_depth) = {
            let session = self.session.lock();
            session.require(operation, &[SessionState::Configured])?;
            session.readout(operation)?
        };
        self.settings.validate()?;
        let pool = FramePool::new(
            self.settings.pool_slots,
            width,
            height,
            self.settings.max_pool_bytes,
        )?;
        delivery_channel(pool, width, height, bit_depth, self.settings.queue_depth)
    }

    fn discard_late_frames(&self, receiver: &mut DeliveryReceiver) {
        if !self.late_pending.swap(false, Ordering::SeqCst) {
            return;
        }
        let discarded = receiver.discard_queued();
        if discarded > 0 {
            warn!(
                discarded,
                last_frame_count = self.last_frame_count.load(Ordering::SeqCst),
                "Discarded frames completed after an acquire timeout"
            );
        }
    }

    async fn stop_inner(&self) -> DetectorResult<()> {
        {
            let mut session = self.session.lock();
            if session.state() != SessionState::Streaming {
                debug!("stop_stream: not streaming");
                return Ok(());
            }
            session.stopped();
        }
        // State is already Configured, so acquires that subscribe from here on
        // fail their state check; earlier subscribers see the bump.
        self.stop_signal.send_modify(|epoch| *epoch = epoch.wrapping_add(1));

        let active = self.stream.lock().take();
        let (stats, dispatcher) = match active {
            Some(active) => (Some(active.stats), active.dispatcher),
            None => (None, None),
        };
        let dispatch = match dispatcher {
            Some(dispatcher) => Some(dispatcher.shutdown(self.settings.stop_drain_timeout).await),
            None => None,
        };

        let backend_result = self.backend.stop_stream().await;
        // Dropping the receiver returns any queued buffers to the pool.
        self.receiver.lock().await.take();

        let stats = stats.map(|s| s.snapshot()).unwrap_or_default();
        *self.last_stats.lock() = stats;
        info!(
            delivered = stats.delivered,
            dropped = stats.dropped,
            faults = stats.faults,
            callback_invocations = ?dispatch.map(|d| d.invoked),
            "Stream stopped"
        );

        backend_result.map_err(|e| self.log_failure("stop_stream", e))
    }

    fn log_stream_started(&self, callback: bool) {
        let session = self.session.lock();
        let exposure = session.exposure();
        info!(
            backend = self.backend.name(),
            mode = %exposure.mode,
            callback,
            pool_slots = self.settings.pool_slots,
            queue_depth = self.settings.queue_depth,
            "Stream started"
        );
    }

    fn log_failure(&self, operation: &'static str, err: DetectorError) -> DetectorError {
        error!(
            operation,
            code = err.code(),
            backend = self.backend.name(),
            error = %err,
            "Detector operation failed"
        );
        err
    }
}

impl std::fmt::Debug for AcquisitionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcquisitionController")
            .field("backend", &self.backend.name())
            .field("state", &self.state())
            .field("settings", &self.settings)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_are_valid() {
        ControllerSettings::default().validate().unwrap();
    }

    #[test]
    fn test_settings_reject_zero_slots() {
        let settings = ControllerSettings {
            pool_slots: 0,
            ..ControllerSettings::default()
        };
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("pool_slots"));
    }

    #[test]
    fn test_settings_from_toml() {
        let settings: ControllerSettings = toml::from_str(
            r#"
            pool_slots = 4
            stop_drain_timeout = "500ms"
            "#,
        )
        .unwrap();
        assert_eq!(settings.pool_slots, 4);
        assert_eq!(settings.queue_depth, 16);
        assert_eq!(settings.stop_drain_timeout, Duration::from_millis(500));
    }
}
