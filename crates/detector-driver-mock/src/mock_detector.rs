//! Simulated area-scan detector implementing [`DetectorBackend`].
//!
//! Frames are produced by a background task that writes a test pattern into
//! pooled buffers and submits them to the [`FrameSink`] handed over by the
//! controller. Trigger behaviour follows the configured exposure mode:
//!
//! | Mode | Frames produced |
//! |------|-----------------|
//! | external-trigger | one per [`MockDetector::fire_external_trigger`] call, or per tick of the optional auto-trigger interval |
//! | software-trigger | one per `software_trigger` |
//! | sequence | `frame_count` per `software_trigger` |
//! | xfps | continuously, one per frame period |
//!
//! The hardware frame counter starts at 1 on open and keeps counting across
//! stream restarts. Dropped frames consume a counter value, so gaps in the
//! delivered counters reveal transport losses.
//!
//! Frame outcomes can be scripted with [`MockDetector::push_script`]; the
//! script is consumed before any random fault configured in [`FaultConfig`].

use crate::common::{FaultConfig, FaultScenario, FrameFault, MockMode, TimingConfig};
use crate::pattern::fill_test_pattern;
use async_trait::async_trait;
use detector_core::frame::max_value_for;
use detector_core::limits::validate_frame_size;
use detector_core::{
    DetectorBackend, DetectorError, DetectorResult, DeviceInfo, DeviceLimits, ExposureConfig,
    ExposureMode, FrameSink,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info};

/// Missing-packet rate used in chaos mode when none is configured.
const CHAOS_MISSING_PACKET_RATE: f64 = 0.05;
/// Drop rate used in chaos mode when none is configured.
const CHAOS_DROP_RATE: f64 = 0.01;

/// Vendor code carried by a `fatal_at_frame` fault.
const CONFIGURED_FATAL_CODE: i32 = -1;

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the simulated detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MockDetectorConfig {
    /// Reported model name.
    pub model: String,
    /// Reported serial number.
    pub serial: String,
    /// Readout width in pixels (default: 640)
    pub width: u32,
    /// Readout height in pixels (default: 480)
    pub height: u32,
    /// Sample bit depth (default: 14)
    pub bit_depth: u8,
    /// Pedestal added to every generated pixel.
    pub dark_level: u16,
    /// Timing/fault behaviour.
    pub mode: MockMode,
    /// Delays used when the mode simulates timing.
    pub timing: TimingConfig,
    /// Supported exposure and sequence ranges.
    pub limits: DeviceLimits,
    /// RNG seed for reproducible faults.
    pub seed: Option<u64>,
    /// Probability that a frame arrives with missing packets.
    pub missing_packet_rate: f64,
    /// Probability that a frame is lost in transport.
    pub drop_rate: f64,
    /// Report a fatal transfer error in place of this frame (1-based, per
    /// session).
    pub fatal_at_frame: Option<u64>,
    /// Fire an external trigger at this period while streaming in
    /// external-trigger mode.
    #[serde(with = "humantime_serde")]
    pub external_trigger_interval: Option<Duration>,
}

impl Default for MockDetectorConfig {
    fn default() -> Self {
        Self {
            model: "SIM-640".into(),
            serial: "SIM000001".into(),
            width: 640,
            height: 480,
            bit_depth: 14,
            dark_level: 100,
            mode: MockMode::Instant,
            timing: TimingConfig::default(),
            limits: DeviceLimits::default(),
            seed: None,
            missing_packet_rate: 0.0,
            drop_rate: 0.0,
            fatal_at_frame: None,
            external_trigger_interval: None,
        }
    }
}

impl MockDetectorConfig {
    /// Reject semantically invalid values.
    pub fn validate(&self) -> DetectorResult<()> {
        validate_frame_size(self.width, self.height)?;
        if self.bit_depth == 0 || self.bit_depth > 16 {
            return Err(DetectorError::invalid_parameter(
                "mock_detector_config",
                format!("bit_depth must be in 1..=16, got {}", self.bit_depth),
            ));
        }
        if self.dark_level > max_value_for(self.bit_depth) {
            return Err(DetectorError::invalid_parameter(
                "mock_detector_config",
                format!(
                    "dark_level {} exceeds {}-bit maximum",
                    self.dark_level, self.bit_depth
                ),
            ));
        }
        for (name, rate) in [
            ("missing_packet_rate", self.missing_packet_rate),
            ("drop_rate", self.drop_rate),
        ] {
            if !(0.0..=1.0).contains(&rate) {
                return Err(DetectorError::invalid_parameter(
                    "mock_detector_config",
                    format!("{} must be in [0, 1], got {}", name, rate),
                ));
            }
        }
        if self.fatal_at_frame == Some(0) {
            return Err(DetectorError::invalid_parameter(
                "mock_detector_config",
                "fatal_at_frame is 1-based",
            ));
        }
        if self.external_trigger_interval == Some(Duration::ZERO) {
            return Err(DetectorError::invalid_parameter(
                "mock_detector_config",
                "external_trigger_interval must be non-zero",
            ));
        }
        Ok(())
    }

    fn fault_config(&self) -> FaultConfig {
        let (missing, dropped) = if self.mode == MockMode::Chaos
            && self.missing_packet_rate == 0.0
            && self.drop_rate == 0.0
        {
            (CHAOS_MISSING_PACKET_RATE, CHAOS_DROP_RATE)
        } else {
            (self.missing_packet_rate, self.drop_rate)
        };
        let faults = FaultConfig::random_frames(missing, dropped, self.seed);
        match self.fatal_at_frame {
            Some(frame) => faults.with_scenarios(vec![FaultScenario::FatalAtFrame {
                frame,
                code: CONFIGURED_FATAL_CODE,
            }]),
            None => faults,
        }
    }
}

// =============================================================================
// MockDetectorBuilder
// =============================================================================

/// Builder for [`MockDetector`].
#[derive(Debug, Clone)]
pub struct MockDetectorBuilder {
    config: MockDetectorConfig,
    faults: Option<FaultConfig>,
    connected: bool,
}

impl MockDetectorBuilder {
    /// Start from defaults with the given geometry.
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            config: MockDetectorConfig {
                width,
                height,
                ..MockDetectorConfig::default()
            },
            faults: None,
            connected: true,
        }
    }

    /// Set timing/fault mode.
    #[must_use]
    pub fn mode(mut self, mode: MockMode) -> Self {
        self.config.mode = mode;
        self
    }

    /// Set sample bit depth.
    #[must_use]
    pub fn bit_depth(mut self, bit_depth: u8) -> Self {
        self.config.bit_depth = bit_depth;
        self
    }

    /// Set generated pedestal.
    #[must_use]
    pub fn dark_level(mut self, dark_level: u16) -> Self {
        self.config.dark_level = dark_level;
        self
    }

    /// Set realistic-mode delays.
    #[must_use]
    pub fn timing(mut self, timing: TimingConfig) -> Self {
        self.config.timing = timing;
        self
    }

    /// Set supported ranges.
    #[must_use]
    pub fn limits(mut self, limits: DeviceLimits) -> Self {
        self.config.limits = limits;
        self
    }

    /// Replace fault injection entirely.
    #[must_use]
    pub fn faults(mut self, faults: FaultConfig) -> Self {
        self.faults = Some(faults);
        self
    }

    /// Auto-fire external triggers at `period` while streaming.
    #[must_use]
    pub fn external_trigger_interval(mut self, period: Duration) -> Self {
        self.config.external_trigger_interval = Some(period);
        self
    }

    /// Simulate a device that does not respond to open.
    #[must_use]
    pub fn disconnected(mut self) -> Self {
        self.connected = false;
        self
    }

    /// Build the detector.
    #[must_use]
    pub fn build(self) -> MockDetector {
        let faults = self.faults.unwrap_or_else(|| self.config.fault_config());
        MockDetector::assemble(self.config, faults, self.connected)
    }
}

// =============================================================================
// MockDetector
// =============================================================================

struct StreamTask {
    trigger_tx: mpsc::UnboundedSender<u32>,
    handle: JoinHandle<()>,
    mode: ExposureMode,
}

/// Simulated detector session.
pub struct MockDetector {
    config: MockDetectorConfig,
    faults: FaultConfig,
    connected: AtomicBool,
    opened: AtomicBool,
    exposure: Mutex<ExposureConfig>,
    frame_counter: Arc<AtomicU64>,
    script: Arc<Mutex<VecDeque<FrameFault>>>,
    stream: Mutex<Option<StreamTask>>,
    stream_starts: AtomicU32,
}

impl MockDetector {
    /// Instant-mode detector with default settings.
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        Self::builder(width, height).build()
    }

    /// Start a builder.
    #[must_use]
    pub fn builder(width: u32, height: u32) -> MockDetectorBuilder {
        MockDetectorBuilder::new(width, height)
    }

    /// Build from a validated configuration.
    pub fn from_config(config: MockDetectorConfig) -> DetectorResult<Self> {
        config.validate()?;
        let faults = config.fault_config();
        Ok(Self::assemble(config, faults, true))
    }

    fn assemble(config: MockDetectorConfig, faults: FaultConfig, connected: bool) -> Self {
        Self {
            config,
            faults,
            connected: AtomicBool::new(connected),
            opened: AtomicBool::new(false),
            exposure: Mutex::new(ExposureConfig::default()),
            frame_counter: Arc::new(AtomicU64::new(0)),
            script: Arc::new(Mutex::new(VecDeque::new())),
            stream: Mutex::new(None),
            stream_starts: AtomicU32::new(0),
        }
    }

    /// Queue outcomes for the next produced frames, in order.
    pub fn push_script(&self, outcomes: impl IntoIterator<Item = FrameFault>) {
        self.script.lock().extend(outcomes);
    }

    /// Plug or unplug the simulated device.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Fire one external trigger pulse.
    pub fn fire_external_trigger(&self) -> DetectorResult<()> {
        self.send_trigger("fire_external_trigger", ExposureMode::ExternalTrigger, 1)
    }

    /// Last hardware frame counter produced (0 before the first frame).
    #[must_use]
    pub fn frame_counter(&self) -> u64 {
        self.frame_counter.load(Ordering::SeqCst)
    }

    /// True while a session holds the device.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.opened.load(Ordering::SeqCst)
    }

    /// True while the producer task is running.
    #[must_use]
    pub fn is_streaming(&self) -> bool {
        self.stream.lock().is_some()
    }

    /// Exposure configuration last applied.
    #[must_use]
    pub fn exposure(&self) -> ExposureConfig {
        *self.exposure.lock()
    }

    /// Number of successful `start_stream` calls.
    #[must_use]
    pub fn stream_starts(&self) -> u32 {
        self.stream_starts.load(Ordering::SeqCst)
    }

    /// Simulated device configuration.
    #[must_use]
    pub fn config(&self) -> &MockDetectorConfig {
        &self.config
    }

    fn device_info(&self) -> DeviceInfo {
        DeviceInfo {
            model: self.config.model.clone(),
            serial: self.config.serial.clone(),
            width: self.config.width,
            height: self.config.height,
            bit_depth: self.config.bit_depth,
            limits: self.config.limits,
        }
    }

    async fn command_delay(&self) {
        if self.config.mode.simulates_timing() && !self.config.timing.command_latency.is_zero() {
            sleep(self.config.timing.command_latency).await;
        }
    }

    fn ensure_open(&self, operation: &'static str) -> DetectorResult<()> {
        if !self.is_open() {
            return Err(DetectorError::invalid_state(operation, "device is not open"));
        }
        Ok(())
    }

    fn send_trigger(
        &self,
        operation: &'static str,
        required: ExposureMode,
        burst: u32,
    ) -> DetectorResult<()> {
        let stream = self.stream.lock();
        let task = stream
            .as_ref()
            .ok_or_else(|| DetectorError::invalid_state(operation, "device is not streaming"))?;
        let accepted = match required {
            ExposureMode::ExternalTrigger => task.mode == ExposureMode::ExternalTrigger,
            _ => task.mode.accepts_software_trigger(),
        };
        if !accepted {
            return Err(DetectorError::invalid_state(
                operation,
                format!("trigger not accepted in {} mode", task.mode),
            ));
        }
        task.trigger_tx.send(burst).map_err(|_| {
            DetectorError::hardware(operation, -1, "frame producer has stopped")
        })
    }
}

impl std::fmt::Debug for MockDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockDetector")
            .field("model", &self.config.model)
            .field("width", &self.config.width)
            .field("height", &self.config.height)
            .field("open", &self.is_open())
            .field("streaming", &self.is_streaming())
            .field("frame_counter", &self.frame_counter())
            .finish()
    }
}

#[async_trait]
impl DetectorBackend for MockDetector {
    fn name(&self) -> &str {
        "mock_detector"
    }

    async fn open(&self) -> DetectorResult<DeviceInfo> {
        self.command_delay().await;
        if !self.connected.load(Ordering::SeqCst) {
            return Err(DetectorError::hardware_unavailable(format!(
                "no response from {} ({})",
                self.config.model, self.config.serial
            )));
        }
        self.faults.check_operation("open")?;
        if self
            .opened
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(DetectorError::hardware_unavailable(format!(
                "{} ({}) is already owned by another session",
                self.config.model, self.config.serial
            )));
        }
        self.frame_counter.store(0, Ordering::SeqCst);
        info!(
            model = %self.config.model,
            serial = %self.config.serial,
            width = self.config.width,
            height = self.config.height,
            "MockDetector opened"
        );
        Ok(self.device_info())
    }

    async fn close(&self) -> DetectorResult<()> {
        self.stop_stream().await?;
        if self.opened.swap(false, Ordering::SeqCst) {
            info!(serial = %self.config.serial, "MockDetector closed");
        }
        Ok(())
    }

    async fn configure(&self, config: &ExposureConfig) -> DetectorResult<()> {
        self.ensure_open("configure")?;
        self.command_delay().await;
        self.faults.check_operation("configure")?;
        config.validate(&self.config.limits)?;
        *self.exposure.lock() = *config;
        debug!(
            mode = %config.mode,
            exposure_ms = config.exposure_time.as_millis() as u64,
            dds = config.dds,
            frame_count = config.frame_count,
            "MockDetector configured"
        );
        Ok(())
    }

    async fn start_stream(&self, sink: FrameSink) -> DetectorResult<()> {
        self.ensure_open("start_stream")?;
        self.command_delay().await;
        self.faults.check_operation("start_stream")?;
        if (sink.width(), sink.height()) != (self.config.width, self.config.height) {
            return Err(DetectorError::dimension_mismatch(
                "start_stream",
                (self.config.width, self.config.height),
                (sink.width(), sink.height()),
            ));
        }

        let mut stream = self.stream.lock();
        if stream.is_some() {
            return Err(DetectorError::invalid_state(
                "start_stream",
                "device is already streaming",
            ));
        }

        let exposure = *self.exposure.lock();
        let (trigger_tx, trigger_rx) = mpsc::unbounded_channel();
        let producer = Producer {
            sink,
            exposure,
            sim_mode: self.config.mode,
            timing: self.config.timing,
            external_interval: self.config.external_trigger_interval,
            faults: self.faults.clone(),
            counter: Arc::clone(&self.frame_counter),
            script: Arc::clone(&self.script),
            dark_level: self.config.dark_level,
            max_value: max_value_for(self.config.bit_depth),
        };
        let handle = tokio::spawn(producer.run(trigger_rx));
        *stream = Some(StreamTask {
            trigger_tx,
            handle,
            mode: exposure.mode,
        });
        self.stream_starts.fetch_add(1, Ordering::SeqCst);
        info!(mode = %exposure.mode, "MockDetector streaming started");
        Ok(())
    }

    async fn stop_stream(&self) -> DetectorResult<()> {
        let task = self.stream.lock().take();
        let Some(task) = task else {
            return Ok(());
        };
        task.handle.abort();
        // The producer only yields at sleeps and trigger waits, never between
        // checkout and submit, so abort cannot leave a half-delivered frame.
        let _ = task.handle.await;
        info!(
            frame_counter = self.frame_counter(),
            "MockDetector streaming stopped"
        );
        Ok(())
    }

    async fn software_trigger(&self) -> DetectorResult<()> {
        self.command_delay().await;
        self.faults.check_operation("software_trigger")?;
        let exposure = *self.exposure.lock();
        let burst = if exposure.mode == ExposureMode::Sequence {
            exposure.frame_count
        } else {
            1
        };
        self.send_trigger("software_trigger", ExposureMode::SoftwareTrigger, burst)
    }
}

// =============================================================================
// Frame producer task
// =============================================================================

struct Producer {
    sink: FrameSink,
    exposure: ExposureConfig,
    sim_mode: MockMode,
    timing: TimingConfig,
    external_interval: Option<Duration>,
    faults: FaultConfig,
    counter: Arc<AtomicU64>,
    script: Arc<Mutex<VecDeque<FrameFault>>>,
    dark_level: u16,
    max_value: u16,
}

impl Producer {
    fn frame_period(&self) -> Duration {
        if self.sim_mode.simulates_timing() {
            self.timing.frame_period(self.exposure.exposure_time)
        } else {
            self.exposure.exposure_time
        }
    }

    async fn run(mut self, mut trigger_rx: mpsc::UnboundedReceiver<u32>) {
        if self.exposure.mode == ExposureMode::ExtendedFrameRate {
            let period = self.frame_period();
            loop {
                sleep(period).await;
                if !self.emit_frame() {
                    break;
                }
            }
            debug!("Free-running producer finished");
            return;
        }

        let mut ticker = match (self.exposure.mode, self.external_interval) {
            (ExposureMode::ExternalTrigger, Some(period)) => {
                let mut ticker = interval_at(Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                Some(ticker)
            }
            _ => None,
        };

        loop {
            let burst = tokio::select! {
                burst = trigger_rx.recv() => match burst {
                    Some(burst) => burst,
                    None => break,
                },
                () = next_tick(&mut ticker) => 1,
            };
            for _ in 0..burst {
                if self.sim_mode.simulates_timing() {
                    sleep(self.frame_period()).await;
                }
                if !self.emit_frame() {
                    debug!("Triggered producer finished");
                    return;
                }
            }
        }
    }

    /// Produce one frame. Returns false when production must end.
    fn emit_frame(&mut self) -> bool {
        let frame_nr = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let scripted = self.script.lock().pop_front();
        let outcome = scripted.unwrap_or_else(|| self.faults.frame_fault(frame_nr));

        let missing_packets = match outcome {
            FrameFault::Dropped => {
                debug!(frame_nr, "Simulated frame lost in transport");
                return !self.sink.is_closed();
            }
            FrameFault::Fatal(code) => {
                error!(frame_nr, code, "Simulated fatal transfer error");
                self.sink
                    .report_fault(frame_nr, code, "simulated fatal transfer error");
                return false;
            }
            FrameFault::MissingPackets(n) => n,
            FrameFault::None => 0,
        };

        if let Some(mut buffer) = self.sink.checkout() {
            fill_test_pattern(
                &mut buffer,
                self.sink.width(),
                self.sink.height(),
                frame_nr,
                self.dark_level,
                self.max_value,
            );
            self.sink.submit(buffer, frame_nr, missing_packets);
        }
        !self.sink.is_closed()
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
