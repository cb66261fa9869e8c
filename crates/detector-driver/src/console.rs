//! Headless capture console
//!
//! Three toggles in the style of a simple viewer window: camera power,
//! streaming, and a capture button that is armed only while both are on.
//! Commands that are not valid in the current state fail with `InvalidState`
//! and leave the state unchanged.

use crate::capture::trigger_and_acquire;
use crate::AcquisitionController;
use detector_core::{BufferInfo, DetectorError, DetectorResult, ExposureConfig, Frame};
use serde::Serialize;
use std::time::Duration;
use tracing::info;

/// One user action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// Open and configure (`true`) or close (`false`) the camera.
    CameraPower(bool),
    /// Start or stop the stream.
    Streaming(bool),
    /// Trigger and read one frame.
    Capture,
}

/// Toggle state as shown to the user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConsoleState {
    /// Camera is powered on (session open and configured).
    pub camera_open: bool,
    /// Stream is running.
    pub streaming: bool,
    /// Capture is allowed.
    pub armed_for_capture: bool,
}

/// Result of a command.
#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleEvent {
    /// Toggles changed (or were already in the requested position).
    State(ConsoleState),
    /// A capture completed.
    Captured {
        /// Copy of the captured frame.
        frame: Frame,
        /// Acquisition outcome.
        info: BufferInfo,
    },
}

/// Command-driven front end over an [`AcquisitionController`].
#[derive(Debug)]
pub struct CaptureConsole {
    controller: AcquisitionController,
    exposure: ExposureConfig,
    capture_timeout: Duration,
    state: ConsoleState,
    frame: Option<Frame>,
}

impl CaptureConsole {
    /// Wrap a closed controller. `exposure` is applied on every power-on.
    pub fn new(
        controller: AcquisitionController,
        exposure: ExposureConfig,
        capture_timeout: Duration,
    ) -> Self {
        Self {
            controller,
            exposure,
            capture_timeout,
            state: ConsoleState::default(),
            frame: None,
        }
    }

    /// Current toggles.
    #[must_use]
    pub fn state(&self) -> ConsoleState {
        self.state
    }

    /// Underlying controller.
    #[must_use]
    pub fn controller(&self) -> &AcquisitionController {
        &self.controller
    }

    /// Apply one command.
    pub async fn apply(&mut self, command: ConsoleCommand) -> DetectorResult<ConsoleEvent> {
        match command {
            ConsoleCommand::CameraPower(true) => self.power_on().await?,
            ConsoleCommand::CameraPower(false) => self.power_off().await?,
            ConsoleCommand::Streaming(true) => self.stream_on().await?,
            ConsoleCommand::Streaming(false) => self.stream_off().await?,
            ConsoleCommand::Capture => return self.capture().await,
        }
        Ok(ConsoleEvent::State(self.state))
    }

    /// Stop and close whatever is open.
    pub async fn shutdown(&mut self) -> DetectorResult<()> {
        self.power_off().await
    }

    async fn power_on(&mut self) -> DetectorResult<()> {
        if self.state.camera_open {
            return Ok(());
        }
        self.controller.open().await?;
        if let Err(e) = self.controller.configure(self.exposure).await {
            self.controller.close().await?;
            return Err(e);
        }
        self.state.camera_open = true;
        info!(mode = %self.exposure.mode, "Camera on");
        Ok(())
    }

    async fn power_off(&mut self) -> DetectorResult<()> {
        if !self.state.camera_open {
            return Ok(());
        }
        // close() stops an active stream first.
        self.controller.close().await?;
        self.state = ConsoleState::default();
        self.frame = None;
        info!("Camera off");
        Ok(())
    }

    async fn stream_on(&mut self) -> DetectorResult<()> {
        if !self.state.camera_open {
            return Err(DetectorError::invalid_state(
                "console_stream",
                "turn the camera on before starting the stream",
            ));
        }
        if self.state.streaming {
            return Ok(());
        }
        let (width, height) = self.controller.image_dimensions().ok_or_else(|| {
            DetectorError::invalid_state("console_stream", "camera reports no geometry")
        })?;
        let frame = Frame::new(width, height)?;
        self.controller.start_stream().await?;
        self.frame = Some(frame);
        self.state.streaming = true;
        self.state.armed_for_capture = true;
        info!(width, height, "Stream on");
        Ok(())
    }

    async fn stream_off(&mut self) -> DetectorResult<()> {
        if !self.state.streaming {
            return Ok(());
        }
        self.controller.stop_stream().await?;
        self.state.streaming = false;
        self.state.armed_for_capture = false;
        info!("Stream off");
        Ok(())
    }

    async fn capture(&mut self) -> DetectorResult<ConsoleEvent> {
        let frame = match self.frame.as_mut() {
            Some(frame) if self.state.armed_for_capture => frame,
            _ => {
                return Err(DetectorError::invalid_state(
                    "console_capture",
                    "camera and stream must both be on",
                ))
            }
        };
        let info = trigger_and_acquire(&self.controller, frame, self.capture_timeout).await?;
        info!(%info, "Captured");
        Ok(ConsoleEvent::Captured {
            frame: frame.clone(),
            info,
        })
    }
}
