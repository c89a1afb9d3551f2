//! Capture session state machine.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::capture::driver::{CaptureDriver, CaptureParam, DeviceHandle};
use crate::capture::frame::{Frame, Resolution};
use crate::capture::source::{FrameSource, HardwareSource, Production, SimulatedSource, SourceMode};
use crate::error::CaptureError;
use crate::pipeline::BufferStats;
use crate::Config;

/// Lifecycle of a [`CaptureSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Closed,
    Idle,
    Capturing,
}

/// Owns one frame source and the buffer its frames land in.
///
/// A session is opened once per device. Opening asks the driver for a
/// device and falls back to a simulated source when none is present, so
/// a session can always be started.
pub struct CaptureSession {
    driver: Arc<dyn CaptureDriver>,
    state: SessionState,
    source: Option<FrameSource>,
    resolution: Resolution,
    default_resolution: Resolution,
    test_pattern: bool,
    frame_rate: u32,
    production: Arc<Production>,
}

impl CaptureSession {
    pub fn new(driver: Arc<dyn CaptureDriver>, config: &Config) -> Self {
        let default_resolution =
            Resolution::new(config.capture.default_width, config.capture.default_height);
        Self {
            driver,
            state: SessionState::Closed,
            source: None,
            resolution: default_resolution,
            default_resolution,
            test_pattern: config.capture.test_pattern,
            frame_rate: config.simulation.frame_rate,
            production: Arc::new(Production::new(config.capture.queue_depth)),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Active producer kind, `None` while closed.
    pub fn mode(&self) -> Option<SourceMode> {
        self.source.as_ref().map(FrameSource::mode)
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn buffer_stats(&self) -> BufferStats {
        self.production.frames().stats()
    }

    /// Select a producer and allocate the work buffer. Does nothing when
    /// already open. Device absence is not an error.
    #[instrument(skip(self))]
    pub fn open(&mut self) {
        if self.state != SessionState::Closed {
            return;
        }

        let source = match self.driver.detect_device() {
            Some(handle) => {
                info!("Capture device ready on {}", handle);
                self.resolution = self.active_resolution(handle);
                if self.test_pattern {
                    if let Err(e) = self.driver.configure_test_pattern(handle) {
                        warn!("Failed to enable test pattern on {}: {}", handle, e);
                    }
                }
                FrameSource::Hardware(HardwareSource::new(Arc::clone(&self.driver), handle))
            }
            None => {
                info!("No capture device found, using simulated source");
                self.resolution = self.default_resolution;
                FrameSource::Simulated(SimulatedSource::new(self.frame_rate))
            }
        };

        self.source = Some(source);
        self.production.allocate(self.resolution);
        self.state = SessionState::Idle;
        info!(
            "Session open: {} mode at {}x{}",
            self.mode().map_or("none".into(), |m| m.to_string()),
            self.resolution.width,
            self.resolution.height
        );
    }

    fn active_resolution(&self, handle: DeviceHandle) -> Resolution {
        let (width, height) = self.driver.query_active_rect(handle).unwrap_or((0, 0));
        let width = u32::try_from(width)
            .ok()
            .filter(|&w| w > 0)
            .unwrap_or(self.default_resolution.width);
        let height = u32::try_from(height)
            .ok()
            .filter(|&h| h > 0)
            .unwrap_or(self.default_resolution.height);
        Resolution::new(width, height)
    }

    /// Stop capture, free the work buffer and release the device.
    #[instrument(skip(self))]
    pub fn close(&mut self) {
        self.stop_capture();
        self.production.release();

        if let Some(FrameSource::Hardware(hw)) = self.source.take() {
            hw.driver().release(hw.handle());
            debug!("Released {}", hw.handle());
        }

        if self.state != SessionState::Closed {
            info!("Session closed");
        }
        self.state = SessionState::Closed;
    }

    /// Begin producing frames. Does nothing when already capturing.
    #[instrument(skip(self))]
    pub fn start_capture(&mut self) -> Result<(), CaptureError> {
        match self.state {
            SessionState::Capturing => return Ok(()),
            SessionState::Closed => return Err(CaptureError::NotOpen),
            SessionState::Idle => {}
        }

        if !self.production.is_allocated() {
            self.production.allocate(self.resolution);
        }
        self.production.frames().clear();

        match self.source.as_mut() {
            Some(FrameSource::Hardware(hw)) => {
                let handle = hw.handle();
                let callback = hw.completion_callback(Arc::clone(&self.production));
                hw.driver()
                    .register_completion_callback(handle, callback)
                    .map_err(|e| CaptureError::driver("register_completion_callback", e))?;

                if let Err(e) = hw.driver().begin_indefinite_capture(handle) {
                    hw.driver().clear_completion_callback(handle);
                    return Err(CaptureError::driver("begin_indefinite_capture", e));
                }
                info!("Hardware capture started on {}", handle);
            }
            Some(FrameSource::Simulated(sim)) => {
                sim.reset_pacer();
                info!("Simulated capture started");
            }
            None => return Err(CaptureError::NotOpen),
        }

        self.state = SessionState::Capturing;
        Ok(())
    }

    /// Stop producing frames. A driver callback already in flight may still
    /// queue one more frame after this returns.
    #[instrument(skip(self))]
    pub fn stop_capture(&mut self) {
        if self.state != SessionState::Capturing {
            return;
        }

        if let Some(FrameSource::Hardware(hw)) = &self.source {
            hw.driver().stop_capture(hw.handle());
            hw.driver().clear_completion_callback(hw.handle());
        }

        self.state = SessionState::Idle;
        info!("Capture stopped");
    }

    /// Freshest available frame, or `None` when nothing is buffered.
    ///
    /// In simulated mode this first generates a frame, blocking for up to
    /// one frame interval.
    pub fn get_frame(&mut self) -> Option<Frame> {
        if self.state == SessionState::Capturing {
            if let Some(FrameSource::Simulated(sim)) = self.source.as_mut() {
                sim.produce(&self.production);
            }
        }
        self.production.frames().take()
    }

    /// Exposure in microseconds. Ignored without a hardware device.
    pub fn set_exposure_time(&self, micros: i64) -> Result<(), CaptureError> {
        self.set_param(CaptureParam::ExposureTime, micros)
    }

    /// Ignored without a hardware device.
    pub fn set_frame_rate(&self, fps: i64) -> Result<(), CaptureError> {
        self.set_param(CaptureParam::FrameRate, fps)
    }

    fn set_param(&self, param: CaptureParam, value: i64) -> Result<(), CaptureError> {
        match &self.source {
            Some(FrameSource::Hardware(hw)) => {
                debug!("Setting {:?} (board id {}) = {}", param, param.code(), value);
                hw.driver()
                    .set_param(hw.handle(), param, value)
                    .map_err(|e| CaptureError::driver("set_param", e))
            }
            _ => Ok(()),
        }
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.close();
    }
}
