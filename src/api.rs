//! Caller-facing camera handle.
//!
//! Mirrors the surface exposed to the hosting application: boolean status
//! returns, fire-and-forget parameter setters, and `get_image` returning
//! `None` when no frame is ready.

use std::sync::Arc;

use tracing::warn;

use crate::capture::{CaptureDriver, CaptureSession, Frame, SessionState, SourceMode};
use crate::pipeline::BufferStats;
use crate::{Config, CONFIG};

pub struct Camera {
    session: CaptureSession,
}

impl Camera {
    /// Camera using the process-wide [`CONFIG`] and the default driver for
    /// this build.
    pub fn new() -> Self {
        let config = CONFIG.load();
        Self::with_driver(default_driver(&config), &config)
    }

    pub fn with_driver(driver: Arc<dyn CaptureDriver>, config: &Config) -> Self {
        Self {
            session: CaptureSession::new(driver, config),
        }
    }

    /// Always succeeds; without a device the camera runs simulated.
    pub fn open(&mut self) -> bool {
        self.session.open();
        true
    }

    pub fn close(&mut self) {
        self.session.close();
    }

    pub fn start(&mut self) -> bool {
        match self.session.start_capture() {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to start capture: {}", e);
                false
            }
        }
    }

    pub fn stop(&mut self) {
        self.session.stop_capture();
    }

    pub fn set_exposure(&mut self, microseconds: i64) {
        if let Err(e) = self.session.set_exposure_time(microseconds) {
            warn!("Failed to set exposure: {}", e);
        }
    }

    pub fn set_fps(&mut self, frames_per_second: i64) {
        if let Err(e) = self.session.set_frame_rate(frames_per_second) {
            warn!("Failed to set frame rate: {}", e);
        }
    }

    /// Freshest frame, or `None` if nothing is available yet.
    pub fn get_image(&mut self) -> Option<Frame> {
        self.session.get_frame()
    }

    pub fn is_capturing(&self) -> bool {
        self.session.state() == SessionState::Capturing
    }

    pub fn mode(&self) -> Option<SourceMode> {
        self.session.mode()
    }

    pub fn stats(&self) -> BufferStats {
        self.session.buffer_stats()
    }
}

impl Default for Camera {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "v4l2")]
fn default_driver(config: &Config) -> Arc<dyn CaptureDriver> {
    Arc::new(crate::capture::V4l2Driver::new(config.capture.device_path.clone()))
}

#[cfg(not(feature = "v4l2"))]
fn default_driver(_config: &Config) -> Arc<dyn CaptureDriver> {
    Arc::new(crate::capture::NoDevice)
}
