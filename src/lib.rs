pub mod api;
pub mod capture;
pub mod error;
pub mod pipeline;
pub mod utils;

use std::path::{Path, PathBuf};

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

pub use api::Camera;
pub use capture::{CaptureSession, Frame};
pub use error::{CaptureError, DriverError};

/// Global configuration that can be atomically swapped at runtime
pub static CONFIG: once_cell::sync::Lazy<ArcSwap<Config>> =
    once_cell::sync::Lazy::new(|| ArcSwap::from_pointee(Config::default()));

/// Environment prefix for overrides, e.g. `OKCAPTURE__CAPTURE__QUEUE_DEPTH=4`.
pub const ENV_PREFIX: &str = "OKCAPTURE";

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub simulation: SimulationConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// V4L2 device node; auto-detected when unset.
    pub device_path: Option<String>,
    /// Resolution used by the simulated source, and by a device that
    /// cannot report its own.
    pub default_width: u32,
    pub default_height: u32,
    /// Frames held before the oldest is dropped.
    pub queue_depth: usize,
    /// Switch a detected device to its built-in test pattern.
    pub test_pattern: bool,
    pub exposure_us: Option<i64>,
    pub fps: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub frame_rate: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Stop after this many frames.
    pub max_frames: Option<u64>,
    /// Write the last received frame here as PNG.
    pub snapshot_path: Option<PathBuf>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device_path: None,
            default_width: 768,
            default_height: 576,
            queue_depth: 2,
            test_pattern: true,
            exposure_us: None,
            fps: None,
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self { frame_rate: 30 }
    }
}

impl Config {
    /// Load from an optional TOML file, then apply `OKCAPTURE__*`
    /// environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, CaptureError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }
        let config: Config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), CaptureError> {
        if self.capture.default_width == 0 || self.capture.default_height == 0 {
            return Err(CaptureError::InvalidConfig(
                "default resolution must be non-zero".into(),
            ));
        }
        if self.capture.queue_depth == 0 {
            return Err(CaptureError::InvalidConfig(
                "queue_depth must be at least 1".into(),
            ));
        }
        if self.simulation.frame_rate == 0 {
            return Err(CaptureError::InvalidConfig(
                "simulation frame_rate must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn default_config_is_pal_with_two_frame_queue() {
        let config = Config::default();
        assert_eq!(config.capture.default_width, 768);
        assert_eq!(config.capture.default_height, 576);
        assert_eq!(config.capture.queue_depth, 2);
        assert_eq!(config.simulation.frame_rate, 30);
        assert!(config.capture.test_pattern);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn load_without_file_uses_defaults() {
        let config = Config::load(None).unwrap();
        assert_eq!(config.capture.queue_depth, 2);
    }

    #[test]
    fn load_reads_partial_toml() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[capture]\nqueue_depth = 4\ntest_pattern = false\n\n[simulation]\nframe_rate = 60"
        )
        .unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.capture.queue_depth, 4);
        assert!(!config.capture.test_pattern);
        assert_eq!(config.capture.default_width, 768);
        assert_eq!(config.simulation.frame_rate, 60);
    }

    #[test]
    fn zero_queue_depth_is_rejected() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[capture]\nqueue_depth = 0").unwrap();
        assert!(matches!(
            Config::load(Some(file.path())),
            Err(CaptureError::InvalidConfig(_))
        ));
    }
}
