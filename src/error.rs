use thiserror::Error;

/// Failures reported by a [`CaptureDriver`](crate::capture::CaptureDriver).
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("driver rejected {0}")]
    Rejected(&'static str),

    #[error("unknown device handle {0}")]
    UnknownHandle(u64),

    #[error("frame {index} is no longer available")]
    FrameUnavailable { index: u64 },

    #[error("destination holds {actual} bytes, frame needs {expected}")]
    SizeMismatch { expected: usize, actual: usize },

    #[error("unsupported pixel format: {0}")]
    UnsupportedFormat(String),

    #[error("decode failed: {0}")]
    Decode(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Session-level failures.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("capture session is not open")]
    NotOpen,

    #[error("driver call `{operation}` failed: {source}")]
    DriverRejected {
        operation: &'static str,
        #[source]
        source: DriverError,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Config(#[from] config::ConfigError),
}

impl CaptureError {
    pub(crate) fn driver(operation: &'static str, source: DriverError) -> Self {
        Self::DriverRejected { operation, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn driver_rejection_names_the_operation() {
        let err = CaptureError::driver("begin_indefinite_capture", DriverError::Rejected("capture"));
        let msg = err.to_string();
        assert!(msg.contains("begin_indefinite_capture"));
        assert!(msg.contains("driver rejected capture"));
    }

    #[test]
    fn size_mismatch_display() {
        let err = DriverError::SizeMismatch {
            expected: 12,
            actual: 9,
        };
        assert_eq!(err.to_string(), "destination holds 9 bytes, frame needs 12");
    }
}
