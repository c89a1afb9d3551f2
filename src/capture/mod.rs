pub mod driver;
pub mod frame;
pub mod session;
pub mod source;

#[cfg(feature = "v4l2")]
pub mod decoder;
#[cfg(feature = "v4l2")]
pub mod v4l2;

pub use driver::{
    CaptureDriver, CaptureParam, CompletionCallback, DeviceHandle, FrameIndex, NoDevice, RowOrder,
};
pub use frame::{Frame, Resolution, CHANNELS};
pub use session::{CaptureSession, SessionState};
pub use source::{FrameSource, SourceMode};
#[cfg(feature = "v4l2")]
pub use v4l2::V4l2Driver;
