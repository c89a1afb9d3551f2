//! Interface to the capture hardware driver.
//!
//! The driver owns the device and the thread that signals frame completion.
//! A session only ever talks to hardware through this trait, which keeps the
//! session testable without a capture card attached.

use std::fmt;
use std::sync::Arc;

use crate::capture::frame::Resolution;
use crate::error::DriverError;

/// Opaque handle to an opened device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceHandle(pub u64);

impl fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "device#{}", self.0)
    }
}

/// Driver-assigned index of a completed frame.
pub type FrameIndex = u64;

/// Invoked by the driver, on its own thread, once per completed frame.
///
/// The return value tells the driver whether the frame was consumed; a
/// driver may use `false` to decide whether to keep its capture loop going.
/// The driver never invokes the same callback concurrently with itself.
pub type CompletionCallback = Arc<dyn Fn(FrameIndex) -> bool + Send + Sync>;

/// Row order in which a driver natively writes pixel rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowOrder {
    TopDown,
    BottomUp,
}

/// Capture parameters forwarded to the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureParam {
    /// Exposure time in microseconds.
    ExposureTime,
    /// Frames per second.
    FrameRate,
}

impl CaptureParam {
    /// Parameter id understood by OK-series capture boards.
    pub fn code(self) -> u32 {
        match self {
            CaptureParam::ExposureTime => 20,
            CaptureParam::FrameRate => 22,
        }
    }
}

/// A capture driver.
pub trait CaptureDriver: Send + Sync {
    /// Look for a physical device and open it.
    fn detect_device(&self) -> Option<DeviceHandle>;

    /// Active capture rectangle as `(width, height)`. Either dimension may be
    /// non-positive when the driver cannot report it.
    fn query_active_rect(&self, handle: DeviceHandle) -> Option<(i64, i64)>;

    /// Switch the device to its built-in synthetic test pattern.
    fn configure_test_pattern(&self, handle: DeviceHandle) -> Result<(), DriverError>;

    fn register_completion_callback(
        &self,
        handle: DeviceHandle,
        callback: CompletionCallback,
    ) -> Result<(), DriverError>;

    fn clear_completion_callback(&self, handle: DeviceHandle);

    /// Start capturing until told to stop.
    fn begin_indefinite_capture(&self, handle: DeviceHandle) -> Result<(), DriverError>;

    fn stop_capture(&self, handle: DeviceHandle);

    /// Write completed frame `index` into `dest` as RGB24 at `resolution`.
    /// With `flip_vertically` the native row order is inverted.
    fn materialize_frame(
        &self,
        handle: DeviceHandle,
        dest: &mut [u8],
        resolution: Resolution,
        index: FrameIndex,
        flip_vertically: bool,
    ) -> Result<(), DriverError>;

    fn set_param(
        &self,
        handle: DeviceHandle,
        param: CaptureParam,
        value: i64,
    ) -> Result<(), DriverError>;

    /// Close the device. The handle is invalid afterwards.
    fn release(&self, handle: DeviceHandle);

    fn native_row_order(&self) -> RowOrder {
        RowOrder::TopDown
    }
}

/// Driver for hosts without capture hardware. Probing never finds a device,
/// so every session opened with it runs the simulated source.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDevice;

impl CaptureDriver for NoDevice {
    fn detect_device(&self) -> Option<DeviceHandle> {
        None
    }

    fn query_active_rect(&self, _handle: DeviceHandle) -> Option<(i64, i64)> {
        None
    }

    fn configure_test_pattern(&self, handle: DeviceHandle) -> Result<(), DriverError> {
        Err(DriverError::UnknownHandle(handle.0))
    }

    fn register_completion_callback(
        &self,
        handle: DeviceHandle,
        _callback: CompletionCallback,
    ) -> Result<(), DriverError> {
        Err(DriverError::UnknownHandle(handle.0))
    }

    fn clear_completion_callback(&self, _handle: DeviceHandle) {}

    fn begin_indefinite_capture(&self, handle: DeviceHandle) -> Result<(), DriverError> {
        Err(DriverError::UnknownHandle(handle.0))
    }

    fn stop_capture(&self, _handle: DeviceHandle) {}

    fn materialize_frame(
        &self,
        handle: DeviceHandle,
        _dest: &mut [u8],
        _resolution: Resolution,
        _index: FrameIndex,
        _flip_vertically: bool,
    ) -> Result<(), DriverError> {
        Err(DriverError::UnknownHandle(handle.0))
    }

    fn set_param(
        &self,
        handle: DeviceHandle,
        _param: CaptureParam,
        _value: i64,
    ) -> Result<(), DriverError> {
        Err(DriverError::UnknownHandle(handle.0))
    }

    fn release(&self, _handle: DeviceHandle) {}
}

/// Copy `src` rows into `dest`, optionally in reverse row order.
pub fn copy_rows(src: &[u8], dest: &mut [u8], stride: usize, flip_vertically: bool) {
    if !flip_vertically {
        dest.copy_from_slice(src);
        return;
    }
    for (dst_row, src_row) in dest
        .chunks_exact_mut(stride)
        .zip(src.chunks_exact(stride).rev())
    {
        dst_row.copy_from_slice(src_row);
    }
}
