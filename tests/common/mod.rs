#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use okcapture::capture::{
    CaptureDriver, CaptureParam, CompletionCallback, DeviceHandle, FrameIndex, Resolution,
    RowOrder,
};
use okcapture::{Config, DriverError};

pub const HANDLE: DeviceHandle = DeviceHandle(7);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Detect,
    QueryRect,
    TestPattern,
    Register,
    ClearCallback,
    Begin,
    Stop,
    Materialize { index: FrameIndex, flip: bool },
    SetParam(CaptureParam, i64),
    Release,
}

/// Driver double that records every call and lets a test fire completions.
pub struct MockDriver {
    present: bool,
    rect: Option<(i64, i64)>,
    reject_register: bool,
    reject_begin: bool,
    row_order: RowOrder,
    callback: Mutex<Option<CompletionCallback>>,
    calls: Mutex<Vec<Call>>,
}

impl MockDriver {
    pub fn absent() -> Self {
        Self {
            present: false,
            rect: None,
            reject_register: false,
            reject_begin: false,
            row_order: RowOrder::BottomUp,
            callback: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_device(rect: Option<(i64, i64)>) -> Self {
        Self {
            present: true,
            rect,
            ..Self::absent()
        }
    }

    pub fn rejecting_register(mut self) -> Self {
        self.reject_register = true;
        self
    }

    pub fn rejecting_begin(mut self) -> Self {
        self.reject_begin = true;
        self
    }

    pub fn row_order(mut self, order: RowOrder) -> Self {
        self.row_order = order;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, call: &Call) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| *c == call).count()
    }

    pub fn has_callback(&self) -> bool {
        self.callback.lock().unwrap().is_some()
    }

    pub fn callback(&self) -> Option<CompletionCallback> {
        self.callback.lock().unwrap().clone()
    }

    /// Fire a completion the way the driver thread would. `None` when no
    /// callback is registered.
    pub fn fire(&self, index: FrameIndex) -> Option<bool> {
        let callback = self.callback.lock().unwrap().clone();
        callback.map(|cb| cb(index))
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

impl CaptureDriver for MockDriver {
    fn detect_device(&self) -> Option<DeviceHandle> {
        self.record(Call::Detect);
        self.present.then_some(HANDLE)
    }

    fn query_active_rect(&self, _handle: DeviceHandle) -> Option<(i64, i64)> {
        self.record(Call::QueryRect);
        self.rect
    }

    fn configure_test_pattern(&self, _handle: DeviceHandle) -> Result<(), DriverError> {
        self.record(Call::TestPattern);
        Ok(())
    }

    fn register_completion_callback(
        &self,
        _handle: DeviceHandle,
        callback: CompletionCallback,
    ) -> Result<(), DriverError> {
        self.record(Call::Register);
        if self.reject_register {
            return Err(DriverError::Rejected("callback"));
        }
        *self.callback.lock().unwrap() = Some(callback);
        Ok(())
    }

    fn clear_completion_callback(&self, _handle: DeviceHandle) {
        self.record(Call::ClearCallback);
        *self.callback.lock().unwrap() = None;
    }

    fn begin_indefinite_capture(&self, _handle: DeviceHandle) -> Result<(), DriverError> {
        self.record(Call::Begin);
        if self.reject_begin {
            return Err(DriverError::Rejected("capture"));
        }
        Ok(())
    }

    fn stop_capture(&self, _handle: DeviceHandle) {
        self.record(Call::Stop);
    }

    /// Writes native row `r` with the byte value `r + index`.
    fn materialize_frame(
        &self,
        _handle: DeviceHandle,
        dest: &mut [u8],
        resolution: Resolution,
        index: FrameIndex,
        flip_vertically: bool,
    ) -> Result<(), DriverError> {
        self.record(Call::Materialize {
            index,
            flip: flip_vertically,
        });
        let rows = resolution.height as usize;
        for (r, row) in dest.chunks_exact_mut(resolution.stride()).enumerate() {
            let native = if flip_vertically { rows - 1 - r } else { r };
            row.fill((native as u64 + index) as u8);
        }
        Ok(())
    }

    fn set_param(
        &self,
        _handle: DeviceHandle,
        param: CaptureParam,
        value: i64,
    ) -> Result<(), DriverError> {
        self.record(Call::SetParam(param, value));
        Ok(())
    }

    fn release(&self, _handle: DeviceHandle) {
        self.record(Call::Release);
    }

    fn native_row_order(&self) -> RowOrder {
        self.row_order
    }
}

pub fn fast_config() -> Config {
    let mut config = Config::default();
    config.simulation.frame_rate = 1000;
    config
}

pub fn driver(mock: MockDriver) -> (Arc<MockDriver>, Arc<dyn CaptureDriver>) {
    let mock = Arc::new(mock);
    let dyn_driver: Arc<dyn CaptureDriver> = mock.clone();
    (mock, dyn_driver)
}
