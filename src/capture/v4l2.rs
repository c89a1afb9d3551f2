//! V4L2 capture driver
//!
//! Streams from a Linux video device on a driver-owned thread and invokes
//! the registered completion callback once per dequeued buffer. The newest
//! raw buffer is kept until the next one arrives, which is what
//! `materialize_frame` decodes from.

use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, info, warn};
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::control::{Control, Value};
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::Device;

use crate::capture::decoder::{decode_frame, PixelFormat};
use crate::capture::driver::{
    copy_rows, CaptureDriver, CaptureParam, CompletionCallback, DeviceHandle, FrameIndex,
};
use crate::capture::frame::Resolution;
use crate::error::DriverError;

const BUFFER_COUNT: u32 = 4;
/// Longest the capture thread blocks on a stalled device before it checks
/// for a stop request again.
const STREAM_TIMEOUT: Duration = Duration::from_millis(200);
const CID_EXPOSURE_ABSOLUTE: u32 = 0x009a_0902;
const CID_TEST_PATTERN: u32 = 0x009f_0903;

struct RawFrame {
    index: FrameIndex,
    data: Vec<u8>,
}

#[derive(Default)]
struct Shared {
    callback: Mutex<Option<CompletionCallback>>,
    latest: Mutex<Option<RawFrame>>,
}

struct Worker {
    stop: flume::Sender<()>,
    thread: JoinHandle<()>,
}

struct OpenDevice {
    handle: DeviceHandle,
    path: String,
    device: Device,
    format: PixelFormat,
    resolution: Resolution,
    shared: Arc<Shared>,
    worker: Option<Worker>,
}

/// [`CaptureDriver`] for a single V4L2 device.
pub struct V4l2Driver {
    device_path: Option<String>,
    next_handle: AtomicU64,
    open: Mutex<Option<OpenDevice>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl V4l2Driver {
    /// `device_path` of `None` picks the first capture-capable node.
    pub fn new(device_path: Option<String>) -> Self {
        Self {
            device_path,
            next_handle: AtomicU64::new(1),
            open: Mutex::new(None),
        }
    }

    fn with_device<R>(
        &self,
        handle: DeviceHandle,
        f: impl FnOnce(&mut OpenDevice) -> Result<R, DriverError>,
    ) -> Result<R, DriverError> {
        let mut open = lock(&self.open);
        match open.as_mut() {
            Some(dev) if dev.handle == handle => f(dev),
            _ => Err(DriverError::UnknownHandle(handle.0)),
        }
    }

    fn take_worker(&self, handle: DeviceHandle) -> Option<Worker> {
        self.with_device(handle, |dev| Ok(dev.worker.take()))
            .ok()
            .flatten()
    }
}

/// First `/dev/videoN` node that supports video capture.
pub fn auto_detect_device() -> Option<String> {
    info!("Auto-detecting capture devices...");

    for i in 0..10 {
        let path = format!("/dev/video{}", i);
        if !Path::new(&path).exists() {
            continue;
        }

        if let Ok(dev) = Device::with_path(&path) {
            if let Ok(caps) = dev.query_caps() {
                if caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
                    info!("Found capture device: {} - {}", path, caps.card);
                    return Some(path);
                }
            }
        }
    }

    None
}

fn negotiate_format(device: &Device) -> Result<(PixelFormat, Resolution), DriverError> {
    let mut fmt = device.format()?;
    for wanted in PixelFormat::PREFERRED {
        fmt.fourcc = wanted.fourcc();
        let actual = device.set_format(&fmt)?;
        if let Some(format) = PixelFormat::from_fourcc(actual.fourcc) {
            return Ok((format, Resolution::new(actual.width, actual.height)));
        }
    }
    Err(DriverError::UnsupportedFormat(fmt.fourcc.to_string()))
}

/// Source of raw frame buffers for the capture thread.
trait RawStream {
    /// Next raw buffer. `ErrorKind::TimedOut` means no frame arrived within
    /// the stream timeout; the caller may retry.
    fn next_raw(&mut self) -> io::Result<Vec<u8>>;
}

struct V4l2Stream {
    _device: Device,
    stream: MmapStream<'static>,
}

impl V4l2Stream {
    fn open(path: &str) -> Result<Self, DriverError> {
        let device = Device::with_path(path)?;
        let mut stream = MmapStream::with_buffers(&device, Type::VideoCapture, BUFFER_COUNT)?;
        stream.set_timeout(STREAM_TIMEOUT);
        info!("Capture stream started on {} with {} buffers", path, BUFFER_COUNT);
        Ok(Self {
            _device: device,
            stream,
        })
    }
}

impl RawStream for V4l2Stream {
    fn next_raw(&mut self) -> io::Result<Vec<u8>> {
        let (buf, meta) = self.stream.next()?;
        let used = match meta.bytesused as usize {
            0 => buf.len(),
            n => n.min(buf.len()),
        };
        Ok(buf[..used].to_vec())
    }
}

/// Spawn the capture thread and wait until its stream is open. A stream
/// that fails to open is reported here instead of on the thread.
fn start_worker<S, F>(open: F, shared: Arc<Shared>) -> Result<Worker, DriverError>
where
    S: RawStream,
    F: FnOnce() -> Result<S, DriverError> + Send + 'static,
{
    let (stop, stop_rx) = flume::bounded(1);
    let (ready_tx, ready_rx) = flume::bounded(1);
    let thread = std::thread::Builder::new()
        .name("okcapture-v4l2".into())
        .spawn(move || match open() {
            Ok(stream) => {
                let _ = ready_tx.send(Ok(()));
                run_capture(stream, &shared, &stop_rx);
            }
            Err(e) => {
                let _ = ready_tx.send(Err(e));
            }
        })?;

    let setup = ready_rx
        .recv()
        .unwrap_or(Err(DriverError::Rejected("capture thread setup")));
    match setup {
        Ok(()) => Ok(Worker { stop, thread }),
        Err(e) => {
            if thread.join().is_err() {
                warn!("Capture thread panicked during setup");
            }
            Err(e)
        }
    }
}

fn run_capture<S: RawStream>(mut stream: S, shared: &Shared, stop: &flume::Receiver<()>) {
    let mut index: FrameIndex = 0;
    while matches!(stop.try_recv(), Err(flume::TryRecvError::Empty)) {
        let data = match stream.next_raw() {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::TimedOut => continue,
            Err(e) => {
                warn!("Capture error: {}", e);
                break;
            }
        };

        index += 1;
        *lock(&shared.latest) = Some(RawFrame { index, data });

        let callback = lock(&shared.callback).clone();
        if let Some(callback) = callback {
            if !callback(index) {
                debug!("Frame {} not consumed", index);
            }
        }
    }
    debug!("Capture thread exiting after {} frames", index);
}

impl CaptureDriver for V4l2Driver {
    fn detect_device(&self) -> Option<DeviceHandle> {
        let mut open = lock(&self.open);
        if let Some(dev) = open.as_ref() {
            return Some(dev.handle);
        }

        let path = self.device_path.clone().or_else(auto_detect_device)?;
        let device = match Device::with_path(&path) {
            Ok(device) => device,
            Err(e) => {
                warn!("Failed to open {}: {}", path, e);
                return None;
            }
        };
        let (format, resolution) = match negotiate_format(&device) {
            Ok(negotiated) => negotiated,
            Err(e) => {
                warn!("No usable pixel format on {}: {}", path, e);
                return None;
            }
        };

        let handle = DeviceHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        info!(
            "Opened {} as {}: {:?} {}x{}",
            path, handle, format, resolution.width, resolution.height
        );
        *open = Some(OpenDevice {
            handle,
            path,
            device,
            format,
            resolution,
            shared: Arc::new(Shared::default()),
            worker: None,
        });
        Some(handle)
    }

    fn query_active_rect(&self, handle: DeviceHandle) -> Option<(i64, i64)> {
        self.with_device(handle, |dev| {
            Ok((dev.resolution.width as i64, dev.resolution.height as i64))
        })
        .ok()
    }

    fn configure_test_pattern(&self, handle: DeviceHandle) -> Result<(), DriverError> {
        self.with_device(handle, |dev| {
            dev.device.set_control(Control {
                id: CID_TEST_PATTERN,
                value: Value::Integer(1),
            })?;
            Ok(())
        })
    }

    fn register_completion_callback(
        &self,
        handle: DeviceHandle,
        callback: CompletionCallback,
    ) -> Result<(), DriverError> {
        self.with_device(handle, |dev| {
            *lock(&dev.shared.callback) = Some(callback);
            Ok(())
        })
    }

    fn clear_completion_callback(&self, handle: DeviceHandle) {
        let _ = self.with_device(handle, |dev| {
            *lock(&dev.shared.callback) = None;
            Ok(())
        });
    }

    fn begin_indefinite_capture(&self, handle: DeviceHandle) -> Result<(), DriverError> {
        self.with_device(handle, |dev| {
            if dev.worker.is_some() {
                return Ok(());
            }
            let path = dev.path.clone();
            let worker = start_worker(move || V4l2Stream::open(&path), Arc::clone(&dev.shared))?;
            dev.worker = Some(worker);
            Ok(())
        })
    }

    fn stop_capture(&self, handle: DeviceHandle) {
        // Join outside the device lock: the capture thread locks it again
        // through `materialize_frame`.
        if let Some(worker) = self.take_worker(handle) {
            let _ = worker.stop.send(());
            if worker.thread.join().is_err() {
                warn!("Capture thread for {} panicked", handle);
            }
        }
    }

    fn materialize_frame(
        &self,
        handle: DeviceHandle,
        dest: &mut [u8],
        resolution: Resolution,
        index: FrameIndex,
        flip_vertically: bool,
    ) -> Result<(), DriverError> {
        let (format, shared) =
            self.with_device(handle, |dev| Ok((dev.format, Arc::clone(&dev.shared))))?;

        if dest.len() != resolution.frame_len() {
            return Err(DriverError::SizeMismatch {
                expected: resolution.frame_len(),
                actual: dest.len(),
            });
        }

        let latest = lock(&shared.latest);
        let raw = latest
            .as_ref()
            .filter(|raw| raw.index == index)
            .ok_or(DriverError::FrameUnavailable { index })?;
        let rgb = decode_frame(&raw.data, format, resolution)?;
        copy_rows(
            &rgb[..resolution.frame_len()],
            dest,
            resolution.stride(),
            flip_vertically,
        );
        Ok(())
    }

    fn set_param(
        &self,
        handle: DeviceHandle,
        param: CaptureParam,
        value: i64,
    ) -> Result<(), DriverError> {
        self.with_device(handle, |dev| {
            match param {
                CaptureParam::ExposureTime => {
                    // V4L2 absolute exposure is in units of 100 µs.
                    dev.device.set_control(Control {
                        id: CID_EXPOSURE_ABSOLUTE,
                        value: Value::Integer((value / 100).max(1)),
                    })?;
                }
                CaptureParam::FrameRate => {
                    let fps = u32::try_from(value)
                        .ok()
                        .filter(|&fps| fps > 0)
                        .ok_or(DriverError::Rejected("frame rate"))?;
                    dev.device.set_params(&Parameters::with_fps(fps))?;
                }
            }
            Ok(())
        })
    }

    fn release(&self, handle: DeviceHandle) {
        self.stop_capture(handle);
        let mut open = lock(&self.open);
        if open.as_ref().is_some_and(|dev| dev.handle == handle) {
            if let Some(dev) = open.take() {
                info!("Closed {}", dev.path);
            }
        }
    }
}

impl Drop for V4l2Driver {
    fn drop(&mut self) {
        let handle = lock(&self.open).as_ref().map(|dev| dev.handle);
        if let Some(handle) = handle {
            self.release(handle);
        }
    }
}
