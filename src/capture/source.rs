//! Frame producers: a capture device driven by its driver's completion
//! callback, or a synthetic pattern generated on demand.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::{trace, warn};

use crate::capture::driver::{
    CaptureDriver, CompletionCallback, DeviceHandle, FrameIndex, RowOrder,
};
use crate::capture::frame::{Frame, Resolution, CHANNELS};
use crate::pipeline::BoundedFrameBuffer;

/// Top-left corner of the simulated marker block, in pixels.
pub const MARKER_ORIGIN: (u32, u32) = (100, 100);
/// Edge length of the simulated marker block, in pixels.
pub const MARKER_SIZE: u32 = 100;
/// RGB colour of the simulated marker block.
pub const MARKER_COLOR: [u8; 3] = [255, 0, 0];

/// Scratch memory a producer assembles one frame in.
pub(crate) struct WorkBuffer {
    resolution: Resolution,
    bytes: Vec<u8>,
}

impl WorkBuffer {
    pub(crate) fn new(resolution: Resolution) -> Self {
        Self {
            resolution,
            bytes: vec![0; resolution.frame_len()],
        }
    }
}

/// State shared by a session and whichever producer feeds it.
pub(crate) struct Production {
    work: Mutex<Option<WorkBuffer>>,
    frames: BoundedFrameBuffer,
    sequence: AtomicU64,
}

impl Production {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            work: Mutex::new(None),
            frames: BoundedFrameBuffer::new(capacity),
            sequence: AtomicU64::new(0),
        }
    }

    pub(crate) fn frames(&self) -> &BoundedFrameBuffer {
        &self.frames
    }

    pub(crate) fn work(&self) -> MutexGuard<'_, Option<WorkBuffer>> {
        self.work.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn allocate(&self, resolution: Resolution) {
        *self.work() = Some(WorkBuffer::new(resolution));
    }

    pub(crate) fn release(&self) {
        *self.work() = None;
    }

    pub(crate) fn is_allocated(&self) -> bool {
        self.work().is_some()
    }

    /// Copy the work buffer into a new frame and queue it.
    fn deliver(&self, work: &WorkBuffer) -> u64 {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        self.frames
            .put(Frame::copy_from(work.resolution, &work.bytes, sequence));
        sequence
    }
}

/// Which kind of producer a session runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceMode {
    Hardware,
    Simulated,
}

impl fmt::Display for SourceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceMode::Hardware => write!(f, "hardware"),
            SourceMode::Simulated => write!(f, "simulated"),
        }
    }
}

/// The producer a session drives.
pub enum FrameSource {
    Hardware(HardwareSource),
    Simulated(SimulatedSource),
}

impl FrameSource {
    pub fn mode(&self) -> SourceMode {
        match self {
            FrameSource::Hardware(_) => SourceMode::Hardware,
            FrameSource::Simulated(_) => SourceMode::Simulated,
        }
    }
}

/// Frames pushed by a capture device through its completion callback.
pub struct HardwareSource {
    driver: Arc<dyn CaptureDriver>,
    handle: DeviceHandle,
}

impl HardwareSource {
    pub fn new(driver: Arc<dyn CaptureDriver>, handle: DeviceHandle) -> Self {
        Self { driver, handle }
    }

    pub fn handle(&self) -> DeviceHandle {
        self.handle
    }

    pub fn driver(&self) -> &dyn CaptureDriver {
        self.driver.as_ref()
    }

    /// Build the callback handed to the driver. It carries its own
    /// references to the driver and the session's production state.
    pub(crate) fn completion_callback(&self, production: Arc<Production>) -> CompletionCallback {
        let driver = Arc::clone(&self.driver);
        let handle = self.handle;
        Arc::new(move |index| on_frame_complete(driver.as_ref(), handle, &production, index))
    }
}

fn on_frame_complete(
    driver: &dyn CaptureDriver,
    handle: DeviceHandle,
    production: &Production,
    index: FrameIndex,
) -> bool {
    let mut guard = production.work();
    let Some(work) = guard.as_mut() else {
        return false;
    };

    let flip = driver.native_row_order() == RowOrder::BottomUp;
    let resolution = work.resolution;
    if let Err(e) = driver.materialize_frame(handle, &mut work.bytes, resolution, index, flip) {
        warn!("Failed to materialize frame {}: {}", index, e);
        return false;
    }

    let sequence = production.deliver(work);
    trace!(index, sequence, "hardware frame queued");
    true
}

/// Spaces calls at least `interval` apart by blocking the caller.
#[derive(Debug)]
pub struct Pacer {
    interval: Duration,
    last: Option<Instant>,
}

impl Pacer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    pub fn from_fps(fps: u32) -> Self {
        Self::new(Duration::from_secs(1) / fps.max(1))
    }

    /// Block until one interval has passed since the previous call.
    pub fn wait(&mut self) {
        if let Some(last) = self.last {
            let due = last + self.interval;
            let now = Instant::now();
            if due > now {
                std::thread::sleep(due - now);
            }
        }
        self.last = Some(Instant::now());
    }

    /// Forget the previous tick so the next `wait` returns immediately.
    pub fn reset(&mut self) {
        self.last = None;
    }
}

/// Synthetic frames generated on the consumer's thread.
///
/// Each frame is filled with `tick % 255`, so consecutive frames differ in
/// brightness, with a fixed red block at (100, 100).
#[derive(Debug)]
pub struct SimulatedSource {
    tick: u64,
    pacer: Pacer,
}

impl SimulatedSource {
    pub fn new(frame_rate: u32) -> Self {
        Self {
            tick: 0,
            pacer: Pacer::from_fps(frame_rate),
        }
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub(crate) fn reset_pacer(&mut self) {
        self.pacer.reset();
    }

    /// Advance the tick and paint the next pattern into `bytes`. A buffer
    /// that does not hold exactly one frame at `resolution` is left alone.
    pub(crate) fn render(&mut self, bytes: &mut [u8], resolution: Resolution) {
        if bytes.len() != resolution.frame_len() {
            return;
        }
        self.tick += 1;
        bytes.fill((self.tick % 255) as u8);

        let (x0, y0) = MARKER_ORIGIN;
        let x_end = (x0 + MARKER_SIZE).min(resolution.width);
        let y_end = (y0 + MARKER_SIZE).min(resolution.height);
        let stride = resolution.stride();
        for y in y0..y_end {
            let row = y as usize * stride;
            for x in x0..x_end {
                let idx = row + x as usize * CHANNELS as usize;
                bytes[idx..idx + 3].copy_from_slice(&MARKER_COLOR);
            }
        }
    }

    /// Produce one frame, pacing to the configured rate. Returns `false`
    /// when there is no work buffer to render into.
    pub(crate) fn produce(&mut self, production: &Production) -> bool {
        self.pacer.wait();

        let mut guard = production.work();
        let Some(work) = guard.as_mut() else {
            return false;
        };
        let resolution = work.resolution;
        self.render(&mut work.bytes, resolution);
        production.deliver(work);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::driver::NoDevice;

    #[test]
    fn render_fills_background_and_marker() {
        let res = Resolution::new(320, 240);
        let mut bytes = vec![0u8; res.frame_len()];
        let mut sim = SimulatedSource::new(30);

        sim.render(&mut bytes, res);
        assert_eq!(sim.tick(), 1);
        let frame = Frame::copy_from(res, &bytes, 1);
        assert_eq!(frame.pixel(0, 0), Some([1, 1, 1]));
        assert_eq!(frame.pixel(100, 100), Some(MARKER_COLOR));
        assert_eq!(frame.pixel(199, 199), Some(MARKER_COLOR));
        assert_eq!(frame.pixel(200, 200), Some([1, 1, 1]));
        assert_eq!(frame.pixel(99, 150), Some([1, 1, 1]));
    }

    #[test]
    fn background_cycles_modulo_255() {
        let res = Resolution::new(4, 4);
        let mut bytes = vec![0u8; res.frame_len()];
        let mut sim = SimulatedSource::new(30);
        for _ in 0..255 {
            sim.render(&mut bytes, res);
        }
        assert!(bytes.iter().all(|&b| b == 0));
        sim.render(&mut bytes, res);
        assert!(bytes.iter().all(|&b| b == 1));
    }

    #[test]
    fn marker_is_clipped_to_small_frames() {
        let res = Resolution::new(150, 120);
        let mut bytes = vec![0u8; res.frame_len()];
        let mut sim = SimulatedSource::new(30);
        sim.render(&mut bytes, res);
        let frame = Frame::copy_from(res, &bytes, 1);
        assert_eq!(frame.pixel(149, 119), Some(MARKER_COLOR));
    }

    #[test]
    fn render_ignores_mismatched_buffer() {
        let mut bytes = [0u8; 10];
        let mut sim = SimulatedSource::new(30);
        sim.render(&mut bytes, Resolution::new(768, 576));
        assert_eq!(bytes, [0u8; 10]);
        assert_eq!(sim.tick(), 0);
    }

    #[test]
    fn pacer_spaces_calls() {
        let mut pacer = Pacer::new(Duration::from_millis(20));
        let start = Instant::now();
        pacer.wait();
        assert!(start.elapsed() < Duration::from_millis(20));
        pacer.wait();
        pacer.wait();
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn pacer_reset_skips_wait() {
        let mut pacer = Pacer::new(Duration::from_secs(5));
        pacer.wait();
        pacer.reset();
        let start = Instant::now();
        pacer.wait();
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn produce_without_work_buffer_is_noop() {
        let production = Production::new(2);
        let mut sim = SimulatedSource::new(1000);
        assert!(!sim.produce(&production));
        assert!(production.frames().is_empty());
    }

    #[test]
    fn callback_without_work_buffer_returns_false() {
        let production = Arc::new(Production::new(2));
        let source = HardwareSource::new(Arc::new(NoDevice), DeviceHandle(1));
        let callback = source.completion_callback(Arc::clone(&production));
        assert!(!callback(0));
        assert!(production.frames().is_empty());
    }

    #[test]
    fn produce_queues_independent_copies() {
        let production = Production::new(2);
        production.allocate(Resolution::new(8, 8));
        let mut sim = SimulatedSource::new(1000);
        assert!(sim.produce(&production));
        assert!(sim.produce(&production));

        let newest = production.frames().take().unwrap();
        let older = production.frames().take().unwrap();
        assert_eq!(newest.sequence(), 2);
        assert_eq!(newest.pixel(0, 0), Some([2, 2, 2]));
        assert_eq!(older.pixel(0, 0), Some([1, 1, 1]));
    }
}
