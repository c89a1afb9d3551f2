//! okcapture demo consumer: polls frames from a camera and reports the rate.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use color_eyre::{eyre::eyre, Result};
use tracing::{info, warn};

use okcapture::{utils, Camera, Config, Frame};

/// Sleep between polls when no frame is ready.
const IDLE_POLL: Duration = Duration::from_millis(1);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    utils::init_tracing("okcapture=debug");

    info!("okcapture launching...");

    // Load configuration
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = Config::load(config_path.as_deref())?;
    okcapture::CONFIG.store(Arc::new(config.clone()));

    let mut camera = Camera::new();
    camera.open();
    info!("Camera mode: {:?}", camera.mode());

    if let Some(us) = config.capture.exposure_us {
        camera.set_exposure(us);
    }
    if let Some(fps) = config.capture.fps {
        camera.set_fps(fps);
    }

    if !camera.start() {
        camera.close();
        return Err(eyre!("Failed to start capture"));
    }

    let stop = Arc::new(AtomicBool::new(false));
    let max_frames = config.output.max_frames;

    // Polling blocks in simulated mode, so keep it off the async workers.
    let poll = {
        let stop = Arc::clone(&stop);
        tokio::task::spawn_blocking(move || poll_frames(camera, &stop, max_frames))
    };
    tokio::pin!(poll);

    let (mut camera, received, last, elapsed) = tokio::select! {
        res = &mut poll => res?,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted");
            stop.store(true, Ordering::Relaxed);
            poll.await?
        }
    };

    let fps = if elapsed.as_secs_f64() > 0.0 {
        received as f64 / elapsed.as_secs_f64()
    } else {
        0.0
    };
    let stats = camera.stats();
    info!(
        "Capture finished: {} frames in {:.2?} ({:.2} fps), {} evicted",
        received, elapsed, fps, stats.evicted
    );

    camera.stop();
    camera.close();

    match (last, config.output.snapshot_path.as_deref()) {
        (Some(frame), Some(path)) => utils::save_snapshot(&frame, path)?,
        (None, Some(_)) => warn!("No frame received, snapshot skipped"),
        _ => {}
    }

    info!("okcapture shutting down");
    Ok(())
}

fn poll_frames(
    mut camera: Camera,
    stop: &AtomicBool,
    max_frames: Option<u64>,
) -> (Camera, u64, Option<Frame>, Duration) {
    let start = Instant::now();
    let mut received = 0u64;
    let mut last = None;

    while !stop.load(Ordering::Relaxed) && max_frames.map_or(true, |max| received < max) {
        match camera.get_image() {
            Some(frame) => {
                received += 1;
                if received % 100 == 0 {
                    info!(
                        "Received {} frames (latest #{}, {:.1?} old)",
                        received,
                        frame.sequence(),
                        frame.captured_at().elapsed()
                    );
                }
                last = Some(frame);
            }
            None => std::thread::sleep(IDLE_POLL),
        }
    }

    (camera, received, last, start.elapsed())
}
