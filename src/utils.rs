use std::path::Path;

use color_eyre::{eyre::eyre, Result};
use image::RgbImage;
use tracing::info;

use crate::Frame;

/// Install the fmt subscriber. `RUST_LOG` overrides `default_filter`.
pub fn init_tracing(default_filter: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();
}

/// Write `frame` as an RGB PNG.
pub fn save_snapshot(frame: &Frame, path: &Path) -> Result<()> {
    let image = RgbImage::from_raw(frame.width(), frame.height(), frame.pixels().to_vec())
        .ok_or_else(|| eyre!("Frame buffer does not match {}x{}", frame.width(), frame.height()))?;
    image.save(path)?;
    info!("Saved snapshot to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::Resolution;

    #[test]
    fn snapshot_round_trips_through_png() {
        let res = Resolution::new(3, 2);
        let pixels: Vec<u8> = (0..res.frame_len() as u8).collect();
        let frame = Frame::copy_from(res, &pixels, 1);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.png");
        save_snapshot(&frame, &path).unwrap();

        let loaded = image::open(&path).unwrap().to_rgb8();
        assert_eq!(loaded.dimensions(), (3, 2));
        assert_eq!(loaded.as_raw(), &pixels);
    }
}
