use std::time::Instant;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Interleaved bytes per pixel (RGB24).
pub const CHANNELS: u8 = 3;

/// Frame dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Size of one RGB24 frame at this resolution.
    pub fn frame_len(&self) -> usize {
        self.width as usize * self.height as usize * CHANNELS as usize
    }

    /// Row stride in bytes.
    pub fn stride(&self) -> usize {
        self.width as usize * CHANNELS as usize
    }
}

/// One complete RGB24 capture.
///
/// A frame is immutable once built. It is always a copy of the producer's
/// work buffer, so no two owners ever see the same pixels change.
#[derive(Debug, Clone)]
pub struct Frame {
    resolution: Resolution,
    pixels: Bytes,
    sequence: u64,
    captured_at: Instant,
}

impl Frame {
    /// Copy `pixels` into a new frame. `pixels` must hold exactly one frame.
    pub(crate) fn copy_from(resolution: Resolution, pixels: &[u8], sequence: u64) -> Self {
        debug_assert_eq!(pixels.len(), resolution.frame_len());
        Self {
            resolution,
            pixels: Bytes::copy_from_slice(pixels),
            sequence,
            captured_at: Instant::now(),
        }
    }

    pub fn width(&self) -> u32 {
        self.resolution.width
    }

    pub fn height(&self) -> u32 {
        self.resolution.height
    }

    pub fn channels(&self) -> u8 {
        CHANNELS
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    /// `[height, width, channels]`, the row-major array shape of the pixels.
    pub fn shape(&self) -> [usize; 3] {
        [
            self.resolution.height as usize,
            self.resolution.width as usize,
            CHANNELS as usize,
        ]
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Per-session production counter, starting at 1.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }

    /// RGB value at pixel `(x, y)`, or `None` outside the frame.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.resolution.width || y >= self.resolution.height {
            return None;
        }
        let idx = y as usize * self.resolution.stride() + x as usize * CHANNELS as usize;
        Some([self.pixels[idx], self.pixels[idx + 1], self.pixels[idx + 2]])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_is_independent_of_source() {
        let res = Resolution::new(2, 2);
        let mut work = vec![7u8; res.frame_len()];
        let frame = Frame::copy_from(res, &work, 1);
        work.fill(0);
        assert!(frame.pixels().iter().all(|&b| b == 7));
    }

    #[test]
    fn shape_is_height_width_channels() {
        let res = Resolution::new(4, 3);
        let frame = Frame::copy_from(res, &vec![0; res.frame_len()], 1);
        assert_eq!(frame.shape(), [3, 4, 3]);
        assert_eq!(frame.pixels().len(), 36);
    }

    #[test]
    fn pixel_lookup() {
        let res = Resolution::new(2, 2);
        let mut data = vec![0u8; res.frame_len()];
        // pixel (1, 1)
        data[9..12].copy_from_slice(&[1, 2, 3]);
        let frame = Frame::copy_from(res, &data, 5);
        assert_eq!(frame.pixel(1, 1), Some([1, 2, 3]));
        assert_eq!(frame.pixel(2, 0), None);
        assert_eq!(frame.sequence(), 5);
    }
}
