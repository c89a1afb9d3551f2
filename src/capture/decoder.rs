use jpeg_decoder::{Decoder, PixelFormat as JpegPixelFormat};
use v4l::FourCC;

use crate::capture::frame::Resolution;
use crate::error::DriverError;

/// Raw pixel formats a V4L2 device may deliver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Rgb24,
    Yuyv,
    Mjpeg,
}

impl PixelFormat {
    /// Preference order when negotiating with a device.
    pub const PREFERRED: [PixelFormat; 3] =
        [PixelFormat::Rgb24, PixelFormat::Yuyv, PixelFormat::Mjpeg];

    pub fn fourcc(self) -> FourCC {
        match self {
            PixelFormat::Rgb24 => FourCC::new(b"RGB3"),
            PixelFormat::Yuyv => FourCC::new(b"YUYV"),
            PixelFormat::Mjpeg => FourCC::new(b"MJPG"),
        }
    }

    pub fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        Self::PREFERRED.into_iter().find(|f| f.fourcc() == fourcc)
    }
}

/// Decode one raw frame into RGB24.
pub fn decode_frame(
    data: &[u8],
    format: PixelFormat,
    resolution: Resolution,
) -> Result<Vec<u8>, DriverError> {
    let rgb = match format {
        PixelFormat::Rgb24 => data.to_vec(),
        PixelFormat::Yuyv => yuyv_to_rgb(data),
        PixelFormat::Mjpeg => {
            let mut decoder = Decoder::new(data);
            let pixels = decoder
                .decode()
                .map_err(|e| DriverError::Decode(e.to_string()))?;
            match decoder.info().map(|info| info.pixel_format) {
                Some(JpegPixelFormat::RGB24) => pixels,
                Some(JpegPixelFormat::L8) => pixels.iter().flat_map(|&l| [l, l, l]).collect(),
                other => {
                    return Err(DriverError::UnsupportedFormat(format!("jpeg {:?}", other)));
                }
            }
        }
    };

    if rgb.len() < resolution.frame_len() {
        return Err(DriverError::SizeMismatch {
            expected: resolution.frame_len(),
            actual: rgb.len(),
        });
    }
    Ok(rgb)
}

/// BT.601 YUYV 4:2:2 to RGB24.
fn yuyv_to_rgb(data: &[u8]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(data.len() / 2 * 3);
    for chunk in data.chunks_exact(4) {
        let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
        rgb.extend_from_slice(&yuv_to_rgb(y0, u, v));
        rgb.extend_from_slice(&yuv_to_rgb(y1, u, v));
    }
    rgb
}

fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    let clamp = |x: i32| ((x + 128) >> 8).clamp(0, 255) as u8;
    [
        clamp(298 * c + 409 * e),
        clamp(298 * c - 100 * d - 208 * e),
        clamp(298 * c + 516 * d),
    ]
}
