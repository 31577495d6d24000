//! Decoded video frames.
//!
//! - `Frame`: owned RGB24 pixel buffer with its dimensions.
//!
//! Sources produce frames, the monitor may downscale them for edge execution,
//! and the analyzer resizes a copy to the detector's fixed input shape.
//! Frames are never retained past the frame that produced them.

use anyhow::{anyhow, Result};
use image::imageops::{self, FilterType};
use image::{ImageBuffer, Rgb};

/// Bytes per pixel for the RGB24 layout every source emits.
pub const RGB_CHANNELS: usize = 3;

/// One decoded RGB frame.
pub struct Frame {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl Frame {
    /// Wrap an RGB24 buffer. Fails when the buffer length does not match the
    /// dimensions.
    pub fn from_rgb(data: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        let expected = expected_len(width, height)?;
        if data.len() != expected {
            return Err(anyhow!(
                "expected {} RGB bytes for {}x{}, received {}",
                expected,
                width,
                height,
                data.len()
            ));
        }
        Ok(Self {
            data,
            width,
            height,
        })
    }

    /// Solid-color frame, used by the synthetic source and tests.
    pub fn filled(width: u32, height: u32, rgb: [u8; 3]) -> Result<Self> {
        let len = expected_len(width, height)?;
        let data = rgb.iter().copied().cycle().take(len).collect();
        Self::from_rgb(data, width, height)
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    /// Return a copy scaled to `width`x`height`. Same-size requests copy the
    /// buffer without resampling.
    pub fn resized(&self, width: u32, height: u32) -> Result<Frame> {
        if width == 0 || height == 0 {
            return Err(anyhow!("cannot resize frame to {}x{}", width, height));
        }
        if width == self.width && height == self.height {
            return Frame::from_rgb(self.data.clone(), width, height);
        }
        let view: ImageBuffer<Rgb<u8>, &[u8]> =
            ImageBuffer::from_raw(self.width, self.height, self.data.as_slice())
                .ok_or_else(|| anyhow!("frame buffer does not match its dimensions"))?;
        let scaled = imageops::resize(&view, width, height, FilterType::Triangle);
        Frame::from_rgb(scaled.into_raw(), width, height)
    }
}

fn expected_len(width: u32, height: u32) -> Result<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(RGB_CHANNELS))
        .ok_or_else(|| anyhow!("frame dimensions overflow"))
}
