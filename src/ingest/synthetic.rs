//! Synthetic `stub://` source.
//!
//! Frames default to 640x480; `stub://name?size=WxH` picks another size.
//! The pattern shifts every frame and the scene changes every 50 frames so
//! consecutive frames are never identical.

use anyhow::{anyhow, Context, Result};
use url::Url;

use super::SourceStats;
use crate::frame::Frame;

const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const SCENE_PERIOD: u64 = 50;

pub(super) struct SyntheticSource {
    locator: String,
    width: u32,
    height: u32,
    max_frames: Option<u64>,
    frame_count: u64,
    scene_state: u8,
    connected: bool,
}

impl SyntheticSource {
    pub(super) fn new(locator: &str, max_frames: Option<u64>) -> Result<Self> {
        let url = Url::parse(locator).with_context(|| format!("invalid stub locator '{}'", locator))?;
        let mut width = DEFAULT_WIDTH;
        let mut height = DEFAULT_HEIGHT;
        for (key, value) in url.query_pairs() {
            if key == "size" {
                (width, height) = parse_size(&value)?;
            }
        }
        Ok(Self {
            locator: locator.to_string(),
            width,
            height,
            max_frames,
            frame_count: 0,
            scene_state: 0,
            connected: false,
        })
    }

    pub(super) fn connect(&mut self) -> Result<()> {
        self.connected = true;
        log::info!(
            "FrameSource: connected to {} (synthetic {}x{})",
            self.locator,
            self.width,
            self.height
        );
        Ok(())
    }

    pub(super) fn next_frame(&mut self) -> Result<Option<Frame>> {
        if !self.connected {
            return Err(anyhow!("synthetic source not connected; call connect() first"));
        }
        if self
            .max_frames
            .is_some_and(|max| self.frame_count >= max)
        {
            return Ok(None);
        }
        self.frame_count += 1;
        let pixels = self.generate_pixels();
        Frame::from_rgb(pixels, self.width, self.height).map(Some)
    }

    fn generate_pixels(&mut self) -> Vec<u8> {
        if self.frame_count % SCENE_PERIOD == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }
        let len = self.width as usize * self.height as usize * crate::frame::RGB_CHANNELS;
        (0..len)
            .map(|i| ((i as u64 + self.frame_count + self.scene_state as u64) % 256) as u8)
            .collect()
    }

    pub(super) fn is_healthy(&self) -> bool {
        self.connected
    }

    pub(super) fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            locator: self.locator.clone(),
        }
    }
}

fn parse_size(value: &str) -> Result<(u32, u32)> {
    let (w, h) = value
        .split_once('x')
        .ok_or_else(|| anyhow!("stub size must be WxH (got '{}')", value))?;
    let width: u32 = w.parse().with_context(|| format!("invalid stub width '{}'", w))?;
    let height: u32 = h.parse().with_context(|| format!("invalid stub height '{}'", h))?;
    if width == 0 || height == 0 {
        return Err(anyhow!("stub size must be non-zero"));
    }
    Ok((width, height))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_query_overrides_default() {
        let mut source = SyntheticSource::new("stub://hall?size=64x48", None).unwrap();
        source.connect().unwrap();
        let frame = source.next_frame().unwrap().unwrap();
        assert_eq!((frame.width, frame.height), (64, 48));
        assert_eq!(frame.pixels().len(), 64 * 48 * 3);
    }

    #[test]
    fn default_size_is_vga() {
        let source = SyntheticSource::new("stub://hall", None).unwrap();
        assert_eq!((source.width, source.height), (640, 480));
    }

    #[test]
    fn bad_size_is_rejected() {
        assert!(SyntheticSource::new("stub://hall?size=64", None).is_err());
        assert!(SyntheticSource::new("stub://hall?size=0x48", None).is_err());
    }

    #[test]
    fn consecutive_frames_differ() {
        let mut source = SyntheticSource::new("stub://hall?size=8x8", None).unwrap();
        source.connect().unwrap();
        let a = source.next_frame().unwrap().unwrap();
        let b = source.next_frame().unwrap().unwrap();
        assert_ne!(a.pixels(), b.pixels());
    }

    #[test]
    fn reading_before_connect_fails() {
        let mut source = SyntheticSource::new("stub://hall", Some(1)).unwrap();
        assert!(source.next_frame().is_err());
    }
}
