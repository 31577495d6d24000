//! Frame sources.
//!
//! Every source yields owned RGB24 `Frame`s in stream order:
//! - video files and RTSP streams (feature: ingest-ffmpeg)
//! - local cameras through the V4L2 input device (feature: ingest-ffmpeg)
//! - `stub://` synthetic streams of any kind, for tests and demos
//!
//! `next_frame` returns `Ok(None)` at end of stream. A decode error is
//! returned as `Err` and ends the run the same way.

#[cfg(feature = "ingest-ffmpeg")]
mod ffmpeg;
mod synthetic;

use anyhow::{anyhow, Result};
use std::fmt;
use std::str::FromStr;

use crate::config::SourceSettings;
use crate::frame::Frame;
#[cfg(feature = "ingest-ffmpeg")]
use ffmpeg::FfmpegSource;
use synthetic::SyntheticSource;

pub const STUB_SCHEME: &str = "stub://";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceKind {
    Video,
    Rtsp,
    Camera,
}

impl FromStr for SourceKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "video" | "file" => Ok(SourceKind::Video),
            "rtsp" => Ok(SourceKind::Rtsp),
            "camera" | "webcam" => Ok(SourceKind::Camera),
            other => Err(anyhow!(
                "source kind must be video, rtsp or camera (got '{}')",
                other
            )),
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Video => write!(f, "video"),
            SourceKind::Rtsp => write!(f, "rtsp"),
            SourceKind::Camera => write!(f, "camera"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub locator: String,
}

pub struct FrameSource {
    kind: SourceKind,
    backend: SourceBackend,
}

enum SourceBackend {
    Synthetic(SyntheticSource),
    #[cfg(feature = "ingest-ffmpeg")]
    Ffmpeg(FfmpegSource),
}

impl FrameSource {
    /// Open the source described by `settings`. The stream is not read until
    /// `connect`.
    pub fn open(settings: &SourceSettings) -> Result<Self> {
        validate_locator(settings.kind, &settings.locator)?;
        let backend = if settings.locator.starts_with(STUB_SCHEME) {
            SourceBackend::Synthetic(SyntheticSource::new(
                &settings.locator,
                settings.max_frames,
            )?)
        } else {
            open_decoder(settings)?
        };
        Ok(Self {
            kind: settings.kind,
            backend,
        })
    }

    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    pub fn connect(&mut self) -> Result<()> {
        match &mut self.backend {
            SourceBackend::Synthetic(source) => source.connect(),
            #[cfg(feature = "ingest-ffmpeg")]
            SourceBackend::Ffmpeg(source) => source.connect(),
        }
    }

    /// Next frame, or `None` once the stream has ended.
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        match &mut self.backend {
            SourceBackend::Synthetic(source) => source.next_frame(),
            #[cfg(feature = "ingest-ffmpeg")]
            SourceBackend::Ffmpeg(source) => source.next_frame(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        match &self.backend {
            SourceBackend::Synthetic(source) => source.is_healthy(),
            #[cfg(feature = "ingest-ffmpeg")]
            SourceBackend::Ffmpeg(source) => source.is_healthy(),
        }
    }

    pub fn stats(&self) -> SourceStats {
        match &self.backend {
            SourceBackend::Synthetic(source) => source.stats(),
            #[cfg(feature = "ingest-ffmpeg")]
            SourceBackend::Ffmpeg(source) => source.stats(),
        }
    }
}

#[cfg(feature = "ingest-ffmpeg")]
fn open_decoder(settings: &SourceSettings) -> Result<SourceBackend> {
    Ok(SourceBackend::Ffmpeg(FfmpegSource::open(
        settings.kind,
        &settings.locator,
        settings.max_frames,
    )?))
}

#[cfg(not(feature = "ingest-ffmpeg"))]
fn open_decoder(settings: &SourceSettings) -> Result<SourceBackend> {
    Err(anyhow!(
        "{} source '{}' requires the ingest-ffmpeg feature",
        settings.kind,
        settings.locator
    ))
}

fn validate_locator(kind: SourceKind, locator: &str) -> Result<()> {
    let locator = locator.trim();
    if locator.starts_with(STUB_SCHEME) {
        return Ok(());
    }
    match kind {
        SourceKind::Video => {
            if locator.is_empty() {
                return Err(anyhow!("video source needs a file path"));
            }
            if locator.contains("://") {
                return Err(anyhow!(
                    "video source must be a local path; use kind rtsp for '{}'",
                    locator
                ));
            }
        }
        SourceKind::Rtsp => {
            if !(locator.starts_with("rtsp://") || locator.starts_with("rtsps://")) {
                return Err(anyhow!(
                    "rtsp source must be an rtsp:// or rtsps:// URL (got '{}')",
                    locator
                ));
            }
        }
        // Empty selects the default device.
        SourceKind::Camera => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(kind: SourceKind, locator: &str, max_frames: Option<u64>) -> SourceSettings {
        SourceSettings {
            kind,
            locator: locator.to_string(),
            max_frames,
        }
    }

    #[test]
    fn kind_parses_aliases() {
        assert_eq!("FILE".parse::<SourceKind>().unwrap(), SourceKind::Video);
        assert_eq!("rtsp".parse::<SourceKind>().unwrap(), SourceKind::Rtsp);
        assert_eq!("webcam".parse::<SourceKind>().unwrap(), SourceKind::Camera);
        assert!("screen".parse::<SourceKind>().is_err());
    }

    #[test]
    fn stub_source_ends_after_max_frames() {
        let mut source =
            FrameSource::open(&settings(SourceKind::Rtsp, "stub://lobby", Some(2))).unwrap();
        source.connect().unwrap();
        assert!(source.next_frame().unwrap().is_some());
        assert!(source.next_frame().unwrap().is_some());
        assert!(source.next_frame().unwrap().is_none());
        assert_eq!(
            source.stats(),
            SourceStats {
                frames_captured: 2,
                locator: "stub://lobby".to_string()
            }
        );
    }

    #[test]
    fn video_rejects_urls() {
        let err = FrameSource::open(&settings(SourceKind::Video, "http://cam/feed.mp4", None))
            .err()
            .unwrap();
        assert!(err.to_string().contains("local path"));
    }

    #[test]
    fn rtsp_requires_rtsp_scheme() {
        assert!(
            FrameSource::open(&settings(SourceKind::Rtsp, "/tmp/clip.mp4", None)).is_err()
        );
    }

    #[cfg(not(feature = "ingest-ffmpeg"))]
    #[test]
    fn real_sources_need_decoder_feature() {
        let err = FrameSource::open(&settings(SourceKind::Video, "/tmp/clip.mp4", None))
            .err()
            .unwrap();
        assert!(err.to_string().contains("ingest-ffmpeg"));
    }
}
