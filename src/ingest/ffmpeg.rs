//! FFmpeg-backed decoding for video files, RTSP streams and V4L2 cameras.
//!
//! Every stream is decoded and converted to RGB24 at its native resolution;
//! downscaling is left to the monitor.

use anyhow::{anyhow, Context, Result};
use ffmpeg_next as ffmpeg;
use std::time::{Duration, Instant};

use super::{SourceKind, SourceStats};
use crate::frame::{Frame, RGB_CHANNELS};

const DEFAULT_CAMERA_DEVICE: &str = "/dev/video0";
const CAMERA_INPUT_FORMAT: &str = "v4l2";
const HEALTH_GRACE: Duration = Duration::from_secs(5);

pub(super) struct FfmpegSource {
    locator: String,
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    max_frames: Option<u64>,
    frame_count: u64,
    eof_sent: bool,
    connected_at: Option<Instant>,
    last_frame_at: Option<Instant>,
    last_error: Option<String>,
}

impl FfmpegSource {
    pub(super) fn open(kind: SourceKind, locator: &str, max_frames: Option<u64>) -> Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;
        let (locator, input) = match kind {
            SourceKind::Video => {
                let input = ffmpeg::format::input(&locator)
                    .with_context(|| format!("failed to open video file '{}'", locator))?;
                (locator.to_string(), input)
            }
            SourceKind::Rtsp => {
                let mut options = ffmpeg::Dictionary::new();
                options.set("rtsp_transport", "tcp");
                let input = ffmpeg::format::input_with_dictionary(&locator, options)
                    .with_context(|| format!("failed to open RTSP stream '{}'", locator))?;
                (locator.to_string(), input)
            }
            SourceKind::Camera => {
                let device = camera_device(locator);
                let input = open_camera(&device)?;
                (device, input)
            }
        };

        let stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| anyhow!("'{}' has no video stream", locator))?;
        let stream_index = stream.index();
        let context = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
            .context("load video decoder parameters")?;
        let decoder = context
            .decoder()
            .video()
            .context("open ffmpeg video decoder")?;

        let scaler = ffmpeg::software::scaling::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::format::Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::Flags::BILINEAR,
        )
        .context("create ffmpeg scaler")?;

        Ok(Self {
            locator,
            input,
            stream_index,
            decoder,
            scaler,
            max_frames,
            frame_count: 0,
            eof_sent: false,
            connected_at: None,
            last_frame_at: None,
            last_error: None,
        })
    }

    pub(super) fn connect(&mut self) -> Result<()> {
        self.connected_at = Some(Instant::now());
        log::info!(
            "FrameSource: connected to {} (ffmpeg {}x{})",
            self.locator,
            self.decoder.width(),
            self.decoder.height()
        );
        Ok(())
    }

    pub(super) fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self
            .max_frames
            .is_some_and(|max| self.frame_count >= max)
        {
            return Ok(None);
        }
        match self.decode_next() {
            Ok(frame) => Ok(frame),
            Err(e) => {
                self.last_error = Some(format!("{:#}", e));
                Err(e)
            }
        }
    }

    fn decode_next(&mut self) -> Result<Option<Frame>> {
        let mut decoded = ffmpeg::frame::Video::empty();

        // Frames left over from the previous packet come first.
        if self.decoder.receive_frame(&mut decoded).is_ok() {
            return self.convert(&decoded).map(Some);
        }

        while let Some((stream, packet)) = self.input.packets().next() {
            if stream.index() != self.stream_index {
                continue;
            }
            self.decoder
                .send_packet(&packet)
                .context("send packet to ffmpeg decoder")?;
            if self.decoder.receive_frame(&mut decoded).is_ok() {
                return self.convert(&decoded).map(Some);
            }
        }

        if !self.eof_sent {
            self.eof_sent = true;
            self.decoder.send_eof().context("flush ffmpeg decoder")?;
        }
        if self.decoder.receive_frame(&mut decoded).is_ok() {
            return self.convert(&decoded).map(Some);
        }
        log::info!(
            "FrameSource: {} ended after {} frames",
            self.locator,
            self.frame_count
        );
        Ok(None)
    }

    fn convert(&mut self, decoded: &ffmpeg::frame::Video) -> Result<Frame> {
        let mut rgb = ffmpeg::frame::Video::empty();
        self.scaler
            .run(decoded, &mut rgb)
            .context("scale frame to RGB")?;
        let pixels = frame_to_pixels(&rgb)?;
        self.frame_count += 1;
        self.last_frame_at = Some(Instant::now());
        Frame::from_rgb(pixels, rgb.width(), rgb.height())
    }

    pub(super) fn is_healthy(&self) -> bool {
        if self.last_error.is_some() {
            return false;
        }
        let Some(connected_at) = self.connected_at else {
            return false;
        };
        let reference = self.last_frame_at.unwrap_or(connected_at);
        reference.elapsed() <= HEALTH_GRACE
    }

    pub(super) fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            locator: self.locator.clone(),
        }
    }
}

/// `""` is the default device, a bare index `N` is `/dev/videoN`.
fn camera_device(locator: &str) -> String {
    let locator = locator.trim();
    if locator.is_empty() {
        return DEFAULT_CAMERA_DEVICE.to_string();
    }
    match locator.parse::<u32>() {
        Ok(index) => format!("/dev/video{}", index),
        Err(_) => locator.to_string(),
    }
}

fn open_camera(device: &str) -> Result<ffmpeg::format::context::Input> {
    ffmpeg::device::register_all();
    let format = ffmpeg::device::input::video()
        .find(|format| format.name() == CAMERA_INPUT_FORMAT)
        .ok_or_else(|| anyhow!("ffmpeg was built without the {} input device", CAMERA_INPUT_FORMAT))?;
    let context = ffmpeg::format::open_with(
        &device,
        &ffmpeg::format::Format::Input(format),
        ffmpeg::Dictionary::new(),
    )
    .with_context(|| format!("failed to open camera '{}'", device))?;
    match context {
        ffmpeg::format::context::Context::Input(input) => Ok(input),
        ffmpeg::format::context::Context::Output(_) => {
            Err(anyhow!("camera '{}' opened as an output context", device))
        }
    }
}

fn frame_to_pixels(frame: &ffmpeg::frame::Video) -> Result<Vec<u8>> {
    let width = frame.width() as usize;
    let height = frame.height() as usize;
    let row_bytes = width * RGB_CHANNELS;
    let stride = frame.stride(0);
    let data = frame.data(0);

    if stride == row_bytes {
        return data
            .get(..row_bytes * height)
            .map(<[u8]>::to_vec)
            .context("ffmpeg frame is shorter than its dimensions");
    }

    let mut pixels = Vec::with_capacity(row_bytes * height);
    for row in 0..height {
        let start = row * stride;
        pixels.extend_from_slice(
            data.get(start..start + row_bytes)
                .context("ffmpeg frame row is out of bounds")?,
        );
    }
    Ok(pixels)
}
