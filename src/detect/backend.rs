use anyhow::Result;

use crate::detect::result::RawDetections;

/// Detector backend trait.
///
/// A backend wraps a fixed-shape object-detection model. The analyzer resizes
/// every processed frame to `input_shape()` before calling `detect`, so
/// implementations may reject any other size.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Model input size as `(width, height)`.
    fn input_shape(&self) -> (u32, u32);

    /// Run detection on an RGB24 frame of exactly `input_shape()` pixels.
    ///
    /// Boxes come back normalized as `[ymin, xmin, ymax, xmax]`.
    fn detect(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<RawDetections>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
