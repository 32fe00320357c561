//! Query image acquisition from a camera.
//!
//! A captured frame lives in a uniquely named PNG under the OS temp dir for
//! exactly as long as its [`CapturedImage`] guard.

use std::path::{Path, PathBuf};
use std::time::Duration;

use facematch_vision::Camera;
use image::RgbImage;
use uuid::Uuid;

use crate::error::CaptureError;

/// Anything that can hand out frames.
pub trait FrameSource {
    /// Let the device settle for `delay` before the real capture.
    fn warm_up(&mut self, delay: Duration) -> anyhow::Result<()>;

    fn frame(&mut self) -> anyhow::Result<RgbImage>;
}

impl<S: FrameSource + ?Sized> FrameSource for &mut S {
    fn warm_up(&mut self, delay: Duration) -> anyhow::Result<()> {
        (**self).warm_up(delay)
    }

    fn frame(&mut self) -> anyhow::Result<RgbImage> {
        (**self).frame()
    }
}

impl FrameSource for Camera {
    fn warm_up(&mut self, delay: Duration) -> anyhow::Result<()> {
        Camera::warm_up(self, delay).map(|_| ())
    }

    fn frame(&mut self) -> anyhow::Result<RgbImage> {
        Camera::frame(self)
    }
}

pub fn open_camera(device: &str) -> Result<Camera, CaptureError> {
    Camera::open(device).map_err(|source| CaptureError::DeviceUnavailable {
        device: device.to_string(),
        source,
    })
}

/// A frame written to disk. The file is removed when this is dropped.
#[derive(Debug)]
pub struct CapturedImage {
    path: PathBuf,
}

impl CapturedImage {
    /// Write `frame` to a fresh temporary PNG.
    pub fn write(frame: &RgbImage) -> Result<Self, CaptureError> {
        let path = std::env::temp_dir().join(format!("facematch-capture-{}.png", Uuid::new_v4()));
        // from here on the guard owns whatever part of the file got written
        let captured = Self { path };
        frame
            .save_with_format(&captured.path, image::ImageFormat::Png)
            .map_err(|source| CaptureError::Write {
                path: captured.path.clone(),
                source,
            })?;
        Ok(captured)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for CapturedImage {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => log::info!("Temporary image '{}' has been deleted", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => log::warn!(
                "Could not delete temporary image '{}': {}",
                self.path.display(),
                e
            ),
        }
    }
}

/// Warm the source up, grab one frame and park it in a temporary file.
pub fn capture<S: FrameSource + ?Sized>(
    source: &mut S,
    warm_up: Duration,
) -> Result<CapturedImage, CaptureError> {
    if !warm_up.is_zero() {
        log::info!(
            "Camera opened. Capturing in {:.1}s...",
            warm_up.as_secs_f32()
        );
        source.warm_up(warm_up).map_err(CaptureError::NoFrame)?;
    }
    let frame = source.frame().map_err(CaptureError::NoFrame)?;
    let captured = CapturedImage::write(&frame)?;
    log::info!("Image captured and saved to {}", captured.path().display());
    Ok(captured)
}
