#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::anyhow;
use facematch::capture::FrameSource;
use facematch::{DetectionMode, EmbeddingExtractor, ExtractionError};
use image::{Rgb, RgbImage};

/// Embeds an image as its mean colour. A pure black image counts as
/// "no face".
#[derive(Default)]
pub struct ColorExtractor {
    pub seen: Vec<PathBuf>,
}

impl EmbeddingExtractor for ColorExtractor {
    fn extract(&mut self, image: &Path, mode: DetectionMode) -> Result<Vec<f32>, ExtractionError> {
        self.seen.push(image.to_path_buf());
        let img = image::open(image)
            .map_err(|source| ExtractionError::UnreadableImage {
                path: image.to_path_buf(),
                source,
            })?
            .to_rgb8();

        let pixels = (img.width() * img.height()).max(1) as f32;
        let mut mean = [0.0f32; 3];
        for p in img.pixels() {
            for c in 0..3 {
                mean[c] += p[c] as f32 / 255.0;
            }
        }
        let mean: Vec<f32> = mean.iter().map(|v| v / pixels).collect();

        if mode == DetectionMode::Enforce && mean.iter().all(|&v| v == 0.0) {
            return Err(ExtractionError::NoFace {
                path: image.to_path_buf(),
            });
        }
        Ok(mean)
    }
}

pub fn solid(rgb: [u8; 3]) -> RgbImage {
    RgbImage::from_pixel(8, 8, Rgb(rgb))
}

pub fn write_png(dir: &Path, name: &str, rgb: [u8; 3]) -> PathBuf {
    let path = dir.join(name);
    solid(rgb)
        .save_with_format(&path, image::ImageFormat::Png)
        .unwrap();
    path
}

/// Camera stand-in that serves one prepared frame.
pub struct StillCamera {
    pub frame: Option<RgbImage>,
    pub warmed: bool,
}

impl StillCamera {
    pub fn new(rgb: [u8; 3]) -> Self {
        Self {
            frame: Some(solid(rgb)),
            warmed: false,
        }
    }

    pub fn broken() -> Self {
        Self {
            frame: None,
            warmed: false,
        }
    }
}

impl FrameSource for StillCamera {
    fn warm_up(&mut self, _delay: Duration) -> anyhow::Result<()> {
        self.warmed = true;
        Ok(())
    }

    fn frame(&mut self) -> anyhow::Result<RgbImage> {
        self.frame.take().ok_or_else(|| anyhow!("device returned no frame"))
    }
}
