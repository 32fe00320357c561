use std::path::Path;

use anyhow::Context;
use facematch_vision::{EmbedOptions, ModelPaths, NoFaceDetected, Pipeline};
use serde::{Deserialize, Serialize};

use crate::config::ExtractorConfig;
use crate::error::ExtractionError;

/// What to do when the detector finds no face.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DetectionMode {
    /// Fail the image with [`ExtractionError::NoFace`].
    Enforce,
    /// Embed the whole image instead. The result may not describe a face.
    Lenient,
}

/// Turns an image file into a fixed-length embedding.
pub trait EmbeddingExtractor {
    fn extract(&mut self, image: &Path, mode: DetectionMode) -> Result<Vec<f32>, ExtractionError>;
}

/// ONNX detector + recognizer through ONNX Runtime.
pub struct OnnxExtractor {
    pipeline: Pipeline,
    config: ExtractorConfig,
}

impl OnnxExtractor {
    pub fn new(config: &ExtractorConfig) -> anyhow::Result<Self> {
        let paths: ModelPaths = config.model_paths();
        let pipeline = Pipeline::new(&paths).context("Failed to initialize face recognition pipeline")?;
        Ok(Self {
            pipeline,
            config: config.clone(),
        })
    }

    fn options(&self, mode: DetectionMode) -> EmbedOptions {
        self.config.embed_options(mode)
    }
}

impl EmbeddingExtractor for OnnxExtractor {
    fn extract(&mut self, image: &Path, mode: DetectionMode) -> Result<Vec<f32>, ExtractionError> {
        let img = image::open(image).map_err(|source| ExtractionError::UnreadableImage {
            path: image.to_path_buf(),
            source,
        })?;

        let opts = self.options(mode);
        match self.pipeline.embed(&img, &opts) {
            Ok(embedding) => Ok(embedding.vector),
            Err(e) if e.downcast_ref::<NoFaceDetected>().is_some() => {
                Err(ExtractionError::NoFace {
                    path: image.to_path_buf(),
                })
            }
            Err(source) => Err(ExtractionError::Model {
                path: image.to_path_buf(),
                source,
            }),
        }
    }
}
