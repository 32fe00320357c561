use anyhow::{Context, Result};
use image::DynamicImage;
use ort::session::Session;

use crate::face::{self, Detection, Embedding};
use crate::model::ModelPaths;

/// Returned (inside `anyhow::Error`) when detection is enforced and the image
/// holds no face above the score threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("no face detected in image")]
pub struct NoFaceDetected;

#[derive(Debug, Clone, Copy)]
pub struct EmbedOptions {
    /// Run the detector at all. When off, the whole image is encoded.
    pub detect: bool,
    /// Fail with [`NoFaceDetected`] instead of falling back to the whole image.
    pub enforce_detection: bool,
    pub score_threshold: f32,
    pub nms_threshold: f32,
}

impl Default for EmbedOptions {
    fn default() -> Self {
        Self {
            detect: true,
            enforce_detection: true,
            score_threshold: 0.6,
            nms_threshold: 0.3,
        }
    }
}

/// Full pipeline: detect faces → align → encode
pub struct Pipeline {
    pub detector: Session,
    pub encoder: Session,
}

impl Pipeline {
    pub fn new(paths: &ModelPaths) -> Result<Self> {
        Ok(Self {
            detector: crate::model::detector_session(paths)?,
            encoder: crate::model::recog_session(paths)?,
        })
    }

    /// Highest scoring face, if any.
    pub fn best_face(
        &mut self,
        img: &DynamicImage,
        score_threshold: f32,
        nms_threshold: f32,
    ) -> Result<Option<Detection>> {
        let detections =
            face::detect_faces(&mut self.detector, img, score_threshold, nms_threshold)
                .context("detecting faces")?;
        Ok(detections
            .into_iter()
            .max_by(|a, b| a.score.total_cmp(&b.score)))
    }

    /// Embed the best face of `img`, or the whole image when detection is
    /// skipped or lenient and nothing was found.
    pub fn embed(&mut self, img: &DynamicImage, opts: &EmbedOptions) -> Result<Embedding> {
        let detection = if opts.detect {
            self.best_face(img, opts.score_threshold, opts.nms_threshold)?
        } else {
            None
        };

        let crop = match detection {
            Some(best) => {
                log::debug!("face at {:?} score {:.3}", best.bbox, best.score);
                face::align_face(img, &best, face::ENCODER_INPUT).context("aligning face")?
            }
            None if opts.detect && opts.enforce_detection => {
                return Err(NoFaceDetected.into());
            }
            None => {
                if opts.detect {
                    log::warn!("no face detected, embedding the whole image");
                }
                img.clone()
            }
        };

        face::encode_face(&mut self.encoder, &crop).context("encoding face")
    }
}
