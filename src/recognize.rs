use std::path::Path;
use std::time::Duration;

use crate::capture::{self, FrameSource};
use crate::error::Result;
use crate::extractor::{DetectionMode, EmbeddingExtractor};
use crate::matcher::{self, MatchResult};
use crate::store::VectorStore;

/// Match the face in `image` against every enrolled record.
pub fn recognize_file(
    image: &Path,
    extractor: &mut dyn EmbeddingExtractor,
    store: &dyn VectorStore,
    threshold: f32,
    mode: DetectionMode,
) -> Result<MatchResult> {
    log::info!("Processing image: {}", image.display());
    let query = extractor.extract(image, mode)?;
    log::debug!("query embedding has {} dimension(s)", query.len());

    log::info!("Comparing with stored embeddings...");
    let result = matcher::search(store, &query, threshold)?;
    match &result {
        MatchResult::Match { record, similarity } => log::info!(
            "Face matches with '{}' (similarity {:.3}, threshold {:.3})",
            record.identifier,
            similarity,
            threshold
        ),
        MatchResult::NoMatch => log::info!(
            "No matching face found in the database within threshold {:.3}",
            threshold
        ),
    }
    Ok(result)
}

/// Capture one frame from `source` and recognize it. The source is dropped
/// as soon as the frame is on disk, so a camera is released before
/// extraction starts. The temporary capture is removed before returning,
/// whatever the outcome.
pub fn recognize_camera<S: FrameSource>(
    mut source: S,
    warm_up: Duration,
    extractor: &mut dyn EmbeddingExtractor,
    store: &dyn VectorStore,
    threshold: f32,
    mode: DetectionMode,
) -> Result<MatchResult> {
    let captured = capture::capture(&mut source, warm_up)?;
    drop(source);
    recognize_file(captured.path(), extractor, store, threshold, mode)
}
