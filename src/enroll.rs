use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::{Error, Result};
use crate::extractor::{DetectionMode, EmbeddingExtractor};
use crate::store::{EmbeddingRecord, VectorStore};

/// Outcome of one enrollment batch.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct EnrollReport {
    /// Identifiers written to the store, in processing order.
    pub enrolled: Vec<String>,
    /// Images that produced no embedding, with the reason.
    pub skipped: Vec<(String, String)>,
}

/// Image files of `dir` whose extension is in `extensions`, sorted by name.
pub fn list_images(dir: &Path, extensions: &[String]) -> Result<Vec<PathBuf>> {
    let source = |source: std::io::Error| Error::Source {
        path: dir.to_path_buf(),
        source,
    };

    let mut images = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(source)? {
        let entry = entry.map_err(source)?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let wanted = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)));
        if wanted {
            images.push(path);
        }
    }
    images.sort();
    Ok(images)
}

/// Embed every image of `dir` and store it under its file name.
///
/// A failing image is logged and skipped. A store failure ends the batch;
/// records written before it stay in the store.
pub fn enroll_directory(
    dir: &Path,
    extensions: &[String],
    extractor: &mut dyn EmbeddingExtractor,
    store: &mut dyn VectorStore,
    mode: DetectionMode,
) -> Result<EnrollReport> {
    let images = list_images(dir, extensions)?;
    log::info!("Found {} image(s) in {}", images.len(), dir.display());
    if mode == DetectionMode::Lenient {
        log::warn!("lenient detection: images without a detectable face are embedded whole");
    }

    let mut report = EnrollReport::default();
    for path in images {
        let identifier = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        let embedding = match extractor.extract(&path, mode) {
            Ok(embedding) => embedding,
            Err(e) => {
                log::warn!("Error processing {}: {}", identifier, e);
                report.skipped.push((identifier, e.to_string()));
                continue;
            }
        };

        store.insert(EmbeddingRecord::new(identifier.clone(), embedding))?;
        log::info!("Embedding for {} saved successfully", identifier);
        report.enrolled.push(identifier);
    }

    log::info!(
        "Enrolled {} image(s), skipped {}",
        report.enrolled.len(),
        report.skipped.len()
    );
    Ok(report)
}
