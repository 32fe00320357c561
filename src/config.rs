use anyhow::{ensure, Context, Result};
use directories::ProjectDirs;
use facematch_vision::{EmbedOptions, ModelPaths};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::extractor::DetectionMode;

pub static CONFIG_PATH: Lazy<&'static Path> = Lazy::new(|| {
    Path::new(option_env!("FACEMATCH_CONFIG_PATH").unwrap_or("/usr/local/etc/facematch/config.toml"))
});

pub static MODEL_PREFIX: Lazy<&'static Path> = Lazy::new(|| {
    Path::new(option_env!("FACEMATCH_MODEL_PREFIX").unwrap_or("/usr/local/share/facematch/models"))
});

/// Per-user data directory, falling back to a system location when the
/// platform gives us no home.
pub static DATA_DIR: Lazy<PathBuf> = Lazy::new(|| {
    ProjectDirs::from("", "", "facematch")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("/var/lib/facematch"))
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Minimum cosine similarity accepted as a match, in [-1, 1].
    pub threshold: f32,
    /// Time the camera streams before the query frame is taken.
    pub capture_delay_seconds: f32,
    /// Folder of images enrolled by `facematch enroll`.
    pub source_directory: PathBuf,
    pub camera: String,
    pub image_extensions: Vec<String>,
    pub store: StoreConfig,
    pub extractor: ExtractorConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            threshold: 0.70,
            capture_delay_seconds: 2.0,
            source_directory: DATA_DIR.join("db_images"),
            camera: "/dev/video0".to_string(),
            image_extensions: vec!["png".into(), "jpg".into(), "jpeg".into()],
            store: StoreConfig::default(),
            extractor: ExtractorConfig::default(),
        }
    }
}

impl Config {
    /// Fails for negative, non-finite or unrepresentably large delays.
    pub fn capture_delay(&self) -> Result<Duration> {
        Duration::try_from_secs_f32(self.capture_delay_seconds).with_context(|| {
            format!(
                "capture_delay_seconds must be a non-negative number of seconds, got {}",
                self.capture_delay_seconds
            )
        })
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            (-1.0..=1.0).contains(&self.threshold),
            "threshold {} outside [-1, 1]",
            self.threshold
        );
        self.capture_delay()?;
        ensure!(
            !self.store.collection.is_empty(),
            "store.collection must not be empty"
        );
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// `:memory:`, `file://<dir>` or a plain directory path.
    pub endpoint: String,
    pub collection: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            endpoint: DATA_DIR.join("store").display().to_string(),
            collection: "face_embeddings".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectorBackend {
    /// YuNet face detector, then eye alignment.
    Yunet,
    /// No detection; the whole image is embedded.
    Skip,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    pub detector_model: PathBuf,
    pub recognition_model: PathBuf,
    pub detector_backend: DetectorBackend,
    pub score_threshold: f32,
    pub nms_threshold: f32,
    pub enroll_detection: DetectionMode,
    pub recognize_detection: DetectionMode,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        let models = ModelPaths::in_dir(&MODEL_PREFIX);
        Self {
            detector_model: models.detector,
            recognition_model: models.recognizer,
            detector_backend: DetectorBackend::Yunet,
            score_threshold: 0.6,
            nms_threshold: 0.3,
            enroll_detection: DetectionMode::Lenient,
            recognize_detection: DetectionMode::Enforce,
        }
    }
}

impl ExtractorConfig {
    pub fn model_paths(&self) -> ModelPaths {
        ModelPaths {
            detector: self.detector_model.clone(),
            recognizer: self.recognition_model.clone(),
        }
    }

    pub fn embed_options(&self, mode: DetectionMode) -> EmbedOptions {
        EmbedOptions {
            detect: self.detector_backend == DetectorBackend::Yunet,
            enforce_detection: mode == DetectionMode::Enforce,
            score_threshold: self.score_threshold,
            nms_threshold: self.nms_threshold,
        }
    }
}

pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = path.unwrap_or(&CONFIG_PATH);
    if !path.exists() {
        log::debug!("no config at {}, using defaults", path.display());
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config at {}", path.display()))?;
    let cfg: Config =
        toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validating config {}", path.display()))?;
    Ok(cfg)
}

pub fn save_config(cfg: &Config, path: Option<&Path>) -> Result<()> {
    let path = path.unwrap_or(&CONFIG_PATH);
    let data = toml::to_string_pretty(cfg)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, data)?;
    Ok(())
}

/// Make sure there is a file at `path` to edit. A missing file is seeded
/// with defaults; an existing one is left as is, even if it does not parse
/// or validate.
pub fn ensure_config_file(path: &Path) -> Result<()> {
    if !path.exists() {
        save_config(&Config::default(), Some(path)).context("Failed to write default config")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(cfg, Config::default());
        assert_eq!(cfg.threshold, 0.70);
        assert_eq!(cfg.extractor.enroll_detection, DetectionMode::Lenient);
        assert_eq!(cfg.extractor.recognize_detection, DetectionMode::Enforce);
    }

    #[test]
    fn partial_file_fills_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
threshold = 0.5
capture_delay_seconds = 0.0

[store]
endpoint = ":memory:"

[extractor]
detector_backend = "skip"
enroll_detection = "enforce"
"#,
        )
        .unwrap();

        let cfg = load_config(Some(&path)).unwrap();
        assert_eq!(cfg.threshold, 0.5);
        assert_eq!(cfg.capture_delay().unwrap(), Duration::ZERO);
        assert_eq!(cfg.store.endpoint, ":memory:");
        assert_eq!(cfg.store.collection, "face_embeddings");
        assert_eq!(cfg.extractor.detector_backend, DetectorBackend::Skip);
        assert_eq!(cfg.extractor.enroll_detection, DetectionMode::Enforce);
        assert_eq!(cfg.camera, "/dev/video0");
    }

    #[test]
    fn out_of_range_threshold_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "threshold = 1.5\n").unwrap();
        assert!(load_config(Some(&path)).is_err());

        std::fs::write(&path, "capture_delay_seconds = -1.0\n").unwrap();
        assert!(load_config(Some(&path)).is_err());
    }

    #[test]
    fn oversized_delay_is_rejected_not_panicking() {
        let cfg = Config {
            capture_delay_seconds: 1e20,
            ..Config::default()
        };
        assert!(cfg.validate().is_err());
        assert!(cfg.capture_delay().is_err());

        let cfg = Config {
            capture_delay_seconds: f32::NAN,
            ..Config::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn invalid_file_is_kept_for_editing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "threshold = 1.5\n").unwrap();
        assert!(load_config(Some(&path)).is_err());

        ensure_config_file(&path).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "threshold = 1.5\n");

        let fresh = dir.path().join("nested/config.toml");
        ensure_config_file(&fresh).unwrap();
        assert_eq!(load_config(Some(&fresh)).unwrap(), Config::default());
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/config.toml");
        let mut cfg = Config::default();
        cfg.threshold = 0.42;
        cfg.image_extensions = vec!["webp".into()];
        save_config(&cfg, Some(&path)).unwrap();
        assert_eq!(load_config(Some(&path)).unwrap(), cfg);
    }

    #[test]
    fn embed_options_follow_backend_and_mode() {
        let mut extractor = ExtractorConfig::default();
        let opts = extractor.embed_options(DetectionMode::Lenient);
        assert!(opts.detect);
        assert!(!opts.enforce_detection);

        extractor.detector_backend = DetectorBackend::Skip;
        let opts = extractor.embed_options(DetectionMode::Enforce);
        assert!(!opts.detect);
        assert!(opts.enforce_detection);
    }
}
