use std::env;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facematch::{
    capture, config, enroll, recognize, store, DetectionMode, MatchResult, OnnxExtractor,
    VectorStore,
};
use log::{error, info};
use serde::Serialize;

#[derive(Parser)]
#[command(name = "facematch")]
#[command(version, about = "Enroll face images and recognize faces by embedding similarity")]
struct Cli {
    /// Config file (defaults to the system config path)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Embed every image of a directory into the store
    Enroll {
        /// Image directory (defaults to `source_directory` from config)
        #[arg(short, long)]
        dir: Option<PathBuf>,
        /// Override the enrollment detection mode
        #[arg(long, value_enum)]
        detection: Option<DetectionMode>,
    },
    /// Match one face from the camera, or from an image file
    Recognize {
        /// Use this image instead of capturing from the camera
        #[arg(short, long)]
        image: Option<PathBuf>,
        /// Similarity threshold in [-1, 1]
        #[arg(short, long)]
        threshold: Option<f32>,
        /// Seconds the camera streams before the frame is taken
        #[arg(long)]
        delay: Option<f32>,
        /// Override the recognition detection mode
        #[arg(long, value_enum)]
        detection: Option<DetectionMode>,
        /// Print the outcome as JSON on stdout
        #[arg(long)]
        json: bool,
    },
    /// List enrolled records
    List,
    /// Remove every enrolled record
    Purge,
    /// Open config file in editor
    Config,
}

#[derive(Serialize)]
struct Listing<'a> {
    identifier: &'a str,
    dimensions: usize,
}

fn main() -> Result<ExitCode> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .format_target(false)
        .format_timestamp(None)
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    // before loading, so an invalid file can still be repaired
    if let Commands::Config = cli.command {
        open_config(config_path.unwrap_or(*config::CONFIG_PATH))?;
        return Ok(ExitCode::SUCCESS);
    }

    let mut cfg = config::load_config(config_path)?;

    // one store handle for the whole run
    let mut store = store::open(&cfg.store)
        .with_context(|| format!("Failed to open store {}", cfg.store.endpoint))?;

    match cli.command {
        Commands::Enroll { dir, detection } => {
            if let Some(mode) = detection {
                cfg.extractor.enroll_detection = mode;
            }
            let dir = dir.unwrap_or_else(|| cfg.source_directory.clone());
            enroll(&cfg, &dir, store.as_mut())
        }
        Commands::Recognize {
            image,
            threshold,
            delay,
            detection,
            json,
        } => {
            if let Some(t) = threshold {
                cfg.threshold = t;
            }
            if let Some(d) = delay {
                cfg.capture_delay_seconds = d;
            }
            if let Some(mode) = detection {
                cfg.extractor.recognize_detection = mode;
            }
            cfg.validate()?;
            recognize(&cfg, image.as_deref(), store.as_ref(), json)
        }
        Commands::List => list(store.as_ref()),
        Commands::Purge => purge(&cfg, store.as_mut()),
        Commands::Config => unreachable!("handled before the store is opened"),
    }
}

fn enroll(cfg: &config::Config, dir: &Path, store: &mut dyn VectorStore) -> Result<ExitCode> {
    info!("Enrolling images from {}", dir.display());
    let mut extractor = OnnxExtractor::new(&cfg.extractor)?;

    let report = enroll::enroll_directory(
        dir,
        &cfg.image_extensions,
        &mut extractor,
        store,
        cfg.extractor.enroll_detection,
    )
    .context("Enrollment aborted")?;

    for (identifier, reason) in &report.skipped {
        info!("  skipped {}: {}", identifier, reason);
    }
    Ok(ExitCode::SUCCESS)
}

fn recognize(
    cfg: &config::Config,
    image: Option<&Path>,
    store: &dyn VectorStore,
    json: bool,
) -> Result<ExitCode> {
    let mut extractor = OnnxExtractor::new(&cfg.extractor)?;
    let mode = cfg.extractor.recognize_detection;

    let outcome = match image {
        Some(path) => {
            recognize::recognize_file(path, &mut extractor, store, cfg.threshold, mode)
        }
        None => {
            let delay = cfg.capture_delay()?;
            info!("Opening camera: {}", cfg.camera);
            capture::open_camera(&cfg.camera)
                .map_err(facematch::Error::from)
                .and_then(|camera| {
                    recognize::recognize_camera(
                        camera,
                        delay,
                        &mut extractor,
                        store,
                        cfg.threshold,
                        mode,
                    )
                })
        }
    };

    let result = match outcome {
        Ok(result) => result,
        Err(e @ facematch::Error::Store(_)) => return Err(e).context("Recognition failed"),
        Err(e) => {
            error!("{}", e);
            match e {
                facematch::Error::Capture(_) => error!(
                    "Image capture failed. Please ensure the camera is connected and try again."
                ),
                facematch::Error::Extraction(_) => error!("No face found in the query image."),
                _ => {}
            }
            return Ok(ExitCode::from(2));
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    }

    match result {
        MatchResult::Match { record, similarity } => {
            info!("✓ Face matches with filename: '{}'", record.identifier);
            info!("Similarity Score (Cosine Similarity): {:.3}", similarity);
            Ok(ExitCode::SUCCESS)
        }
        MatchResult::NoMatch => {
            info!("No matching face found in the database.");
            Ok(ExitCode::from(1))
        }
    }
}

fn list(store: &dyn VectorStore) -> Result<ExitCode> {
    let mut count = 0usize;
    for record in store.fetch_all()? {
        let record = record.context("Failed to read store")?;
        let line = Listing {
            identifier: &record.identifier,
            dimensions: record.dim(),
        };
        println!("{}", serde_json::to_string(&line)?);
        count += 1;
    }
    info!("{} enrolled record(s)", count);
    Ok(ExitCode::SUCCESS)
}

fn purge(cfg: &config::Config, store: &mut dyn VectorStore) -> Result<ExitCode> {
    info!("Purging collection: {}", cfg.store.collection);
    store.purge().context("Failed to purge store")?;
    info!("✓ All records purged");
    Ok(ExitCode::SUCCESS)
}

fn open_config(config_path: &Path) -> Result<()> {
    let editor = env::var("EDITOR").unwrap_or_else(|_| "vi".to_string());

    config::ensure_config_file(config_path)?;
    info!("Opening config file: {:?}", config_path);

    let status = std::process::Command::new(editor)
        .arg(config_path)
        .status()
        .context("Failed to open editor")?;

    if !status.success() {
        anyhow::bail!("Editor exited with non-zero status");
    }

    Ok(())
}
