use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facematch_core::image_data::{encode_data_uri, extract_face_image};
use facematch_core::{
    DetectedFace, EmbeddingStore, GeneratorConfig, OnnxProvider, Recognition, SqliteBlobStore,
};
use std::path::{Path, PathBuf};

mod config;
mod engine;

use config::Config;
use engine::{spawn_engine, EngineHandle};

#[derive(Parser)]
#[command(name = "facematch", about = "Face embedding enrollment and matching")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll a face for an employee
    Enroll {
        /// Employee identifier (may be enrolled more than once)
        #[arg(short = 'i', long)]
        employee_id: String,
        /// Display name stored with the embedding
        #[arg(short, long)]
        name: String,
        /// Face image, or a frame when --face is given
        image: PathBuf,
        /// Face box in the frame as x,y,width,height
        #[arg(long, value_parser = parse_face_box)]
        face: Option<DetectedFace>,
    },
    /// Identify faces against the enrolled embeddings
    Identify {
        /// Face image, or a frame when --face is given
        image: PathBuf,
        /// Face boxes in the frame as x,y,width,height (repeatable)
        #[arg(long, value_parser = parse_face_box)]
        face: Vec<DetectedFace>,
        /// Override the configured similarity threshold
        #[arg(short, long)]
        threshold: Option<f32>,
    },
    /// List enrolled embeddings
    List {
        /// Only show this employee
        #[arg(short = 'i', long)]
        employee_id: Option<String>,
    },
    /// Delete all embeddings of an employee
    Delete {
        employee_id: String,
    },
    /// Export all embeddings as JSON
    Export {
        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Replace all embeddings with the contents of a JSON export
    Import {
        input: PathBuf,
    },
    /// Show configuration and generator status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let cfg = Config::load()?;
    let mut store = open_store(&cfg)?;

    match cli.command {
        Commands::Enroll {
            employee_id,
            name,
            image,
            face,
        } => {
            let face_image = load_face_image(&image, face.as_ref())?;
            let engine = start_engine(&cfg)?;
            let record = engine
                .enroll(face_image, employee_id.clone(), name.clone(), cfg.inference_timeout())
                .await
                .context("enrollment failed")?;
            store.save_embedding(record).context("storing embedding")?;
            store.flush().context("persisting embeddings")?;
            let count = store.embeddings_by_employee(&employee_id).len();
            println!("Enrolled {name} ({employee_id}); {count} embedding(s) on file");
        }
        Commands::Identify {
            image,
            face,
            threshold,
        } => {
            let threshold = threshold.unwrap_or(cfg.similarity_threshold);
            let gallery = store.all_embeddings().to_vec();
            let engine = start_engine(&cfg)?;

            if face.is_empty() {
                let face_image = load_face_image(&image, None)?;
                let recognition = engine
                    .identify_face(face_image, gallery, threshold, cfg.inference_timeout())
                    .await?;
                println!("{}", describe(&recognition));
            } else {
                let frame = image::open(&image)
                    .with_context(|| format!("reading {}", image.display()))?;
                let tracked = engine
                    .identify_frame(frame, face, gallery, threshold, cfg.inference_timeout())
                    .await?;
                for t in &tracked {
                    println!(
                        "[{:.0},{:.0} {:.0}x{:.0}] {}",
                        t.face.x,
                        t.face.y,
                        t.face.width,
                        t.face.height,
                        describe(&t.recognition)
                    );
                }
            }
        }
        Commands::List { employee_id } => {
            let records: Vec<_> = match &employee_id {
                Some(id) => store.embeddings_by_employee(id),
                None => store.all_embeddings().iter().collect(),
            };
            if records.is_empty() {
                println!("No embeddings enrolled");
            }
            for r in records {
                println!(
                    "{}",
                    serde_json::json!({
                        "employeeId": r.metadata.employee_id,
                        "employeeName": r.metadata.employee_name,
                        "timestamp": r.metadata.timestamp,
                        "dimension": r.dimension(),
                    })
                );
            }
        }
        Commands::Delete { employee_id } => {
            let removed = store.delete_embedding(&employee_id);
            store.flush().context("persisting embeddings")?;
            println!("Removed {removed} embedding(s) for {employee_id}");
        }
        Commands::Export { output } => {
            let blob = store.export_embeddings()?;
            match output {
                Some(path) => {
                    std::fs::write(&path, blob)
                        .with_context(|| format!("writing {}", path.display()))?;
                    println!("Exported {} embedding(s) to {}", store.len(), path.display());
                }
                None => println!("{blob}"),
            }
        }
        Commands::Import { input } => {
            let blob = std::fs::read_to_string(&input)
                .with_context(|| format!("reading {}", input.display()))?;
            let count = store.import_embeddings(&blob).context("importing embeddings")?;
            store.flush().context("persisting embeddings")?;
            println!("Imported {count} embedding(s); previous embeddings replaced");
        }
        Commands::Status => {
            let engine = start_engine(&cfg)?;
            let status = engine.status(cfg.inference_timeout()).await?;
            println!(
                "{}",
                serde_json::json!({
                    "version": env!("CARGO_PKG_VERSION"),
                    "model_path": cfg.model_path,
                    "db_path": cfg.db_path,
                    "threshold": cfg.similarity_threshold,
                    "embeddings": store.len(),
                    "dimension": store.dimension(),
                    "backend": status.backend,
                    "init_error": status.init_error,
                })
            );
        }
    }

    Ok(())
}

fn open_store(cfg: &Config) -> Result<EmbeddingStore> {
    let backend = SqliteBlobStore::open(&cfg.db_path)
        .with_context(|| format!("opening {}", cfg.db_path.display()))?;
    Ok(EmbeddingStore::open(Box::new(backend), cfg.storage_key.clone()))
}

fn start_engine(cfg: &Config) -> Result<EngineHandle> {
    let provider = OnnxProvider {
        model_path: cfg.model_path.clone(),
        input_size: cfg.input_size,
        intra_threads: cfg.intra_threads,
    };
    let generator_config = GeneratorConfig {
        backends: cfg.backends.clone(),
    };
    spawn_engine(Box::new(provider), generator_config, cfg.similarity_threshold)
        .context("starting recognition engine")
}

/// Read an image file as a face data URI, cropping `face` out of it if given.
fn load_face_image(path: &Path, face: Option<&DetectedFace>) -> Result<String> {
    let img = image::open(path).with_context(|| format!("reading {}", path.display()))?;
    let uri = match face {
        Some(face) => extract_face_image(&img, face),
        None => encode_data_uri(&img),
    };
    uri.with_context(|| format!("encoding face from {}", path.display()))
}

fn describe(recognition: &Recognition) -> String {
    match recognition {
        Recognition::Recognized(identity) => format!(
            "{} ({}) {}%",
            identity.employee_name,
            identity.employee_id,
            identity.confidence_percent()
        ),
        Recognition::Unknown => "Unknown".to_string(),
        Recognition::Inconsistent { expected, actual } => {
            format!("error: embedding dimension {expected} does not match stored {actual}")
        }
    }
}

fn parse_face_box(s: &str) -> Result<DetectedFace, String> {
    let parts: Vec<f32> = s
        .split(',')
        .map(|p| p.trim().parse::<f32>())
        .collect::<Result<_, _>>()
        .map_err(|e| format!("invalid face box {s:?}: {e}"))?;
    let [x, y, width, height] = parts[..] else {
        return Err(format!("face box needs x,y,width,height, got {s:?}"));
    };
    if width <= 0.0 || height <= 0.0 {
        return Err(format!("face box {s:?} has no area"));
    }
    Ok(DetectedFace {
        x,
        y,
        width,
        height,
        confidence: 1.0,
        landmarks: Vec::new(),
    })
}
