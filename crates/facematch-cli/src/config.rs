use anyhow::{Context, Result};
use facematch_core::{Backend, DEFAULT_STORAGE_KEY, DEFAULT_TRACKING_THRESHOLD};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// CLI configuration: an optional TOML file named by `FACEMATCH_CONFIG`,
/// overridden by `FACEMATCH_*` environment variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// ONNX feature-extraction model.
    pub model_path: PathBuf,
    /// SQLite database holding the embeddings blob.
    pub db_path: PathBuf,
    /// Key of the embeddings blob inside the database.
    pub storage_key: String,
    /// Cosine similarity a candidate must strictly exceed to match.
    pub similarity_threshold: f32,
    /// Execution backends, most preferred first.
    pub backends: Vec<Backend>,
    /// Timeout in seconds for one engine request.
    pub inference_timeout_secs: u64,
    /// Intra-op threads for the ONNX session.
    pub intra_threads: usize,
    /// Square input side length expected by the model.
    pub input_size: u32,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = data_dir();
        Self {
            model_path: data_dir.join("models").join("clip-vit-base-patch32.onnx"),
            db_path: data_dir.join("faces.db"),
            storage_key: DEFAULT_STORAGE_KEY.to_string(),
            similarity_threshold: DEFAULT_TRACKING_THRESHOLD,
            backends: vec![Backend::Cuda, Backend::Cpu],
            inference_timeout_secs: 10,
            intra_threads: 2,
            input_size: 224,
        }
    }
}

impl Config {
    /// Load from `FACEMATCH_CONFIG` (if set) and the environment.
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var("FACEMATCH_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config at {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
    }

    /// Apply `FACEMATCH_*` overrides. Unparseable values are ignored with a warning.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("FACEMATCH_MODEL_PATH") {
            self.model_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("FACEMATCH_DB_PATH") {
            self.db_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("FACEMATCH_STORAGE_KEY") {
            self.storage_key = v;
        }
        override_parsed(&lookup, "FACEMATCH_SIMILARITY_THRESHOLD", &mut self.similarity_threshold);
        override_parsed(&lookup, "FACEMATCH_INFERENCE_TIMEOUT_SECS", &mut self.inference_timeout_secs);
        override_parsed(&lookup, "FACEMATCH_INTRA_THREADS", &mut self.intra_threads);
        override_parsed(&lookup, "FACEMATCH_INPUT_SIZE", &mut self.input_size);

        if let Some(v) = lookup("FACEMATCH_BACKENDS") {
            match v.split(',').map(str::parse).collect::<Result<Vec<Backend>, _>>() {
                Ok(backends) => self.backends = backends,
                Err(e) => tracing::warn!(value = %v, error = %e, "ignoring FACEMATCH_BACKENDS"),
            }
        }
    }

    pub fn inference_timeout(&self) -> Duration {
        Duration::from_secs(self.inference_timeout_secs)
    }
}

fn override_parsed<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    slot: &mut T,
) {
    if let Some(v) = lookup(key) {
        match v.trim().parse() {
            Ok(parsed) => *slot = parsed,
            Err(_) => tracing::warn!(key, value = %v, "ignoring unparseable override"),
        }
    }
}

fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facematch")
}
