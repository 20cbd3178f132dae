//! Face embedding generator.
//!
//! Wraps an external feature-extraction capability behind
//! [`ExtractorProvider`] / [`FeatureExtractor`] and turns a face image into
//! a mean-pooled, L2-normalized vector.

use crate::image_data::{self, ImageDataError};
use crate::matcher::{self, MatchError};
use crate::types::{BestMatch, FaceEmbedding};
use image::DynamicImage;
use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Execution backend for the feature-extraction model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// GPU execution via CUDA.
    Cuda,
    /// General-purpose CPU execution.
    Cpu,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Cuda => f.write_str("cuda"),
            Backend::Cpu => f.write_str("cpu"),
        }
    }
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cuda" | "gpu" => Ok(Backend::Cuda),
            "cpu" => Ok(Backend::Cpu),
            other => Err(format!("unknown backend {other:?} (expected cuda or cpu)")),
        }
    }
}

#[derive(Error, Debug)]
pub enum ExtractorError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("backend {0} is not available")]
    BackendUnavailable(Backend),
    #[error("extraction failed: {0}")]
    Failed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// A loaded feature-extraction model.
pub trait FeatureExtractor: Send {
    /// Run the model on one image, returning a `tokens x features` matrix.
    /// Models that emit a single pooled vector return one row.
    fn extract(&mut self, image: &DynamicImage) -> Result<Array2<f32>, ExtractorError>;
}

/// Loads a [`FeatureExtractor`] on a given backend.
pub trait ExtractorProvider: Send {
    fn load(&self, backend: Backend) -> Result<Box<dyn FeatureExtractor>, ExtractorError>;
}

#[derive(Error, Debug)]
pub enum GeneratorError {
    #[error("embedding generator initialization failed: {0}")]
    Initialization(String),
    #[error("image decode failed: {0}")]
    ImageDecode(#[from] ImageDataError),
    #[error("inference failed: {0}")]
    Inference(String),
    #[error(transparent)]
    Match(#[from] MatchError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratorConfig {
    /// Backends to try, in order of preference.
    pub backends: Vec<Backend>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            backends: vec![Backend::Cuda, Backend::Cpu],
        }
    }
}

enum State {
    Uninitialized,
    Ready {
        extractor: Box<dyn FeatureExtractor>,
        backend: Backend,
    },
    /// Initialization failed; the message is returned on every later attempt.
    Failed(String),
}

pub struct EmbeddingGenerator {
    provider: Box<dyn ExtractorProvider>,
    config: GeneratorConfig,
    state: State,
}

impl EmbeddingGenerator {
    pub fn new(provider: Box<dyn ExtractorProvider>, config: GeneratorConfig) -> Self {
        Self {
            provider,
            config,
            state: State::Uninitialized,
        }
    }

    /// Load the extractor on the first backend that works.
    ///
    /// Idempotent once ready. A failure is cached and returned again without
    /// touching the provider; use [`reinitialize`](Self::reinitialize) to retry.
    pub fn initialize(&mut self) -> Result<Backend, GeneratorError> {
        match &self.state {
            State::Ready { backend, .. } => return Ok(*backend),
            State::Failed(msg) => return Err(GeneratorError::Initialization(msg.clone())),
            State::Uninitialized => {}
        }

        let mut failures = Vec::new();
        for &backend in &self.config.backends {
            tracing::info!(%backend, "initializing embedding generator");
            match self.provider.load(backend) {
                Ok(extractor) => {
                    tracing::info!(%backend, "embedding generator initialized");
                    self.state = State::Ready { extractor, backend };
                    return Ok(backend);
                }
                Err(e) => {
                    tracing::warn!(%backend, error = %e, "backend unavailable, trying next");
                    failures.push(format!("{backend}: {e}"));
                }
            }
        }

        let msg = if failures.is_empty() {
            "no backends configured".to_string()
        } else {
            failures.join("; ")
        };
        tracing::error!(error = %msg, "embedding generator initialization failed");
        self.state = State::Failed(msg.clone());
        Err(GeneratorError::Initialization(msg))
    }

    /// Drop any loaded or cached state and initialize again.
    pub fn reinitialize(&mut self) -> Result<Backend, GeneratorError> {
        self.state = State::Uninitialized;
        self.initialize()
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state, State::Ready { .. })
    }

    /// Backend in use, once initialized.
    pub fn backend(&self) -> Option<Backend> {
        match &self.state {
            State::Ready { backend, .. } => Some(*backend),
            _ => None,
        }
    }

    /// Cached initialization failure, if any.
    pub fn init_error(&self) -> Option<&str> {
        match &self.state {
            State::Failed(msg) => Some(msg),
            _ => None,
        }
    }

    /// Embed a face image given as a data URI or bare base64.
    pub fn generate_embedding(&mut self, face_image: &str) -> Result<Vec<f32>, GeneratorError> {
        if !self.is_ready() {
            return Err(not_initialized());
        }
        let image = image_data::decode_data_uri(face_image)?;
        self.embed_image(&image)
    }

    /// Embed an already-decoded face image.
    pub fn embed_image(&mut self, image: &DynamicImage) -> Result<Vec<f32>, GeneratorError> {
        let State::Ready { extractor, .. } = &mut self.state else {
            return Err(not_initialized());
        };
        let features = extractor
            .extract(image)
            .map_err(|e| GeneratorError::Inference(e.to_string()))?;
        pool_and_normalize(&features)
    }

    pub fn calculate_similarity(&self, a: &[f32], b: &[f32]) -> Result<f32, MatchError> {
        matcher::cosine_similarity(a, b)
    }

    pub fn find_best_match<'a>(
        &self,
        query: &[f32],
        candidates: &'a [FaceEmbedding],
        threshold: f32,
    ) -> Result<Option<BestMatch<'a>>, MatchError> {
        matcher::find_best_match(query, candidates, threshold)
    }
}

fn not_initialized() -> GeneratorError {
    GeneratorError::Inference("embedding generator not initialized".into())
}

/// Mean-pool over tokens, then scale to unit L2 norm.
pub fn pool_and_normalize(features: &Array2<f32>) -> Result<Vec<f32>, GeneratorError> {
    let pooled = features
        .mean_axis(Axis(0))
        .filter(|v| !v.is_empty())
        .ok_or_else(|| GeneratorError::Inference("model produced an empty feature map".into()))?;

    let norm = pooled.iter().map(|x| x * x).sum::<f32>().sqrt();
    if !(norm.is_finite() && norm > 0.0) {
        return Err(GeneratorError::Inference(format!(
            "cannot normalize embedding with norm {norm}"
        )));
    }

    Ok(pooled.iter().map(|x| x / norm).collect())
}
