//! facematch-core — face embedding matching engine.
//!
//! Generates mean-pooled, L2-normalized embeddings from face crops via an
//! ONNX feature-extraction model, matches them against stored embeddings by
//! cosine similarity, and keeps the enrolled embeddings in an append-only
//! store persisted as a single JSON blob.

pub mod blob;
pub mod generator;
pub mod image_data;
pub mod matcher;
pub mod onnx;
pub mod policy;
pub mod sampling;
pub mod store;
pub mod types;

pub use blob::{BlobStore, MemoryBlobStore, SqliteBlobStore};
pub use generator::{Backend, EmbeddingGenerator, GeneratorConfig, GeneratorError};
pub use matcher::{
    cosine_similarity, find_best_match, CosineMatcher, MatchError, Matcher,
    DEFAULT_MATCH_THRESHOLD, DEFAULT_TRACKING_THRESHOLD,
};
pub use onnx::OnnxProvider;
pub use policy::RecognitionService;
pub use sampling::SamplingGate;
pub use store::{EmbeddingStore, StoreError, DEFAULT_STORAGE_KEY};
pub use types::{
    BestMatch, DetectedFace, EmbeddingMetadata, FaceEmbedding, Identity, Recognition, TrackedFace,
};
