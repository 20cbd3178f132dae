use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Bounding box of a face located by an external detector, in source-frame pixels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedFace {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Facial landmark points, when the detector provides them.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub landmarks: Vec<(f32, f32)>,
}

/// Who a stored embedding belongs to, and where it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddingMetadata {
    /// Not unique: an employee may be enrolled several times.
    pub employee_id: String,
    /// Denormalized display name, not authoritative.
    pub employee_name: String,
    pub timestamp: DateTime<Utc>,
    /// Source face crop as a base64 data URI.
    pub image_data: String,
}

/// A stored face embedding with metadata.
///
/// Records are immutable once created. Re-enrolling appends a new record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceEmbedding {
    pub embedding: Vec<f32>,
    pub metadata: EmbeddingMetadata,
}

impl FaceEmbedding {
    pub fn new(
        embedding: Vec<f32>,
        employee_id: impl Into<String>,
        employee_name: impl Into<String>,
        image_data: impl Into<String>,
    ) -> Self {
        Self {
            embedding,
            metadata: EmbeddingMetadata {
                employee_id: employee_id.into(),
                employee_name: employee_name.into(),
                timestamp: Utc::now(),
                image_data: image_data.into(),
            },
        }
    }

    pub fn employee_id(&self) -> &str {
        &self.metadata.employee_id
    }

    pub fn dimension(&self) -> usize {
        self.embedding.len()
    }
}

/// The winning candidate of a best-match search.
#[derive(Debug, Clone, Copy)]
pub struct BestMatch<'a> {
    pub record: &'a FaceEmbedding,
    /// Position of `record` in the candidate slice.
    pub index: usize,
    /// Cosine similarity between the query and `record`.
    pub similarity: f32,
}

/// A recognized identity with the similarity that justified it.
#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    pub employee_id: String,
    pub employee_name: String,
    pub similarity: f32,
}

impl Identity {
    /// Similarity as a rounded percentage, for display labels.
    pub fn confidence_percent(&self) -> u32 {
        (self.similarity.clamp(0.0, 1.0) * 100.0).round() as u32
    }
}

impl From<BestMatch<'_>> for Identity {
    fn from(m: BestMatch<'_>) -> Self {
        Self {
            employee_id: m.record.metadata.employee_id.clone(),
            employee_name: m.record.metadata.employee_name.clone(),
            similarity: m.similarity,
        }
    }
}

/// Outcome of recognizing a single face.
#[derive(Debug, Clone, PartialEq)]
pub enum Recognition {
    Recognized(Identity),
    /// No candidate exceeded the threshold, or the embedding could not be generated.
    Unknown,
    /// The probe and the gallery disagree on dimensionality.
    Inconsistent { expected: usize, actual: usize },
}

impl Recognition {
    pub fn identity(&self) -> Option<&Identity> {
        match self {
            Recognition::Recognized(identity) => Some(identity),
            _ => None,
        }
    }

    pub fn is_recognized(&self) -> bool {
        matches!(self, Recognition::Recognized(_))
    }
}

/// A detected face paired with its recognition outcome.
#[derive(Debug, Clone)]
pub struct TrackedFace {
    pub face: DetectedFace,
    pub recognition: Recognition,
}
