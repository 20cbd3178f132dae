//! Face matching policy: "who is this face?"
//!
//! Stateless apart from the generator it owns. A failure on one face is
//! logged and reported as [`Recognition::Unknown`]; it never aborts the
//! remaining faces in a frame.

use crate::generator::{Backend, EmbeddingGenerator, GeneratorError};
use crate::image_data;
use crate::matcher::{CosineMatcher, MatchError, Matcher, DEFAULT_TRACKING_THRESHOLD};
use crate::types::{DetectedFace, FaceEmbedding, Identity, Recognition, TrackedFace};
use image::DynamicImage;

pub struct RecognitionService<M: Matcher = CosineMatcher> {
    generator: EmbeddingGenerator,
    matcher: M,
    threshold: f32,
}

impl RecognitionService<CosineMatcher> {
    pub fn new(generator: EmbeddingGenerator, threshold: f32) -> Self {
        Self::with_matcher(generator, CosineMatcher, threshold)
    }

    /// Cosine matching at [`DEFAULT_TRACKING_THRESHOLD`].
    pub fn with_default_threshold(generator: EmbeddingGenerator) -> Self {
        Self::new(generator, DEFAULT_TRACKING_THRESHOLD)
    }
}

impl<M: Matcher> RecognitionService<M> {
    pub fn with_matcher(generator: EmbeddingGenerator, matcher: M, threshold: f32) -> Self {
        Self {
            generator,
            matcher,
            threshold,
        }
    }

    /// Initialize the generator. On failure the service stays usable in
    /// degraded mode, where every face is reported as unknown.
    pub fn initialize(&mut self) -> Result<Backend, GeneratorError> {
        self.generator.initialize().map_err(|e| {
            tracing::warn!(error = %e, "recognition disabled; faces will be reported as unknown");
            e
        })
    }

    pub fn generator(&self) -> &EmbeddingGenerator {
        &self.generator
    }

    pub fn generator_mut(&mut self) -> &mut EmbeddingGenerator {
        &mut self.generator
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn set_threshold(&mut self, threshold: f32) {
        self.threshold = threshold;
    }

    /// Recognize a face crop given as a data URI.
    pub fn recognize_face(&mut self, face_image: &str, gallery: &[FaceEmbedding]) -> Recognition {
        if !self.generator.is_ready() {
            return Recognition::Unknown;
        }
        match self.generator.generate_embedding(face_image) {
            Ok(embedding) => self.match_embedding(&embedding, gallery),
            Err(e) => {
                tracing::warn!(error = %e, "embedding generation failed; face treated as unknown");
                Recognition::Unknown
            }
        }
    }

    /// Crop and recognize every detected face in `frame`, in input order.
    ///
    /// Each crop goes through the same JPEG data-URI encoding as enrollment
    /// crops from [`image_data::extract_face_image`], so live and enrolled
    /// embeddings come from one image pipeline.
    pub fn recognize_frame(
        &mut self,
        frame: &DynamicImage,
        faces: &[DetectedFace],
        gallery: &[FaceEmbedding],
    ) -> Vec<TrackedFace> {
        faces
            .iter()
            .map(|face| {
                let recognition = match image_data::extract_face_image(frame, face) {
                    Ok(face_image) => self.recognize_face(&face_image, gallery),
                    Err(e) => {
                        tracing::warn!(error = %e, x = face.x, y = face.y, "face crop failed");
                        Recognition::Unknown
                    }
                };
                TrackedFace {
                    face: face.clone(),
                    recognition,
                }
            })
            .collect()
    }

    /// Match a probe embedding against the gallery.
    pub fn match_embedding(&self, embedding: &[f32], gallery: &[FaceEmbedding]) -> Recognition {
        match self.matcher.best_match(embedding, gallery, self.threshold) {
            Ok(Some(best)) => {
                tracing::debug!(
                    employee_id = %best.record.metadata.employee_id,
                    similarity = best.similarity,
                    "face recognized"
                );
                Recognition::Recognized(Identity::from(best))
            }
            Ok(None) => Recognition::Unknown,
            Err(MatchError::DimensionMismatch { expected, actual }) => {
                tracing::error!(
                    expected,
                    actual,
                    "probe and stored embeddings differ in dimension"
                );
                Recognition::Inconsistent { expected, actual }
            }
        }
    }

    /// Build an enrollment record for a selected face crop.
    ///
    /// The caller appends the record to its store.
    pub fn enroll(
        &mut self,
        face_image: &str,
        employee_id: &str,
        employee_name: &str,
    ) -> Result<FaceEmbedding, GeneratorError> {
        let embedding = self.generator.generate_embedding(face_image)?;
        tracing::info!(employee_id, employee_name, dim = embedding.len(), "face enrolled");
        Ok(FaceEmbedding::new(embedding, employee_id, employee_name, face_image))
    }
}
