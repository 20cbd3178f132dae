//! ONNX Runtime feature extractor.
//!
//! Runs an image feature-extraction model (CLIP-style ViT by default) on a
//! square RGB face crop. Pooling and normalization happen in the generator.

use crate::generator::{Backend, ExtractorError, ExtractorProvider, FeatureExtractor};
use crate::image_data::FACE_CROP_SIZE;
use image::imageops::FilterType;
use image::DynamicImage;
use ndarray::{Array2, Array4};
use ort::session::builder::SessionBuilder;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::{Path, PathBuf};

// CLIP image normalization constants, per channel (R, G, B).
const CLIP_MEAN: [f32; 3] = [0.481_454_66, 0.457_827_5, 0.408_210_73];
const CLIP_STD: [f32; 3] = [0.268_629_54, 0.261_302_58, 0.275_777_1];
const DEFAULT_INTRA_THREADS: usize = 2;

/// Loads [`OnnxExtractor`]s from a model file.
#[derive(Debug, Clone)]
pub struct OnnxProvider {
    pub model_path: PathBuf,
    pub input_size: u32,
    pub intra_threads: usize,
}

impl OnnxProvider {
    pub fn new(model_path: impl Into<PathBuf>) -> Self {
        Self {
            model_path: model_path.into(),
            input_size: FACE_CROP_SIZE,
            intra_threads: DEFAULT_INTRA_THREADS,
        }
    }

    fn session_builder(&self, backend: Backend) -> Result<SessionBuilder, ExtractorError> {
        let mut builder = Session::builder()?.with_intra_threads(self.intra_threads).map_err(ort::Error::from)?;
        match backend {
            Backend::Cpu => {}
            Backend::Cuda => register_cuda(&mut builder)?,
        }
        Ok(builder)
    }
}

#[cfg(feature = "cuda")]
fn register_cuda(builder: &mut SessionBuilder) -> Result<(), ExtractorError> {
    use ort::ep::{self, ExecutionProvider};

    let ep = ep::CUDA::default();
    if !ep.is_available()? {
        return Err(ExtractorError::BackendUnavailable(Backend::Cuda));
    }
    ep.register(builder)?;
    Ok(())
}

#[cfg(not(feature = "cuda"))]
fn register_cuda(_builder: &mut SessionBuilder) -> Result<(), ExtractorError> {
    // Not compiled with the `cuda` feature.
    Err(ExtractorError::BackendUnavailable(Backend::Cuda))
}

impl ExtractorProvider for OnnxProvider {
    fn load(&self, backend: Backend) -> Result<Box<dyn FeatureExtractor>, ExtractorError> {
        if !Path::new(&self.model_path).exists() {
            return Err(ExtractorError::ModelNotFound(
                self.model_path.display().to_string(),
            ));
        }

        let session = self
            .session_builder(backend)?
            .commit_from_file(&self.model_path)?;

        tracing::info!(
            path = %self.model_path.display(),
            %backend,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded feature-extraction model"
        );

        Ok(Box::new(OnnxExtractor {
            session,
            input_size: self.input_size,
        }))
    }
}

pub struct OnnxExtractor {
    session: Session,
    input_size: u32,
}

impl FeatureExtractor for OnnxExtractor {
    fn extract(&mut self, image: &DynamicImage) -> Result<Array2<f32>, ExtractorError> {
        let input = preprocess(image, self.input_size);
        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ExtractorError::Failed(format!("feature extraction: {e}")))?;

        let dims: Vec<usize> = shape.iter().map(|&d| d.max(0) as usize).collect();
        to_feature_matrix(&dims, data)
    }
}

/// Resize to `size` square RGB and normalize into a NCHW float tensor.
fn preprocess(image: &DynamicImage, size: u32) -> Array4<f32> {
    let rgb = image.resize_exact(size, size, FilterType::Triangle).to_rgb8();
    let side = size as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, side, side));

    for (x, y, pixel) in rgb.enumerate_pixels() {
        for c in 0..3 {
            let value = pixel[c] as f32 / 255.0;
            tensor[[0, c, y as usize, x as usize]] = (value - CLIP_MEAN[c]) / CLIP_STD[c];
        }
    }

    tensor
}

/// Interpret an output tensor as `tokens x features`.
///
/// Accepts `[dim]`, `[1, dim]` (already pooled) and `[1, tokens, dim]`.
fn to_feature_matrix(dims: &[usize], data: &[f32]) -> Result<Array2<f32>, ExtractorError> {
    let (rows, cols) = match *dims {
        [dim] => (1, dim),
        [1, dim] => (1, dim),
        [1, tokens, dim] => (tokens, dim),
        _ => {
            return Err(ExtractorError::Failed(format!(
                "unsupported output shape {dims:?}"
            )))
        }
    };

    Array2::from_shape_vec((rows, cols), data.to_vec())
        .map_err(|e| ExtractorError::Failed(format!("output shape {dims:?}: {e}")))
}
