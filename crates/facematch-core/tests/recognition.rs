//! End-to-end recognition through the generator, policy and store, using a
//! color-averaging stand-in for the feature-extraction model.

use facematch_core::generator::{ExtractorError, ExtractorProvider, FeatureExtractor};
use facematch_core::image_data::{encode_data_uri, extract_face_image};
use facematch_core::{
    Backend, DetectedFace, EmbeddingGenerator, EmbeddingStore, FaceEmbedding, GeneratorConfig,
    Recognition, RecognitionService, SqliteBlobStore, DEFAULT_STORAGE_KEY,
};
use image::{DynamicImage, Rgb, RgbImage};
use ndarray::Array2;

/// Emits the mean RGB color of the image as a single-token feature map.
struct MeanColorExtractor;

impl FeatureExtractor for MeanColorExtractor {
    fn extract(&mut self, image: &DynamicImage) -> Result<Array2<f32>, ExtractorError> {
        let rgb = image.to_rgb8();
        let n = (rgb.width() * rgb.height()) as f32;
        let mut sums = [0.0f32; 3];
        for pixel in rgb.pixels() {
            for c in 0..3 {
                sums[c] += pixel[c] as f32;
            }
        }
        let features: Vec<f32> = sums.iter().map(|s| s / n / 255.0).collect();
        Ok(Array2::from_shape_vec((1, 3), features).unwrap())
    }
}

struct MeanColorProvider {
    available: bool,
}

impl ExtractorProvider for MeanColorProvider {
    fn load(&self, backend: Backend) -> Result<Box<dyn FeatureExtractor>, ExtractorError> {
        if self.available && backend == Backend::Cpu {
            Ok(Box::new(MeanColorExtractor))
        } else {
            Err(ExtractorError::BackendUnavailable(backend))
        }
    }
}

fn service(available: bool) -> RecognitionService {
    let generator = EmbeddingGenerator::new(
        Box::new(MeanColorProvider { available }),
        GeneratorConfig::default(),
    );
    RecognitionService::new(generator, 0.75)
}

fn solid(color: [u8; 3]) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_pixel(64, 64, Rgb(color)))
}

fn data_uri(color: [u8; 3]) -> String {
    encode_data_uri(&solid(color)).unwrap()
}

const RED: [u8; 3] = [230, 20, 20];
const GREEN: [u8; 3] = [20, 230, 20];
const BLUE: [u8; 3] = [20, 20, 230];

fn enrolled_store(service: &mut RecognitionService) -> EmbeddingStore {
    let mut store = EmbeddingStore::in_memory();
    let red = service.enroll(&data_uri(RED), "emp-1", "Ada").unwrap();
    let green = service.enroll(&data_uri(GREEN), "emp-2", "Grace").unwrap();
    store.save_embedding(red).unwrap();
    store.save_embedding(green).unwrap();
    store
}

#[test]
fn test_initialize_falls_back_to_cpu() {
    let mut service = service(true);
    assert_eq!(service.initialize().unwrap(), Backend::Cpu);
}

#[test]
fn test_enrolled_embedding_is_unit_norm() {
    let mut service = service(true);
    service.initialize().unwrap();
    let record = service.enroll(&data_uri(RED), "emp-1", "Ada").unwrap();
    let norm: f32 = record.embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
    assert!((norm - 1.0).abs() < 1e-5);
    assert_eq!(record.metadata.employee_name, "Ada");
    assert!(record.metadata.image_data.starts_with("data:image/jpeg;base64,"));
}

#[test]
fn test_recognizes_enrolled_face() {
    let mut service = service(true);
    service.initialize().unwrap();
    let store = enrolled_store(&mut service);

    let recognition = service.recognize_face(&data_uri(RED), store.all_embeddings());
    let identity = recognition.identity().expect("red face should be recognized");
    assert_eq!(identity.employee_id, "emp-1");
    assert_eq!(identity.employee_name, "Ada");
    assert!(identity.similarity > 0.99);
}

#[test]
fn test_unenrolled_face_is_unknown() {
    let mut service = service(true);
    service.initialize().unwrap();
    let store = enrolled_store(&mut service);
    assert_eq!(service.recognize_face(&data_uri(BLUE), store.all_embeddings()), Recognition::Unknown);
}

#[test]
fn test_empty_gallery_is_unknown() {
    let mut service = service(true);
    service.initialize().unwrap();
    assert_eq!(service.recognize_face(&data_uri(RED), &[]), Recognition::Unknown);
}

#[test]
fn test_degraded_mode_reports_unknown() {
    let mut service = service(false);
    assert!(service.initialize().is_err());
    let gallery = vec![FaceEmbedding::new(vec![1.0, 0.0, 0.0], "emp-1", "Ada", "")];
    assert_eq!(service.recognize_face(&data_uri(RED), &gallery), Recognition::Unknown);
    assert!(service.enroll(&data_uri(RED), "emp-1", "Ada").is_err());
}

#[test]
fn test_undecodable_and_degenerate_faces_are_unknown() {
    let mut service = service(true);
    service.initialize().unwrap();
    let store = enrolled_store(&mut service);
    assert_eq!(service.recognize_face("data:image/jpeg;base64,AAAA", store.all_embeddings()), Recognition::Unknown);
    // Black averages to a zero vector, which cannot be normalized.
    assert_eq!(service.recognize_face(&data_uri([0, 0, 0]), store.all_embeddings()), Recognition::Unknown);
}

#[test]
fn test_dimension_mismatch_is_reported() {
    let mut service = service(true);
    service.initialize().unwrap();
    let gallery = vec![FaceEmbedding::new(vec![1.0, 0.0], "emp-1", "Ada", "")];
    assert_eq!(
        service.recognize_face(&data_uri(RED), &gallery),
        Recognition::Inconsistent { expected: 3, actual: 2 }
    );
}

#[test]
fn test_threshold_is_a_parameter() {
    let mut service = service(true);
    service.initialize().unwrap();
    let store = enrolled_store(&mut service);
    // Orange sits between red and green.
    let orange = data_uri([230, 150, 20]);
    assert!(service.recognize_face(&orange, store.all_embeddings()).is_recognized());
    service.set_threshold(0.99);
    assert_eq!(service.recognize_face(&orange, store.all_embeddings()), Recognition::Unknown);
}

#[test]
fn test_frame_failures_do_not_abort_other_faces() {
    let mut service = service(true);
    service.initialize().unwrap();
    let store = enrolled_store(&mut service);

    let mut frame = RgbImage::from_pixel(200, 100, Rgb(BLUE));
    for y in 0..100 {
        for x in 0..100 {
            frame.put_pixel(x, y, Rgb(RED));
        }
    }
    let frame = DynamicImage::ImageRgb8(frame);

    let face = |x: f32| DetectedFace {
        x,
        y: 30.0,
        width: 40.0,
        height: 40.0,
        confidence: 0.9,
        landmarks: Vec::new(),
    };
    let faces = vec![face(500.0), face(30.0), face(130.0)];

    let tracked = service.recognize_frame(&frame, &faces, store.all_embeddings());
    assert_eq!(tracked.len(), 3);
    assert_eq!(tracked[0].recognition, Recognition::Unknown);
    assert_eq!(tracked[1].recognition.identity().unwrap().employee_id, "emp-1");
    assert_eq!(tracked[2].recognition, Recognition::Unknown);
    assert_eq!(tracked[1].face, faces[1]);
}

#[test]
fn test_frame_crop_matches_enrollment_of_same_crop() {
    let mut service = service(true);
    service.initialize().unwrap();

    // Face box straddles a red/blue edge so the crop is not a flat color.
    let mut frame = RgbImage::from_pixel(200, 100, Rgb(BLUE));
    for y in 0..100 {
        for x in 0..100 {
            frame.put_pixel(x, y, Rgb(RED));
        }
    }
    let frame = DynamicImage::ImageRgb8(frame);
    let face = DetectedFace {
        x: 70.0,
        y: 30.0,
        width: 40.0,
        height: 40.0,
        confidence: 0.9,
        landmarks: Vec::new(),
    };

    let enrolled_crop = extract_face_image(&frame, &face).unwrap();
    let record = service.enroll(&enrolled_crop, "emp-3", "Edsger").unwrap();
    let gallery = vec![record];

    let tracked = service.recognize_frame(&frame, std::slice::from_ref(&face), &gallery);
    let identity = tracked[0].recognition.identity().unwrap();
    assert_eq!(identity.employee_id, "emp-3");
    assert!(identity.similarity > 0.9999, "similarity {}", identity.similarity);
    assert_eq!(
        tracked[0].recognition,
        service.recognize_face(&enrolled_crop, &gallery)
    );
}

#[test]
fn test_sqlite_store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("faces.db");

    let mut service = service(true);
    service.initialize().unwrap();
    {
        let backend = SqliteBlobStore::open(&db).unwrap();
        let mut store = EmbeddingStore::open(Box::new(backend), DEFAULT_STORAGE_KEY);
        let record = service.enroll(&data_uri(GREEN), "emp-2", "Grace").unwrap();
        store.save_embedding(record).unwrap();
        store.flush().unwrap();
    }

    let backend = SqliteBlobStore::open(&db).unwrap();
    let store = EmbeddingStore::open(Box::new(backend), DEFAULT_STORAGE_KEY);
    assert_eq!(store.len(), 1);
    let recognition = service.recognize_face(&data_uri(GREEN), store.all_embeddings());
    assert_eq!(recognition.identity().unwrap().employee_id, "emp-2");
}
