use facematch_core::generator::ExtractorProvider;
use facematch_core::{
    Backend, DetectedFace, EmbeddingGenerator, FaceEmbedding, GeneratorConfig, GeneratorError,
    Recognition, RecognitionService, TrackedFace,
};
use image::DynamicImage;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("generator error: {0}")]
    Generator(#[from] GeneratorError),
    #[error("engine request timed out after {0:?}")]
    Timeout(Duration),
    #[error("engine thread exited")]
    ChannelClosed,
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Generator state reported by the engine thread.
#[derive(Debug, Clone, serde::Serialize)]
pub struct EngineStatus {
    pub backend: Option<Backend>,
    pub init_error: Option<String>,
}

/// Messages sent from the CLI to the engine thread.
enum EngineRequest {
    Enroll {
        face_image: String,
        employee_id: String,
        employee_name: String,
        reply: oneshot::Sender<Result<FaceEmbedding, GeneratorError>>,
    },
    IdentifyFace {
        face_image: String,
        gallery: Vec<FaceEmbedding>,
        threshold: f32,
        reply: oneshot::Sender<Recognition>,
    },
    IdentifyFrame {
        frame: DynamicImage,
        faces: Vec<DetectedFace>,
        gallery: Vec<FaceEmbedding>,
        threshold: f32,
        reply: oneshot::Sender<Vec<TrackedFace>>,
    },
    Status {
        reply: oneshot::Sender<EngineStatus>,
    },
}

/// Clone-safe handle to the engine thread.
///
/// Every request carries a timeout. A request that times out is treated as
/// failed; the engine's late reply is dropped.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Generate an enrollment record for a face crop.
    pub async fn enroll(
        &self,
        face_image: String,
        employee_id: String,
        employee_name: String,
        timeout: Duration,
    ) -> Result<FaceEmbedding, EngineError> {
        let (reply, rx) = oneshot::channel();
        let req = EngineRequest::Enroll {
            face_image,
            employee_id,
            employee_name,
            reply,
        };
        Ok(self.call(req, rx, timeout).await??)
    }

    /// Recognize a single face crop against `gallery`.
    pub async fn identify_face(
        &self,
        face_image: String,
        gallery: Vec<FaceEmbedding>,
        threshold: f32,
        timeout: Duration,
    ) -> Result<Recognition, EngineError> {
        let (reply, rx) = oneshot::channel();
        let req = EngineRequest::IdentifyFace {
            face_image,
            gallery,
            threshold,
            reply,
        };
        self.call(req, rx, timeout).await
    }

    /// Recognize every located face in a frame against `gallery`.
    pub async fn identify_frame(
        &self,
        frame: DynamicImage,
        faces: Vec<DetectedFace>,
        gallery: Vec<FaceEmbedding>,
        threshold: f32,
        timeout: Duration,
    ) -> Result<Vec<TrackedFace>, EngineError> {
        let (reply, rx) = oneshot::channel();
        let req = EngineRequest::IdentifyFrame {
            frame,
            faces,
            gallery,
            threshold,
            reply,
        };
        self.call(req, rx, timeout).await
    }

    pub async fn status(&self, timeout: Duration) -> Result<EngineStatus, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.call(EngineRequest::Status { reply }, rx, timeout).await
    }

    async fn call<T>(
        &self,
        req: EngineRequest,
        rx: oneshot::Receiver<T>,
        timeout: Duration,
    ) -> Result<T, EngineError> {
        let exchange = async {
            if self.tx.send(req).await.is_err() {
                return Err(EngineError::ChannelClosed);
            }
            rx.await.map_err(|_| EngineError::ChannelClosed)
        };
        match tokio::time::timeout(timeout, exchange).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(?timeout, "engine request timed out; discarding result");
                Err(EngineError::Timeout(timeout))
            }
        }
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The generator is initialized on the engine thread before the request
/// loop starts. Initialization failure does not stop the engine: it keeps
/// serving in degraded mode and reports the cached error in its status.
pub fn spawn_engine(
    provider: Box<dyn ExtractorProvider>,
    generator_config: GeneratorConfig,
    threshold: f32,
) -> Result<EngineHandle, EngineError> {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("facematch-engine".into())
        .spawn(move || {
            let generator = EmbeddingGenerator::new(provider, generator_config);
            let mut service = RecognitionService::new(generator, threshold);
            match service.initialize() {
                Ok(backend) => tracing::info!(%backend, "engine thread started"),
                Err(e) => tracing::warn!(error = %e, "engine thread started without recognition"),
            }

            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Enroll {
                        face_image,
                        employee_id,
                        employee_name,
                        reply,
                    } => {
                        let result = service.enroll(&face_image, &employee_id, &employee_name);
                        let _ = reply.send(result);
                    }
                    EngineRequest::IdentifyFace {
                        face_image,
                        gallery,
                        threshold,
                        reply,
                    } => {
                        service.set_threshold(threshold);
                        let _ = reply.send(service.recognize_face(&face_image, &gallery));
                    }
                    EngineRequest::IdentifyFrame {
                        frame,
                        faces,
                        gallery,
                        threshold,
                        reply,
                    } => {
                        service.set_threshold(threshold);
                        let _ = reply.send(service.recognize_frame(&frame, &faces, &gallery));
                    }
                    EngineRequest::Status { reply } => {
                        let generator = service.generator();
                        let _ = reply.send(EngineStatus {
                            backend: generator.backend(),
                            init_error: generator.init_error().map(str::to_string),
                        });
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })?;

    Ok(EngineHandle { tx })
}

#[cfg(test)]
mod tests {
    use super::*;
    use facematch_core::generator::{ExtractorError, FeatureExtractor};
    use facematch_core::image_data::encode_data_uri;
    use ndarray::{array, Array2};

    struct FixedExtractor {
        delay: Duration,
    }

    impl FeatureExtractor for FixedExtractor {
        fn extract(&mut self, _image: &DynamicImage) -> Result<Array2<f32>, ExtractorError> {
            std::thread::sleep(self.delay);
            Ok(array![[0.0, 2.0]])
        }
    }

    struct FixedProvider {
        delay: Duration,
        available: bool,
    }

    impl ExtractorProvider for FixedProvider {
        fn load(&self, backend: Backend) -> Result<Box<dyn FeatureExtractor>, ExtractorError> {
            if self.available {
                Ok(Box::new(FixedExtractor { delay: self.delay }))
            } else {
                Err(ExtractorError::BackendUnavailable(backend))
            }
        }
    }

    fn engine(delay: Duration, available: bool) -> EngineHandle {
        spawn_engine(
            Box::new(FixedProvider { delay, available }),
            GeneratorConfig { backends: vec![Backend::Cpu] },
            0.75,
        )
        .unwrap()
    }

    fn face_uri() -> String {
        encode_data_uri(&DynamicImage::new_rgb8(16, 16)).unwrap()
    }

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_enroll_then_identify() {
        let handle = engine(Duration::ZERO, true);
        let record = handle
            .enroll(face_uri(), "emp-1".into(), "Ada".into(), TIMEOUT)
            .await
            .unwrap();
        assert_eq!(record.embedding, vec![0.0, 1.0]);

        let recognition = handle
            .identify_face(face_uri(), vec![record], 0.75, TIMEOUT)
            .await
            .unwrap();
        assert_eq!(recognition.identity().unwrap().employee_id, "emp-1");
    }

    #[tokio::test]
    async fn test_identify_frame_keeps_face_order() {
        let handle = engine(Duration::ZERO, true);
        let gallery = vec![FaceEmbedding::new(vec![0.0, 1.0], "emp-1", "Ada", "")];
        let face = |x: f32| DetectedFace {
            x,
            y: 0.0,
            width: 10.0,
            height: 10.0,
            confidence: 0.9,
            landmarks: Vec::new(),
        };
        let tracked = handle
            .identify_frame(
                DynamicImage::new_rgb8(64, 64),
                vec![face(5.0), face(1000.0)],
                gallery,
                0.75,
                TIMEOUT,
            )
            .await
            .unwrap();
        assert!(tracked[0].recognition.is_recognized());
        assert_eq!(tracked[1].recognition, Recognition::Unknown);
    }

    #[tokio::test]
    async fn test_slow_inference_times_out() {
        let handle = engine(Duration::from_millis(500), true);
        let err = handle
            .identify_face(face_uri(), Vec::new(), 0.75, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_status_reports_degraded_mode() {
        let handle = engine(Duration::ZERO, false);
        let status = handle.status(TIMEOUT).await.unwrap();
        assert_eq!(status.backend, None);
        assert!(status.init_error.unwrap().contains("cpu"));

        let err = handle
            .enroll(face_uri(), "emp-1".into(), "Ada".into(), TIMEOUT)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Generator(GeneratorError::Inference(_))));
    }
}
