use facegate_core::pipeline::{Analysis, EnrollOutcome, VerifyOutcome};
use facegate_core::{
    CommitGate, FaceError, Pipeline, ReferenceSourceKind, SampleImage, Threshold, TrainingSummary,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

const STATUS_FILES_SAMPLE: usize = 10;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    Face(#[from] FaceError),
    #[error("request did not finish within {0:?}")]
    TimedOut(Duration),
    #[error("worker task failed: {0}")]
    TaskFailed(String),
}

impl ServiceError {
    pub fn is_retryable(&self) -> bool {
        match self {
            ServiceError::Face(e) => e.is_retryable(),
            ServiceError::TimedOut(_) => true,
            ServiceError::TaskFailed(_) => false,
        }
    }
}

/// Snapshot of stored data, taken after warming the reference cache.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub reference_source: ReferenceSourceKind,
    pub enrolled_samples: usize,
    pub model_trained: bool,
    pub reference_sample_count: usize,
    pub reference_files_sample: Vec<String>,
    /// Why the reference set could not be loaded, if it could not.
    pub reference_error: Option<String>,
}

/// Clone-safe async handle to a shared [`Pipeline`].
///
/// Every request runs on the blocking pool and is bounded by the request
/// timeout. A request that times out before it starts writing is cancelled
/// and leaves nothing behind; one that already began writing is awaited.
#[derive(Clone)]
pub struct FaceService {
    pipeline: Arc<Pipeline>,
    timeout: Duration,
}

impl FaceService {
    pub fn new(pipeline: Pipeline, timeout: Duration) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            timeout,
        }
    }

    pub async fn analyze(&self, image: Vec<u8>) -> Result<Analysis, ServiceError> {
        self.run(move |p, _| p.analyze(&SampleImage::decode(image)?)).await
    }

    pub async fn enroll(&self, image: Vec<u8>) -> Result<EnrollOutcome, ServiceError> {
        self.run(move |p, gate| p.enroll_gated(&SampleImage::decode(image)?, gate)).await
    }

    pub async fn train(&self) -> Result<TrainingSummary, ServiceError> {
        self.run(|p, gate| p.train_gated(gate)).await
    }

    pub async fn verify(
        &self,
        image: Vec<u8>,
        threshold: f32,
    ) -> Result<VerifyOutcome, ServiceError> {
        self.run(move |p, _| {
            let threshold = Threshold::new(threshold)?;
            p.verify(&SampleImage::decode(image)?, threshold)
        })
        .await
    }

    /// Warm the reference cache and report what is stored.
    pub async fn status(&self) -> Result<StatusReport, ServiceError> {
        self.run(|p, _| {
            let settings = p.settings();
            let mut report = StatusReport {
                reference_source: settings.reference_source,
                enrolled_samples: p.store().count()?,
                model_trained: p.models().exists(),
                reference_sample_count: 0,
                reference_files_sample: Vec::new(),
                reference_error: None,
            };
            match p.reference_set() {
                Ok(set) => {
                    tracing::info!(
                        origin = set.origin(),
                        references = set.len(),
                        files = ?&set.sources()[..set.len().min(STATUS_FILES_SAMPLE)],
                        "reference cache warmed"
                    );
                    report.reference_sample_count = set.len();
                    report.reference_files_sample =
                        set.sources().iter().take(STATUS_FILES_SAMPLE).cloned().collect();
                }
                Err(e) => {
                    tracing::warn!(error = %e, "reference cache could not be warmed");
                    report.reference_error = Some(e.to_string());
                }
            }
            Ok(report)
        })
        .await
    }

    async fn run<T, F>(&self, op: F) -> Result<T, ServiceError>
    where
        T: Send + 'static,
        F: FnOnce(&Pipeline, &CommitGate) -> Result<T, FaceError> + Send + 'static,
    {
        let pipeline = Arc::clone(&self.pipeline);
        let gate = Arc::new(CommitGate::new());
        let worker_gate = Arc::clone(&gate);
        let mut task = tokio::task::spawn_blocking(move || op(&*pipeline, &*worker_gate));

        let joined = match tokio::time::timeout(self.timeout, &mut task).await {
            Ok(joined) => joined,
            Err(_) if gate.cancel() => {
                tracing::warn!(timeout = ?self.timeout, "request timed out");
                return Err(ServiceError::TimedOut(self.timeout));
            }
            Err(_) => {
                tracing::debug!(timeout = ?self.timeout, "request past timeout is already writing");
                task.await
            }
        };
        match joined {
            Ok(result) => result.map_err(ServiceError::from),
            Err(join) => Err(ServiceError::TaskFailed(join.to_string())),
        }
    }
}
