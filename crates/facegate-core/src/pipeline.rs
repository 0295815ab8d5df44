//! Enrollment, training and verification operations over shared components.
//!
//! A [`Pipeline`] is `Send + Sync`; requests may run concurrently from any
//! number of threads. Shared mutable state is limited to the reference cache
//! and the lock-guarded model store.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

use crate::cache::{
    compare, ReferenceSet, ReferenceSource, StaticDirectorySource, TrainedModelSource,
    TrainingDataCache,
};
use crate::error::FaceError;
use crate::extractor::{extract_single_face, EmbeddingExtractor};
use crate::gate::CommitGate;
use crate::model::ModelStore;
use crate::quality::{QualityAnalyzer, QualityReport, QualityThresholds};
use crate::sample::{ImageSize, SampleImage};
use crate::store::EnrollmentStore;
use crate::trainer::{ModelTrainer, TrainingSummary};
use crate::types::{compare_to_mean, FaceBox, MatchResult, Threshold};

/// Number of reference file names echoed back by a verification.
const REFERENCE_SAMPLE_LIMIT: usize = 10;

/// Which data backs the verification cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceSourceKind {
    /// A fixed directory of reference photos, independent of training.
    #[default]
    StaticDirectory,
    /// The embeddings persisted by the last training run. Training
    /// invalidates the cache.
    TrainedModel,
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub enroll_dir: PathBuf,
    pub reference_dir: PathBuf,
    pub models_dir: PathBuf,
    pub reference_source: ReferenceSourceKind,
    pub quality: QualityThresholds,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            enroll_dir: PathBuf::from("data/raw/user"),
            reference_dir: PathBuf::from("myface"),
            models_dir: PathBuf::from("models"),
            reference_source: ReferenceSourceKind::default(),
            quality: QualityThresholds::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Analysis {
    pub face_box: FaceBox,
    pub image_size: ImageSize,
    pub quality: QualityReport,
}

#[derive(Debug, Clone, Serialize)]
pub struct EnrollOutcome {
    pub saved_id: String,
    pub total_samples: usize,
    pub quality: QualityReport,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerifyOutcome {
    pub is_match: bool,
    pub distance: f32,
    pub threshold: f32,
    pub face_box: FaceBox,
    pub image_size: ImageSize,
    pub reference_sample_count: usize,
    pub reference_files_sample: Vec<String>,
    pub nearest_reference: Option<String>,
}

impl VerifyOutcome {
    pub fn message(&self) -> String {
        if self.is_match {
            format!(
                "Face matches the enrolled user (distance {:.3} <= threshold {:.3}).",
                self.distance, self.threshold
            )
        } else {
            format!(
                "Face does not match the enrolled user (distance {:.3} > threshold {:.3}).",
                self.distance, self.threshold
            )
        }
    }
}

pub struct Pipeline {
    extractor: Arc<dyn EmbeddingExtractor>,
    analyzer: QualityAnalyzer,
    store: EnrollmentStore,
    trainer: ModelTrainer,
    models: Arc<ModelStore>,
    cache: TrainingDataCache,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(settings: PipelineSettings, extractor: Arc<dyn EmbeddingExtractor>) -> Self {
        let models = Arc::new(ModelStore::new(settings.models_dir.clone()));
        let source: Box<dyn ReferenceSource> = match settings.reference_source {
            ReferenceSourceKind::StaticDirectory => Box::new(StaticDirectorySource::new(
                settings.reference_dir.clone(),
                Arc::clone(&extractor),
            )),
            ReferenceSourceKind::TrainedModel => {
                Box::new(TrainedModelSource::new(Arc::clone(&models)))
            }
        };

        Self {
            analyzer: QualityAnalyzer::new(settings.quality),
            store: EnrollmentStore::new(settings.enroll_dir.clone()),
            trainer: ModelTrainer::new(
                settings.enroll_dir.clone(),
                Arc::clone(&models),
                Arc::clone(&extractor),
            ),
            models,
            cache: TrainingDataCache::new(source),
            extractor,
            settings,
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn store(&self) -> &EnrollmentStore {
        &self.store
    }

    pub fn models(&self) -> &ModelStore {
        &self.models
    }

    pub fn cache(&self) -> &TrainingDataCache {
        &self.cache
    }

    /// Single-face detection and quality report, without storing anything.
    pub fn analyze(&self, sample: &SampleImage) -> Result<Analysis, FaceError> {
        let (_, face_box) = extract_single_face(self.extractor.as_ref(), sample.image())?;
        Ok(Analysis {
            face_box,
            image_size: sample.size(),
            quality: self.analyzer.analyze(sample.image(), &face_box),
        })
    }

    /// Quality-gated enrollment. Darkness, blur and a small face reject the
    /// sample; an over-bright image is only warned about.
    pub fn enroll(&self, sample: &SampleImage) -> Result<EnrollOutcome, FaceError> {
        self.enroll_gated(sample, &CommitGate::new())
    }

    /// [`enroll`](Self::enroll) that writes nothing once `gate` is cancelled.
    pub fn enroll_gated(
        &self,
        sample: &SampleImage,
        gate: &CommitGate,
    ) -> Result<EnrollOutcome, FaceError> {
        let Analysis { quality, .. } = self.analyze(sample)?;

        let blocking = quality.blocking_defects();
        if !blocking.is_empty() {
            tracing::warn!(defects = ?blocking, "enrollment rejected");
            return Err(FaceError::QualityRejected {
                reasons: blocking.iter().map(|d| d.message().to_string()).collect(),
                report: Box::new(quality),
            });
        }

        if !gate.try_commit() {
            tracing::warn!("enrollment abandoned before saving");
            return Err(FaceError::Cancelled);
        }
        let saved_id = self.store.save(sample)?;
        let total_samples = self.store.count()?;
        tracing::info!(file = %saved_id, total_samples, "enrollment accepted");
        Ok(EnrollOutcome {
            saved_id,
            total_samples,
            quality,
        })
    }

    /// Train the mean template. With a trained-model reference source the
    /// cache is invalidated so the next verification sees the new model.
    pub fn train(&self) -> Result<TrainingSummary, FaceError> {
        self.train_gated(&CommitGate::new())
    }

    /// [`train`](Self::train) that saves nothing once `gate` is cancelled.
    pub fn train_gated(&self, gate: &CommitGate) -> Result<TrainingSummary, FaceError> {
        let (summary, _) = self.trainer.train_gated(gate)?;
        if self.settings.reference_source == ReferenceSourceKind::TrainedModel {
            self.cache.invalidate();
        }
        Ok(summary)
    }

    /// The cached reference set, loading it if needed.
    pub fn reference_set(&self) -> Result<Arc<ReferenceSet>, FaceError> {
        self.cache.get_reference_set()
    }

    /// Verify the single face in `sample` against the nearest cached reference.
    pub fn verify(
        &self,
        sample: &SampleImage,
        threshold: Threshold,
    ) -> Result<VerifyOutcome, FaceError> {
        let (candidate, face_box) = extract_single_face(self.extractor.as_ref(), sample.image())?;
        let references = self.cache.get_reference_set()?;
        let result = compare(&candidate, &references, threshold);

        tracing::info!(
            is_match = result.is_match,
            distance = result.distance,
            threshold = threshold.value(),
            references = references.len(),
            "verification finished"
        );

        Ok(VerifyOutcome {
            is_match: result.is_match,
            distance: result.distance,
            threshold: threshold.value(),
            face_box,
            image_size: sample.size(),
            reference_sample_count: references.len(),
            reference_files_sample: references
                .sources()
                .iter()
                .take(REFERENCE_SAMPLE_LIMIT)
                .cloned()
                .collect(),
            nearest_reference: references.sources().get(result.nearest).cloned(),
        })
    }

    /// Verify against the persisted mean template instead of the reference set.
    pub fn verify_against_mean(
        &self,
        sample: &SampleImage,
        threshold: Threshold,
    ) -> Result<MatchResult, FaceError> {
        let Some(model) = self.models.load()? else {
            return Err(FaceError::NoReferenceData {
                source_name: self.models.dir().display().to_string(),
            });
        };
        let mean = model.mean_embedding()?;
        let (candidate, _) = extract_single_face(self.extractor.as_ref(), sample.image())?;
        let result = compare_to_mean(&candidate, &mean, threshold);
        tracing::info!(
            is_match = result.is_match,
            distance = result.distance,
            "mean verification finished"
        );
        Ok(result)
    }
}
