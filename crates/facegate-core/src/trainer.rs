//! Mean-template training over the enrollment store.

use serde::Serialize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::FaceError;
use crate::extractor::EmbeddingExtractor;
use crate::gate::CommitGate;
use crate::model::{ModelStore, TrainedModel};
use crate::scan::{list_image_files, scan_embeddings, SkippedFile};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TrainingSummary {
    pub images_scanned: usize,
    pub embeddings_used: usize,
}

impl TrainingSummary {
    pub fn message(&self) -> String {
        format!(
            "Training finished: {} embeddings extracted from {} images.",
            self.embeddings_used, self.images_scanned
        )
    }
}

pub struct ModelTrainer {
    enroll_dir: PathBuf,
    models: Arc<ModelStore>,
    extractor: Arc<dyn EmbeddingExtractor>,
    running: Mutex<()>,
}

impl ModelTrainer {
    pub fn new(
        enroll_dir: impl Into<PathBuf>,
        models: Arc<ModelStore>,
        extractor: Arc<dyn EmbeddingExtractor>,
    ) -> Self {
        Self {
            enroll_dir: enroll_dir.into(),
            models,
            extractor,
            running: Mutex::new(()),
        }
    }

    /// Extract one embedding per enrolled sample, average them and persist the
    /// result over any previous model.
    pub fn train(&self) -> Result<TrainingSummary, FaceError> {
        self.train_gated(&CommitGate::new()).map(|(summary, _)| summary)
    }

    /// Like [`train`](Self::train), also returning the files that were skipped.
    /// Nothing is persisted once `gate` has been cancelled. Runs are serialized.
    pub fn train_gated(
        &self,
        gate: &CommitGate,
    ) -> Result<(TrainingSummary, Vec<SkippedFile>), FaceError> {
        let _running = self.running.lock().unwrap_or_else(PoisonError::into_inner);

        let files = list_image_files(&self.enroll_dir)?;
        if files.is_empty() {
            tracing::error!(dir = %self.enroll_dir.display(), "no enrollment images to train on");
            return Err(FaceError::NoEnrollmentData {
                dir: self.enroll_dir.clone(),
            });
        }
        tracing::info!(dir = %self.enroll_dir.display(), files = files.len(), "training started");

        let report = scan_embeddings(self.extractor.as_ref(), &files);
        let model = TrainedModel::fit(&report.used, report.scanned).ok_or_else(|| {
            FaceError::NoUsableEmbeddings {
                dir: self.enroll_dir.clone(),
                scanned: report.scanned,
            }
        })?;
        if !gate.try_commit() {
            tracing::warn!(dir = %self.enroll_dir.display(), "training abandoned before saving");
            return Err(FaceError::Cancelled);
        }
        self.models.save(&model)?;

        let summary = TrainingSummary {
            images_scanned: report.scanned,
            embeddings_used: model.len(),
        };
        tracing::info!(
            images_scanned = summary.images_scanned,
            embeddings_used = summary.embeddings_used,
            skipped = report.skipped.len(),
            "training finished"
        );
        Ok((summary, report.skipped))
    }
}
