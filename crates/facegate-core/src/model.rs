//! Persisted training output: per-sample embedding matrix, mean template and
//! a manifest describing the run.

use chrono::{DateTime, Utc};
use ndarray::{Array1, Array2, Axis};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use crate::error::FaceError;
use crate::types::{Embedding, EMBEDDING_DIM};

pub const EMBEDDINGS_FILE: &str = "user_embeddings.json";
pub const MEAN_FILE: &str = "user_embedding_mean.json";
pub const MANIFEST_FILE: &str = "training_manifest.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingManifest {
    /// Sample file name for each embedding row.
    pub sources: Vec<String>,
    pub images_scanned: usize,
    pub trained_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct TrainedModel {
    embeddings: Array2<f32>,
    mean: Array1<f32>,
    manifest: TrainingManifest,
}

impl TrainedModel {
    /// Stack the embeddings into an N×128 matrix and average them per dimension.
    /// Returns `None` for an empty input.
    pub fn fit(samples: &[(String, Embedding)], images_scanned: usize) -> Option<Self> {
        let flat: Vec<f32> = samples
            .iter()
            .flat_map(|(_, e)| e.as_slice().iter().copied())
            .collect();
        let embeddings = Array2::from_shape_vec((samples.len(), EMBEDDING_DIM), flat).ok()?;
        let mean = embeddings.mean_axis(Axis(0))?;

        Some(Self {
            embeddings,
            mean,
            manifest: TrainingManifest {
                sources: samples.iter().map(|(name, _)| name.clone()).collect(),
                images_scanned,
                trained_at: Utc::now(),
            },
        })
    }

    pub fn len(&self) -> usize {
        self.embeddings.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.embeddings.nrows() == 0
    }

    pub fn manifest(&self) -> &TrainingManifest {
        &self.manifest
    }

    pub fn embedding_matrix(&self) -> &Array2<f32> {
        &self.embeddings
    }

    pub fn mean_embedding(&self) -> Result<Embedding, FaceError> {
        Embedding::new(self.mean.to_vec())
    }

    pub fn embeddings(&self) -> Result<Vec<Embedding>, FaceError> {
        self.embeddings
            .rows()
            .into_iter()
            .map(|row| Embedding::new(row.to_vec()))
            .collect()
    }

    /// Write all three files, replacing any previous model.
    pub fn save(&self, dir: &Path) -> Result<(), FaceError> {
        std::fs::create_dir_all(dir)?;
        write_json(&dir.join(EMBEDDINGS_FILE), &self.embeddings)?;
        write_json(&dir.join(MEAN_FILE), &self.mean)?;
        write_json(&dir.join(MANIFEST_FILE), &self.manifest)?;
        tracing::info!(dir = %dir.display(), rows = self.len(), "trained model saved");
        Ok(())
    }

    pub fn load(dir: &Path) -> Result<Self, FaceError> {
        let embeddings: Array2<f32> = read_json(&dir.join(EMBEDDINGS_FILE))?;
        let mean: Array1<f32> = read_json(&dir.join(MEAN_FILE))?;
        let manifest: TrainingManifest = read_json(&dir.join(MANIFEST_FILE))?;

        let corrupt = |reason: String| FaceError::CorruptModel {
            path: dir.to_path_buf(),
            reason,
        };
        if embeddings.ncols() != EMBEDDING_DIM || embeddings.nrows() == 0 {
            return Err(corrupt(format!("embedding matrix has shape {:?}", embeddings.shape())));
        }
        if mean.len() != EMBEDDING_DIM {
            return Err(corrupt(format!("mean vector has {} dimensions", mean.len())));
        }
        if manifest.sources.len() != embeddings.nrows() {
            return Err(corrupt(format!(
                "manifest lists {} sources for {} embeddings",
                manifest.sources.len(),
                embeddings.nrows()
            )));
        }

        Ok(Self { embeddings, mean, manifest })
    }

    /// True when the model files are present in `dir`.
    pub fn exists(dir: &Path) -> bool {
        [EMBEDDINGS_FILE, MEAN_FILE, MANIFEST_FILE]
            .iter()
            .all(|name| dir.join(name).is_file())
    }
}

/// The models directory shared by the trainer and every reader of the model.
///
/// A save holds the write lock across all three files and a load holds the
/// read lock, so readers never pair files from different training runs.
#[derive(Debug)]
pub struct ModelStore {
    dir: PathBuf,
    lock: RwLock<()>,
}

impl ModelStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            lock: RwLock::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn exists(&self) -> bool {
        let _guard = self.lock.read().unwrap_or_else(PoisonError::into_inner);
        TrainedModel::exists(&self.dir)
    }

    pub fn save(&self, model: &TrainedModel) -> Result<(), FaceError> {
        let _guard = self.lock.write().unwrap_or_else(PoisonError::into_inner);
        model.save(&self.dir)
    }

    /// The persisted model, or `None` when no training run has completed.
    pub fn load(&self) -> Result<Option<TrainedModel>, FaceError> {
        let _guard = self.lock.read().unwrap_or_else(PoisonError::into_inner);
        if !TrainedModel::exists(&self.dir) {
            return Ok(None);
        }
        TrainedModel::load(&self.dir).map(Some)
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), FaceError> {
    let tmp = tmp_path(path);
    std::fs::write(&tmp, serde_json::to_vec(value)?)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, FaceError> {
    let data = std::fs::read(path)?;
    serde_json::from_slice(&data).map_err(|e| FaceError::CorruptModel {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}
