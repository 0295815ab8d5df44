//! Process-wide reference set used by verification.
//!
//! The cache holds at most one [`ReferenceSet`]. The first caller loads it
//! from the configured [`ReferenceSource`] while holding the slot lock, so
//! concurrent first callers wait for that single load instead of starting
//! their own. Failed loads leave the slot empty.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::FaceError;
use crate::extractor::EmbeddingExtractor;
use crate::model::ModelStore;
use crate::scan::{list_image_files, scan_embeddings};
use crate::types::{Embedding, EuclideanMatcher, MatchResult, Matcher, Threshold};

/// Non-empty set of reference embeddings with the file each came from.
#[derive(Debug)]
pub struct ReferenceSet {
    embeddings: Vec<Embedding>,
    sources: Vec<String>,
    origin: String,
}

impl ReferenceSet {
    /// Returns `None` when `entries` is empty.
    pub fn new(entries: Vec<(String, Embedding)>, origin: impl Into<String>) -> Option<Self> {
        if entries.is_empty() {
            return None;
        }
        let (sources, embeddings) = entries.into_iter().unzip();
        Some(Self {
            embeddings,
            sources,
            origin: origin.into(),
        })
    }

    pub fn embeddings(&self) -> &[Embedding] {
        &self.embeddings
    }

    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    /// Name of the source that produced this set.
    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn len(&self) -> usize {
        self.embeddings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.embeddings.is_empty()
    }
}

/// Nearest-reference decision: minimum Euclidean distance over the whole set,
/// matched when it is at most `threshold`.
pub fn compare(
    candidate: &Embedding,
    references: &ReferenceSet,
    threshold: Threshold,
) -> MatchResult {
    EuclideanMatcher
        .compare(candidate, references.embeddings(), threshold)
        .unwrap_or(MatchResult {
            is_match: false,
            distance: f32::INFINITY,
            nearest: 0,
        })
}

/// Backing store a [`TrainingDataCache`] is populated from.
pub trait ReferenceSource: Send + Sync {
    fn name(&self) -> String;

    fn load(&self) -> Result<ReferenceSet, FaceError>;
}

/// Directory of reference photos; one embedding per single-face image.
pub struct StaticDirectorySource {
    dir: PathBuf,
    extractor: Arc<dyn EmbeddingExtractor>,
}

impl StaticDirectorySource {
    pub fn new(dir: impl Into<PathBuf>, extractor: Arc<dyn EmbeddingExtractor>) -> Self {
        Self {
            dir: dir.into(),
            extractor,
        }
    }
}

impl ReferenceSource for StaticDirectorySource {
    fn name(&self) -> String {
        self.dir.display().to_string()
    }

    fn load(&self) -> Result<ReferenceSet, FaceError> {
        let files = list_image_files(&self.dir)?;
        if files.is_empty() {
            return Err(FaceError::NoReferenceData { source_name: self.name() });
        }
        tracing::info!(dir = %self.dir.display(), files = files.len(), "loading reference images");

        let report = scan_embeddings(self.extractor.as_ref(), &files);
        let scanned = report.scanned;
        let skipped = report.skipped.len();
        let set = ReferenceSet::new(report.used, self.name()).ok_or_else(|| {
            FaceError::NoUsableReferenceEmbeddings {
                source_name: self.name(),
                scanned,
            }
        })?;

        tracing::info!(used = set.len(), skipped, "reference images loaded");
        Ok(set)
    }
}

/// The per-sample embeddings persisted by the last training run.
pub struct TrainedModelSource {
    models: Arc<ModelStore>,
}

impl TrainedModelSource {
    pub fn new(models: Arc<ModelStore>) -> Self {
        Self { models }
    }
}

impl ReferenceSource for TrainedModelSource {
    fn name(&self) -> String {
        self.models.dir().display().to_string()
    }

    fn load(&self) -> Result<ReferenceSet, FaceError> {
        let Some(model) = self.models.load()? else {
            return Err(FaceError::NoReferenceData { source_name: self.name() });
        };
        let entries: Vec<(String, Embedding)> = model
            .manifest()
            .sources
            .iter()
            .cloned()
            .zip(model.embeddings()?)
            .collect();

        tracing::info!(
            dir = %self.models.dir().display(),
            embeddings = entries.len(),
            trained_at = %model.manifest().trained_at,
            "trained model loaded as reference"
        );
        ReferenceSet::new(entries, self.name()).ok_or_else(|| {
            FaceError::NoUsableReferenceEmbeddings {
                source_name: self.name(),
                scanned: model.manifest().images_scanned,
            }
        })
    }
}

/// Lazily populated single-slot cache of the active [`ReferenceSet`].
pub struct TrainingDataCache {
    source: Box<dyn ReferenceSource>,
    slot: Mutex<Option<Arc<ReferenceSet>>>,
}

impl TrainingDataCache {
    pub fn new(source: Box<dyn ReferenceSource>) -> Self {
        Self {
            source,
            slot: Mutex::new(None),
        }
    }

    pub fn source_name(&self) -> String {
        self.source.name()
    }

    /// Return the cached set, loading it on first use.
    pub fn get_reference_set(&self) -> Result<Arc<ReferenceSet>, FaceError> {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(set) = slot.as_ref() {
            return Ok(Arc::clone(set));
        }

        let set = Arc::new(self.source.load()?);
        tracing::info!(source = %set.origin(), references = set.len(), "reference cache populated");
        *slot = Some(Arc::clone(&set));
        Ok(set)
    }

    /// The cached set, if any, without triggering a load.
    pub fn peek(&self) -> Option<Arc<ReferenceSet>> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Drop the cached set; the next access reloads. Holders of the previous
    /// `Arc` keep using it. Returns whether a set was cached.
    pub fn invalidate(&self) -> bool {
        let previous = self.slot.lock().unwrap_or_else(PoisonError::into_inner).take();
        if previous.is_some() {
            tracing::info!(source = %self.source.name(), "reference cache invalidated");
        }
        previous.is_some()
    }
}
