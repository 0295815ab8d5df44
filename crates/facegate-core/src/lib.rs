//! facegate-core: quality-gated face enrollment and threshold verification.
//!
//! Face detection and embedding are an external capability behind
//! [`EmbeddingExtractor`]; this crate applies the single-face policy, gates
//! enrollment on image quality, trains a mean template and verifies candidates
//! against a cached reference set.

pub mod cache;
#[cfg(unix)]
pub mod client;
pub mod error;
pub mod extractor;
pub mod gate;
pub mod model;
pub mod pipeline;
pub mod quality;
pub mod sample;
pub mod scan;
pub mod store;
pub mod trainer;
pub mod types;

pub use cache::{ReferenceSet, ReferenceSource, TrainingDataCache};
pub use error::{ErrorKind, ExtractorError, FaceError};
pub use extractor::EmbeddingExtractor;
pub use gate::CommitGate;
pub use model::ModelStore;
pub use pipeline::{Pipeline, PipelineSettings, ReferenceSourceKind};
pub use quality::{QualityReport, QualityThresholds};
pub use sample::SampleImage;
pub use trainer::TrainingSummary;
pub use types::{Embedding, FaceBox, MatchResult, Threshold, EMBEDDING_DIM};
