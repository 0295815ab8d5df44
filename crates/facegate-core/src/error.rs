//! Error taxonomy shared by every pipeline operation.

use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::quality::QualityReport;

/// Failures reported by an [`EmbeddingExtractor`](crate::extractor::EmbeddingExtractor)
/// implementation, independent of the single-face policy.
#[derive(Error, Debug)]
pub enum ExtractorError {
    #[error("embedding service unavailable: {0}")]
    Unavailable(String),
    #[error("embedding service did not answer within {0:?}")]
    TimedOut(Duration),
    #[error("embedding service protocol error: {0}")]
    Protocol(String),
    #[error("embedding service error: {0}")]
    Remote(String),
}

/// Coarse classification a routing layer can map to a response code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The request itself is unusable (bad image, face policy, quality, threshold).
    InvalidInput,
    /// Required enrollment or reference data is missing.
    NotReady,
    /// A collaborator (the embedding service) could not serve the request.
    Unavailable,
    /// Storage or serialization failure inside this process.
    Internal,
}

#[derive(Error, Debug)]
pub enum FaceError {
    #[error("no face detected; keep your face inside the frame and make sure it is well lit")]
    NoFaceDetected,
    #[error("{count} faces detected in the image; only one person may be in the frame")]
    MultipleFacesDetected { count: usize },
    #[error("could not extract a face embedding; try a sharper image")]
    EmbeddingExtractionFailed,
    #[error("image rejected: {}", reasons.join("; "))]
    QualityRejected {
        reasons: Vec<String>,
        report: Box<QualityReport>,
    },
    #[error("no enrollment images found in {dir}; collect samples before training")]
    NoEnrollmentData { dir: PathBuf },
    #[error("none of the {scanned} images in {dir} yielded a usable single-face embedding")]
    NoUsableEmbeddings { dir: PathBuf, scanned: usize },
    #[error("no reference data available from {source_name}")]
    NoReferenceData { source_name: String },
    #[error("none of the {scanned} reference images from {source_name} yielded a usable embedding")]
    NoUsableReferenceEmbeddings { source_name: String, scanned: usize },
    #[error("threshold must be within [0.0, 1.0], got {0}")]
    InvalidThreshold(f32),
    #[error("image could not be decoded: {0}")]
    InvalidImage(#[from] image::ImageError),
    #[error("unsupported image format {format}; use JPEG or PNG")]
    UnsupportedImageFormat { format: String },
    #[error("embedding must have {expected} dimensions, got {actual}")]
    InvalidEmbedding { expected: usize, actual: usize },
    #[error("embedding value at index {index} is not finite")]
    NonFiniteEmbedding { index: usize },
    #[error("trained model at {path} is corrupt: {reason}")]
    CorruptModel { path: PathBuf, reason: String },
    #[error(transparent)]
    Extractor(#[from] ExtractorError),
    #[error("request abandoned by its caller before anything was stored")]
    Cancelled,
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl FaceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FaceError::NoFaceDetected
            | FaceError::MultipleFacesDetected { .. }
            | FaceError::EmbeddingExtractionFailed
            | FaceError::QualityRejected { .. }
            | FaceError::InvalidThreshold(_)
            | FaceError::InvalidImage(_)
            | FaceError::UnsupportedImageFormat { .. }
            | FaceError::InvalidEmbedding { .. }
            | FaceError::NonFiniteEmbedding { .. } => ErrorKind::InvalidInput,
            FaceError::NoEnrollmentData { .. }
            | FaceError::NoUsableEmbeddings { .. }
            | FaceError::NoReferenceData { .. }
            | FaceError::NoUsableReferenceEmbeddings { .. } => ErrorKind::NotReady,
            FaceError::Extractor(_) | FaceError::Cancelled => ErrorKind::Unavailable,
            FaceError::CorruptModel { .. } | FaceError::Io(_) | FaceError::Serialization(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Only a timed out or unreachable embedding service is worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FaceError::Extractor(ExtractorError::TimedOut(_) | ExtractorError::Unavailable(_))
        )
    }
}
