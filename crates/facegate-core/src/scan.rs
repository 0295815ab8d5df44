//! Best-effort embedding extraction over a directory of sample images.
//!
//! A file that cannot be decoded or does not hold exactly one usable face is
//! recorded as skipped; only the caller decides whether an empty result is fatal.

use std::path::{Path, PathBuf};

use crate::error::FaceError;
use crate::extractor::{extract_single_face, EmbeddingExtractor};
use crate::sample::SampleImage;
use crate::types::Embedding;

/// Extensions accepted as sample images (compared case-insensitively).
pub const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

pub struct SkippedFile {
    pub file: String,
    pub error: FaceError,
}

#[derive(Default)]
pub struct ScanReport {
    pub scanned: usize,
    /// `(file name, embedding)` in scan order.
    pub used: Vec<(String, Embedding)>,
    pub skipped: Vec<SkippedFile>,
}

impl ScanReport {
    pub fn is_empty(&self) -> bool {
        self.used.is_empty()
    }
}

pub fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.iter().any(|known| ext.eq_ignore_ascii_case(known)))
        .unwrap_or(false)
}

/// Regular files with an image extension, sorted by name. A missing directory
/// (or a path that is not a directory) lists as empty.
pub fn list_image_files(dir: &Path) -> Result<Vec<PathBuf>, FaceError> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && has_image_extension(&path) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Extract one embedding per file, skipping files that fail.
pub fn scan_embeddings(extractor: &dyn EmbeddingExtractor, files: &[PathBuf]) -> ScanReport {
    files.iter().fold(ScanReport::default(), |mut report, path| {
        report.scanned += 1;
        let file = file_name(path);
        match embed_file(extractor, path) {
            Ok(embedding) => {
                tracing::debug!(file = %file, "embedding extracted");
                report.used.push((file, embedding));
            }
            Err(error) => {
                tracing::warn!(file = %file, error = %error, "skipping sample");
                report.skipped.push(SkippedFile { file, error });
            }
        }
        report
    })
}

fn embed_file(extractor: &dyn EmbeddingExtractor, path: &Path) -> Result<Embedding, FaceError> {
    let sample = SampleImage::open(path)?;
    let (embedding, _) = extract_single_face(extractor, sample.image())?;
    Ok(embedding)
}

pub(crate) fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
