//! Contract of the external face detection and embedding capability, and the
//! single-face policy applied on top of it.

use image::DynamicImage;

use crate::error::{ExtractorError, FaceError};
use crate::types::{Embedding, FaceBox};

/// Face detector plus embedding model, treated as a black box.
///
/// Implementations must be shareable across request threads.
pub trait EmbeddingExtractor: Send + Sync {
    /// Detect every face in the image. Order is implementation-defined.
    fn detect_faces(&self, image: &DynamicImage) -> Result<Vec<FaceBox>, ExtractorError>;

    /// Compute the embedding for one detected face. `Ok(None)` means the model
    /// produced no vector for that region.
    fn extract_embedding(
        &self,
        image: &DynamicImage,
        face: &FaceBox,
    ) -> Result<Option<Embedding>, ExtractorError>;
}

/// Detect faces and require exactly one, then extract its embedding.
pub fn extract_single_face(
    extractor: &dyn EmbeddingExtractor,
    image: &DynamicImage,
) -> Result<(Embedding, FaceBox), FaceError> {
    let face = detect_single_face(extractor, image)?;
    let embedding = extractor
        .extract_embedding(image, &face)?
        .ok_or(FaceError::EmbeddingExtractionFailed)?;
    Ok((embedding, face))
}

/// Detect faces and require exactly one, without computing an embedding.
pub fn detect_single_face(
    extractor: &dyn EmbeddingExtractor,
    image: &DynamicImage,
) -> Result<FaceBox, FaceError> {
    let faces = extractor.detect_faces(image)?;
    match faces.as_slice() {
        [] => Err(FaceError::NoFaceDetected),
        [face] => Ok(*face),
        many => Err(FaceError::MultipleFacesDetected { count: many.len() }),
    }
}
