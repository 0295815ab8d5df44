//! Decoded input images, keeping the original bytes for persistence.

use image::{DynamicImage, GenericImageView, ImageFormat};
use serde::Serialize;
use std::path::Path;

use crate::error::FaceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

/// An image accepted from a caller: original encoded bytes plus the decoded pixels.
#[derive(Debug, Clone)]
pub struct SampleImage {
    bytes: Vec<u8>,
    format: ImageFormat,
    image: DynamicImage,
}

impl SampleImage {
    /// Decode JPEG or PNG bytes. Other formats the decoder understands are
    /// refused so every stored sample is visible to training.
    pub fn decode(bytes: Vec<u8>) -> Result<Self, FaceError> {
        let format = image::guess_format(&bytes)?;
        if !matches!(format, ImageFormat::Png | ImageFormat::Jpeg) {
            return Err(FaceError::UnsupportedImageFormat {
                format: format!("{format:?}"),
            });
        }
        let image = image::load_from_memory_with_format(&bytes, format)?;
        Ok(Self { bytes, format, image })
    }

    pub fn open(path: &Path) -> Result<Self, FaceError> {
        Self::decode(std::fs::read(path)?)
    }

    pub fn image(&self) -> &DynamicImage {
        &self.image
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn size(&self) -> ImageSize {
        let (width, height) = self.image.dimensions();
        ImageSize { width, height }
    }

    /// File extension matching the encoded format.
    pub fn extension(&self) -> &'static str {
        match self.format {
            ImageFormat::Png => "png",
            _ => "jpg",
        }
    }
}
