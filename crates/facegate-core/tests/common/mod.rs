//! Scripted extractor and image builders shared by the integration tests.
//!
//! Test images carry their script in pixel (0, 0):
//! - red: number of faces the extractor reports
//! - green: embedding seed (`unit(seed)`, or all zeros for [`ZERO_SEED`])
//! - blue: [`NORMAL`], [`TINY_FACE`] or [`NO_VECTOR`]

#![allow(dead_code)]

use facegate_core::error::ExtractorError;
use facegate_core::{EmbeddingExtractor, Embedding, FaceBox, SampleImage, EMBEDDING_DIM};
use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb, RgbImage};
use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

pub const ZERO_SEED: u8 = 255;
pub const NORMAL: u8 = 0;
pub const TINY_FACE: u8 = 1;
pub const NO_VECTOR: u8 = 2;

const SIZE: u32 = 64;

#[derive(Default)]
pub struct ScriptedExtractor {
    pub detect_calls: AtomicUsize,
}

impl ScriptedExtractor {
    pub fn detect_calls(&self) -> usize {
        self.detect_calls.load(Ordering::SeqCst)
    }
}

impl EmbeddingExtractor for ScriptedExtractor {
    fn detect_faces(&self, image: &DynamicImage) -> Result<Vec<FaceBox>, ExtractorError> {
        self.detect_calls.fetch_add(1, Ordering::SeqCst);
        let rgb = image.to_rgb8();
        let [count, _, mode] = rgb.get_pixel(0, 0).0;
        let (w, h) = (rgb.width() as i32, rgb.height() as i32);
        let face = if mode == TINY_FACE {
            FaceBox::new(0, w / 10, h / 10, 0)
        } else {
            FaceBox::new(h / 5, w * 4 / 5, h * 4 / 5, w / 5)
        };
        Ok(vec![face; count as usize])
    }

    fn extract_embedding(
        &self,
        image: &DynamicImage,
        _face: &FaceBox,
    ) -> Result<Option<Embedding>, ExtractorError> {
        let [_, seed, mode] = image.to_rgb8().get_pixel(0, 0).0;
        if mode == NO_VECTOR {
            return Ok(None);
        }
        Ok(Some(seed_embedding(seed)))
    }
}

pub fn seed_embedding(seed: u8) -> Embedding {
    let mut values = vec![0.0; EMBEDDING_DIM];
    if seed != ZERO_SEED {
        values[seed as usize % EMBEDDING_DIM] = 1.0;
    }
    Embedding::new(values).unwrap()
}

/// Sharp, mid-brightness image passing every quality gate.
pub fn good(faces: u8, seed: u8) -> Vec<u8> {
    textured(128, [faces, seed, NORMAL])
}

/// 2x2-block checkerboard around `brightness` with the script pixel set.
pub fn textured(brightness: u8, script: [u8; 3]) -> Vec<u8> {
    let hi = brightness.saturating_add(50);
    let lo = brightness.saturating_sub(50);
    let mut img: RgbImage = ImageBuffer::from_fn(SIZE, SIZE, |x, y| {
        let v = if ((x / 2) + (y / 2)) % 2 == 0 { hi } else { lo };
        Rgb([v, v, v])
    });
    img.put_pixel(0, 0, Rgb(script));
    png(img)
}

/// Uniform image with the script pixel set.
pub fn flat(value: u8, script: [u8; 3]) -> Vec<u8> {
    let mut img: RgbImage = ImageBuffer::from_pixel(SIZE, SIZE, Rgb([value, value, value]));
    img.put_pixel(0, 0, Rgb(script));
    png(img)
}

pub fn png(img: RgbImage) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut out, ImageFormat::Png)
        .unwrap();
    out.into_inner()
}

/// Re-encode image bytes in another container format.
pub fn reencode(bytes: &[u8], format: ImageFormat) -> Vec<u8> {
    let img = image::load_from_memory(bytes).unwrap();
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img.to_rgb8())
        .write_to(&mut out, format)
        .unwrap();
    out.into_inner()
}

pub fn sample(bytes: Vec<u8>) -> SampleImage {
    SampleImage::decode(bytes).unwrap()
}

pub fn write(dir: &Path, name: &str, bytes: &[u8]) {
    std::fs::create_dir_all(dir).unwrap();
    std::fs::write(dir.join(name), bytes).unwrap();
}

pub fn file_count(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|entries| entries.count()).unwrap_or(0)
}
