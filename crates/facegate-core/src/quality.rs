//! Image quality analysis: brightness, sharpness and relative face size.
//!
//! Each metric is compared against its own threshold and reported as an
//! independent flag, so every failure maps to one instruction for the user.

use image::{DynamicImage, GrayImage};
use serde::{Deserialize, Serialize};

use crate::types::FaceBox;

const DEFAULT_MIN_BRIGHTNESS: f32 = 60.0;
const DEFAULT_MAX_BRIGHTNESS: f32 = 200.0;
const DEFAULT_MIN_BLUR_SCORE: f32 = 100.0;
const DEFAULT_MIN_FACE_RATIO: f32 = 0.10;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityThresholds {
    /// Mean intensity below this is too dark.
    pub min_brightness: f32,
    /// Mean intensity above this is too bright.
    pub max_brightness: f32,
    /// Laplacian variance below this is too blurry.
    pub min_blur_score: f32,
    /// Face area over image area below this is too small.
    pub min_face_ratio: f32,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            min_brightness: DEFAULT_MIN_BRIGHTNESS,
            max_brightness: DEFAULT_MAX_BRIGHTNESS,
            min_blur_score: DEFAULT_MIN_BLUR_SCORE,
            min_face_ratio: DEFAULT_MIN_FACE_RATIO,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityDefect {
    TooDark,
    TooBright,
    TooBlurry,
    FaceTooSmall,
}

impl QualityDefect {
    pub fn message(self) -> &'static str {
        match self {
            QualityDefect::TooDark => {
                "Image is too dark; turn on a light or move somewhere brighter."
            }
            QualityDefect::TooBright => {
                "Image is too bright; avoid direct light behind or onto the face."
            }
            QualityDefect::TooBlurry => {
                "Image is too blurry; hold the camera still and check the focus."
            }
            QualityDefect::FaceTooSmall => "Face is too small; move closer to the camera.",
        }
    }

    /// Brightness overshoot is reported but never blocks enrollment.
    pub fn blocks_enrollment(self) -> bool {
        !matches!(self, QualityDefect::TooBright)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityReport {
    pub brightness: f32,
    pub is_too_dark: bool,
    pub is_too_bright: bool,
    pub blur_score: f32,
    pub is_too_blurry: bool,
    pub face_size_ratio: f32,
    pub is_face_too_small: bool,
    pub warnings: Vec<String>,
}

impl QualityReport {
    /// Flagged defects, in warning order.
    pub fn defects(&self) -> Vec<QualityDefect> {
        [
            (self.is_too_dark, QualityDefect::TooDark),
            (self.is_too_bright, QualityDefect::TooBright),
            (self.is_too_blurry, QualityDefect::TooBlurry),
            (self.is_face_too_small, QualityDefect::FaceTooSmall),
        ]
        .into_iter()
        .filter_map(|(flag, defect)| flag.then_some(defect))
        .collect()
    }

    pub fn blocking_defects(&self) -> Vec<QualityDefect> {
        self.defects()
            .into_iter()
            .filter(|d| d.blocks_enrollment())
            .collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct QualityAnalyzer {
    thresholds: QualityThresholds,
}

impl QualityAnalyzer {
    pub fn new(thresholds: QualityThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &QualityThresholds {
        &self.thresholds
    }

    /// Analyze an image and the face found in it. Never fails; degenerate
    /// images yield zero-valued metrics.
    pub fn analyze(&self, image: &DynamicImage, face: &FaceBox) -> QualityReport {
        let gray = image.to_luma8();
        let t = &self.thresholds;

        let brightness = mean_brightness(&gray);
        let blur_score = laplacian_variance(&gray);
        let face_size_ratio = face_size_ratio(&gray, face);

        let mut report = QualityReport {
            brightness,
            is_too_dark: brightness < t.min_brightness,
            is_too_bright: brightness > t.max_brightness,
            blur_score,
            is_too_blurry: blur_score < t.min_blur_score,
            face_size_ratio,
            is_face_too_small: face_size_ratio < t.min_face_ratio,
            warnings: Vec::new(),
        };
        report.warnings = report
            .defects()
            .into_iter()
            .map(|d| d.message().to_string())
            .collect();

        tracing::debug!(
            brightness,
            blur_score,
            face_size_ratio,
            warnings = report.warnings.len(),
            "quality analyzed"
        );
        report
    }
}

/// Average grayscale intensity (0.0–255.0).
fn mean_brightness(gray: &GrayImage) -> f32 {
    let pixels = gray.as_raw();
    if pixels.is_empty() {
        return 0.0;
    }
    let sum: u64 = pixels.iter().map(|&p| p as u64).sum();
    (sum as f64 / pixels.len() as f64) as f32
}

/// Variance of the 4-neighbour Laplacian response with reflect-101 borders.
fn laplacian_variance(gray: &GrayImage) -> f32 {
    let (w, h) = gray.dimensions();
    let (w, h) = (w as usize, h as usize);
    if w == 0 || h == 0 {
        return 0.0;
    }
    let px = gray.as_raw();
    let at = |x: isize, y: isize| px[reflect101(y, h) * w + reflect101(x, w)] as f64;

    let mut responses = Vec::with_capacity(w * h);
    for y in 0..h as isize {
        for x in 0..w as isize {
            let lap = at(x - 1, y) + at(x + 1, y) + at(x, y - 1) + at(x, y + 1) - 4.0 * at(x, y);
            responses.push(lap);
        }
    }

    let n = responses.len() as f64;
    let mean = responses.iter().sum::<f64>() / n;
    let variance = responses.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
    variance as f32
}

/// Mirror an out-of-range index without repeating the edge pixel.
fn reflect101(i: isize, len: usize) -> usize {
    let last = len as isize - 1;
    if last == 0 {
        return 0;
    }
    let i = if i < 0 { -i } else { i };
    let i = if i > last { 2 * last - i } else { i };
    i.clamp(0, last) as usize
}

fn face_size_ratio(gray: &GrayImage, face: &FaceBox) -> f32 {
    let image_area = gray.width() as u64 * gray.height() as u64;
    if image_area == 0 {
        return 0.0;
    }
    (face.area() as f64 / image_area as f64).clamp(0.0, 1.0) as f32
}
