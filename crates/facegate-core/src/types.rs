use serde::{Deserialize, Serialize};

use crate::error::FaceError;

/// Dimension of every embedding produced by the extractor.
pub const EMBEDDING_DIM: usize = 128;

/// Bounding box of a detected face, in pixel coordinates of its source image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceBox {
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
    pub left: i32,
}

impl FaceBox {
    pub fn new(top: i32, right: i32, bottom: i32, left: i32) -> Self {
        Self { top, right, bottom, left }
    }

    /// Zero for inverted boxes.
    pub fn width(&self) -> u64 {
        (self.right as i64 - self.left as i64).max(0) as u64
    }

    pub fn height(&self) -> u64 {
        (self.bottom as i64 - self.top as i64).max(0) as u64
    }

    pub fn area(&self) -> u64 {
        self.width() * self.height()
    }
}

/// Face embedding vector, always [`EMBEDDING_DIM`] long.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f32>", into = "Vec<f32>")]
pub struct Embedding {
    values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Result<Self, FaceError> {
        if values.len() != EMBEDDING_DIM {
            return Err(FaceError::InvalidEmbedding {
                expected: EMBEDDING_DIM,
                actual: values.len(),
            });
        }
        if let Some(index) = values.iter().position(|v| !v.is_finite()) {
            return Err(FaceError::NonFiniteEmbedding { index });
        }
        Ok(Self { values })
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }

    /// Euclidean distance between two embeddings.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        euclidean_distance(&self.values, &other.values)
    }
}

impl TryFrom<Vec<f32>> for Embedding {
    type Error = FaceError;

    fn try_from(values: Vec<f32>) -> Result<Self, Self::Error> {
        Embedding::new(values)
    }
}

impl From<Embedding> for Vec<f32> {
    fn from(embedding: Embedding) -> Self {
        embedding.values
    }
}

pub(crate) fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f32>()
        .sqrt()
}

/// Match threshold, range-checked to `[0.0, 1.0]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Threshold(f32);

impl Threshold {
    pub fn new(value: f32) -> Result<Self, FaceError> {
        if !(0.0..=1.0).contains(&value) {
            return Err(FaceError::InvalidThreshold(value));
        }
        Ok(Self(value))
    }

    pub fn value(self) -> f32 {
        self.0
    }
}

/// Result of matching a candidate embedding against references.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MatchResult {
    pub is_match: bool,
    /// Euclidean distance to the nearest reference.
    pub distance: f32,
    /// Index of the nearest reference within the compared set.
    pub nearest: usize,
}

/// Strategy for comparing a candidate embedding against a set of references.
pub trait Matcher {
    /// Returns `None` only for an empty reference slice.
    fn compare(
        &self,
        candidate: &Embedding,
        references: &[Embedding],
        threshold: Threshold,
    ) -> Option<MatchResult>;
}

/// Nearest-neighbour Euclidean matcher. A distance equal to the threshold matches.
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn compare(
        &self,
        candidate: &Embedding,
        references: &[Embedding],
        threshold: Threshold,
    ) -> Option<MatchResult> {
        let (nearest, distance) = references
            .iter()
            .map(|reference| candidate.euclidean_distance(reference))
            .enumerate()
            .min_by(|(_, a), (_, b)| a.total_cmp(b))?;

        Some(MatchResult {
            is_match: distance <= threshold.value(),
            distance,
            nearest,
        })
    }
}

/// Compare a candidate against a single mean template using the same rule as
/// [`EuclideanMatcher`].
pub fn compare_to_mean(
    candidate: &Embedding,
    mean: &Embedding,
    threshold: Threshold,
) -> MatchResult {
    let distance = candidate.euclidean_distance(mean);
    MatchResult {
        is_match: distance <= threshold.value(),
        distance,
        nearest: 0,
    }
}

#[cfg(test)]
pub(crate) fn unit(index: usize, scale: f32) -> Embedding {
    let mut values = vec![0.0; EMBEDDING_DIM];
    values[index] = scale;
    Embedding::new(values).unwrap()
}
