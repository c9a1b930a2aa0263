//! Keypoints, descriptors and the feature-provider seam.
//!
//! Detection itself is external: a [`FeatureProvider`] hands the engine one
//! [`FeatureSet`] per image. Descriptors are float vectors compared with L2
//! distance.

pub mod matching;

use nalgebra::Vector2;

use crate::error::{SfmError, SfmResult};

pub use matching::{BruteForceMatcher, DescriptorMatch, DescriptorMatcher, MatchingConfig};

/// Dense row-major descriptor matrix, one row per keypoint.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Descriptors {
    dim: usize,
    data: Vec<f32>,
}

impl Descriptors {
    /// Wrap a flat buffer of `rows * dim` values.
    pub fn new(dim: usize, data: Vec<f32>) -> SfmResult<Self> {
        if dim == 0 && !data.is_empty() {
            return Err(SfmError::FeatureFile {
                path: Default::default(),
                reason: "descriptor dimension is zero".into(),
            });
        }
        if dim > 0 && data.len() % dim != 0 {
            return Err(SfmError::FeatureFile {
                path: Default::default(),
                reason: format!("{} values do not split into rows of {}", data.len(), dim),
            });
        }
        Ok(Self { dim, data })
    }

    /// Build from equally sized rows.
    pub fn from_rows<R: AsRef<[f32]>>(rows: &[R]) -> SfmResult<Self> {
        let dim = rows.first().map(|r| r.as_ref().len()).unwrap_or(0);
        let mut data = Vec::with_capacity(rows.len() * dim);
        for (i, row) in rows.iter().enumerate() {
            let row = row.as_ref();
            if row.len() != dim {
                return Err(SfmError::FeatureFile {
                    path: Default::default(),
                    reason: format!("descriptor {} has length {}, expected {}", i, row.len(), dim),
                });
            }
            data.extend_from_slice(row);
        }
        Self::new(dim, data)
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Number of descriptors.
    pub fn len(&self) -> usize {
        if self.dim == 0 {
            0
        } else {
            self.data.len() / self.dim
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The i-th descriptor.
    #[inline]
    pub fn row(&self, i: usize) -> &[f32] {
        &self.data[i * self.dim..(i + 1) * self.dim]
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f32]> + '_ {
        (0..self.len()).map(move |i| self.row(i))
    }
}

/// Keypoints of one image with their descriptors, index-aligned.
#[derive(Debug, Clone, Default)]
pub struct FeatureSet {
    /// Pixel locations.
    pub keypoints: Vec<Vector2<f64>>,
    pub descriptors: Descriptors,
}

impl FeatureSet {
    /// Pair keypoints with descriptors; the counts must agree.
    pub fn new(keypoints: Vec<Vector2<f64>>, descriptors: Descriptors) -> SfmResult<Self> {
        if keypoints.len() != descriptors.len() {
            return Err(SfmError::FeatureFile {
                path: Default::default(),
                reason: format!(
                    "{} keypoints but {} descriptors",
                    keypoints.len(),
                    descriptors.len()
                ),
            });
        }
        Ok(Self {
            keypoints,
            descriptors,
        })
    }

    pub fn len(&self) -> usize {
        self.keypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keypoints.is_empty()
    }
}

/// Supplies keypoints and descriptors for the images of a sequence.
pub trait FeatureProvider {
    /// Features of image `index` (named `name` in the input directory).
    fn extract(&self, index: usize, name: &str) -> SfmResult<FeatureSet>;
}
