//! Registered camera record.

use std::collections::HashMap;

use nalgebra::Vector2;

use crate::features::{Descriptors, FeatureSet};
use crate::geometry::Pose;

use super::types::{CameraId, PointId};

/// A camera registered in the map.
///
/// Pose, keypoints, descriptors and the correspondence map are created
/// together by [`MapStore::register_camera`](super::MapStore::register_camera).
/// Only the pose is mutated afterwards (by bundle adjustment).
#[derive(Debug, Clone)]
pub struct CameraRecord {
    pub id: CameraId,

    /// World-to-camera pose.
    pub pose: Pose,

    /// Keypoints and descriptors of the image.
    pub features: FeatureSet,

    /// Local keypoint index → point it observes (the known correspondences).
    pub correspondences: HashMap<usize, PointId>,
}

impl CameraRecord {
    pub(super) fn new(id: CameraId, pose: Pose, features: FeatureSet) -> Self {
        Self {
            id,
            pose,
            features,
            correspondences: HashMap::new(),
        }
    }

    /// Pixel location of a keypoint.
    pub fn keypoint(&self, index: usize) -> Option<&Vector2<f64>> {
        self.features.keypoints.get(index)
    }

    pub fn keypoints(&self) -> &[Vector2<f64>] {
        &self.features.keypoints
    }

    pub fn descriptors(&self) -> &Descriptors {
        &self.features.descriptors
    }

    pub fn num_keypoints(&self) -> usize {
        self.features.len()
    }

    /// Point observed at `keypoint`, if any.
    pub fn point_at(&self, keypoint: usize) -> Option<PointId> {
        self.correspondences.get(&keypoint).copied()
    }

    pub fn is_tracked(&self, keypoint: usize) -> bool {
        self.correspondences.contains_key(&keypoint)
    }

    /// Number of keypoints bound to a point.
    pub fn num_tracked(&self) -> usize {
        self.correspondences.len()
    }
}
