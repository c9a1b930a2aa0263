//! 2D-3D correspondence search for a new image.
//!
//! Matches the new image's descriptors against a bounded set of reference
//! cameras and keeps the matches whose reference keypoint already observes a
//! point. The reference set is:
//! - every registered camera while there are at most `sampling_threshold`
//! - otherwise the `recent_cameras` most recently registered plus up to
//!   `sampled_cameras` drawn at random from the older ones
//!
//! Matching cost is therefore bounded by the reference set size, not by the
//! number of registered cameras. Long-range correspondences to cameras
//! outside the set are missed.

use nalgebra::{Vector2, Vector3};
use rand::prelude::IndexedRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::features::matching::match_with_ratio_test;
use crate::features::{DescriptorMatcher, FeatureSet, MatchingConfig};
use crate::map::{CameraId, MapStore, PointId};

/// Configuration of the reference-camera selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrespondenceConfig {
    /// Most recently registered cameras always searched.
    pub recent_cameras: usize,
    /// Older cameras sampled at random.
    pub sampled_cameras: usize,
    /// Up to this many registered cameras, all of them are searched.
    pub sampling_threshold: usize,
    /// Fewer bindings than this cannot localize a camera.
    pub min_correspondences: usize,
}

impl Default for CorrespondenceConfig {
    fn default() -> Self {
        Self {
            recent_cameras: 5,
            sampled_cameras: 3,
            sampling_threshold: 8,
            min_correspondences: 6,
        }
    }
}

/// Parallel arrays of 2D-3D candidates for pose solving.
#[derive(Debug, Clone, Default)]
pub struct Correspondences {
    /// Pixel location in the new image.
    pub image_points: Vec<Vector2<f64>>,
    /// Current world position of the bound point.
    pub world_points: Vec<Vector3<f64>>,
    /// Keypoint index in the new image.
    pub keypoint_indices: Vec<usize>,
    pub point_ids: Vec<PointId>,
}

impl Correspondences {
    pub fn len(&self) -> usize {
        self.point_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.point_ids.is_empty()
    }

    fn push(&mut self, pixel: Vector2<f64>, world: Vector3<f64>, keypoint: usize, point: PointId) {
        self.image_points.push(pixel);
        self.world_points.push(world);
        self.keypoint_indices.push(keypoint);
        self.point_ids.push(point);
    }
}

/// Choose the cameras searched for correspondences, in processing order.
///
/// Recent cameras come first, newest first, followed by the random sample.
pub fn select_reference_cameras<R: Rng + ?Sized>(
    map: &MapStore,
    config: &CorrespondenceConfig,
    rng: &mut R,
) -> Vec<CameraId> {
    let order = map.registration_order();

    if order.len() <= config.sampling_threshold {
        return order.iter().rev().copied().collect();
    }

    let recent = map.most_recent_cameras(config.recent_cameras);
    let pool = &order[..order.len() - recent.len()];

    let mut selected: Vec<CameraId> = recent.iter().rev().copied().collect();
    selected.extend(pool.choose_multiple(rng, config.sampled_cameras.min(pool.len())).copied());
    selected
}

/// Find candidate 2D-3D bindings for a new image.
///
/// For every reference camera, ratio-tested matches whose reference keypoint
/// is bound to a point bind the new keypoint to that point. The first
/// binding of a new keypoint wins; later ones are discarded.
pub fn find_correspondences<R: Rng + ?Sized>(
    map: &MapStore,
    features: &FeatureSet,
    matcher: &dyn DescriptorMatcher,
    matching: &MatchingConfig,
    config: &CorrespondenceConfig,
    rng: &mut R,
) -> Correspondences {
    let mut result = Correspondences::default();
    if features.is_empty() {
        return result;
    }

    let mut bound = vec![false; features.len()];
    let references = select_reference_cameras(map, config, rng);

    for ref_id in &references {
        let Some(reference) = map.camera(*ref_id) else {
            continue;
        };
        if reference.num_tracked() == 0 {
            continue;
        }

        let matches = match_with_ratio_test(
            matcher,
            &features.descriptors,
            reference.descriptors(),
            matching.ratio_threshold,
        );

        let before = result.len();
        for m in matches {
            if bound[m.query_idx] {
                continue;
            }
            let Some(point_id) = reference.point_at(m.train_idx) else {
                continue;
            };
            let Some(world) = map.point_position(point_id) else {
                continue;
            };
            bound[m.query_idx] = true;
            result.push(features.keypoints[m.query_idx], *world, m.query_idx, point_id);
        }

        debug!("Correspondences: {} new bindings from {}", result.len() - before, ref_id);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{BruteForceMatcher, Descriptors};
    use crate::geometry::Pose;
    use crate::map::TrackEntry;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    /// Descriptor `i` is a one-hot-ish vector so that equal ids match exactly.
    fn descriptor(i: usize) -> Vec<f32> {
        let mut d = vec![0.0; 16];
        d[i % 16] = 10.0 + (i / 16) as f32 * 10.0;
        d
    }

    fn features(ids: &[usize]) -> FeatureSet {
        let keypoints = ids.iter().map(|&i| Vector2::new(i as f64, i as f64)).collect();
        let rows: Vec<Vec<f32>> = ids.iter().map(|&i| descriptor(i)).collect();
        FeatureSet::new(keypoints, Descriptors::from_rows(&rows).unwrap()).unwrap()
    }

    fn empty_map(n: usize) -> MapStore {
        MapStore::new((0..n).map(|i| format!("{}.png", i)).collect())
    }

    #[test]
    fn test_all_cameras_used_below_threshold() {
        let mut map = empty_map(10);
        for i in 0..4 {
            map.register_camera(CameraId::new(i), Pose::identity(), features(&[1])).unwrap();
        }
        let mut rng = StdRng::seed_from_u64(1);
        let refs = select_reference_cameras(&map, &CorrespondenceConfig::default(), &mut rng);
        assert_eq!(refs, vec![CameraId::new(3), CameraId::new(2), CameraId::new(1), CameraId::new(0)]);
    }

    #[test]
    fn test_reference_set_is_bounded() {
        let mut map = empty_map(20);
        for i in 0..15 {
            map.register_camera(CameraId::new(i), Pose::identity(), features(&[1])).unwrap();
        }
        let config = CorrespondenceConfig::default();
        let mut rng = StdRng::seed_from_u64(3);
        let refs = select_reference_cameras(&map, &config, &mut rng);

        assert_eq!(refs.len(), 8);
        assert_eq!(&refs[..5], &[14, 13, 12, 11, 10].map(CameraId::new));
        let mut sampled = refs[5..].to_vec();
        sampled.sort();
        sampled.dedup();
        assert_eq!(sampled.len(), 3);
        assert!(sampled.iter().all(|id| id.index() < 10));
    }

    #[test]
    fn test_first_match_wins() {
        let mut map = empty_map(5);
        map.register_camera(CameraId::new(0), Pose::identity(), features(&[0, 1, 2, 3])).unwrap();
        map.register_camera(CameraId::new(1), Pose::identity(), features(&[0, 1, 2, 3])).unwrap();

        // Keypoint 2 is bound to different points in the two cameras.
        let p0 = map
            .add_point(Vector3::new(0.0, 0.0, 1.0), [0; 3], &[TrackEntry::new(CameraId::new(0), 2)])
            .unwrap();
        let p1 = map
            .add_point(Vector3::new(0.0, 0.0, 2.0), [0; 3], &[TrackEntry::new(CameraId::new(1), 2)])
            .unwrap();

        let query = features(&[2, 7]);
        let mut rng = StdRng::seed_from_u64(0);
        let result = find_correspondences(
            &map,
            &query,
            &BruteForceMatcher,
            &MatchingConfig::default(),
            &CorrespondenceConfig::default(),
            &mut rng,
        );

        // Camera 1 is the most recent and is processed first.
        assert_eq!(result.len(), 1);
        assert_eq!(result.point_ids, vec![p1]);
        assert_ne!(result.point_ids[0], p0);
        assert_eq!(result.keypoint_indices, vec![0]);
        assert_eq!(result.world_points[0], Vector3::new(0.0, 0.0, 2.0));
    }

    #[test]
    fn test_no_shared_descriptors_yields_nothing() {
        let mut map = empty_map(5);
        map.register_camera(CameraId::new(0), Pose::identity(), features(&[0, 1, 2])).unwrap();
        map.add_point(Vector3::zeros(), [0; 3], &[TrackEntry::new(CameraId::new(0), 0)]).unwrap();

        let query = FeatureSet::default();
        let mut rng = StdRng::seed_from_u64(0);
        let result = find_correspondences(
            &map,
            &query,
            &BruteForceMatcher,
            &MatchingConfig::default(),
            &CorrespondenceConfig::default(),
            &mut rng,
        );
        assert!(result.is_empty());
    }
}
