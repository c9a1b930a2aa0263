//! Pose registration of a new image against the existing map.

use rand::Rng;
use tracing::{debug, info};

use crate::error::{SfmError, SfmResult};
use crate::features::{DescriptorMatcher, FeatureSet, MatchingConfig};
use crate::geometry::{Intrinsics, PnpSolver};
use crate::map::{CameraId, MapStore, PointId};

use super::correspondence::{find_correspondences, CorrespondenceConfig};

/// Outcome of a successful registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistrationResult {
    pub camera: CameraId,
    /// Candidate 2D-3D bindings handed to the solver.
    pub num_correspondences: usize,
    /// Bindings inserted into the camera's correspondence map.
    pub num_inliers: usize,
}

/// Localize image `id` against the map and register it.
///
/// On success the camera is registered with the solved pose and every inlier
/// binding is recorded as a correspondence. On failure the map is left
/// untouched and the error tells the caller to skip the image
/// (`InsufficientCorrespondences`, `PoseSolveFailure`).
#[allow(clippy::too_many_arguments)]
pub fn register_image<R: Rng + ?Sized>(
    map: &mut MapStore,
    id: CameraId,
    features: FeatureSet,
    intrinsics: &Intrinsics,
    matcher: &dyn DescriptorMatcher,
    solver: &dyn PnpSolver,
    matching: &MatchingConfig,
    config: &CorrespondenceConfig,
    rng: &mut R,
) -> SfmResult<RegistrationResult> {
    if map.contains_camera(id) {
        return Err(SfmError::DuplicateCamera(id));
    }

    let candidates = find_correspondences(map, &features, matcher, matching, config, rng);
    debug!("Registration: {} candidate correspondences for {}", candidates.len(), id);

    let required = config.min_correspondences.max(1);
    if candidates.len() < required {
        return Err(SfmError::InsufficientCorrespondences {
            camera: id,
            found: candidates.len(),
            required,
        });
    }

    let solution = solver
        .solve(&candidates.world_points, &candidates.image_points, intrinsics)
        .filter(|s| !s.inliers.is_empty())
        .ok_or(SfmError::PoseSolveFailure(id))?;

    // Resolve every inlier before the map is touched.
    let bindings: Vec<(usize, PointId)> = solution
        .inliers
        .iter()
        .map(|&i| Some((*candidates.keypoint_indices.get(i)?, *candidates.point_ids.get(i)?)))
        .collect::<Option<Vec<_>>>()
        .ok_or(SfmError::PoseSolveFailure(id))?;

    map.register_camera(id, solution.pose, features)?;
    for (keypoint, point) in bindings {
        map.insert_correspondence(id, keypoint, point)?;
    }

    info!(
        "Registered {}: {}/{} inliers",
        id,
        solution.inliers.len(),
        candidates.len()
    );

    Ok(RegistrationResult {
        camera: id,
        num_correspondences: candidates.len(),
        num_inliers: solution.inliers.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{BruteForceMatcher, Descriptors};
    use crate::geometry::{PnpSolution, Pose, RansacPnp};
    use crate::map::TrackEntry;
    use nalgebra::{Vector2, Vector3};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn descriptor(i: usize) -> Vec<f32> {
        let mut d = vec![0.0; 32];
        d[i % 32] = 10.0 + (i / 32) as f32 * 7.0;
        d
    }

    fn intrinsics() -> Intrinsics {
        Intrinsics::new(500.0, 500.0, 320.0, 240.0)
    }

    fn grid_points() -> Vec<Vector3<f64>> {
        let mut pts = Vec::new();
        for i in 0..5 {
            for j in 0..4 {
                let z = 4.0 + ((i * 3 + j) % 5) as f64 * 0.4;
                pts.push(Vector3::new(i as f64 * 0.5 - 1.0, j as f64 * 0.5 - 0.75, z));
            }
        }
        pts
    }

    fn view(pose: &Pose, points: &[Vector3<f64>]) -> FeatureSet {
        let k = intrinsics();
        let keypoints = points.iter().map(|p| k.project(&pose.transform_point(p))).collect();
        let rows: Vec<Vec<f32>> = (0..points.len()).map(descriptor).collect();
        FeatureSet::new(keypoints, Descriptors::from_rows(&rows).unwrap()).unwrap()
    }

    /// Map with camera 0 at the origin observing every grid point.
    fn seeded_map(points: &[Vector3<f64>]) -> MapStore {
        let mut map = MapStore::new((0..4).map(|i| format!("{}.jpg", i)).collect());
        let cam0 = CameraId::new(0);
        map.register_camera(cam0, Pose::identity(), view(&Pose::identity(), points)).unwrap();
        for (k, p) in points.iter().enumerate() {
            map.add_point(*p, [0; 3], &[TrackEntry::new(cam0, k)]).unwrap();
        }
        map
    }

    struct FailingSolver;

    /// Returns the true pose but an inlier index past the candidate list.
    struct OutOfRangeSolver(Pose);

    impl PnpSolver for OutOfRangeSolver {
        fn solve(&self, world: &[Vector3<f64>], _: &[Vector2<f64>], _: &Intrinsics) -> Option<PnpSolution> {
            Some(PnpSolution {
                pose: self.0.clone(),
                inliers: vec![0, 1, world.len() + 3],
            })
        }
    }

    impl PnpSolver for FailingSolver {
        fn solve(&self, _: &[Vector3<f64>], _: &[Vector2<f64>], _: &Intrinsics) -> Option<PnpSolution> {
            None
        }
    }

    #[test]
    fn test_register_recovers_pose() {
        let points = grid_points();
        let mut map = seeded_map(&points);
        let truth = Pose::from_rotation_vector(&Vector3::new(0.0, 0.05, 0.0), &Vector3::new(-0.3, 0.0, 0.0));

        let mut rng = StdRng::seed_from_u64(0);
        let result = register_image(
            &mut map,
            CameraId::new(1),
            view(&truth, &points),
            &intrinsics(),
            &BruteForceMatcher,
            &RansacPnp::default(),
            &MatchingConfig::default(),
            &CorrespondenceConfig::default(),
            &mut rng,
        )
        .unwrap();

        assert_eq!(result.num_correspondences, points.len());
        assert_eq!(result.num_inliers, points.len());
        let pose = map.camera_pose(CameraId::new(1)).unwrap();
        assert!((pose.translation - truth.translation).norm() < 1e-6);
        assert_eq!(map.camera(CameraId::new(1)).unwrap().num_tracked(), points.len());
    }

    #[test]
    fn test_insufficient_correspondences_leaves_map_unchanged() {
        let points = grid_points();
        let mut map = seeded_map(&points);
        let few = FeatureSet::new(
            vec![Vector2::new(1.0, 1.0); 3],
            Descriptors::from_rows(&[descriptor(0), descriptor(1), descriptor(2)]).unwrap(),
        )
        .unwrap();

        let mut rng = StdRng::seed_from_u64(0);
        let err = register_image(
            &mut map,
            CameraId::new(2),
            few,
            &intrinsics(),
            &BruteForceMatcher,
            &RansacPnp::default(),
            &MatchingConfig::default(),
            &CorrespondenceConfig::default(),
            &mut rng,
        )
        .unwrap_err();

        assert!(matches!(err, SfmError::InsufficientCorrespondences { found: 3, .. }));
        assert!(!map.contains_camera(CameraId::new(2)));
        assert_eq!(map.num_cameras(), 1);
    }

    #[test]
    fn test_solver_failure_is_reported() {
        let points = grid_points();
        let mut map = seeded_map(&points);
        let mut rng = StdRng::seed_from_u64(0);
        let err = register_image(
            &mut map,
            CameraId::new(1),
            view(&Pose::identity(), &points),
            &intrinsics(),
            &BruteForceMatcher,
            &FailingSolver,
            &MatchingConfig::default(),
            &CorrespondenceConfig::default(),
            &mut rng,
        )
        .unwrap_err();

        assert!(matches!(err, SfmError::PoseSolveFailure(id) if id == CameraId::new(1)));
        assert!(!map.contains_camera(CameraId::new(1)));
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let points = grid_points();
        let mut map = seeded_map(&points);
        let mut rng = StdRng::seed_from_u64(0);
        let err = register_image(
            &mut map,
            CameraId::new(0),
            view(&Pose::identity(), &points),
            &intrinsics(),
            &BruteForceMatcher,
            &RansacPnp::default(),
            &MatchingConfig::default(),
            &CorrespondenceConfig::default(),
            &mut rng,
        )
        .unwrap_err();
        assert!(matches!(err, SfmError::DuplicateCamera(_)));
    }

    #[test]
    fn test_out_of_range_inlier_leaves_map_unchanged() {
        let points = grid_points();
        let mut map = seeded_map(&points);
        let truth = Pose::from_rotation_vector(&Vector3::new(0.0, 0.05, 0.0), &Vector3::new(-0.3, 0.0, 0.0));
        let observations_before = map.num_observations();

        let mut rng = StdRng::seed_from_u64(0);
        let err = register_image(
            &mut map,
            CameraId::new(1),
            view(&truth, &points),
            &intrinsics(),
            &BruteForceMatcher,
            &OutOfRangeSolver(truth.clone()),
            &MatchingConfig::default(),
            &CorrespondenceConfig::default(),
            &mut rng,
        )
        .unwrap_err();

        assert!(matches!(err, SfmError::PoseSolveFailure(id) if id == CameraId::new(1)));
        assert!(!map.contains_camera(CameraId::new(1)));
        assert_eq!(map.num_observations(), observations_before);
    }
}
