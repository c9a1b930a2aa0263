//! Synthetic scenes shared by the integration tests.
#![allow(dead_code)]

use nalgebra::{Vector2, Vector3};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use rust_sfm::features::{Descriptors, FeatureProvider, FeatureSet};
use rust_sfm::geometry::{Intrinsics, Pose, RelativePose, TwoViewSolver};
use rust_sfm::io::images::{ColorSource, UniformColor};
use rust_sfm::map::MapStore;
use rust_sfm::SfmResult;

pub const DESCRIPTOR_DIM: usize = 32;

pub fn intrinsics() -> Intrinsics {
    Intrinsics::new(800.0, 800.0, 640.0, 360.0)
}

/// Known points seen by cameras with known poses.
///
/// Every point has one random descriptor shared by all views, so matching
/// recovers exactly the true correspondences. Keypoint order is shuffled
/// per view.
pub struct SyntheticScene {
    pub intrinsics: Intrinsics,
    pub points: Vec<Vector3<f64>>,
    pub poses: Vec<Pose>,
    descriptors: Vec<Vec<f32>>,
    seed: u64,
}

impl SyntheticScene {
    pub fn new(points: Vec<Vector3<f64>>, poses: Vec<Pose>, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let descriptors = (0..points.len())
            .map(|_| (0..DESCRIPTOR_DIM).map(|_| rng.random::<f32>()).collect())
            .collect();
        Self {
            intrinsics: intrinsics(),
            points,
            poses,
            descriptors,
            seed,
        }
    }

    /// Points in a box in front of a row of cameras translating along +x.
    pub fn random(num_points: usize, num_cameras: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let points = (0..num_points)
            .map(|_| {
                Vector3::new(
                    rng.random_range(-2.0..2.0),
                    rng.random_range(-1.5..1.5),
                    rng.random_range(6.0..10.0),
                )
            })
            .collect();
        Self::new(points, camera_row(num_cameras), seed)
    }

    pub fn names(&self) -> Vec<String> {
        (0..self.poses.len()).map(|i| format!("img_{:03}.jpg", i)).collect()
    }

    /// Point index behind every keypoint of view `camera`.
    pub fn keypoint_order(&self, camera: usize) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.points.len()).collect();
        let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(1000 + camera as u64));
        order.shuffle(&mut rng);
        order
    }

    pub fn pixel(&self, camera: usize, point: usize) -> Vector2<f64> {
        self.intrinsics
            .project(&self.poses[camera].transform_point(&self.points[point]))
    }

    pub fn features(&self, camera: usize) -> FeatureSet {
        let order = self.keypoint_order(camera);
        let keypoints = order.iter().map(|&p| self.pixel(camera, p)).collect();
        let rows: Vec<Vec<f32>> = order.iter().map(|&p| self.descriptors[p].clone()).collect();
        FeatureSet::new(keypoints, Descriptors::from_rows(&rows).expect("rows")).expect("features")
    }
}

impl FeatureProvider for SyntheticScene {
    fn extract(&self, index: usize, _name: &str) -> SfmResult<FeatureSet> {
        Ok(self.features(index))
    }
}

/// Cameras spaced along +x with a slight inward yaw; camera 0 at the origin.
pub fn camera_row(n: usize) -> Vec<Pose> {
    (0..n)
        .map(|i| {
            if i == 0 {
                return Pose::identity();
            }
            let f = i as f64;
            let rotation = Vector3::new(0.01 * f.sin(), -0.03 * f, 0.0);
            let center = Vector3::new(0.35 * f, 0.05 * f.sin(), 0.02 * f);
            let pose = Pose::from_rotation_vector(&rotation, &Vector3::zeros());
            let translation = -(pose.rotation * center);
            Pose::new(pose.rotation, translation)
        })
        .collect()
}

/// Two-view solver that returns a fixed relative pose.
pub struct KnownRelativePose(pub Pose);

impl TwoViewSolver for KnownRelativePose {
    fn recover_pose(
        &self,
        points1: &[Vector2<f64>],
        _points2: &[Vector2<f64>],
        _intrinsics: &Intrinsics,
    ) -> Option<RelativePose> {
        Some(RelativePose {
            pose: self.0.clone(),
            inliers: (0..points1.len()).collect(),
        })
    }
}

pub fn gray(_index: usize) -> Box<dyn ColorSource> {
    Box::new(UniformColor([128, 128, 128]))
}

/// Largest pixel reprojection error over all observations.
pub fn max_reprojection_error(map: &MapStore, intrinsics: &Intrinsics) -> f64 {
    map.observations()
        .iter()
        .map(|obs| {
            let pose = map.camera_pose(obs.camera).expect("camera");
            let p = map.point_position(obs.point).expect("point");
            (intrinsics.project(&pose.transform_point(p)) - obs.pixel).norm()
        })
        .fold(0.0, f64::max)
}
