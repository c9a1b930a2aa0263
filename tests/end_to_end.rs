mod common;

use approx::assert_relative_eq;
use nalgebra::{Rotation3, Vector3};

use common::{gray, max_reprojection_error, KnownRelativePose, SyntheticScene};
use rust_sfm::config::PipelineConfig;
use rust_sfm::features::BruteForceMatcher;
use rust_sfm::geometry::{Pose, RansacPnp};
use rust_sfm::io::images::UniformColor;
use rust_sfm::map::CameraId;
use rust_sfm::system::{run_reconstruction, IncrementalReconstruction};

fn cube_corners() -> Vec<Vector3<f64>> {
    let mut corners = Vec::new();
    for &x in &[-1.0, 1.0] {
        for &y in &[-1.0, 1.0] {
            for &z in &[4.0, 6.0] {
                corners.push(Vector3::new(x, y, z));
            }
        }
    }
    corners
}

#[test]
fn test_cube_bootstrap_keeps_corners_in_front_of_both_views() {
    // Camera 1 sits inside the cube looking along +z: the far face is in
    // front of it, the near face behind it.
    let relative = Pose::new(Rotation3::identity(), Vector3::new(0.0, 0.0, -5.0));
    let scene = SyntheticScene::new(cube_corners(), vec![Pose::identity(), relative.clone()], 3);

    let mut recon = IncrementalReconstruction::with_collaborators(
        scene.names(),
        scene.intrinsics,
        PipelineConfig::default(),
        Box::new(BruteForceMatcher),
        Box::new(RansacPnp::default()),
        Box::new(KnownRelativePose(relative)),
    );
    let result = recon
        .bootstrap(
            CameraId::new(0),
            CameraId::new(1),
            scene.features(0),
            scene.features(1),
            &UniformColor([10, 20, 30]),
        )
        .unwrap();

    assert_eq!(result.num_matches, 8);
    assert_eq!(result.num_rejected, 4);
    assert_eq!(result.num_new_points, 4);

    let map = recon.map();
    assert_eq!(map.num_points(), 4);
    for record in map.points() {
        assert_relative_eq!(record.position.z, 6.0, epsilon = 1e-6);
        let truth = scene
            .points
            .iter()
            .find(|p| (*p - record.position).norm() < 1e-6);
        assert!(truth.is_some(), "unexpected point {:?}", record.position);
        assert_eq!(record.color, [10, 20, 30]);
    }
}

#[test]
fn test_full_pipeline_recovers_scene_up_to_scale() {
    let scene = SyntheticScene::random(80, 6, 21);
    let (map, summary) = run_reconstruction(
        scene.names(),
        scene.intrinsics,
        &scene,
        gray,
        PipelineConfig::default(),
    )
    .unwrap();

    assert_eq!(summary.registered.len(), 6);
    assert!(summary.skipped.is_empty());
    assert_eq!(summary.registered[0], CameraId::new(0));
    assert_eq!(summary.registered[1], CameraId::new(2));
    assert_eq!(summary.num_points, 80);
    assert_eq!(summary.ba_runs, 2);
    assert!(summary.final_rms < 1e-3);
    assert!(max_reprojection_error(&map, &scene.intrinsics) < 1e-2);

    // Bootstrap fixes camera 0 at the origin and the 0-2 baseline at unit length.
    assert_eq!(map.camera_pose(CameraId::new(0)), Some(&Pose::identity()));
    let est_center = map.camera_pose(CameraId::new(2)).unwrap().center();
    let true_center = scene.poses[2].center();
    let scale = true_center.norm() / est_center.norm();

    for cam in 0..6 {
        let est = map.camera_pose(CameraId::new(cam)).unwrap();
        assert_relative_eq!(est.rotation, scene.poses[cam].rotation, epsilon = 1e-4);
        assert_relative_eq!(est.center() * scale, scene.poses[cam].center(), epsilon = 1e-3);
    }

    for record in map.points() {
        let nearest = scene
            .points
            .iter()
            .map(|p| (p - record.position * scale).norm())
            .fold(f64::INFINITY, f64::min);
        assert!(nearest < 1e-3, "point {} off by {}", record.id, nearest);
    }
}
