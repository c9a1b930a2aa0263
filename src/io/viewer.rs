//! Scene export for a three.js-style web viewer.
//!
//! The viewer uses a y-up, z-backward camera convention, so both camera
//! matrices and points are conjugated by `M = diag(1, -1, -1, 1)`.

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::Path;

use nalgebra::{Matrix4, Vector3};
use serde::{Deserialize, Serialize};

use crate::error::SfmResult;
use crate::geometry::Pose;
use crate::map::{Color, MapStore};

use super::ply::write_ply_to;

/// Scene description file written next to the point cloud.
pub const PROJECT_FILE: &str = "project_data.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewerCamera {
    pub id: usize,
    pub filename: String,
    /// Camera-to-world transform in viewer axes, column-major.
    pub matrix: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewerScene {
    pub cameras: Vec<ViewerCamera>,
    pub point_cloud_file: String,
}

fn axis_flip() -> Matrix4<f64> {
    Matrix4::from_diagonal(&nalgebra::Vector4::new(1.0, -1.0, -1.0, 1.0))
}

/// Camera-to-world matrix of `pose` in viewer axes, flattened column-major.
pub fn viewer_matrix(pose: &Pose) -> Vec<f64> {
    let m = axis_flip();
    let t = m * pose.inverse().to_homogeneous() * m;
    // nalgebra storage is column-major already.
    t.as_slice().to_vec()
}

/// Build the scene description for `map`, cameras in ascending id order.
pub fn viewer_scene(map: &MapStore, ply_name: &str) -> ViewerScene {
    let cameras = map
        .cameras()
        .map(|cam| ViewerCamera {
            id: cam.id.index(),
            filename: map
                .image_name(cam.id)
                .map(str::to_string)
                .unwrap_or_else(|| format!("frame_{:03}.jpg", cam.id.index())),
            matrix: viewer_matrix(&cam.pose),
        })
        .collect();

    ViewerScene {
        cameras,
        point_cloud_file: ply_name.to_string(),
    }
}

/// Write `<dir>/<ply_name>` (points with y and z negated) and
/// `<dir>/project_data.json`.
pub fn export_viewer_scene<P: AsRef<Path>>(dir: P, map: &MapStore, ply_name: &str) -> SfmResult<ViewerScene> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir)?;

    let flipped: Vec<Vector3<f64>> = map
        .points()
        .iter()
        .map(|p| Vector3::new(p.position.x, -p.position.y, -p.position.z))
        .collect();
    let colors: Vec<Color> = map.points().iter().map(|p| p.color).collect();
    write_ply_to(BufWriter::new(File::create(dir.join(ply_name))?), &flipped, &colors)?;

    let scene = viewer_scene(map, ply_name);
    serde_json::to_writer(BufWriter::new(File::create(dir.join(PROJECT_FILE))?), &scene)?;
    Ok(scene)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FeatureSet;
    use crate::map::{CameraId, TrackEntry};
    use approx::assert_relative_eq;
    use nalgebra::{Rotation3, Vector2};

    #[test]
    fn test_identity_pose_is_axis_identity() {
        let m = viewer_matrix(&Pose::identity());
        let expected: Vec<f64> = Matrix4::identity().as_slice().to_vec();
        assert_eq!(m, expected);
    }

    #[test]
    fn test_matrix_is_column_major_with_flipped_center() {
        let pose = Pose::new(Rotation3::identity(), Vector3::new(-1.0, -2.0, -3.0));
        let m = viewer_matrix(&pose);
        // Center (1, 2, 3) becomes (1, -2, -3) in the last column.
        assert_relative_eq!(m[12], 1.0);
        assert_relative_eq!(m[13], -2.0);
        assert_relative_eq!(m[14], -3.0);
        assert_relative_eq!(m[15], 1.0);
    }

    #[test]
    fn test_export_writes_both_files() {
        let mut map = MapStore::new(vec!["a.jpg".into(), "b.jpg".into()]);
        let features = FeatureSet::new(
            vec![Vector2::new(1.0, 1.0)],
            crate::features::Descriptors::from_rows(&[[1.0f32]]).unwrap(),
        )
        .unwrap();
        let pose = Pose::from_rotation_vector(&Vector3::new(0.03, -0.31, 0.01), &Vector3::new(0.2, -0.1, 1.5));
        map.register_camera(CameraId::new(1), pose.clone(), features).unwrap();
        map.add_point(Vector3::new(1.0, 2.0, 3.0), [4, 5, 6], &[TrackEntry::new(CameraId::new(1), 0)])
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let scene = export_viewer_scene(dir.path(), &map, "model.ply").unwrap();
        assert_eq!(scene.cameras.len(), 1);
        assert_eq!(scene.cameras[0].filename, "b.jpg");

        let ply = std::fs::read_to_string(dir.path().join("model.ply")).unwrap();
        assert!(ply.ends_with("1.0000 -2.0000 -3.0000 4 5 6\n"));

        let json = std::fs::read_to_string(dir.path().join(PROJECT_FILE)).unwrap();
        let back: ViewerScene = serde_json::from_str(&json).unwrap();
        assert_eq!(back.point_cloud_file, "model.ply");
        assert_eq!(back.cameras.len(), 1);
        assert_eq!(back.cameras[0].id, 1);
        assert_eq!(back.cameras[0].filename, "b.jpg");
        let expected = viewer_matrix(&pose);
        assert_eq!(back.cameras[0].matrix.len(), 16);
        for (read, written) in back.cameras[0].matrix.iter().zip(&expected) {
            assert_relative_eq!(*read, *written, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_unknown_name_uses_frame_placeholder() {
        let mut map = MapStore::new(vec![]);
        map.register_camera(CameraId::new(7), Pose::identity(), FeatureSet::default()).unwrap();
        let scene = viewer_scene(&map, "model.ply");
        assert_eq!(scene.cameras[0].filename, "frame_007.jpg");
    }
}
