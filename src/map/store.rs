//! MapStore - Container for cameras, points and their correspondences.
//!
//! The store is an arena: cameras live in an ordered map keyed by
//! [`CameraId`], points in a dense append-only vector indexed by
//! [`PointId`]. Cross references are ids only:
//! - camera → point through each camera's correspondence map
//! - point → cameras implicitly, by scanning correspondence maps
//!
//! It provides:
//! - all-or-nothing camera registration
//! - point creation with its track
//! - read accessors used by search, triangulation and export
//! - the two mutators bundle adjustment needs (pose, position)

use std::collections::{BTreeMap, HashMap};

use nalgebra::{Vector2, Vector3};

use crate::error::{SfmError, SfmResult};
use crate::features::FeatureSet;
use crate::geometry::Pose;

use super::camera::CameraRecord;
use super::point::{Color, PointRecord};
use super::types::{CameraId, PointId, TrackEntry};

/// One reprojection constraint: `camera` sees `point` at `pixel`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub camera: CameraId,
    pub keypoint: usize,
    pub point: PointId,
    pub pixel: Vector2<f64>,
}

/// The reconstruction map.
pub struct MapStore {
    /// Names of the input images, indexed by image index.
    image_names: Vec<String>,

    /// Registered cameras, ascending by id.
    cameras: BTreeMap<CameraId, CameraRecord>,

    /// Camera ids in the order they were registered.
    registration_order: Vec<CameraId>,

    /// Points, `points[i].id == PointId(i)`.
    points: Vec<PointRecord>,
}

impl MapStore {
    /// Create an empty store for the given ordered image list.
    pub fn new(image_names: Vec<String>) -> Self {
        Self {
            image_names,
            cameras: BTreeMap::new(),
            registration_order: Vec::new(),
            points: Vec::new(),
        }
    }

    pub fn image_names(&self) -> &[String] {
        &self.image_names
    }

    /// Name of the image a camera id refers to.
    pub fn image_name(&self, id: CameraId) -> Option<&str> {
        self.image_names.get(id.index()).map(String::as_str)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Mutators
    // ─────────────────────────────────────────────────────────────────────────

    /// Register a camera with its pose and features and an empty
    /// correspondence map.
    pub fn register_camera(&mut self, id: CameraId, pose: Pose, features: FeatureSet) -> SfmResult<()> {
        if self.cameras.contains_key(&id) {
            return Err(SfmError::DuplicateCamera(id));
        }
        self.cameras.insert(id, CameraRecord::new(id, pose, features));
        self.registration_order.push(id);
        Ok(())
    }

    /// Append a point and bind every observation to it.
    ///
    /// Every observation must reference a registered camera and an existing
    /// keypoint; this is checked before anything is written. Callers must
    /// also guarantee that no observed keypoint is already bound, which is
    /// only asserted in debug builds.
    pub fn add_point(&mut self, position: Vector3<f64>, color: Color, observations: &[TrackEntry]) -> SfmResult<PointId> {
        if observations.is_empty() {
            return Err(SfmError::EmptyTrack);
        }
        for obs in observations {
            let camera = self.cameras.get(&obs.camera).ok_or(SfmError::UnknownCamera(obs.camera))?;
            if obs.keypoint >= camera.num_keypoints() {
                return Err(SfmError::KeypointOutOfRange {
                    camera: obs.camera,
                    keypoint: obs.keypoint,
                    available: camera.num_keypoints(),
                });
            }
            debug_assert!(
                !camera.is_tracked(obs.keypoint),
                "keypoint {} of {} is already bound",
                obs.keypoint,
                obs.camera
            );
        }

        let id = PointId::new(self.points.len());
        self.points.push(PointRecord { id, position, color });

        for obs in observations {
            if let Some(camera) = self.cameras.get_mut(&obs.camera) {
                camera.correspondences.insert(obs.keypoint, id);
            }
        }

        Ok(id)
    }

    /// Bind a keypoint of a registered camera to an existing point.
    pub fn insert_correspondence(&mut self, camera: CameraId, keypoint: usize, point: PointId) -> SfmResult<()> {
        if point.index() >= self.points.len() {
            return Err(SfmError::UnknownPoint(point));
        }
        let record = self.cameras.get_mut(&camera).ok_or(SfmError::UnknownCamera(camera))?;
        if keypoint >= record.num_keypoints() {
            return Err(SfmError::KeypointOutOfRange {
                camera,
                keypoint,
                available: record.num_keypoints(),
            });
        }
        record.correspondences.insert(keypoint, point);
        Ok(())
    }

    /// Overwrite a camera pose.
    pub fn set_camera_pose(&mut self, id: CameraId, pose: Pose) -> SfmResult<()> {
        let camera = self.cameras.get_mut(&id).ok_or(SfmError::UnknownCamera(id))?;
        camera.pose = pose;
        Ok(())
    }

    /// Overwrite a point position. The id stays the same.
    pub fn set_point_position(&mut self, id: PointId, position: Vector3<f64>) -> SfmResult<()> {
        let point = self.points.get_mut(id.index()).ok_or(SfmError::UnknownPoint(id))?;
        point.position = position;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Camera Queries
    // ─────────────────────────────────────────────────────────────────────────

    pub fn num_cameras(&self) -> usize {
        self.cameras.len()
    }

    pub fn contains_camera(&self, id: CameraId) -> bool {
        self.cameras.contains_key(&id)
    }

    pub fn camera(&self, id: CameraId) -> Option<&CameraRecord> {
        self.cameras.get(&id)
    }

    pub fn camera_pose(&self, id: CameraId) -> Option<&Pose> {
        self.cameras.get(&id).map(|c| &c.pose)
    }

    /// Correspondence map of a camera.
    pub fn correspondences(&self, id: CameraId) -> Option<&HashMap<usize, PointId>> {
        self.cameras.get(&id).map(|c| &c.correspondences)
    }

    /// Registered camera ids, ascending.
    pub fn camera_ids(&self) -> Vec<CameraId> {
        self.cameras.keys().copied().collect()
    }

    /// Cameras in ascending id order.
    pub fn cameras(&self) -> impl Iterator<Item = &CameraRecord> {
        self.cameras.values()
    }

    /// Camera ids in registration order.
    pub fn registration_order(&self) -> &[CameraId] {
        &self.registration_order
    }

    /// The gauge camera: the first one registered.
    pub fn reference_camera(&self) -> Option<CameraId> {
        self.registration_order.first().copied()
    }

    /// The last `n` registered cameras, oldest first.
    pub fn most_recent_cameras(&self, n: usize) -> &[CameraId] {
        let start = self.registration_order.len().saturating_sub(n);
        &self.registration_order[start..]
    }

    /// Up to `n` highest camera ids other than `exclude`, descending.
    pub fn latest_cameras_except(&self, exclude: CameraId, n: usize) -> Vec<CameraId> {
        self.cameras
            .keys()
            .rev()
            .copied()
            .filter(|&id| id != exclude)
            .take(n)
            .collect()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Point Queries
    // ─────────────────────────────────────────────────────────────────────────

    pub fn num_points(&self) -> usize {
        self.points.len()
    }

    pub fn point(&self, id: PointId) -> Option<&PointRecord> {
        self.points.get(id.index())
    }

    pub fn point_position(&self, id: PointId) -> Option<&Vector3<f64>> {
        self.points.get(id.index()).map(|p| &p.position)
    }

    pub fn point_color(&self, id: PointId) -> Option<Color> {
        self.points.get(id.index()).map(|p| p.color)
    }

    /// All points in id order.
    pub fn points(&self) -> &[PointRecord] {
        &self.points
    }

    /// Reconstruct the track of a point, ordered by camera id.
    pub fn track(&self, id: PointId) -> Vec<TrackEntry> {
        let mut track: Vec<TrackEntry> = self
            .cameras
            .values()
            .flat_map(|camera| {
                camera
                    .correspondences
                    .iter()
                    .filter(move |(_, pid)| **pid == id)
                    .map(move |(&kp, _)| TrackEntry::new(camera.id, kp))
            })
            .collect();
        track.sort_by_key(|entry| (entry.camera, entry.keypoint));
        track
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Observations
    // ─────────────────────────────────────────────────────────────────────────

    /// Every (camera, keypoint, point) binding with its pixel, cameras in
    /// ascending id order and keypoints ascending within a camera.
    pub fn observations(&self) -> Vec<Observation> {
        let mut out = Vec::with_capacity(self.num_observations());
        for camera in self.cameras.values() {
            let mut bound: Vec<(usize, PointId)> =
                camera.correspondences.iter().map(|(&k, &p)| (k, p)).collect();
            bound.sort_unstable_by_key(|&(k, _)| k);
            for (keypoint, point) in bound {
                if let Some(pixel) = camera.keypoint(keypoint) {
                    out.push(Observation {
                        camera: camera.id,
                        keypoint,
                        point,
                        pixel: *pixel,
                    });
                }
            }
        }
        out
    }

    pub fn num_observations(&self) -> usize {
        self.cameras.values().map(|c| c.correspondences.len()).sum()
    }
}

impl std::fmt::Debug for MapStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MapStore")
            .field("num_images", &self.image_names.len())
            .field("num_cameras", &self.cameras.len())
            .field("num_points", &self.points.len())
            .field("num_observations", &self.num_observations())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::Descriptors;

    fn features(n: usize) -> FeatureSet {
        let keypoints = (0..n).map(|i| Vector2::new(i as f64, 2.0 * i as f64)).collect();
        let rows: Vec<Vec<f32>> = (0..n).map(|i| vec![i as f32, 0.0]).collect();
        FeatureSet::new(keypoints, Descriptors::from_rows(&rows).unwrap()).unwrap()
    }

    fn store_with_cameras(ids: &[usize]) -> MapStore {
        let names = (0..10).map(|i| format!("img_{:02}.jpg", i)).collect();
        let mut map = MapStore::new(names);
        for &id in ids {
            map.register_camera(CameraId::new(id), Pose::identity(), features(10)).unwrap();
        }
        map
    }

    #[test]
    fn test_register_camera_duplicate() {
        let mut map = store_with_cameras(&[0]);
        let err = map.register_camera(CameraId::new(0), Pose::identity(), features(3)).unwrap_err();
        assert!(matches!(err, SfmError::DuplicateCamera(id) if id == CameraId::new(0)));
        assert_eq!(map.num_cameras(), 1);
    }

    #[test]
    fn test_register_camera_starts_untracked() {
        let map = store_with_cameras(&[0, 2]);
        assert_eq!(map.correspondences(CameraId::new(2)).unwrap().len(), 0);
        assert_eq!(map.camera(CameraId::new(2)).unwrap().num_keypoints(), 10);
        assert_eq!(map.image_name(CameraId::new(2)), Some("img_02.jpg"));
    }

    #[test]
    fn test_add_point_ids_are_dense_and_increasing() {
        let mut map = store_with_cameras(&[0, 1]);
        let mut last = None;
        for k in 0..5 {
            let id = map
                .add_point(
                    Vector3::new(k as f64, 0.0, 1.0),
                    [1, 2, 3],
                    &[TrackEntry::new(CameraId::new(0), k), TrackEntry::new(CameraId::new(1), k)],
                )
                .unwrap();
            assert_eq!(id.index(), k);
            if let Some(prev) = last {
                assert!(id > prev);
            }
            last = Some(id);
        }
        assert_eq!(map.num_points(), 5);
        assert_eq!(map.correspondences(CameraId::new(1)).unwrap()[&3], PointId::new(3));
    }

    #[test]
    fn test_add_point_validates_before_writing() {
        let mut map = store_with_cameras(&[0]);
        let err = map
            .add_point(
                Vector3::zeros(),
                [0, 0, 0],
                &[TrackEntry::new(CameraId::new(0), 1), TrackEntry::new(CameraId::new(5), 1)],
            )
            .unwrap_err();
        assert!(matches!(err, SfmError::UnknownCamera(_)));
        assert_eq!(map.num_points(), 0);
        assert!(map.correspondences(CameraId::new(0)).unwrap().is_empty());

        assert!(matches!(map.add_point(Vector3::zeros(), [0; 3], &[]), Err(SfmError::EmptyTrack)));
        assert!(matches!(
            map.add_point(Vector3::zeros(), [0; 3], &[TrackEntry::new(CameraId::new(0), 99)]),
            Err(SfmError::KeypointOutOfRange { .. })
        ));
    }

    #[test]
    fn test_insert_correspondence_requires_existing_point() {
        let mut map = store_with_cameras(&[0, 1]);
        assert!(matches!(
            map.insert_correspondence(CameraId::new(1), 0, PointId::new(0)),
            Err(SfmError::UnknownPoint(_))
        ));

        let pid = map.add_point(Vector3::zeros(), [0; 3], &[TrackEntry::new(CameraId::new(0), 4)]).unwrap();
        map.insert_correspondence(CameraId::new(1), 7, pid).unwrap();
        assert_eq!(
            map.track(pid),
            vec![TrackEntry::new(CameraId::new(0), 4), TrackEntry::new(CameraId::new(1), 7)]
        );
    }

    #[test]
    fn test_camera_ordering_queries() {
        let map = store_with_cameras(&[0, 2, 1, 3, 5]);
        assert_eq!(map.reference_camera(), Some(CameraId::new(0)));
        assert_eq!(map.most_recent_cameras(2), &[CameraId::new(3), CameraId::new(5)]);
        assert_eq!(map.latest_cameras_except(CameraId::new(5), 1), vec![CameraId::new(3)]);
        assert_eq!(
            map.latest_cameras_except(CameraId::new(3), 2),
            vec![CameraId::new(5), CameraId::new(2)]
        );
        assert_eq!(map.camera_ids().first(), Some(&CameraId::new(0)));
    }

    #[test]
    fn test_observations_follow_correspondences() {
        let mut map = store_with_cameras(&[0, 1]);
        map.add_point(
            Vector3::new(0.0, 0.0, 5.0),
            [9, 9, 9],
            &[TrackEntry::new(CameraId::new(0), 2), TrackEntry::new(CameraId::new(1), 3)],
        )
        .unwrap();

        let obs = map.observations();
        assert_eq!(obs.len(), 2);
        assert_eq!(map.num_observations(), 2);
        assert_eq!(obs[0].camera, CameraId::new(0));
        assert_eq!(obs[0].pixel, Vector2::new(2.0, 4.0));
        assert_eq!(obs[1].pixel, Vector2::new(3.0, 6.0));
    }

    #[test]
    fn test_set_point_position_keeps_id() {
        let mut map = store_with_cameras(&[0]);
        let pid = map.add_point(Vector3::zeros(), [0; 3], &[TrackEntry::new(CameraId::new(0), 0)]).unwrap();
        map.set_point_position(pid, Vector3::new(1.0, 2.0, 3.0)).unwrap();
        assert_eq!(map.point(pid).unwrap().id, pid);
        assert_eq!(map.point_position(pid), Some(&Vector3::new(1.0, 2.0, 3.0)));
        assert!(map.set_point_position(PointId::new(9), Vector3::zeros()).is_err());
    }
}
