//! Core ID types for the reconstruction map.

/// Identifier of a registered camera.
///
/// A CameraId is the index of the image it was registered from, so ids may be
/// sparse when images are skipped. Ids are plain handles; cameras and points
/// reference each other through ids rather than ownership links.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CameraId(pub usize);

impl CameraId {
    /// Create a new CameraId with the given image index.
    pub fn new(id: usize) -> Self {
        Self(id)
    }

    /// The image index this camera was registered from.
    pub fn index(self) -> usize {
        self.0
    }
}

impl std::fmt::Display for CameraId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Cam{}", self.0)
    }
}

/// Identifier of a 3D point.
///
/// PointIds form a dense, append-only sequence: the n-th point ever created
/// has id n, and the id never changes afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PointId(pub usize);

impl PointId {
    /// Create a new PointId with the given value.
    pub fn new(id: usize) -> Self {
        Self(id)
    }

    /// Position of this point in the dense point arena.
    pub fn index(self) -> usize {
        self.0
    }
}

impl std::fmt::Display for PointId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Pt{}", self.0)
    }
}

/// One observation of a point: the camera and the keypoint index inside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TrackEntry {
    pub camera: CameraId,
    pub keypoint: usize,
}

impl TrackEntry {
    pub fn new(camera: CameraId, keypoint: usize) -> Self {
        Self { camera, keypoint }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_camera_id_ordering() {
        let mut ids = vec![CameraId::new(4), CameraId::new(0), CameraId::new(2)];
        ids.sort();
        assert_eq!(ids, vec![CameraId::new(0), CameraId::new(2), CameraId::new(4)]);
    }

    #[test]
    fn test_point_id_display() {
        let id = PointId::new(123);
        assert_eq!(format!("{}", id), "Pt123");
        assert_eq!(format!("{}", CameraId::new(7)), "Cam7");
    }

    #[test]
    fn test_id_as_hashmap_key() {
        use std::collections::HashMap;

        let mut map: HashMap<PointId, &str> = HashMap::new();
        map.insert(PointId::new(1), "first");
        map.insert(PointId::new(2), "second");

        assert_eq!(map.get(&PointId::new(1)), Some(&"first"));
        assert_eq!(map.get(&PointId::new(3)), None);
    }
}
