//! 3D point record.

use nalgebra::Vector3;

use super::types::PointId;

/// RGB color of a point, sampled when it is created.
pub type Color = [u8; 3];

/// A triangulated point.
///
/// The observations of a point are not stored here; its track is the set of
/// camera keypoints whose correspondence maps reference this id (see
/// [`MapStore::track`](super::MapStore::track)).
#[derive(Debug, Clone, PartialEq)]
pub struct PointRecord {
    pub id: PointId,

    /// Position in the world frame.
    pub position: Vector3<f64>,

    pub color: Color,
}
