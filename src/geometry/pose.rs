//! Rigid camera pose (world-to-camera).

use nalgebra::{Matrix3, Matrix3x4, Matrix4, Rotation3, Vector3};

use super::Intrinsics;

/// Camera extrinsics: `p_cam = rotation * p_world + translation`.
#[derive(Debug, Clone, PartialEq)]
pub struct Pose {
    pub rotation: Rotation3<f64>,
    pub translation: Vector3<f64>,
}

impl Pose {
    pub fn new(rotation: Rotation3<f64>, translation: Vector3<f64>) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    /// Identity rotation, zero translation. The gauge of the reconstruction.
    pub fn identity() -> Self {
        Self {
            rotation: Rotation3::identity(),
            translation: Vector3::zeros(),
        }
    }

    /// Build a pose from a 3x3 matrix that is orthonormal up to round-off.
    pub fn from_matrix(rotation: &Matrix3<f64>, translation: Vector3<f64>) -> Self {
        Self {
            rotation: Rotation3::from_matrix(rotation),
            translation,
        }
    }

    /// Build a pose from an axis-angle rotation vector and a translation.
    pub fn from_rotation_vector(rotation_vector: &Vector3<f64>, translation: &Vector3<f64>) -> Self {
        Self {
            rotation: Rotation3::from_scaled_axis(*rotation_vector),
            translation: *translation,
        }
    }

    /// Axis-angle form of the rotation (angle in radians, in [0, π]).
    pub fn rotation_vector(&self) -> Vector3<f64> {
        self.rotation.scaled_axis()
    }

    /// Transform a world point into this camera's frame.
    #[inline]
    pub fn transform_point(&self, p_world: &Vector3<f64>) -> Vector3<f64> {
        self.rotation * p_world + self.translation
    }

    /// Camera center in world coordinates: `-Rᵀ t`.
    pub fn center(&self) -> Vector3<f64> {
        -(self.rotation.inverse() * self.translation)
    }

    /// Camera-to-world transform.
    pub fn inverse(&self) -> Pose {
        let rotation = self.rotation.inverse();
        Pose {
            translation: -(rotation * self.translation),
            rotation,
        }
    }

    /// `[R | t]`
    pub fn extrinsic_matrix(&self) -> Matrix3x4<f64> {
        let mut m = Matrix3x4::zeros();
        m.fixed_view_mut::<3, 3>(0, 0).copy_from(self.rotation.matrix());
        m.fixed_view_mut::<3, 1>(0, 3).copy_from(&self.translation);
        m
    }

    /// `P = K [R | t]`
    pub fn projection_matrix(&self, intrinsics: &Intrinsics) -> Matrix3x4<f64> {
        intrinsics.k_matrix() * self.extrinsic_matrix()
    }

    /// 4x4 homogeneous world-to-camera matrix.
    pub fn to_homogeneous(&self) -> Matrix4<f64> {
        let mut m = Matrix4::identity();
        m.fixed_view_mut::<3, 4>(0, 0).copy_from(&self.extrinsic_matrix());
        m
    }
}

impl Default for Pose {
    fn default() -> Self {
        Self::identity()
    }
}
