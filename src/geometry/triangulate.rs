//! Two-view linear triangulation.

use nalgebra::{Matrix3x4, Matrix4, Vector2, Vector3};

use super::{Intrinsics, Pose};
use crate::error::{SfmError, SfmResult};

/// Triangulate one point by DLT from two 3x4 projection matrices and the
/// matching pixel observations.
///
/// Each view contributes the rows `x P₃ - P₁` and `y P₃ - P₂`; the point is
/// the right singular vector of the smallest singular value. Rows are
/// normalized so that pixel-scale and unit-scale cameras weigh the same.
/// Returns `None` for points at infinity.
pub fn triangulate_dlt(
    p1: &Matrix3x4<f64>,
    p2: &Matrix3x4<f64>,
    x1: &Vector2<f64>,
    x2: &Vector2<f64>,
) -> Option<Vector3<f64>> {
    let mut a = Matrix4::<f64>::zeros();
    let rows = [
        x1.x * p1.row(2) - p1.row(0),
        x1.y * p1.row(2) - p1.row(1),
        x2.x * p2.row(2) - p2.row(0),
        x2.y * p2.row(2) - p2.row(1),
    ];
    for (i, row) in rows.iter().enumerate() {
        let norm = row.norm();
        if norm < f64::EPSILON {
            return None;
        }
        a.set_row(i, &(row / norm));
    }

    let svd = a.svd(false, true);
    let v_t = svd.v_t?;
    let (min_idx, _) = svd.singular_values.argmin();
    let h = v_t.row(min_idx);

    if h[3].abs() < 1e-12 {
        return None;
    }
    let point = Vector3::new(h[0] / h[3], h[1] / h[3], h[2] / h[3]);
    point.iter().all(|v| v.is_finite()).then_some(point)
}

/// Triangulate from two posed cameras sharing `intrinsics`, keeping only
/// points in front of both.
///
/// Fails with `DegenerateTriangulation` for points at infinity or behind
/// either camera.
pub fn triangulate_in_front(
    pose1: &Pose,
    pose2: &Pose,
    intrinsics: &Intrinsics,
    x1: &Vector2<f64>,
    x2: &Vector2<f64>,
) -> SfmResult<Vector3<f64>> {
    triangulate_dlt(
        &pose1.projection_matrix(intrinsics),
        &pose2.projection_matrix(intrinsics),
        x1,
        x2,
    )
    .filter(|p| passes_cheirality(pose1, pose2, p))
    .ok_or(SfmError::DegenerateTriangulation)
}

/// Depth of a world point in the frame of `pose`.
#[inline]
pub fn depth_in(pose: &Pose, p_world: &Vector3<f64>) -> f64 {
    pose.transform_point(p_world).z
}

/// Strictly positive depth in both cameras.
pub fn passes_cheirality(pose1: &Pose, pose2: &Pose, p_world: &Vector3<f64>) -> bool {
    depth_in(pose1, p_world) > 0.0 && depth_in(pose2, p_world) > 0.0
}
