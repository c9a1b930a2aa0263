//! SO(3) helpers for the rotation-vector parameterization.
//!
//! Bundle adjustment stores rotations as axis-angle vectors ω with
//! `R = Exp(ω)`. Differentiating `R(ω) p` with respect to ω goes through the
//! right Jacobian: `Exp(ω + δ) ≈ Exp(ω) Exp(Jr(ω) δ)`.

use nalgebra::{Matrix3, Rotation3, Vector3};

/// Below this angle the series expansions are used.
const SMALL_ANGLE: f64 = 1e-6;

/// Skew-symmetric matrix with `skew(v) * u == v × u`.
#[inline]
pub fn skew(v: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(
        0.0, -v.z, v.y,
        v.z, 0.0, -v.x,
        -v.y, v.x, 0.0,
    )
}

/// Right Jacobian of SO(3).
///
/// ```text
/// Jr(ω) = I - (1 - cos θ)/θ² [ω]× + (θ - sin θ)/θ³ [ω]×²,   θ = |ω|
/// ```
pub fn right_jacobian_so3(omega: &Vector3<f64>) -> Matrix3<f64> {
    let theta = omega.norm();
    let w = skew(omega);

    if theta < SMALL_ANGLE {
        return Matrix3::identity() - 0.5 * w;
    }

    let theta2 = theta * theta;
    Matrix3::identity() - ((1.0 - theta.cos()) / theta2) * w
        + ((theta - theta.sin()) / (theta2 * theta)) * (w * w)
}

/// Derivative of `Exp(ω) p` with respect to ω.
///
/// ```text
/// d(R p)/dω = -R [p]× Jr(ω)
/// ```
pub fn rotate_point_jacobian(omega: &Vector3<f64>, p: &Vector3<f64>) -> Matrix3<f64> {
    let r = Rotation3::from_scaled_axis(*omega);
    -(r.matrix() * skew(p) * right_jacobian_so3(omega))
}
