//! PnP (Perspective-n-Point) with RANSAC.
//!
//! Minimal solver: normalized 6-point DLT with the rotation projected onto
//! SO(3). Hypotheses are scored by pixel reprojection error, refit on the
//! consensus set, then polished by a few Gauss-Newton steps on the inliers.

use nalgebra::{DMatrix, Matrix2x6, Matrix3, Matrix3x4, Matrix4, Matrix6, Rotation3, Vector2, Vector3, Vector6};
use serde::{Deserialize, Serialize};

use super::ransac::{ransac, Estimator, RansacOptions};
use super::so3::skew;
use super::{Intrinsics, Pose};

/// Configuration for PnP-RANSAC.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PnpConfig {
    /// Inlier threshold on reprojection error (pixels).
    pub reprojection_threshold: f64,
    pub confidence: f64,
    pub max_iterations: usize,
    /// Gauss-Newton iterations on the final inlier set (0 disables).
    pub refine_iterations: usize,
    pub seed: u64,
}

impl Default for PnpConfig {
    fn default() -> Self {
        Self {
            reprojection_threshold: 8.0,
            confidence: 0.99,
            max_iterations: 1000,
            refine_iterations: 10,
            seed: 7,
        }
    }
}

/// Result of PnP solving.
#[derive(Debug, Clone)]
pub struct PnpSolution {
    /// World-to-camera pose.
    pub pose: Pose,
    /// Indices into the input arrays, ascending.
    pub inliers: Vec<usize>,
}

/// Estimates a camera pose from 3D-2D correspondences.
pub trait PnpSolver {
    /// `None` means failure; callers treat an empty inlier set the same way.
    fn solve(
        &self,
        world: &[Vector3<f64>],
        image: &[Vector2<f64>],
        intrinsics: &Intrinsics,
    ) -> Option<PnpSolution>;
}

/// DLT-based PnP inside RANSAC.
#[derive(Debug, Clone, Default)]
pub struct RansacPnp {
    pub config: PnpConfig,
}

impl RansacPnp {
    pub fn new(config: PnpConfig) -> Self {
        Self { config }
    }
}

/// Reprojection error of one correspondence, `inf` when behind the camera.
pub fn reprojection_error(
    pose: &Pose,
    intrinsics: &Intrinsics,
    world: &Vector3<f64>,
    pixel: &Vector2<f64>,
) -> f64 {
    let p_cam = pose.transform_point(world);
    if p_cam.z <= 0.0 {
        return f64::INFINITY;
    }
    (intrinsics.project(&p_cam) - pixel).norm()
}

/// Direct linear PnP on the given correspondences (at least 6).
pub fn dlt_pnp(
    world: &[Vector3<f64>],
    image: &[Vector2<f64>],
    intrinsics: &Intrinsics,
) -> Option<Pose> {
    let n = world.len();
    if n < 6 || image.len() != n {
        return None;
    }

    // Similarity normalization of the 3D points.
    let centroid = world.iter().fold(Vector3::zeros(), |acc, p| acc + p) / n as f64;
    let mean_dist = world.iter().map(|p| (p - centroid).norm()).sum::<f64>() / n as f64;
    if mean_dist <= f64::EPSILON {
        return None;
    }
    let scale = 3.0_f64.sqrt() / mean_dist;
    let t_world = Matrix4::new(
        scale, 0.0, 0.0, -scale * centroid.x,
        0.0, scale, 0.0, -scale * centroid.y,
        0.0, 0.0, scale, -scale * centroid.z,
        0.0, 0.0, 0.0, 1.0,
    );

    let mut a = DMatrix::<f64>::zeros(2 * n, 12);
    for (i, (pw, px)) in world.iter().zip(image).enumerate() {
        let p = (pw - centroid) * scale;
        let xn = intrinsics.unproject(px);
        let (u, v) = (xn.x, xn.y);

        let r0 = 2 * i;
        let r1 = r0 + 1;
        a[(r0, 0)] = p.x;
        a[(r0, 1)] = p.y;
        a[(r0, 2)] = p.z;
        a[(r0, 3)] = 1.0;
        a[(r0, 8)] = -u * p.x;
        a[(r0, 9)] = -u * p.y;
        a[(r0, 10)] = -u * p.z;
        a[(r0, 11)] = -u;

        a[(r1, 4)] = p.x;
        a[(r1, 5)] = p.y;
        a[(r1, 6)] = p.z;
        a[(r1, 7)] = 1.0;
        a[(r1, 8)] = -v * p.x;
        a[(r1, 9)] = -v * p.y;
        a[(r1, 10)] = -v * p.z;
        a[(r1, 11)] = -v;
    }

    let svd = a.svd(false, true);
    let v_t = svd.v_t?;
    let (min_idx, _) = svd.singular_values.argmin();
    let row = v_t.row(min_idx);
    let p_norm = Matrix3x4::from_row_slice(&row.iter().copied().collect::<Vec<_>>());
    let p = p_norm * t_world;

    let m: Matrix3<f64> = p.fixed_view::<3, 3>(0, 0).into_owned();
    let mut s = (m.row(0).norm() + m.row(1).norm() + m.row(2).norm()) / 3.0;
    if s <= f64::EPSILON {
        return None;
    }
    if m.determinant() < 0.0 {
        s = -s;
    }
    let r_approx = m / s;
    let translation: Vector3<f64> = p.fixed_view::<3, 1>(0, 3).into_owned() / s;

    // Closest rotation in Frobenius norm.
    let svd = r_approx.svd(true, true);
    let u = svd.u?;
    let v_t = svd.v_t?;
    let mut r = u * v_t;
    if r.determinant() < 0.0 {
        let mut u_fixed = u;
        u_fixed.column_mut(2).neg_mut();
        r = u_fixed * v_t;
    }

    Some(Pose::new(Rotation3::from_matrix_unchecked(r), translation))
}

/// Pose-only Gauss-Newton (Levenberg damped) on reprojection error.
///
/// Left perturbation: `R ← Exp(δθ) R`, `t ← Exp(δθ) t + δt`.
pub fn refine_pose(
    pose: &Pose,
    world: &[Vector3<f64>],
    image: &[Vector2<f64>],
    intrinsics: &Intrinsics,
    iterations: usize,
) -> Pose {
    let cost = |pose: &Pose| -> f64 {
        world
            .iter()
            .zip(image)
            .map(|(pw, px)| {
                let p_cam = pose.transform_point(pw);
                if p_cam.z <= 0.0 {
                    return f64::INFINITY;
                }
                (intrinsics.project(&p_cam) - px).norm_squared()
            })
            .sum()
    };

    let mut current = pose.clone();
    let mut current_cost = cost(&current);
    let mut lambda = 1e-4;

    for _ in 0..iterations {
        let mut h = Matrix6::<f64>::zeros();
        let mut g = Vector6::<f64>::zeros();

        for (pw, px) in world.iter().zip(image) {
            let p_cam = current.transform_point(pw);
            if p_cam.z <= 1e-9 {
                continue;
            }
            let r = intrinsics.project(&p_cam) - px;
            let inv_z = 1.0 / p_cam.z;
            let j_proj = nalgebra::Matrix2x3::new(
                intrinsics.fx * inv_z, 0.0, -intrinsics.fx * p_cam.x * inv_z * inv_z,
                0.0, intrinsics.fy * inv_z, -intrinsics.fy * p_cam.y * inv_z * inv_z,
            );
            let mut j = Matrix2x6::<f64>::zeros();
            j.fixed_view_mut::<2, 3>(0, 0).copy_from(&(j_proj * -skew(&p_cam)));
            j.fixed_view_mut::<2, 3>(0, 3).copy_from(&j_proj);

            h += j.transpose() * j;
            g += j.transpose() * r;
        }

        let mut damped = h;
        for i in 0..6 {
            damped[(i, i)] += lambda * h[(i, i)].max(1e-9);
        }
        let Some(delta) = damped.lu().solve(&(-g)) else {
            break;
        };

        let d_rot = Rotation3::from_scaled_axis(delta.fixed_rows::<3>(0).into_owned());
        let trial = Pose::new(
            d_rot * current.rotation,
            d_rot * current.translation + delta.fixed_rows::<3>(3),
        );
        let trial_cost = cost(&trial);

        if trial_cost < current_cost {
            let converged = (current_cost - trial_cost) < 1e-12 * current_cost.max(1.0);
            current = trial;
            current_cost = trial_cost;
            lambda = (lambda * 0.1).max(1e-10);
            if converged {
                break;
            }
        } else {
            lambda = (lambda * 10.0).min(1e10);
            if lambda >= 1e10 {
                break;
            }
        }
    }

    current
}

struct PnpEstimator<'a> {
    intrinsics: &'a Intrinsics,
}

impl Estimator for PnpEstimator<'_> {
    type Datum = (Vector3<f64>, Vector2<f64>);
    type Model = Pose;

    const MIN_SAMPLES: usize = 6;

    fn fit(&self, data: &[Self::Datum], sample: &[usize]) -> Option<Pose> {
        self.refit(data, sample)
    }

    fn residual(&self, pose: &Pose, datum: &Self::Datum) -> f64 {
        reprojection_error(pose, self.intrinsics, &datum.0, &datum.1)
    }

    fn refit(&self, data: &[Self::Datum], inliers: &[usize]) -> Option<Pose> {
        let (world, image): (Vec<_>, Vec<_>) = inliers.iter().map(|&i| data[i]).unzip();
        dlt_pnp(&world, &image, self.intrinsics)
    }
}

impl PnpSolver for RansacPnp {
    fn solve(
        &self,
        world: &[Vector3<f64>],
        image: &[Vector2<f64>],
        intrinsics: &Intrinsics,
    ) -> Option<PnpSolution> {
        if world.len() != image.len() {
            return None;
        }
        let data: Vec<(Vector3<f64>, Vector2<f64>)> =
            world.iter().copied().zip(image.iter().copied()).collect();

        let options = RansacOptions {
            max_iterations: self.config.max_iterations,
            threshold: self.config.reprojection_threshold,
            min_inliers: PnpEstimator::MIN_SAMPLES,
            confidence: self.config.confidence,
            seed: self.config.seed,
            refit_on_inliers: true,
        };
        let estimator = PnpEstimator { intrinsics };
        let result = ransac(&estimator, &data, &options);
        let mut pose = result.model?;
        let mut inliers = result.inliers;

        if self.config.refine_iterations > 0 {
            let (w, i): (Vec<_>, Vec<_>) = inliers.iter().map(|&k| data[k]).unzip();
            let refined = refine_pose(&pose, &w, &i, intrinsics, self.config.refine_iterations);
            let refined_inliers: Vec<usize> = (0..data.len())
                .filter(|&k| estimator.residual(&refined, &data[k]) <= self.config.reprojection_threshold)
                .collect();
            if refined_inliers.len() >= inliers.len() {
                pose = refined;
                inliers = refined_inliers;
            }
        }

        if inliers.is_empty() {
            return None;
        }

        Some(PnpSolution { pose, inliers })
    }
}
