//! Two-view relative pose recovery for bootstrapping.
//!
//! Pipeline:
//! 1. Normalized 8-point essential matrix inside RANSAC, scored by the
//!    Sampson distance in pixels
//! 2. Projection onto the essential manifold (singular values σ, σ, 0)
//! 3. Decomposition into four (R, t) candidates
//! 4. Candidate selection by the number of inliers triangulated in front of
//!    both cameras
//!
//! The recovered translation has unit norm; the scale of the whole
//! reconstruction is fixed by this choice.

use nalgebra::{DMatrix, Matrix3, Matrix3x4, Vector2, Vector3};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::ransac::{ransac, Estimator, RansacOptions};
use super::triangulate::triangulate_dlt;
use super::{Intrinsics, Pose};

/// Configuration of the essential-matrix RANSAC.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TwoViewConfig {
    /// Sampson distance threshold in pixels.
    pub threshold_px: f64,
    pub confidence: f64,
    pub max_iterations: usize,
    /// Smallest inlier set accepted as a valid bootstrap.
    pub min_inliers: usize,
    pub seed: u64,
}

impl Default for TwoViewConfig {
    fn default() -> Self {
        Self {
            threshold_px: 1.0,
            confidence: 0.999,
            max_iterations: 2000,
            min_inliers: 8,
            seed: 42,
        }
    }
}

/// Pose of the second camera relative to the first, plus the matches that
/// support it.
#[derive(Debug, Clone)]
pub struct RelativePose {
    /// Maps points from the first camera frame into the second.
    pub pose: Pose,
    /// Indices into the input arrays that are epipolar inliers and lie in
    /// front of both cameras.
    pub inliers: Vec<usize>,
}

/// Recovers the relative pose of two calibrated views.
pub trait TwoViewSolver {
    fn recover_pose(
        &self,
        points1: &[Vector2<f64>],
        points2: &[Vector2<f64>],
        intrinsics: &Intrinsics,
    ) -> Option<RelativePose>;
}

/// Essential matrix by normalized 8-point + RANSAC, then cheirality voting.
#[derive(Debug, Clone, Default)]
pub struct EssentialRansac {
    pub config: TwoViewConfig,
}

impl EssentialRansac {
    pub fn new(config: TwoViewConfig) -> Self {
        Self { config }
    }
}

/// A correspondence in normalized coordinates.
struct NormalizedMatch {
    x1: Vector2<f64>,
    x2: Vector2<f64>,
}

struct EssentialEstimator {
    k: Matrix3<f64>,
    k_inv: Matrix3<f64>,
}

impl Estimator for EssentialEstimator {
    type Datum = NormalizedMatch;
    type Model = Matrix3<f64>;

    const MIN_SAMPLES: usize = 8;

    fn fit(&self, data: &[NormalizedMatch], sample: &[usize]) -> Option<Matrix3<f64>> {
        essential_8point(data, sample)
    }

    fn residual(&self, e: &Matrix3<f64>, datum: &NormalizedMatch) -> f64 {
        // Sampson distance of the fundamental matrix in pixel units.
        let f = self.k_inv.transpose() * e * self.k_inv;
        let p1 = self.k * datum.x1.push(1.0);
        let p2 = self.k * datum.x2.push(1.0);

        let fx1 = f * p1;
        let ftx2 = f.transpose() * p2;
        let num = p2.dot(&fx1);
        let denom = fx1.x * fx1.x + fx1.y * fx1.y + ftx2.x * ftx2.x + ftx2.y * ftx2.y;
        if denom < f64::EPSILON {
            return f64::INFINITY;
        }
        (num * num / denom).sqrt()
    }

    fn refit(&self, data: &[NormalizedMatch], inliers: &[usize]) -> Option<Matrix3<f64>> {
        essential_8point(data, inliers)
    }
}

/// Hartley normalization: centroid to origin, mean distance √2.
fn normalizing_transform<'a>(points: impl Iterator<Item = &'a Vector2<f64>> + Clone) -> Option<Matrix3<f64>> {
    let n = points.clone().count() as f64;
    if n == 0.0 {
        return None;
    }
    let centroid = points.clone().fold(Vector2::zeros(), |acc, p| acc + p) / n;
    let mean_dist = points.map(|p| (p - centroid).norm()).sum::<f64>() / n;
    if mean_dist < f64::EPSILON {
        return None;
    }
    let s = std::f64::consts::SQRT_2 / mean_dist;
    Some(Matrix3::new(
        s, 0.0, -s * centroid.x,
        0.0, s, -s * centroid.y,
        0.0, 0.0, 1.0,
    ))
}

/// Linear essential matrix from ≥ 8 normalized correspondences.
fn essential_8point(data: &[NormalizedMatch], indices: &[usize]) -> Option<Matrix3<f64>> {
    if indices.len() < 8 {
        return None;
    }

    let t1 = normalizing_transform(indices.iter().map(|&i| &data[i].x1))?;
    let t2 = normalizing_transform(indices.iter().map(|&i| &data[i].x2))?;

    // Pad to at least 9 rows so the SVD exposes the full null space.
    let rows = indices.len().max(9);
    let mut a = DMatrix::<f64>::zeros(rows, 9);
    for (r, &i) in indices.iter().enumerate() {
        let p1 = t1 * data[i].x1.push(1.0);
        let p2 = t2 * data[i].x2.push(1.0);
        let (x1, y1) = (p1.x / p1.z, p1.y / p1.z);
        let (x2, y2) = (p2.x / p2.z, p2.y / p2.z);
        let coeffs = [x2 * x1, x2 * y1, x2, y2 * x1, y2 * y1, y2, x1, y1, 1.0];
        for (c, v) in coeffs.iter().enumerate() {
            a[(r, c)] = *v;
        }
    }

    let svd = a.svd(false, true);
    let v_t = svd.v_t?;
    let (min_idx, _) = svd.singular_values.argmin();
    let e_row = v_t.row(min_idx);
    let e_hat = Matrix3::from_row_slice(&e_row.iter().copied().collect::<Vec<_>>());

    let e = t2.transpose() * e_hat * t1;
    enforce_essential_constraints(&e)
}

/// Project onto the essential manifold: singular values (σ, σ, 0).
fn enforce_essential_constraints(e: &Matrix3<f64>) -> Option<Matrix3<f64>> {
    let svd = e.svd(true, true);
    let u = svd.u?;
    let v_t = svd.v_t?;

    let mut sv: Vec<f64> = svd.singular_values.iter().copied().collect();
    sv.sort_by(|a, b| b.total_cmp(a));
    let s = 0.5 * (sv[0] + sv[1]);
    if s < f64::EPSILON {
        return None;
    }

    // Zero the smallest singular direction whatever its position.
    let (min_idx, _) = svd.singular_values.argmin();
    let mut d = Vector3::repeat(s);
    d[min_idx] = 0.0;
    Some(u * Matrix3::from_diagonal(&d) * v_t / s)
}

/// The four (R, t) factorizations of an essential matrix, `|t| = 1`.
pub fn decompose_essential(e: &Matrix3<f64>) -> Option<[(Matrix3<f64>, Vector3<f64>); 4]> {
    let svd = e.svd(true, true);
    let mut u = svd.u?;
    let mut v_t = svd.v_t?;

    // Order singular triplets descending so that the null direction is last.
    let mut order = [0usize, 1, 2];
    order.sort_by(|&a, &b| svd.singular_values[b].total_cmp(&svd.singular_values[a]));
    u = Matrix3::from_columns(&[u.column(order[0]), u.column(order[1]), u.column(order[2])]);
    v_t = Matrix3::from_rows(&[v_t.row(order[0]), v_t.row(order[1]), v_t.row(order[2])]);

    if u.determinant() < 0.0 {
        u.column_mut(2).neg_mut();
    }
    if v_t.determinant() < 0.0 {
        v_t.row_mut(2).neg_mut();
    }

    let w = Matrix3::new(0.0, -1.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0);
    let r1 = u * w * v_t;
    let r2 = u * w.transpose() * v_t;
    let t: Vector3<f64> = u.column(2).normalize();

    Some([(r1, t), (r1, -t), (r2, t), (r2, -t)])
}

/// Indices of `candidates` whose triangulation lies in front of both views.
fn cheirality_inliers(
    rotation: &Matrix3<f64>,
    translation: &Vector3<f64>,
    data: &[NormalizedMatch],
    candidates: &[usize],
) -> Vec<usize> {
    let pose2 = Pose::from_matrix(rotation, *translation);
    let p1 = Pose::identity().extrinsic_matrix();
    let p2: Matrix3x4<f64> = pose2.extrinsic_matrix();

    candidates
        .iter()
        .copied()
        .filter(|&i| {
            let m = &data[i];
            match triangulate_dlt(&p1, &p2, &m.x1, &m.x2) {
                Some(x) => x.z > 0.0 && pose2.transform_point(&x).z > 0.0,
                None => false,
            }
        })
        .collect()
}

impl TwoViewSolver for EssentialRansac {
    fn recover_pose(
        &self,
        points1: &[Vector2<f64>],
        points2: &[Vector2<f64>],
        intrinsics: &Intrinsics,
    ) -> Option<RelativePose> {
        if points1.len() != points2.len() || points1.len() < EssentialEstimator::MIN_SAMPLES {
            return None;
        }

        let data: Vec<NormalizedMatch> = points1
            .iter()
            .zip(points2)
            .map(|(a, b)| NormalizedMatch {
                x1: intrinsics.unproject(a).xy(),
                x2: intrinsics.unproject(b).xy(),
            })
            .collect();

        let k = intrinsics.k_matrix();
        let estimator = EssentialEstimator {
            k,
            k_inv: k.try_inverse()?,
        };
        let options = RansacOptions {
            max_iterations: self.config.max_iterations,
            threshold: self.config.threshold_px,
            min_inliers: self.config.min_inliers,
            confidence: self.config.confidence,
            seed: self.config.seed,
            refit_on_inliers: true,
        };
        let result = ransac(&estimator, &data, &options);
        let e = result.model?;

        let candidates = decompose_essential(&e)?;
        let (best_r, best_t, inliers) = candidates
            .iter()
            .map(|(r, t)| (*r, *t, cheirality_inliers(r, t, &data, &result.inliers)))
            .max_by_key(|(_, _, inl)| inl.len())?;

        debug!(
            "Two-view: {} epipolar inliers, {} pass cheirality",
            result.inliers.len(),
            inliers.len()
        );

        if inliers.len() < self.config.min_inliers {
            return None;
        }

        Some(RelativePose {
            pose: Pose::from_matrix(&best_r, best_t),
            inliers,
        })
    }
}
