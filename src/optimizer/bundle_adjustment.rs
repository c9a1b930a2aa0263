//! Global bundle adjustment over the whole map store.
//!
//! Refines every camera pose except the reference camera and every point
//! position against all observations. Runs in three phases, so the solve
//! itself only sees plain data:
//! 1. `collect_problem`: parameter layout and observations from the map
//! 2. `solve_problem`: Levenberg-Marquardt with a Schur complement on the
//!    camera blocks
//! 3. `apply_solution`: write poses and positions back
//!
//! Parameter vector layout:
//! `[ω₁ t₁ ω₂ t₂ ... | X₁ X₂ ...]`, six values per non-reference camera in
//! ascending id order (rotation vector, translation), then three per point
//! in ascending id order.
//!
//! The Jacobian is never formed densely. Each observation contributes a 2x6
//! camera block (absent for the reference camera) and a 2x3 point block.

use std::collections::HashMap;

use nalgebra::{DMatrix, DVector, Matrix2x3, Matrix2x6, Matrix3, Matrix6, Matrix6x3, Vector2, Vector3, Vector6};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::SfmResult;
use crate::geometry::so3::rotate_point_jacobian;
use crate::geometry::{Intrinsics, Pose};
use crate::map::{CameraId, MapStore, PointId};

use super::robust::RobustLoss;

const MIN_LAMBDA: f64 = 1e-10;
const MAX_LAMBDA: f64 = 1e10;
const LAMBDA_UP: f64 = 10.0;
const LAMBDA_DOWN: f64 = 0.1;

/// Floor on the scaling diagonal so unobserved directions stay damped.
const MIN_DIAGONAL: f64 = 1e-6;

/// Depth floor used when reporting plain reprojection cost.
const DEFAULT_DEPTH_FLOOR: f64 = 1e-5;

/// Configuration for bundle adjustment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BundleAdjustmentConfig {
    /// Maximum number of LM iterations (accepted and rejected steps).
    pub max_iterations: usize,
    /// Stop when an accepted step lowers the cost by less than this fraction.
    pub cost_tolerance: f64,
    /// Stop when the step is this small relative to the parameter norm.
    pub param_tolerance: f64,
    /// Stop when the gradient's largest component falls below this.
    pub gradient_tolerance: f64,
    pub loss: RobustLoss,
    pub initial_lambda: f64,
    /// Camera-frame depth is clamped to at least this before projecting.
    pub depth_floor: f64,
}

impl Default for BundleAdjustmentConfig {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            cost_tolerance: 1e-8,
            param_tolerance: 1e-8,
            gradient_tolerance: 1e-8,
            loss: RobustLoss::default(),
            initial_lambda: 1e-3,
            depth_floor: DEFAULT_DEPTH_FLOOR,
        }
    }
}

/// Why the solver stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    CostTolerance,
    ParameterTolerance,
    GradientTolerance,
    MaxIterations,
    /// Damping hit its ceiling without finding a cost-decreasing step.
    Stalled,
    /// No observations or no free parameters.
    NothingToOptimize,
}

/// One residual block of the problem.
#[derive(Debug, Clone, Copy)]
pub struct BaObservation {
    /// Index into `camera_ids`, `None` for the reference camera.
    pub camera: Option<usize>,
    /// Index into `point_ids`.
    pub point: usize,
    pub pixel: Vector2<f64>,
}

/// PHASE 1 output: everything the solver needs, detached from the map.
#[derive(Debug, Clone)]
pub struct BundleAdjustmentProblem {
    /// Gauge camera, excluded from the parameters.
    pub reference: Option<CameraId>,
    pub reference_pose: Pose,
    /// Optimized cameras, ascending id. Block `i` starts at `6 i`.
    pub camera_ids: Vec<CameraId>,
    /// Optimized points, ascending id. Block `j` starts at `6 n_cameras + 3 j`.
    pub point_ids: Vec<PointId>,
    pub observations: Vec<BaObservation>,
    /// Parameters read from the map.
    pub initial: DVector<f64>,
}

impl BundleAdjustmentProblem {
    pub fn num_cameras(&self) -> usize {
        self.camera_ids.len()
    }

    pub fn num_points(&self) -> usize {
        self.point_ids.len()
    }

    pub fn num_parameters(&self) -> usize {
        6 * self.camera_ids.len() + 3 * self.point_ids.len()
    }

    pub fn num_residuals(&self) -> usize {
        2 * self.observations.len()
    }

    fn point_offset(&self, point: usize) -> usize {
        6 * self.camera_ids.len() + 3 * point
    }

    fn camera_params(&self, params: &DVector<f64>, camera: usize) -> (Vector3<f64>, Vector3<f64>) {
        let base = 6 * camera;
        (
            params.fixed_rows::<3>(base).into_owned(),
            params.fixed_rows::<3>(base + 3).into_owned(),
        )
    }

    fn point_params(&self, params: &DVector<f64>, point: usize) -> Vector3<f64> {
        params.fixed_rows::<3>(self.point_offset(point)).into_owned()
    }
}

/// PHASE 2 output.
#[derive(Debug, Clone)]
pub struct BundleAdjustmentResult {
    /// Best parameters found, same layout as `BundleAdjustmentProblem::initial`.
    pub parameters: DVector<f64>,
    pub iterations: usize,
    /// Robust cost `0.5 Σ ρ(‖r‖²)` before and after.
    pub initial_cost: f64,
    pub final_cost: f64,
    /// Plain `0.5 Σ ‖r‖²` before and after.
    pub initial_reprojection_cost: f64,
    pub final_reprojection_cost: f64,
    pub termination: TerminationReason,
    pub num_cameras: usize,
    pub num_points: usize,
    pub num_observations: usize,
}

impl BundleAdjustmentResult {
    /// RMS reprojection error in pixels after optimization.
    pub fn final_rms(&self) -> f64 {
        if self.num_observations == 0 {
            return 0.0;
        }
        (2.0 * self.final_reprojection_cost / self.num_observations as f64).sqrt()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Phase 1
// ─────────────────────────────────────────────────────────────────────────────

/// PHASE 1: Collect the problem from the map.
///
/// The reference camera is the first registered camera. Rebuilt on every
/// call, so the layout always reflects the current map.
pub fn collect_problem(map: &MapStore) -> BundleAdjustmentProblem {
    let reference = map.reference_camera();
    let reference_pose = reference
        .and_then(|id| map.camera_pose(id))
        .cloned()
        .unwrap_or_default();

    let camera_ids: Vec<CameraId> = map
        .camera_ids()
        .into_iter()
        .filter(|id| Some(*id) != reference)
        .collect();
    let point_ids: Vec<PointId> = map.points().iter().map(|p| p.id).collect();

    let camera_index: HashMap<CameraId, usize> = camera_ids.iter().enumerate().map(|(i, &id)| (id, i)).collect();
    let point_index: HashMap<PointId, usize> = point_ids.iter().enumerate().map(|(i, &id)| (id, i)).collect();

    let observations = map
        .observations()
        .into_iter()
        .filter_map(|obs| {
            let point = *point_index.get(&obs.point)?;
            Some(BaObservation {
                camera: camera_index.get(&obs.camera).copied(),
                point,
                pixel: obs.pixel,
            })
        })
        .collect();

    let mut initial = DVector::zeros(6 * camera_ids.len() + 3 * point_ids.len());
    for (i, id) in camera_ids.iter().enumerate() {
        if let Some(pose) = map.camera_pose(*id) {
            initial.fixed_rows_mut::<3>(6 * i).copy_from(&pose.rotation_vector());
            initial.fixed_rows_mut::<3>(6 * i + 3).copy_from(&pose.translation);
        }
    }
    let offset = 6 * camera_ids.len();
    for (j, id) in point_ids.iter().enumerate() {
        if let Some(position) = map.point_position(*id) {
            initial.fixed_rows_mut::<3>(offset + 3 * j).copy_from(position);
        }
    }

    BundleAdjustmentProblem {
        reference,
        reference_pose,
        camera_ids,
        point_ids,
        observations,
        initial,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Residuals and Jacobians
// ─────────────────────────────────────────────────────────────────────────────

/// Residual of one observation and, on request, its two Jacobian blocks.
struct Projection {
    residual: Vector2<f64>,
    j_camera: Option<Matrix2x6<f64>>,
    j_point: Matrix2x3<f64>,
}

fn project_observation(
    problem: &BundleAdjustmentProblem,
    params: &DVector<f64>,
    obs: &BaObservation,
    intrinsics: &Intrinsics,
    depth_floor: f64,
    with_jacobians: bool,
) -> Projection {
    let point = problem.point_params(params, obs.point);

    let (rotation, translation, omega) = match obs.camera {
        Some(c) => {
            let (omega, t) = problem.camera_params(params, c);
            (nalgebra::Rotation3::from_scaled_axis(omega), t, Some(omega))
        }
        None => (
            problem.reference_pose.rotation,
            problem.reference_pose.translation,
            None,
        ),
    };

    let p_cam = rotation * point + translation;
    let clamped = p_cam.z < depth_floor;
    let z = if clamped { depth_floor } else { p_cam.z };

    let projected = Vector2::new(
        intrinsics.fx * p_cam.x / z + intrinsics.cx,
        intrinsics.fy * p_cam.y / z + intrinsics.cy,
    );
    let residual = projected - obs.pixel;

    if !with_jacobians {
        return Projection {
            residual,
            j_camera: None,
            j_point: Matrix2x3::zeros(),
        };
    }

    // A clamped depth is a constant, so it has no derivative.
    let (dz_u, dz_v) = if clamped {
        (0.0, 0.0)
    } else {
        (
            -intrinsics.fx * p_cam.x / (z * z),
            -intrinsics.fy * p_cam.y / (z * z),
        )
    };
    #[rustfmt::skip]
    let j_proj = Matrix2x3::new(
        intrinsics.fx / z, 0.0, dz_u,
        0.0, intrinsics.fy / z, dz_v,
    );

    let j_point = j_proj * rotation.matrix();
    let j_camera = omega.map(|omega| {
        let mut j = Matrix2x6::zeros();
        j.fixed_view_mut::<2, 3>(0, 0)
            .copy_from(&(j_proj * rotate_point_jacobian(&omega, &point)));
        j.fixed_view_mut::<2, 3>(0, 3).copy_from(&j_proj);
        j
    });

    Projection {
        residual,
        j_camera,
        j_point,
    }
}

/// `(0.5 Σ ρ(‖r‖²), 0.5 Σ ‖r‖²)`.
fn evaluate_costs(
    problem: &BundleAdjustmentProblem,
    params: &DVector<f64>,
    intrinsics: &Intrinsics,
    loss: &RobustLoss,
    depth_floor: f64,
) -> (f64, f64) {
    let mut robust = 0.0;
    let mut plain = 0.0;
    for obs in &problem.observations {
        let s = project_observation(problem, params, obs, intrinsics, depth_floor, false)
            .residual
            .norm_squared();
        robust += loss.rho(s);
        plain += s;
    }
    (0.5 * robust, 0.5 * plain)
}

// ─────────────────────────────────────────────────────────────────────────────
// Normal equations
// ─────────────────────────────────────────────────────────────────────────────

/// Block-structured `JᵀWJ` and `JᵀWr`.
struct NormalEquations {
    /// Camera-camera diagonal blocks.
    u: Vec<Matrix6<f64>>,
    g_camera: Vec<Vector6<f64>>,
    /// Point-point diagonal blocks.
    v: Vec<Matrix3<f64>>,
    g_point: Vec<Vector3<f64>>,
    /// Camera-point coupling blocks, grouped by point.
    w: Vec<Vec<(usize, Matrix6x3<f64>)>>,
}

impl NormalEquations {
    fn gradient_inf_norm(&self) -> f64 {
        let cams = self.g_camera.iter().map(|g| g.amax());
        let pts = self.g_point.iter().map(|g| g.amax());
        cams.chain(pts).fold(0.0, f64::max)
    }

    /// Diagonal of `JᵀWJ` in parameter order.
    fn diagonal(&self) -> DVector<f64> {
        let n_cams = self.u.len();
        let mut d = DVector::zeros(6 * n_cams + 3 * self.v.len());
        for (i, u) in self.u.iter().enumerate() {
            d.fixed_rows_mut::<6>(6 * i).copy_from(&u.diagonal());
        }
        for (j, v) in self.v.iter().enumerate() {
            d.fixed_rows_mut::<3>(6 * n_cams + 3 * j).copy_from(&v.diagonal());
        }
        d
    }
}

fn build_normal_equations(
    problem: &BundleAdjustmentProblem,
    params: &DVector<f64>,
    intrinsics: &Intrinsics,
    config: &BundleAdjustmentConfig,
) -> NormalEquations {
    let n_cams = problem.num_cameras();
    let n_pts = problem.num_points();

    let mut normal = NormalEquations {
        u: vec![Matrix6::zeros(); n_cams],
        g_camera: vec![Vector6::zeros(); n_cams],
        v: vec![Matrix3::zeros(); n_pts],
        g_point: vec![Vector3::zeros(); n_pts],
        w: vec![Vec::new(); n_pts],
    };

    for obs in &problem.observations {
        let proj = project_observation(problem, params, obs, intrinsics, config.depth_floor, true);
        let weight = config.loss.weight(proj.residual.norm_squared());
        let wr = proj.residual * weight;

        let jp_t = proj.j_point.transpose();
        normal.v[obs.point] += jp_t * proj.j_point * weight;
        normal.g_point[obs.point] += jp_t * wr;

        if let (Some(c), Some(jc)) = (obs.camera, proj.j_camera) {
            let jc_t = jc.transpose();
            normal.u[c] += jc_t * jc * weight;
            normal.g_camera[c] += jc_t * wr;
            normal.w[obs.point].push((c, jc_t * proj.j_point * weight));
        }
    }

    normal
}

/// Solve `(JᵀWJ + λ D) δ = -JᵀWr` by eliminating the point blocks.
///
/// ```text
/// S   = U - W V⁻¹ Wᵀ
/// S δc = -g_c + W V⁻¹ g_p
/// δp  = V⁻¹ (-g_p - Wᵀ δc)
/// ```
fn solve_damped(normal: &NormalEquations, lambda: f64, scaling: &DVector<f64>) -> Option<DVector<f64>> {
    let n_cams = normal.u.len();
    let n_pts = normal.v.len();
    let cam_dim = 6 * n_cams;

    let mut schur = DMatrix::<f64>::zeros(cam_dim, cam_dim);
    let mut rhs = DVector::<f64>::zeros(cam_dim);
    for (i, u) in normal.u.iter().enumerate() {
        let mut block = *u;
        for k in 0..6 {
            block[(k, k)] += lambda * scaling[6 * i + k];
        }
        schur.fixed_view_mut::<6, 6>(6 * i, 6 * i).copy_from(&block);
        rhs.fixed_rows_mut::<6>(6 * i).copy_from(&(-normal.g_camera[i]));
    }

    let mut v_inv = Vec::with_capacity(n_pts);
    for (j, v) in normal.v.iter().enumerate() {
        let mut block = *v;
        for k in 0..3 {
            block[(k, k)] += lambda * scaling[cam_dim + 3 * j + k];
        }
        let inv = block.try_inverse()?;

        let couplings = &normal.w[j];
        for (a, w_a) in couplings {
            let w_a_vinv = w_a * inv;
            let mut r = rhs.fixed_rows_mut::<6>(6 * a);
            r += w_a_vinv * normal.g_point[j];
            for (b, w_b) in couplings {
                let mut s = schur.fixed_view_mut::<6, 6>(6 * a, 6 * b);
                s -= w_a_vinv * w_b.transpose();
            }
        }
        v_inv.push(inv);
    }

    let delta_cams = if cam_dim == 0 {
        DVector::zeros(0)
    } else {
        match schur.clone().cholesky() {
            Some(chol) => chol.solve(&rhs),
            None => schur.lu().solve(&rhs)?,
        }
    };

    let mut delta = DVector::zeros(cam_dim + 3 * n_pts);
    delta.rows_mut(0, cam_dim).copy_from(&delta_cams);
    for (j, inv) in v_inv.iter().enumerate() {
        let mut b = -normal.g_point[j];
        for (a, w_a) in &normal.w[j] {
            b -= w_a.transpose() * delta_cams.fixed_rows::<6>(6 * a);
        }
        delta.fixed_rows_mut::<3>(cam_dim + 3 * j).copy_from(&(inv * b));
    }

    delta.iter().all(|v| v.is_finite()).then_some(delta)
}

// ─────────────────────────────────────────────────────────────────────────────
// Phase 2
// ─────────────────────────────────────────────────────────────────────────────

/// PHASE 2: Levenberg-Marquardt on the robustified cost.
///
/// Damping is `λ D`, where `D` is the running maximum of the diagonal of
/// `JᵀWJ` (squared Jacobian column norms). Only cost-decreasing steps are
/// accepted, so the returned parameters are the best iterate whatever the
/// termination reason.
pub fn solve_problem(
    problem: &BundleAdjustmentProblem,
    intrinsics: &Intrinsics,
    config: &BundleAdjustmentConfig,
) -> BundleAdjustmentResult {
    let mut params = problem.initial.clone();
    let (initial_cost, initial_plain) = evaluate_costs(problem, &params, intrinsics, &config.loss, config.depth_floor);

    let mut result = BundleAdjustmentResult {
        parameters: params.clone(),
        iterations: 0,
        initial_cost,
        final_cost: initial_cost,
        initial_reprojection_cost: initial_plain,
        final_reprojection_cost: initial_plain,
        termination: TerminationReason::NothingToOptimize,
        num_cameras: problem.num_cameras(),
        num_points: problem.num_points(),
        num_observations: problem.observations.len(),
    };

    if problem.observations.is_empty() || problem.num_parameters() == 0 {
        return result;
    }

    let mut cost = initial_cost;
    let mut lambda = config.initial_lambda.clamp(MIN_LAMBDA, MAX_LAMBDA);
    let mut scaling = DVector::<f64>::from_element(problem.num_parameters(), MIN_DIAGONAL);
    let mut normal: Option<NormalEquations> = None;
    let mut termination = TerminationReason::MaxIterations;

    for iter in 0..config.max_iterations {
        result.iterations = iter + 1;

        if normal.is_none() {
            let fresh = build_normal_equations(problem, &params, intrinsics, config);
            scaling.zip_apply(&fresh.diagonal(), |s, d| *s = s.max(d));
            normal = Some(fresh);
        }
        let Some(system) = normal.as_ref() else {
            break;
        };

        if system.gradient_inf_norm() < config.gradient_tolerance {
            termination = TerminationReason::GradientTolerance;
            break;
        }

        let Some(delta) = solve_damped(system, lambda, &scaling) else {
            lambda *= LAMBDA_UP;
            if lambda > MAX_LAMBDA {
                termination = TerminationReason::Stalled;
                break;
            }
            continue;
        };

        if delta.norm() < config.param_tolerance * (params.norm() + config.param_tolerance) {
            termination = TerminationReason::ParameterTolerance;
            break;
        }

        let trial = &params + &delta;
        let (trial_cost, _) = evaluate_costs(problem, &trial, intrinsics, &config.loss, config.depth_floor);

        if trial_cost < cost {
            let relative_decrease = (cost - trial_cost) / cost.max(f64::MIN_POSITIVE);
            debug!(
                "BA iteration {}: cost {:.6} -> {:.6}, lambda {:.1e}",
                iter, cost, trial_cost, lambda
            );
            params = trial;
            cost = trial_cost;
            normal = None;
            lambda = (lambda * LAMBDA_DOWN).max(MIN_LAMBDA);

            if relative_decrease < config.cost_tolerance {
                termination = TerminationReason::CostTolerance;
                break;
            }
        } else {
            lambda *= LAMBDA_UP;
            if lambda > MAX_LAMBDA {
                termination = TerminationReason::Stalled;
                break;
            }
        }
    }

    let (final_cost, final_plain) = evaluate_costs(problem, &params, intrinsics, &config.loss, config.depth_floor);
    result.parameters = params;
    result.final_cost = final_cost;
    result.final_reprojection_cost = final_plain;
    result.termination = termination;
    result
}

// ─────────────────────────────────────────────────────────────────────────────
// Phase 3
// ─────────────────────────────────────────────────────────────────────────────

/// PHASE 3: Write optimized poses and positions back into the map.
///
/// The reference camera is never touched. Returns the number of updated
/// cameras plus points.
pub fn apply_solution(
    map: &mut MapStore,
    problem: &BundleAdjustmentProblem,
    result: &BundleAdjustmentResult,
) -> SfmResult<usize> {
    let params = &result.parameters;
    let mut updated = 0;

    for (i, id) in problem.camera_ids.iter().enumerate() {
        let (omega, t) = problem.camera_params(params, i);
        map.set_camera_pose(*id, Pose::from_rotation_vector(&omega, &t))?;
        updated += 1;
    }
    for (j, id) in problem.point_ids.iter().enumerate() {
        map.set_point_position(*id, problem.point_params(params, j))?;
        updated += 1;
    }

    Ok(updated)
}

/// Run all three phases on the map.
pub fn bundle_adjust(
    map: &mut MapStore,
    intrinsics: &Intrinsics,
    config: &BundleAdjustmentConfig,
) -> SfmResult<BundleAdjustmentResult> {
    let problem = collect_problem(map);
    let result = solve_problem(&problem, intrinsics, config);
    if result.termination != TerminationReason::NothingToOptimize {
        apply_solution(map, &problem, &result)?;
    }

    info!(
        "Bundle adjustment complete: {} iterations, error {:.4} -> {:.4} ({} cameras, {} points, {} observations, {:?})",
        result.iterations,
        result.initial_reprojection_cost,
        result.final_reprojection_cost,
        result.num_cameras,
        result.num_points,
        result.num_observations,
        result.termination
    );

    Ok(result)
}

/// Plain `0.5 Σ ‖r‖²` over every observation in the map.
pub fn reprojection_cost(map: &MapStore, intrinsics: &Intrinsics) -> f64 {
    let problem = collect_problem(map);
    evaluate_costs(&problem, &problem.initial, intrinsics, &RobustLoss::Linear, DEFAULT_DEPTH_FLOOR).1
}
