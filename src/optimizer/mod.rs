//! Nonlinear refinement of the map.
//!
//! - Global bundle adjustment of all non-reference poses and all points
//! - Robust losses used to down-weight mismatched tracks

pub mod bundle_adjustment;
pub mod robust;

pub use bundle_adjustment::{
    apply_solution, bundle_adjust, collect_problem, reprojection_cost, solve_problem,
    BundleAdjustmentConfig, BundleAdjustmentProblem, BundleAdjustmentResult, TerminationReason,
};
pub use robust::RobustLoss;
