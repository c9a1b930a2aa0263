//! Geometry: poses, intrinsics, SO(3) helpers and the two solvers the
//! reconstruction delegates to (PnP-RANSAC and two-view pose recovery).

pub mod intrinsics;
pub mod pnp;
pub mod pose;
pub mod ransac;
pub mod so3;
pub mod triangulate;
pub mod two_view;

pub use intrinsics::Intrinsics;
pub use pnp::{PnpConfig, PnpSolution, PnpSolver, RansacPnp};
pub use pose::Pose;
pub use two_view::{EssentialRansac, RelativePose, TwoViewConfig, TwoViewSolver};
