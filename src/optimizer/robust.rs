//! Robust losses applied to squared observation residuals.
//!
//! With `s = ‖r‖²` the cost of one observation is `0.5 ρ(s)`. The solver
//! uses `ρ'(s)` as an IRLS weight on that observation's Jacobian rows.

use serde::{Deserialize, Serialize};

/// Loss `ρ(s)` on a squared residual norm.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RobustLoss {
    /// Plain least squares, `ρ(s) = s`.
    Linear,
    /// Quadratic below `delta` pixels, linear above.
    ///
    /// ```text
    /// ρ(s) = s               if s ≤ δ²
    ///        2δ√s - δ²       otherwise
    /// ```
    Huber { delta: f64 },
    /// `ρ(s) = c² ln(1 + s / c²)`.
    Cauchy { scale: f64 },
}

impl Default for RobustLoss {
    fn default() -> Self {
        RobustLoss::Huber { delta: 1.0 }
    }
}

impl RobustLoss {
    /// `ρ(s)`.
    pub fn rho(&self, s: f64) -> f64 {
        match *self {
            RobustLoss::Linear => s,
            RobustLoss::Huber { delta } => {
                let d2 = delta * delta;
                if s <= d2 {
                    s
                } else {
                    2.0 * delta * s.sqrt() - d2
                }
            }
            RobustLoss::Cauchy { scale } => {
                let c2 = scale * scale;
                c2 * (s / c2).ln_1p()
            }
        }
    }

    /// `ρ'(s)`, in (0, 1].
    pub fn weight(&self, s: f64) -> f64 {
        match *self {
            RobustLoss::Linear => 1.0,
            RobustLoss::Huber { delta } => {
                if s <= delta * delta {
                    1.0
                } else {
                    delta / s.sqrt()
                }
            }
            RobustLoss::Cauchy { scale } => 1.0 / (1.0 + s / (scale * scale)),
        }
    }
}
