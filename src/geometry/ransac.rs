//! Model-agnostic RANSAC.
//!
//! Implement [`Estimator`] for a geometric model and call [`ransac`]. The loop
//! never panics: when no consensus set is found the returned
//! [`RansacResult`] has `model == None`.

use rand::prelude::IndexedRandom;
use rand::rngs::StdRng;
use rand::SeedableRng;

/// Options of the RANSAC loop.
#[derive(Debug, Clone)]
pub struct RansacOptions {
    /// Upper bound on the number of hypotheses.
    pub max_iterations: usize,
    /// Inlier threshold, in the units of [`Estimator::residual`].
    pub threshold: f64,
    /// Smallest consensus set that is accepted.
    pub min_inliers: usize,
    /// Probability of drawing at least one all-inlier sample, in `[0, 1)`.
    pub confidence: f64,
    /// Seed of the sampler.
    pub seed: u64,
    /// Re-estimate the model on the consensus set before scoring it.
    pub refit_on_inliers: bool,
}

impl Default for RansacOptions {
    fn default() -> Self {
        Self {
            max_iterations: 1000,
            threshold: 2.0,
            min_inliers: 6,
            confidence: 0.99,
            seed: 0x5f3_759d,
            refit_on_inliers: true,
        }
    }
}

/// Outcome of [`ransac`].
#[derive(Debug, Clone)]
pub struct RansacResult<M> {
    /// Best model, `None` when no hypothesis reached `min_inliers`.
    pub model: Option<M>,
    /// Indices of the data consistent with `model`.
    pub inliers: Vec<usize>,
    /// RMS residual over `inliers`.
    pub inlier_rms: f64,
    /// Hypotheses drawn.
    pub iterations: usize,
}

impl<M> Default for RansacResult<M> {
    fn default() -> Self {
        Self {
            model: None,
            inliers: Vec::new(),
            inlier_rms: f64::INFINITY,
            iterations: 0,
        }
    }
}

/// A model that can be hypothesized from a minimal sample.
pub trait Estimator {
    type Datum;
    type Model;

    /// Size of a minimal sample.
    const MIN_SAMPLES: usize;

    /// Fit a model to the data at `sample`. `None` if the fit fails.
    fn fit(&self, data: &[Self::Datum], sample: &[usize]) -> Option<Self::Model>;

    /// Non-negative error of one datum under `model`.
    fn residual(&self, model: &Self::Model, datum: &Self::Datum) -> f64;

    /// Reject a sample before fitting.
    fn is_degenerate(&self, _data: &[Self::Datum], _sample: &[usize]) -> bool {
        false
    }

    /// Re-estimate on a consensus set. `None` keeps the hypothesis.
    fn refit(&self, _data: &[Self::Datum], _inliers: &[usize]) -> Option<Self::Model> {
        None
    }
}

/// Number of hypotheses needed to reach `confidence` at the given inlier ratio.
fn required_iterations(confidence: f64, inlier_ratio: f64, sample_size: usize, max: usize) -> usize {
    if confidence <= 0.0 || inlier_ratio <= 0.0 {
        return max;
    }
    if inlier_ratio >= 1.0 {
        return 1;
    }

    let denom = (1.0 - inlier_ratio.powi(sample_size as i32)).max(1e-12).ln();
    if denom >= 0.0 {
        return max;
    }

    let n = ((1.0 - confidence.min(1.0 - 1e-12)).ln() / denom).ceil();
    (n as usize).clamp(1, max)
}

fn score<E: Estimator>(
    estimator: &E,
    model: &E::Model,
    data: &[E::Datum],
    threshold: f64,
) -> (Vec<usize>, f64) {
    let mut inliers = Vec::with_capacity(data.len());
    let mut sum_sq = 0.0;
    for (i, datum) in data.iter().enumerate() {
        let r = estimator.residual(model, datum);
        if r <= threshold {
            inliers.push(i);
            sum_sq += r * r;
        }
    }
    let rms = if inliers.is_empty() {
        f64::INFINITY
    } else {
        (sum_sq / inliers.len() as f64).sqrt()
    };
    (inliers, rms)
}

/// Run RANSAC for `estimator` over `data`.
///
/// Hypotheses are ranked by inlier count, ties broken by inlier RMS. The
/// iteration budget shrinks as better consensus sets are found.
pub fn ransac<E: Estimator>(
    estimator: &E,
    data: &[E::Datum],
    options: &RansacOptions,
) -> RansacResult<E::Model> {
    let mut best: RansacResult<E::Model> = RansacResult::default();

    if data.len() < E::MIN_SAMPLES || data.len() < options.min_inliers {
        return best;
    }

    let all_indices: Vec<usize> = (0..data.len()).collect();
    let mut sample = Vec::with_capacity(E::MIN_SAMPLES);
    let mut rng = StdRng::seed_from_u64(options.seed);
    let mut budget = options.max_iterations;
    let mut iterations = 0;

    while iterations < budget {
        iterations += 1;

        sample.clear();
        sample.extend(all_indices.choose_multiple(&mut rng, E::MIN_SAMPLES).copied());

        if estimator.is_degenerate(data, &sample) {
            continue;
        }
        let Some(mut model) = estimator.fit(data, &sample) else {
            continue;
        };

        let (mut inliers, mut rms) = score(estimator, &model, data, options.threshold);
        if inliers.len() < options.min_inliers {
            continue;
        }

        if options.refit_on_inliers {
            if let Some(refit) = estimator.refit(data, &inliers) {
                let (refit_inliers, refit_rms) = score(estimator, &refit, data, options.threshold);
                if refit_inliers.len() >= inliers.len() {
                    model = refit;
                    inliers = refit_inliers;
                    rms = refit_rms;
                }
            }
        }

        let better = best.model.is_none()
            || inliers.len() > best.inliers.len()
            || (inliers.len() == best.inliers.len() && rms < best.inlier_rms);
        if better {
            let ratio = inliers.len() as f64 / data.len() as f64;
            best.model = Some(model);
            best.inliers = inliers;
            best.inlier_rms = rms;
            budget = required_iterations(options.confidence, ratio, E::MIN_SAMPLES, options.max_iterations)
                .max(iterations);
        }
    }

    best.iterations = iterations;
    best
}
