//! Local refinement of weighted candidate sets.
//!
//! Seeding reduces a massive dataset to a small weighted candidate list
//! per fold; turning that list into `k` final centers is a single-machine
//! job. [`Refiner`] is the seam — the orchestrator only needs
//! `refine(sample, k, seed, stopping) -> Centers` — and [`LloydRefiner`]
//! is the default implementation: weighted k-means++ seeding followed by
//! weighted Lloyd iterations. A trial is a pure function of its inputs
//! and owns no shared mutable state, which is what makes running many of
//! them in parallel safe.

use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SketchError};
use crate::vector::{squared_distance, Centers, Point, WeightedPoint};

/// Composable stopping predicate for Lloyd iterations.
///
/// Evaluated once per iteration with the iteration count and the largest
/// center movement; stateless and shared read-only across trials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StoppingCriteria {
    /// Stop once the largest center movement falls below the threshold.
    Threshold(f64),
    /// Stop after this many iterations.
    MaxIterations(usize),
    /// Stop when either side says stop.
    Or(Box<StoppingCriteria>, Box<StoppingCriteria>),
    /// Stop only when both sides say stop.
    And(Box<StoppingCriteria>, Box<StoppingCriteria>),
}

impl StoppingCriteria {
    /// Threshold on center movement.
    pub fn threshold(delta: f64) -> Self {
        Self::Threshold(delta)
    }

    /// Cap on iteration count.
    pub fn max_iterations(limit: usize) -> Self {
        Self::MaxIterations(limit)
    }

    /// Combine with another criterion, stopping when either fires.
    pub fn or(self, other: StoppingCriteria) -> Self {
        Self::Or(Box::new(self), Box::new(other))
    }

    /// Combine with another criterion, stopping only when both fire.
    pub fn and(self, other: StoppingCriteria) -> Self {
        Self::And(Box::new(self), Box::new(other))
    }

    /// Movement below 1e-4 or 100 iterations, whichever comes first.
    pub fn standard() -> Self {
        Self::threshold(1.0e-4).or(Self::max_iterations(100))
    }

    /// Whether iteration should stop, given the number of completed
    /// iterations and the largest center movement of the last one.
    pub fn should_stop(&self, iterations: usize, delta: f64) -> bool {
        match self {
            Self::Threshold(t) => delta < *t,
            Self::MaxIterations(limit) => iterations >= *limit,
            Self::Or(a, b) => a.should_stop(iterations, delta) || b.should_stop(iterations, delta),
            Self::And(a, b) => a.should_stop(iterations, delta) && b.should_stop(iterations, delta),
        }
    }
}

/// Local-refinement seam: accepts a weighted sample, a cluster count, and
/// a seed, and returns a brand-new center set. Implementations must be
/// pure functions of their inputs.
pub trait Refiner {
    /// Compute `k` centers over the weighted sample.
    fn refine(
        &self,
        sample: &[WeightedPoint],
        k: usize,
        seed: u64,
        stopping: &StoppingCriteria,
    ) -> Result<Centers>;
}

/// Weighted k-means++ seeding plus weighted Lloyd iterations.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct LloydRefiner;

impl Refiner for LloydRefiner {
    fn refine(
        &self,
        sample: &[WeightedPoint],
        k: usize,
        seed: u64,
        stopping: &StoppingCriteria,
    ) -> Result<Centers> {
        if k == 0 {
            return Err(SketchError::InvalidArgument(
                "cluster count must be positive".into(),
            ));
        }
        if sample.len() < k {
            return Err(SketchError::InsufficientCandidates {
                requested: k,
                available: sample.len(),
            });
        }

        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut centers = plus_plus_init(sample, k, &mut rng);
        let dim = centers[0].len();
        let mut iterations = 0usize;

        loop {
            // Assignment pass.
            let current = Centers::new(centers.iter().cloned().map(Point::new).collect());
            let mut sums = vec![vec![0.0f64; dim]; k];
            let mut weights = vec![0.0f64; k];
            for wp in sample {
                if let Some((id, _)) = current.closest(wp.point().values()) {
                    let w = wp.weight();
                    weights[id] += w;
                    for (slot, v) in sums[id].iter_mut().zip(wp.point().values()) {
                        *slot += w * v;
                    }
                }
            }

            // Update pass: weighted means; a cluster that attracted no
            // weight keeps its previous center.
            let mut delta = 0.0f64;
            for c in 0..k {
                if weights[c] > 0.0 {
                    let inv = 1.0 / weights[c];
                    let updated: Vec<f64> = sums[c].iter().map(|s| s * inv).collect();
                    let moved = squared_distance(&centers[c], &updated).sqrt();
                    if moved > delta {
                        delta = moved;
                    }
                    centers[c] = updated;
                }
            }

            iterations += 1;
            if stopping.should_stop(iterations, delta) {
                break;
            }
        }

        Ok(Centers::new(centers.into_iter().map(Point::new).collect()))
    }
}

/// Weighted k-means++: the first center is drawn proportional to weight,
/// each subsequent one proportional to `weight * D(x)^2` against the
/// centers chosen so far.
fn plus_plus_init(sample: &[WeightedPoint], k: usize, rng: &mut ChaCha8Rng) -> Vec<Vec<f64>> {
    let first = pick_weighted(rng, sample.iter().map(WeightedPoint::weight));
    let mut centers: Vec<Vec<f64>> = vec![sample[first].point().values().to_vec()];
    let mut nearest: Vec<f64> = sample
        .iter()
        .map(|wp| squared_distance(wp.point().values(), &centers[0]))
        .collect();

    while centers.len() < k {
        let idx = pick_weighted(
            rng,
            sample
                .iter()
                .zip(&nearest)
                .map(|(wp, &d)| wp.weight() * d),
        );
        centers.push(sample[idx].point().values().to_vec());
        let last = centers.len() - 1;
        for (slot, wp) in nearest.iter_mut().zip(sample) {
            let d = squared_distance(wp.point().values(), &centers[last]);
            if d < *slot {
                *slot = d;
            }
        }
    }
    centers
}

/// Draw an index proportional to the given weights; falls back to a
/// uniform draw when the weights sum to zero.
fn pick_weighted<R: Rng>(rng: &mut R, weights: impl Iterator<Item = f64> + Clone) -> usize {
    let total: f64 = weights.clone().sum();
    let count = weights.clone().count();
    if total <= 0.0 {
        return rng.gen_range(0..count.max(1));
    }
    let mut r = rng.gen::<f64>() * total;
    let mut last = 0;
    for (i, w) in weights.enumerate() {
        last = i;
        if r < w {
            return i;
        }
        r -= w;
    }
    last
}

/// Sum over the sample of `weight * squared distance` to the closest
/// center. Zero iff every positively weighted point coincides with a
/// center.
pub fn weighted_cost(sample: &[WeightedPoint], centers: &Centers) -> f64 {
    sample
        .iter()
        .filter_map(|wp| {
            centers
                .closest(wp.point().values())
                .map(|(_, d)| wp.weight() * d)
        })
        .sum()
}
