//! Concurrent trials across a grid of cluster counts.
//!
//! Refining one weighted sample is cheap, so the orchestrator runs many
//! refinements at once: for every requested cluster count `k`, `best_of`
//! independently seeded restarts, all submitted to one bounded worker
//! pool. Each trial is a pure function of `(sample, k, restart seed)`,
//! which is what lets the whole grid run with no shared mutable state.
//! The first trial error aborts the run; trials already in flight finish,
//! but their results are discarded.

use ordered_float::OrderedFloat;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Result, SketchError};
use crate::eval::{evaluate, EvalStats};
use crate::refine::{weighted_cost, Refiner, StoppingCriteria};
use crate::sample::derive_seed;
use crate::vector::{Centers, WeightedPoint};

/// Configuration for a grid run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridConfig {
    /// Cluster counts to try, evaluated in the order given.
    pub cluster_counts: Vec<usize>,
    /// Restarts per cluster count; the lowest-cost restart wins.
    pub best_of: usize,
    /// Base seed; every trial derives its own seed from `(k, restart)`.
    pub seed: u64,
    /// Worker threads for the trial pool.
    pub workers: usize,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            cluster_counts: Vec::new(),
            best_of: 5,
            seed: 0,
            workers: 1,
        }
    }
}

impl GridConfig {
    /// Start a config for the given cluster counts with default restarts,
    /// seed, and worker count.
    pub fn new(cluster_counts: Vec<usize>) -> Self {
        Self {
            cluster_counts,
            ..Self::default()
        }
    }

    /// Set the number of restarts per cluster count.
    pub fn best_of(mut self, best_of: usize) -> Self {
        self.best_of = best_of;
        self
    }

    /// Set the base seed.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Set the worker thread count.
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.cluster_counts.is_empty() {
            return Err(SketchError::InvalidArgument(
                "at least one cluster count is required".into(),
            ));
        }
        if self.cluster_counts.iter().any(|&k| k == 0) {
            return Err(SketchError::InvalidArgument(
                "cluster counts must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Restarts actually run for a given `k`. A single cluster has one
    /// possible weighted mean, so restarts beyond the first are wasted.
    fn restarts_for(&self, k: usize) -> usize {
        if k == 1 {
            1
        } else {
            self.best_of.max(1)
        }
    }
}

/// The winning trial for one cluster count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridResult {
    /// The cluster count this result answers for.
    pub k: usize,
    /// Centers of the lowest-cost restart.
    pub centers: Centers,
    /// That restart's weighted cost over the sample.
    pub cost: f64,
}

/// Run every `(k, restart)` trial over one weighted sample and keep the
/// lowest-cost restart per cluster count.
///
/// Results come back in the order of `config.cluster_counts`. The first
/// failing trial fails the whole run, wrapped with its `(k, restart)`
/// coordinates.
pub fn run_grid<R>(
    refiner: &R,
    sample: &[WeightedPoint],
    config: &GridConfig,
    stopping: &StoppingCriteria,
) -> Result<Vec<GridResult>>
where
    R: Refiner + Sync,
{
    config.validate()?;
    if sample.is_empty() {
        return Err(SketchError::InvalidArgument(
            "cannot run trials on an empty sample".into(),
        ));
    }

    let trials: Vec<(usize, usize)> = config
        .cluster_counts
        .iter()
        .flat_map(|&k| (0..config.restarts_for(k)).map(move |restart| (k, restart)))
        .collect();

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.workers.max(1))
        .build()
        .map_err(|e| SketchError::InvalidState(format!("failed to build trial pool: {e}")))?;

    let outcomes: Vec<(usize, Centers, f64)> = pool.install(|| {
        trials
            .par_iter()
            .map(|&(k, restart)| {
                let trial_seed = derive_seed(config.seed, k as u64, restart as u64);
                let centers = refiner
                    .refine(sample, k, trial_seed, stopping)
                    .map_err(|source| SketchError::Trial {
                        k,
                        restart,
                        source: Box::new(source),
                    })?;
                let cost = weighted_cost(sample, &centers);
                debug!(k, restart, cost, "trial complete");
                Ok((k, centers, cost))
            })
            .collect::<Result<Vec<_>>>()
    })?;

    let results = config
        .cluster_counts
        .iter()
        .map(|&k| {
            outcomes
                .iter()
                .filter(|(tk, _, _)| *tk == k)
                .min_by_key(|(_, _, cost)| OrderedFloat(*cost))
                .map(|(k, centers, cost)| GridResult {
                    k: *k,
                    centers: centers.clone(),
                    cost: *cost,
                })
                .ok_or_else(|| SketchError::InvalidState(format!("no trial ran for k={k}")))
        })
        .collect::<Result<Vec<_>>>()?;
    info!(
        trials = trials.len(),
        counts = config.cluster_counts.len(),
        "grid complete"
    );
    Ok(results)
}

/// Cross-validated grid run: cluster every fold but the last, hold the
/// last fold out as test data, and score the train models against test
/// models fit on the held-out fold.
///
/// `folds` must hold at least two weighted samples. Returns one
/// [`EvalStats`] per cluster count, in input order.
pub fn cross_validate<R>(
    refiner: &R,
    folds: &[Vec<WeightedPoint>],
    config: &GridConfig,
    stopping: &StoppingCriteria,
) -> Result<Vec<EvalStats>>
where
    R: Refiner + Sync,
{
    if folds.len() < 2 {
        return Err(SketchError::InvalidArgument(format!(
            "cross-validation needs at least 2 folds, got {}",
            folds.len()
        )));
    }
    let (test, train_folds) = folds
        .split_last()
        .ok_or_else(|| SketchError::InvalidArgument("no folds".into()))?;
    let train: Vec<WeightedPoint> = train_folds.iter().flatten().cloned().collect();

    let train_results = run_grid(refiner, &train, config, stopping)?;
    let test_results = run_grid(refiner, test, config, stopping)?;

    let train_centers: Vec<Centers> = train_results.into_iter().map(|r| r.centers).collect();
    let test_centers: Vec<Centers> = test_results.into_iter().map(|r| r.centers).collect();
    evaluate(&test_centers, test, &train_centers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::refine::LloydRefiner;
    use crate::vector::Point;
    use approx::assert_abs_diff_eq;

    fn two_blob_sample() -> Vec<WeightedPoint> {
        vec![
            WeightedPoint::new(Point::new(vec![0.0, 0.0]), 40.0),
            WeightedPoint::new(Point::new(vec![0.5, 0.0]), 10.0),
            WeightedPoint::new(Point::new(vec![10.0, 10.0]), 40.0),
            WeightedPoint::new(Point::new(vec![10.0, 9.5]), 10.0),
        ]
    }

    #[test]
    fn test_grid_orders_results_by_input_counts() {
        let config = GridConfig::new(vec![3, 1, 2]).best_of(2).workers(2);
        let results = run_grid(
            &LloydRefiner,
            &two_blob_sample(),
            &config,
            &StoppingCriteria::standard(),
        )
        .unwrap();
        let ks: Vec<usize> = results.iter().map(|r| r.k).collect();
        assert_eq!(ks, vec![3, 1, 2]);
        for r in &results {
            assert_eq!(r.centers.len(), r.k);
        }
    }

    #[test]
    fn test_grid_cost_decreases_with_k() {
        let config = GridConfig::new(vec![1, 2]).best_of(3).seed(9);
        let results = run_grid(
            &LloydRefiner,
            &two_blob_sample(),
            &config,
            &StoppingCriteria::standard(),
        )
        .unwrap();
        assert!(results[1].cost <= results[0].cost);
        // Two centers resolve the two blobs almost exactly.
        assert!(results[1].cost < 20.0, "k=2 cost {}", results[1].cost);
    }

    #[test]
    fn test_grid_is_deterministic_per_seed() {
        let sample = two_blob_sample();
        let config = GridConfig::new(vec![2]).best_of(4).seed(31).workers(4);
        let stop = StoppingCriteria::standard();
        let a = run_grid(&LloydRefiner, &sample, &config, &stop).unwrap();
        let b = run_grid(&LloydRefiner, &sample, &config, &stop).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_grid_rejects_bad_input() {
        let stop = StoppingCriteria::standard();
        let empty_counts = GridConfig::new(vec![]);
        assert!(run_grid(&LloydRefiner, &two_blob_sample(), &empty_counts, &stop).is_err());

        let zero_k = GridConfig::new(vec![2, 0]);
        assert!(run_grid(&LloydRefiner, &two_blob_sample(), &zero_k, &stop).is_err());

        let config = GridConfig::new(vec![2]);
        assert!(run_grid(&LloydRefiner, &[], &config, &stop).is_err());
    }

    #[test]
    fn test_trial_failure_carries_coordinates() {
        // k=3 over a 2-point sample cannot be seeded.
        let sample = vec![
            WeightedPoint::new(Point::new(vec![0.0]), 1.0),
            WeightedPoint::new(Point::new(vec![1.0]), 1.0),
        ];
        let config = GridConfig::new(vec![2, 3]).best_of(1);
        let err = run_grid(
            &LloydRefiner,
            &sample,
            &config,
            &StoppingCriteria::standard(),
        )
        .unwrap_err();
        match err {
            SketchError::Trial { k, restart, source } => {
                assert_eq!(k, 3);
                assert_eq!(restart, 0);
                assert!(matches!(
                    *source,
                    SketchError::InsufficientCandidates { .. }
                ));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_single_cluster_runs_one_trial() {
        // A failing refiner that counts invocations would be heavier than
        // needed: k=1 determinism already proves a single trial, since
        // restarts with distinct seeds would all produce the same mean
        // anyway. Assert the documented restart count directly.
        let config = GridConfig::new(vec![1]).best_of(7);
        assert_eq!(config.restarts_for(1), 1);
        assert_eq!(config.restarts_for(4), 7);
    }

    #[test]
    fn test_config_serde_round_trip() {
        let config = GridConfig::new(vec![2, 4, 8]).best_of(3).seed(5).workers(2);
        let json = serde_json::to_string(&config).unwrap();
        let back: GridConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.cluster_counts, vec![2, 4, 8]);
        assert_eq!(back.best_of, 3);
        assert_eq!(back.seed, 5);
        assert_eq!(back.workers, 2);
    }

    #[test]
    fn test_cross_validate_identical_folds() {
        let folds = vec![two_blob_sample(), two_blob_sample()];
        let config = GridConfig::new(vec![2]).best_of(3).seed(1);
        let stats = cross_validate(
            &LloydRefiner,
            &folds,
            &config,
            &StoppingCriteria::standard(),
        )
        .unwrap();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].k, 2);
        // Train and test agree on the blob structure.
        assert_abs_diff_eq!(stats[0].prediction_strength, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_cross_validate_needs_two_folds() {
        let config = GridConfig::new(vec![2]);
        let err = cross_validate(
            &LloydRefiner,
            &[two_blob_sample()],
            &config,
            &StoppingCriteria::standard(),
        )
        .unwrap_err();
        assert!(matches!(err, SketchError::InvalidArgument(_)));
    }
}
