//! Cross-validated clustering quality statistics.
//!
//! For each cluster count the caller fits two models: one on the training
//! folds and one on the held-out test fold. [`evaluate`] then scores how
//! well the train model predicts the test fold's structure. Prediction
//! strength (Tibshirani and Walther, 2005) asks, for every test cluster,
//! what fraction of its co-clustered point pairs the train model also
//! puts together; the minimum over test clusters is the headline number.
//! Pairs are counted over weighted points, with a weight-`w` point
//! standing in for `w` identical observations.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, SketchError};
use crate::refine::weighted_cost;
use crate::vector::{Centers, WeightedPoint};

/// A test cluster is stable when the train model keeps at least this
/// fraction of its pairs together.
pub const STABILITY_THRESHOLD: f64 = 0.8;

/// Quality statistics for one cluster count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalStats {
    /// The cluster count these statistics answer for.
    pub k: usize,
    /// Weighted cost of the test points under the test model.
    pub test_cost: f64,
    /// Weighted cost of the test points under the train model.
    pub train_cost: f64,
    /// Minimum over test clusters of the pair-agreement ratio.
    pub prediction_strength: f64,
    /// Number of test clusters at or above [`STABILITY_THRESHOLD`].
    pub stable_clusters: usize,
    /// Weighted fraction of test points that sit in a stable cluster.
    pub stable_points: f64,
}

/// Score each train model against the test model fit on the held-out
/// fold. `test_centers[i]` and `train_centers[i]` must answer for the
/// same cluster count; results come back in the same order.
pub fn evaluate(
    test_centers: &[Centers],
    test_points: &[WeightedPoint],
    train_centers: &[Centers],
) -> Result<Vec<EvalStats>> {
    if test_centers.len() != train_centers.len() {
        return Err(SketchError::InvalidArgument(format!(
            "{} test models for {} train models",
            test_centers.len(),
            train_centers.len()
        )));
    }
    if test_points.is_empty() {
        return Err(SketchError::InvalidArgument(
            "no test points to evaluate against".into(),
        ));
    }

    test_centers
        .iter()
        .zip(train_centers)
        .map(|(test_model, train_model)| {
            if test_model.is_empty() || train_model.is_empty() {
                return Err(SketchError::InvalidArgument(
                    "cannot evaluate an empty center set".into(),
                ));
            }
            let stats = evaluate_one(test_model, test_points, train_model);
            debug!(
                k = stats.k,
                prediction_strength = stats.prediction_strength,
                "evaluated cluster count"
            );
            Ok(stats)
        })
        .collect()
}

fn evaluate_one(
    test_model: &Centers,
    test_points: &[WeightedPoint],
    train_model: &Centers,
) -> EvalStats {
    let k = test_model.len();

    // Weighted contingency table: for test cluster j and train cluster t,
    // the total weight and the summed squared weight of test points
    // assigned to both.
    let mut weight = vec![vec![0.0f64; train_model.len()]; k];
    let mut weight_sq = vec![vec![0.0f64; train_model.len()]; k];
    for wp in test_points {
        let w = wp.weight();
        if w <= 0.0 {
            continue;
        }
        let values = wp.point().values();
        // Both models are non-empty, so closest always answers.
        let Some((j, _)) = test_model.closest(values) else {
            continue;
        };
        let Some((t, _)) = train_model.closest(values) else {
            continue;
        };
        weight[j][t] += w;
        weight_sq[j][t] += w * w;
    }

    let mut prediction_strength = f64::INFINITY;
    let mut stable_clusters = 0usize;
    let mut stable_weight = 0.0f64;
    let mut total_weight = 0.0f64;
    for j in 0..k {
        let w_j: f64 = weight[j].iter().sum();
        let s_j: f64 = weight_sq[j].iter().sum();
        total_weight += w_j;

        // Ordered pairs within the test cluster, and the subset of those
        // the train model also co-clusters. A weight-w point contributes
        // w*(w-1)-style pair mass through the squared-weight correction.
        let pairs = w_j * w_j - s_j;
        let ratio = if pairs > 0.0 {
            let agreeing: f64 = weight[j]
                .iter()
                .zip(&weight_sq[j])
                .map(|(&w_jt, &s_jt)| w_jt * w_jt - s_jt)
                .sum();
            agreeing / pairs
        } else {
            // Zero or one effective point: nothing to split.
            1.0
        };

        if ratio < prediction_strength {
            prediction_strength = ratio;
        }
        if ratio >= STABILITY_THRESHOLD {
            stable_clusters += 1;
            stable_weight += w_j;
        }
    }

    EvalStats {
        k,
        test_cost: weighted_cost(test_points, test_model),
        train_cost: weighted_cost(test_points, train_model),
        prediction_strength,
        stable_clusters,
        stable_points: if total_weight > 0.0 {
            stable_weight / total_weight
        } else {
            0.0
        },
    }
}
