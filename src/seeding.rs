//! Parallel k-means|| seeding over a distributed dataset.
//!
//! Implements the oversampling procedure of Bahmani et al. (2012): a
//! constant number of passes over the full dataset, each pass scoring
//! every point against the current candidate centers and
//! weighted-reservoir-sampling new candidates with probability
//! proportional to their squared distance. The result is a small weighted
//! candidate list per fold that approximates the dataset's density well
//! enough for local refinement to match full-dataset Lloyd iterations.
//!
//! Within one iteration there is a hard barrier between the scoring pass
//! and the center-update pass: the sample is fully materialized before
//! any `add` touches the index, so the index never sees interleaved
//! mutation and query on a fold.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::dataset::Dataset;
use crate::error::{Result, SketchError};
use crate::index::CentersIndex;
use crate::sample::{derive_seed, grouped_weighted_sample};
use crate::vector::{Centers, Point, WeightedPoint};

/// Routes every point to exactly one fold per pass.
///
/// Folds partition the input for cross-validation, or let several
/// independent seeding attempts share one set of dataset passes. The
/// assignment is a seeded deterministic hash — of the point's id when it
/// has one, of its coordinate bits otherwise — so repeated passes route
/// each point identically.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Crossfold {
    num_folds: usize,
    seed: u64,
}

impl Crossfold {
    /// Create a partitioner over `num_folds` folds.
    pub fn new(num_folds: usize, seed: u64) -> Result<Self> {
        if num_folds == 0 {
            return Err(SketchError::InvalidArgument(
                "num_folds must be at least 1".into(),
            ));
        }
        Ok(Self { num_folds, seed })
    }

    /// The trivial single-fold partitioner.
    pub fn single() -> Self {
        Self {
            num_folds: 1,
            seed: 0,
        }
    }

    /// Number of folds.
    pub fn num_folds(&self) -> usize {
        self.num_folds
    }

    /// The fold this point belongs to, in `[0, num_folds)`.
    pub fn assign(&self, point: &Point) -> usize {
        if self.num_folds == 1 {
            return 0;
        }
        // FNV-1a over the id bytes or the coordinate bit patterns.
        let mut hash = 0xCBF2_9CE4_8422_2325u64 ^ self.seed;
        match point.id() {
            Some(id) => {
                for byte in id.bytes() {
                    hash ^= u64::from(byte);
                    hash = hash.wrapping_mul(0x0000_0100_0000_01B3);
                }
            }
            None => {
                for v in point.values() {
                    hash ^= v.to_bits();
                    hash = hash.wrapping_mul(0x0000_0100_0000_01B3);
                }
            }
        }
        (hash % self.num_folds as u64) as usize
    }
}

/// One cluster-assignment record: for a single point and a single center
/// configuration, the closest center and the distance to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    /// The point's identifier, when it carries one.
    pub point_id: Option<String>,
    /// Identifier of the center configuration (its position, or the
    /// caller-supplied cluster id).
    pub cluster_id: usize,
    /// Id of the closest center within that configuration.
    pub closest_center_id: usize,
    /// Squared distance to that center.
    pub distance: f64,
}

/// The k-means|| seeding engine.
///
/// `projection_bits` and `projection_samples` size the locality-sensitive
/// sketch of the center index (see [`CentersIndex`]); `random_seed` fixes
/// every random stream the engine derives, so runs are reproducible.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct KMeansParallel {
    /// Hyperplanes per sketch repetition (1..=64).
    pub projection_bits: u32,
    /// Independent sketch repetitions.
    pub projection_samples: usize,
    /// Base seed for projections, sampling, and counting passes.
    pub random_seed: u64,
}

impl Default for KMeansParallel {
    fn default() -> Self {
        Self {
            projection_bits: 32,
            projection_samples: 8,
            random_seed: 0,
        }
    }
}

// Lanes for deriving independent seeds from `random_seed`.
const LANE_INDEX: u64 = 0;
const LANE_SAMPLE: u64 = 1;
const LANE_SCORING: u64 = 2;

impl KMeansParallel {
    /// Create an engine with explicit sketch parameters and seed.
    pub fn new(projection_bits: u32, projection_samples: usize, random_seed: u64) -> Self {
        Self {
            projection_bits,
            projection_samples,
            random_seed,
        }
    }

    /// Run k-means|| seeding: `num_iterations` oversampling passes of
    /// `samples_per_iteration` candidates per fold, starting from
    /// `initial_points` (added to every fold), then one counting pass
    /// that weights each surviving candidate by the number of dataset
    /// points closest to it.
    ///
    /// With `num_iterations == 0` the returned candidates are exactly the
    /// initial points. The oversampling total should exceed the largest
    /// cluster count later requested (2x or more); that margin is the
    /// caller's responsibility.
    pub fn seed<D>(
        &self,
        points: &D,
        num_iterations: usize,
        samples_per_iteration: usize,
        initial_points: &[Point],
        crossfold: &Crossfold,
    ) -> Result<Vec<Vec<WeightedPoint>>>
    where
        D: Dataset<Point> + ?Sized,
    {
        if initial_points.is_empty() {
            return Err(SketchError::InvalidArgument(
                "at least one initial point is required".into(),
            ));
        }
        if num_iterations > 0 && samples_per_iteration == 0 {
            return Err(SketchError::InvalidArgument(
                "samples_per_iteration must be positive".into(),
            ));
        }
        let dimension = initial_points[0].dim();

        let mut index = CentersIndex::new(
            crossfold.num_folds(),
            dimension,
            self.projection_bits,
            self.projection_samples,
            derive_seed(self.random_seed, LANE_INDEX, 0),
        )?;
        for point in initial_points {
            for fold in 0..crossfold.num_folds() {
                index.add(point.clone(), fold)?;
            }
        }

        let capacities = vec![samples_per_iteration; crossfold.num_folds()];
        for iteration in 0..num_iterations {
            // Scoring pass: distance of every point to its fold's current
            // centers, candidates drawn proportional to that distance.
            // Points already coincident with a center contribute nothing.
            let shared = &index;
            let sample = grouped_weighted_sample(
                points,
                |point: &Point| {
                    let fold = crossfold.assign(point);
                    let d = shared.get_distances(point.values(), true)?;
                    let dist = d.distances[fold];
                    if dist > 0.0 {
                        Ok(Some((fold, point.clone(), dist)))
                    } else {
                        Ok(None)
                    }
                },
                &capacities,
                derive_seed(self.random_seed, LANE_SAMPLE, iteration as u64),
            )?;

            // Barrier: the sample is materialized, now grow the centers.
            let mut added = 0usize;
            for (fold, candidates) in sample.into_iter().enumerate() {
                for candidate in candidates {
                    index.add(candidate, fold)?;
                    added += 1;
                }
            }
            debug!(iteration, added, total = index.num_centers(), "seeding iteration complete");
        }

        let counts = self.counts_of_closest(points, crossfold, &index)?;
        info!(
            folds = crossfold.num_folds(),
            candidates = index.num_centers(),
            "seeding finished"
        );
        index.get_weighted_vectors(&counts)
    }

    /// For each fold and each candidate center, the number of dataset
    /// points whose closest candidate in that fold it is.
    pub fn counts_of_closest<D>(
        &self,
        points: &D,
        crossfold: &Crossfold,
        index: &CentersIndex,
    ) -> Result<Vec<Vec<u64>>>
    where
        D: Dataset<Point> + ?Sized,
    {
        let sizes = index.centers_per_fold();
        let zero: Vec<Vec<u64>> = sizes.iter().map(|&n| vec![0u64; n]).collect();
        let out = points.aggregate(
            |_| Ok(zero.clone()),
            |acc: Result<Vec<Vec<u64>>>, point| {
                let mut acc = acc?;
                let fold = crossfold.assign(point);
                let d = index.get_distances(point.values(), true)?;
                acc[fold][d.closest[fold]] += 1;
                Ok(acc)
            },
            |a, b| {
                let mut a = a?;
                for (left, right) in a.iter_mut().zip(b?) {
                    for (x, y) in left.iter_mut().zip(right) {
                        *x += y;
                    }
                }
                Ok(a)
            },
        );
        match out {
            Some(counts) => counts,
            None => Ok(zero),
        }
    }

    /// Cost of each center configuration over the dataset: the sum of
    /// squared distances from every point to its closest center in that
    /// configuration. Summation is order-invariant up to floating-point
    /// rounding.
    pub fn costs<D>(&self, points: &D, centers: &[Centers]) -> Result<Vec<f64>>
    where
        D: Dataset<Point> + ?Sized,
    {
        let index = self.scoring_index(centers)?;
        let out = points.aggregate(
            |_| Ok(vec![0.0f64; centers.len()]),
            |acc: Result<Vec<f64>>, point| {
                let mut acc = acc?;
                let d = index.get_distances(point.values(), true)?;
                for (slot, dist) in acc.iter_mut().zip(&d.distances) {
                    *slot += dist;
                }
                Ok(acc)
            },
            |a, b| {
                let mut a = a?;
                for (x, y) in a.iter_mut().zip(b?) {
                    *x += y;
                }
                Ok(a)
            },
        );
        match out {
            Some(costs) => costs,
            None => Ok(vec![0.0; centers.len()]),
        }
    }

    /// Cost of a single center configuration.
    pub fn cost<D>(&self, points: &D, centers: &Centers) -> Result<f64>
    where
        D: Dataset<Point> + ?Sized,
    {
        Ok(self
            .costs(points, std::slice::from_ref(centers))?
            .pop()
            .unwrap_or(0.0))
    }

    /// For every point and every center configuration, the closest center
    /// and its distance, scored exactly (no sketch approximation), in
    /// dataset order. Configurations are identified by position unless
    /// `cluster_ids` supplies explicit ids, whose length must match.
    pub fn assignments<D>(
        &self,
        points: &D,
        centers: &[Centers],
        cluster_ids: Option<&[usize]>,
    ) -> Result<Vec<Assignment>>
    where
        D: Dataset<Point> + ?Sized,
    {
        if let Some(ids) = cluster_ids {
            if ids.len() != centers.len() {
                return Err(SketchError::InvalidArgument(format!(
                    "{} cluster ids for {} center configurations",
                    ids.len(),
                    centers.len()
                )));
            }
        }
        let index = self.scoring_index(centers)?;
        let out = points.aggregate(
            |_| Ok(Vec::new()),
            |acc: Result<Vec<Assignment>>, point: &Point| {
                let mut acc = acc?;
                let d = index.get_distances(point.values(), false)?;
                for (config, (&closest, &distance)) in
                    d.closest.iter().zip(&d.distances).enumerate()
                {
                    acc.push(Assignment {
                        point_id: point.id().map(String::from),
                        cluster_id: cluster_ids.map_or(config, |ids| ids[config]),
                        closest_center_id: closest,
                        distance,
                    });
                }
                Ok(acc)
            },
            |a, b| {
                let mut a = a?;
                a.extend(b?);
                Ok(a)
            },
        );
        match out {
            Some(assignments) => assignments,
            None => Ok(Vec::new()),
        }
    }

    fn scoring_index(&self, centers: &[Centers]) -> Result<CentersIndex> {
        CentersIndex::from_centers(
            centers,
            self.projection_bits,
            self.projection_samples,
            derive_seed(self.random_seed, LANE_SCORING, 0),
        )
    }
}
