//! Approximate nearest-center index.
//!
//! Seeding scores every dataset point against a growing candidate set once
//! per iteration, and an exact scan over thousands of candidates dominates
//! that cost. [`CentersIndex`] keeps, per fold, the candidate centers plus
//! a random-hyperplane sketch: each of `projection_samples` repetitions
//! hashes a point to a `projection_bits`-wide bit pattern (one bit per
//! hyperplane, set when the dot product is positive), and centers sharing
//! a bucket with the query are geometrically close with high probability.
//! Approximate queries scan only bucket-sharing candidates, falling back
//! to an exact scan when no bucket matches, so a query never comes back
//! empty-handed.
//!
//! The index is not designed for interleaved mutation and query on one
//! fold: callers must finish a scoring pass before the next `add` pass
//! begins. Distinct folds are fully independent.

use std::collections::HashMap;

use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;

use crate::error::{Result, SketchError};
use crate::vector::{squared_distance, Centers, Point, WeightedPoint};

/// Result of one query: for every fold, the id of the closest center and
/// the squared Euclidean distance to it. Recomputed per query, never
/// persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct Distances {
    /// Closest center id, indexed by fold.
    pub closest: Vec<usize>,
    /// Squared distance to that center, indexed by fold.
    pub distances: Vec<f64>,
}

#[derive(Debug, Default)]
struct FoldIndex {
    centers: Centers,
    /// One bucket table per projection repetition: bit pattern -> ids of
    /// centers hashed to that pattern.
    buckets: Vec<HashMap<u64, Vec<usize>>>,
}

/// Per-fold candidate centers with a locality-sensitive sketch for fast
/// approximate closest-center queries.
#[derive(Debug)]
pub struct CentersIndex {
    dimension: usize,
    projection_bits: u32,
    projection_samples: usize,
    /// `projection_bits * projection_samples` random unit vectors,
    /// deterministic given the construction seed.
    projections: Vec<Vec<f64>>,
    folds: Vec<FoldIndex>,
}

impl CentersIndex {
    /// Create an empty index for `num_folds` folds of `dimension`-d points.
    ///
    /// `projection_bits` must be in `1..=64` (bit patterns are stored as
    /// `u64` keys) and `projection_samples` at least 1.
    pub fn new(
        num_folds: usize,
        dimension: usize,
        projection_bits: u32,
        projection_samples: usize,
        seed: u64,
    ) -> Result<Self> {
        if num_folds == 0 {
            return Err(SketchError::InvalidArgument(
                "num_folds must be at least 1".into(),
            ));
        }
        if dimension == 0 {
            return Err(SketchError::InvalidArgument(
                "dimension must be at least 1".into(),
            ));
        }
        if projection_bits == 0 || projection_bits > 64 {
            return Err(SketchError::InvalidArgument(format!(
                "projection_bits must be in 1..=64, got {projection_bits}"
            )));
        }
        if projection_samples == 0 {
            return Err(SketchError::InvalidArgument(
                "projection_samples must be at least 1".into(),
            ));
        }

        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let total = projection_bits as usize * projection_samples;
        let mut projections = Vec::with_capacity(total);
        for _ in 0..total {
            let mut v: Vec<f64> = (0..dimension).map(|_| rng.sample(StandardNormal)).collect();
            let norm = v.iter().map(|x| x * x).sum::<f64>().sqrt();
            if norm > 0.0 {
                for x in &mut v {
                    *x /= norm;
                }
            }
            projections.push(v);
        }

        let folds = (0..num_folds)
            .map(|_| FoldIndex {
                centers: Centers::default(),
                buckets: (0..projection_samples).map(|_| HashMap::new()).collect(),
            })
            .collect();

        Ok(Self {
            dimension,
            projection_bits,
            projection_samples,
            projections,
            folds,
        })
    }

    /// Build an index over finalized center sets, one fold per set. Used
    /// for cost and assignment scoring after clustering.
    pub fn from_centers(
        centers: &[Centers],
        projection_bits: u32,
        projection_samples: usize,
        seed: u64,
    ) -> Result<Self> {
        if centers.is_empty() {
            return Err(SketchError::InvalidArgument("no centers specified".into()));
        }
        let dimension = centers
            .iter()
            .flat_map(Centers::iter)
            .map(Point::dim)
            .next()
            .ok_or_else(|| SketchError::InvalidArgument("no centers specified".into()))?;
        let mut index = Self::new(
            centers.len(),
            dimension,
            projection_bits,
            projection_samples,
            seed,
        )?;
        for (fold, set) in centers.iter().enumerate() {
            for point in set.iter() {
                index.add(point.clone(), fold)?;
            }
        }
        Ok(index)
    }

    /// Number of folds.
    pub fn num_folds(&self) -> usize {
        self.folds.len()
    }

    /// Total number of centers across all folds.
    pub fn num_centers(&self) -> usize {
        self.folds.iter().map(|f| f.centers.len()).sum()
    }

    /// Number of centers in each fold, indexed by fold.
    pub fn centers_per_fold(&self) -> Vec<usize> {
        self.folds.iter().map(|f| f.centers.len()).collect()
    }

    /// The centers accumulated for one fold.
    pub fn fold_centers(&self, fold: usize) -> Result<&Centers> {
        self.folds
            .get(fold)
            .map(|f| &f.centers)
            .ok_or_else(|| SketchError::InvalidArgument(format!("fold {fold} out of range")))
    }

    /// Compute the sketch of a point: one `u64` bit pattern per
    /// projection repetition.
    fn sketch(&self, values: &[f64]) -> Vec<u64> {
        let bits = self.projection_bits as usize;
        (0..self.projection_samples)
            .map(|s| {
                let mut key = 0u64;
                for b in 0..bits {
                    let plane = &self.projections[s * bits + b];
                    let dot: f64 = plane.iter().zip(values).map(|(p, v)| p * v).sum();
                    if dot > 0.0 {
                        key |= 1 << b;
                    }
                }
                key
            })
            .collect()
    }

    /// Append a center to a fold, updating that fold's sketch tables.
    /// Returns the new center's id; ids are assigned in insertion order
    /// and never reused or renumbered.
    ///
    /// Must not run concurrently with queries against the same fold.
    pub fn add(&mut self, point: Point, fold: usize) -> Result<usize> {
        if point.dim() != self.dimension {
            return Err(SketchError::InvalidArgument(format!(
                "dimension mismatch: index holds {}-d points, got {}",
                self.dimension,
                point.dim()
            )));
        }
        if fold >= self.folds.len() {
            return Err(SketchError::InvalidArgument(format!(
                "fold {fold} out of range for {} folds",
                self.folds.len()
            )));
        }
        let keys = self.sketch(point.values());
        let entry = &mut self.folds[fold];
        let id = entry.centers.push(point);
        for (table, key) in entry.buckets.iter_mut().zip(keys) {
            table.entry(key).or_default().push(id);
        }
        Ok(id)
    }

    /// For every fold, find the closest center to `values` and the squared
    /// distance to it.
    ///
    /// In approximate mode only candidates sharing at least one sketch
    /// bucket with the query are scanned; when no bucket matches, the
    /// query silently falls back to an exact scan of the fold. In exact
    /// mode every center is scanned. Fails with `InvalidState` if any
    /// fold has no centers.
    pub fn get_distances(&self, values: &[f64], approximate: bool) -> Result<Distances> {
        if values.len() != self.dimension {
            return Err(SketchError::InvalidArgument(format!(
                "dimension mismatch: index holds {}-d points, got {}",
                self.dimension,
                values.len()
            )));
        }
        let keys = if approximate {
            Some(self.sketch(values))
        } else {
            None
        };

        let mut closest = Vec::with_capacity(self.folds.len());
        let mut distances = Vec::with_capacity(self.folds.len());
        for (fold, entry) in self.folds.iter().enumerate() {
            if entry.centers.is_empty() {
                return Err(SketchError::InvalidState(format!(
                    "fold {fold} has no centers"
                )));
            }
            let approx_best = keys
                .as_ref()
                .and_then(|keys| Self::closest_in_buckets(entry, keys, values));
            // No bucket hit (or exact mode): full scan keeps the query correct.
            let (id, d) = approx_best
                .or_else(|| entry.centers.closest(values))
                .ok_or_else(|| SketchError::InvalidState(format!("fold {fold} has no centers")))?;
            closest.push(id);
            distances.push(d);
        }
        Ok(Distances { closest, distances })
    }

    fn closest_in_buckets(
        entry: &FoldIndex,
        keys: &[u64],
        values: &[f64],
    ) -> Option<(usize, f64)> {
        let mut seen = vec![false; entry.centers.len()];
        let mut best: Option<(usize, f64)> = None;
        for (table, key) in entry.buckets.iter().zip(keys) {
            let Some(ids) = table.get(key) else { continue };
            for &id in ids {
                if seen[id] {
                    continue;
                }
                seen[id] = true;
                let d = squared_distance(values, entry.centers.get(id).values());
                match best {
                    Some((bid, bd)) if d > bd || (d == bd && id > bid) => {}
                    _ => best = Some((id, d)),
                }
            }
        }
        best
    }

    /// Pair each fold's centers with externally supplied per-center point
    /// counts, producing one weighted candidate list per fold. This is
    /// the handoff artifact consumed by local refinement.
    pub fn get_weighted_vectors(&self, counts: &[Vec<u64>]) -> Result<Vec<Vec<WeightedPoint>>> {
        if counts.len() != self.folds.len() {
            return Err(SketchError::InvalidArgument(format!(
                "got counts for {} folds, index has {}",
                counts.len(),
                self.folds.len()
            )));
        }
        let mut out = Vec::with_capacity(self.folds.len());
        for (fold, (entry, fold_counts)) in self.folds.iter().zip(counts).enumerate() {
            if fold_counts.len() != entry.centers.len() {
                return Err(SketchError::InvalidArgument(format!(
                    "fold {fold}: {} counts for {} centers",
                    fold_counts.len(),
                    entry.centers.len()
                )));
            }
            out.push(
                entry
                    .centers
                    .iter()
                    .zip(fold_counts)
                    .map(|(point, &count)| WeightedPoint::new(point.clone(), count as f64))
                    .collect(),
            );
        }
        Ok(out)
    }
}
