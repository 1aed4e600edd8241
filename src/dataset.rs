//! The distributed-dataset seam.
//!
//! The seeding engine never owns the execution substrate. It consumes a
//! minimal contract — apply a function to every element shard by shard,
//! combine partial results with a commutative associative merge, and
//! materialize a collection to local memory — so any backend can satisfy
//! it: a cluster execution engine, the in-process [`LocalDataset`] shipped
//! here, or a single-threaded stub in tests.
//!
//! Per-shard accumulators are seeded with a stable shard id, which is what
//! lets sampling passes draw deterministic random streams per shard and
//! stay reproducible when shards are processed in any order.

use rayon::prelude::*;

/// A sharded collection that supports one-pass aggregation.
pub trait Dataset<T: Send + Sync>: Sync {
    /// Fold every element into a per-shard accumulator and merge the
    /// partial accumulators into one.
    ///
    /// `init` receives a stable shard id and builds that shard's
    /// accumulator; `fold` absorbs one element; `merge` combines two shard
    /// results and must be commutative and associative. Returns `None`
    /// when the dataset has no shards.
    fn aggregate<A, I, F, M>(&self, init: I, fold: F, merge: M) -> Option<A>
    where
        A: Send,
        I: Fn(u64) -> A + Sync + Send,
        F: Fn(A, &T) -> A + Sync + Send,
        M: Fn(A, A) -> A + Sync + Send;

    /// Total number of elements.
    fn len(&self) -> usize;

    /// Whether the dataset holds no elements.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy every element into local memory, in shard order.
    fn materialize(&self) -> Vec<T>
    where
        T: Clone,
    {
        self.aggregate(
            |_| Vec::new(),
            |mut acc, item| {
                acc.push(item.clone());
                acc
            },
            |mut a, mut b| {
                a.append(&mut b);
                a
            },
        )
        .unwrap_or_default()
    }
}

/// In-process reference backend: explicit shards processed in parallel
/// with rayon. Shard ids are the shard's position, so aggregation is
/// deterministic run to run.
#[derive(Debug, Clone)]
pub struct LocalDataset<T> {
    shards: Vec<Vec<T>>,
}

impl<T> LocalDataset<T> {
    /// Build a dataset from pre-partitioned shards.
    pub fn new(shards: Vec<Vec<T>>) -> Self {
        Self { shards }
    }

    /// Partition a flat list round-robin into `num_shards` shards.
    pub fn from_items(items: Vec<T>, num_shards: usize) -> Self {
        let num_shards = num_shards.max(1);
        let mut shards: Vec<Vec<T>> = (0..num_shards).map(|_| Vec::new()).collect();
        for (i, item) in items.into_iter().enumerate() {
            shards[i % num_shards].push(item);
        }
        Self { shards }
    }

    /// Number of shards.
    pub fn num_shards(&self) -> usize {
        self.shards.len()
    }
}

impl<T: Send + Sync> Dataset<T> for LocalDataset<T> {
    fn aggregate<A, I, F, M>(&self, init: I, fold: F, merge: M) -> Option<A>
    where
        A: Send,
        I: Fn(u64) -> A + Sync + Send,
        F: Fn(A, &T) -> A + Sync + Send,
        M: Fn(A, A) -> A + Sync + Send,
    {
        self.shards
            .par_iter()
            .enumerate()
            .map(|(shard_id, shard)| shard.iter().fold(init(shard_id as u64), &fold))
            .reduce_with(merge)
    }

    fn len(&self) -> usize {
        self.shards.iter().map(Vec::len).sum()
    }
}
