//! # ksketch
//!
//! Scalable k-means seeding and model selection for large datasets.
//!
//! Classic k-means++ picks centers one at a time and needs a full pass
//! over the data per center, which does not scale past a handful of
//! clusters on a large dataset. ksketch implements the k-means|| scheme
//! instead: a small, fixed number of passes oversamples a weighted set of
//! candidate centers, scored against the growing candidate set through a
//! locality-sensitive sketch, and the final clustering runs locally on
//! that compact weighted sample. On top of seeding it ships the model
//! selection layer: concurrent restarts across a grid of cluster counts,
//! and cross-validated quality statistics (prediction strength, cluster
//! stability) for choosing `k`.
//!
//! The dataset itself stays behind the [`Dataset`] trait, so the same
//! engine drives an in-process [`LocalDataset`] or any sharded backend
//! that can run a fold-and-merge pass.
//!
//! ## Example
//!
//! ```
//! use ksketch::{
//!     Crossfold, GridConfig, KMeansParallel, LloydRefiner, LocalDataset, Point,
//!     StoppingCriteria,
//! };
//!
//! # fn main() -> ksketch::Result<()> {
//! let points: Vec<Point> = (0..200)
//!     .map(|i| {
//!         let offset = if i % 2 == 0 { 0.0 } else { 10.0 };
//!         Point::new(vec![offset + f64::from(i % 5) * 0.01, offset])
//!     })
//!     .collect();
//! let data = LocalDataset::from_items(points, 4);
//!
//! // Oversample weighted candidate centers in a few passes.
//! let engine = KMeansParallel::default();
//! let initial = vec![Point::new(vec![0.0, 0.0])];
//! let folds = engine.seed(&data, 3, 8, &initial, &Crossfold::single())?;
//!
//! // Cluster the compact sample locally, best of several restarts.
//! let config = GridConfig::new(vec![2]).best_of(3);
//! let results = ksketch::run_grid(
//!     &LloydRefiner,
//!     &folds[0],
//!     &config,
//!     &StoppingCriteria::standard(),
//! )?;
//! assert_eq!(results[0].centers.len(), 2);
//! # Ok(())
//! # }
//! ```

pub mod dataset;
pub mod error;
pub mod eval;
pub mod grid;
pub mod index;
pub mod refine;
pub mod sample;
pub mod seeding;
pub mod vector;

pub use dataset::{Dataset, LocalDataset};
pub use error::{Result, SketchError};
pub use eval::{evaluate, EvalStats, STABILITY_THRESHOLD};
pub use grid::{cross_validate, run_grid, GridConfig, GridResult};
pub use index::{CentersIndex, Distances};
pub use refine::{weighted_cost, LloydRefiner, Refiner, StoppingCriteria};
pub use sample::{grouped_weighted_sample, WeightedReservoir};
pub use seeding::{Assignment, Crossfold, KMeansParallel};
pub use vector::{squared_distance, Centers, Point, WeightedPoint};
