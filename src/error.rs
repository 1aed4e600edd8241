//! Error types for ksketch operations.
//!
//! All fallible operations in the crate return [`Result`], an alias for
//! `std::result::Result<T, SketchError>`. Argument validation happens
//! eagerly at call boundaries, before any dataset pass is scheduled, so a
//! bad configuration never costs a scan over the data.

use thiserror::Error;

/// Error type for seeding, indexing, and clustering operations.
#[must_use]
#[derive(Error, Debug)]
pub enum SketchError {
    /// A caller-supplied argument failed validation.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An operation was attempted in a state that cannot serve it, such as
    /// querying a fold that has no centers yet.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Seeding produced fewer candidates than the requested cluster count.
    #[error("insufficient candidates: requested {requested} clusters but only {available} candidates")]
    InsufficientCandidates {
        /// The cluster count the caller asked for.
        requested: usize,
        /// How many candidate points were actually available.
        available: usize,
    },

    /// A single clustering trial failed. Carries the `(k, restart)`
    /// coordinates of the failing trial for diagnosis; the enclosing grid
    /// call reports the first such failure and returns no partial results.
    #[error("trial failed for k={k} restart={restart}: {source}")]
    Trial {
        /// Requested cluster count of the failing trial.
        k: usize,
        /// Restart index of the failing trial.
        restart: usize,
        /// The underlying failure.
        #[source]
        source: Box<SketchError>,
    },
}

/// Result type alias for ksketch operations.
pub type Result<T> = std::result::Result<T, SketchError>;
