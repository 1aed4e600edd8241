//! Core data model: points, weighted points, and center sets.
//!
//! Everything downstream (the index, the sampler, seeding, refinement,
//! evaluation) operates on these three types. All of them are plain owned
//! data and immutable after construction; `Centers` grows by append only
//! while the seeding engine holds exclusive access to it.

use serde::{Deserialize, Serialize};

/// An ordered numeric vector of fixed dimensionality, optionally tagged
/// with an opaque identifier used only for output attribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    values: Vec<f64>,
    id: Option<String>,
}

impl Point {
    /// Create an anonymous point from its coordinates.
    pub fn new(values: Vec<f64>) -> Self {
        Self { values, id: None }
    }

    /// Create a point tagged with an identifier.
    pub fn named(id: impl Into<String>, values: Vec<f64>) -> Self {
        Self {
            values,
            id: Some(id.into()),
        }
    }

    /// The point's coordinates.
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// The identifier, if one was attached.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Dimensionality of the point.
    pub fn dim(&self) -> usize {
        self.values.len()
    }
}

/// A [`Point`] paired with a non-negative weight.
///
/// Weights are additive under merge and never mutated after creation. The
/// seeding engine produces these by pairing candidate centers with the
/// number of dataset points closest to each candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightedPoint {
    point: Point,
    weight: f64,
}

impl WeightedPoint {
    /// Pair a point with a weight. Negative weights are clamped to zero.
    pub fn new(point: Point, weight: f64) -> Self {
        Self {
            point,
            weight: weight.max(0.0),
        }
    }

    /// The underlying point.
    pub fn point(&self) -> &Point {
        &self.point
    }

    /// The weight.
    pub fn weight(&self) -> f64 {
        self.weight
    }
}

/// An ordered sequence of points acting as cluster centers.
///
/// A center's position in the sequence is its stable id: ids are assigned
/// at append time and never reused or renumbered. Duplicates are legal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Centers {
    points: Vec<Point>,
}

impl Centers {
    /// Build a center set from an ordered list of points.
    pub fn new(points: Vec<Point>) -> Self {
        Self { points }
    }

    /// Number of centers.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Whether the set holds no centers.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// The center with the given id.
    pub fn get(&self, id: usize) -> &Point {
        &self.points[id]
    }

    /// Iterate over centers in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Point> {
        self.points.iter()
    }

    /// Append a center, returning its id. Ids are assigned in insertion
    /// order and never reused.
    pub(crate) fn push(&mut self, point: Point) -> usize {
        self.points.push(point);
        self.points.len() - 1
    }

    /// Exact linear scan for the closest center to `values`, returning its
    /// id and the squared Euclidean distance. Ties break toward the lower
    /// id. Returns `None` when the set is empty.
    pub fn closest(&self, values: &[f64]) -> Option<(usize, f64)> {
        let mut best: Option<(usize, f64)> = None;
        for (id, center) in self.points.iter().enumerate() {
            let d = squared_distance(values, center.values());
            match best {
                Some((_, bd)) if d >= bd => {}
                _ => best = Some((id, d)),
            }
        }
        best
    }
}

/// Squared Euclidean distance between two coordinate slices.
///
/// # Panics
/// Panics in debug builds if the slices differ in length.
#[inline]
pub fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    debug_assert_eq!(a.len(), b.len(), "dimension mismatch");
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let diff = x - y;
            diff * diff
        })
        .sum()
}
