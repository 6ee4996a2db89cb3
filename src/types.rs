//! Core types shared by the regressor, the surrogates and the search loop.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::dataset::Point;

/// A predictive distribution summarized by its mean and standard deviation.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Prediction {
    /// The predictive mean.
    pub mean: f64,
    /// The predictive standard deviation.
    pub std_dev: f64,
}

impl Prediction {
    /// The prediction of a model that has seen no data: neutral mean and
    /// unbounded uncertainty.
    pub const UNINFORMED: Self = Self {
        mean: 0.0,
        std_dev: f64::INFINITY,
    };

    /// Creates a prediction from a mean and a standard deviation.
    #[must_use]
    pub fn new(mean: f64, std_dev: f64) -> Self {
        Self { mean, std_dev }
    }
}

/// A point of the search space together with its position in it.
///
/// Surrogates that cache per-candidate information key it by `index`.
#[derive(Clone, Copy, Debug)]
pub struct Candidate<'a> {
    /// Position of the point in the search space.
    pub index: usize,
    /// The point itself.
    pub point: &'a Point,
}

impl<'a> Candidate<'a> {
    /// Pairs a point with its search-space index.
    #[must_use]
    pub fn new(index: usize, point: &'a Point) -> Self {
        Self { index, point }
    }
}
