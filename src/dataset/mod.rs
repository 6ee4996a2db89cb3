//! Labeled points and the ordered collections they live in.
//!
//! A [`Point`] is a scalar target plus a feature vector addressed by integer
//! keys. Dense points store every attribute `0..n`; sparse points store a
//! strictly increasing key array and treat every other attribute as zero.
//! All key-aligned computations (dot product, distances, kernels) walk two
//! points at once with [`Point::aligned`], a merge over their sorted keys that
//! substitutes zero for whichever side is missing.

mod io;

use core::cmp::Ordering;
use core::iter::{Enumerate, Peekable, Zip};
use core::ops::{Index, RangeBounds};
use core::slice;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

pub use io::TextFormat;

use crate::error::{Error, Result};

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
enum Features {
    Dense(Vec<f64>),
    Sparse { keys: Vec<usize>, values: Vec<f64> },
}

/// A feature vector with a scalar target.
///
/// Points own their values; constructors copy the input so later mutation of
/// the caller's buffers cannot leak into a dataset.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "RawPoint"))]
pub struct Point {
    target: f64,
    features: Features,
}

/// Unchecked wire form of a [`Point`]; sparse keys are validated on
/// conversion.
#[cfg(feature = "serde")]
#[derive(Deserialize)]
struct RawPoint {
    target: f64,
    features: Features,
}

#[cfg(feature = "serde")]
impl TryFrom<RawPoint> for Point {
    type Error = Error;

    fn try_from(raw: RawPoint) -> Result<Self> {
        match raw.features {
            Features::Dense(values) => Ok(Self::dense(raw.target, values)),
            Features::Sparse { keys, values } => Self::sparse(raw.target, keys, values),
        }
    }
}

impl Point {
    /// Creates a dense point whose keys are `0..values.len()`.
    #[must_use]
    pub fn dense(target: f64, values: impl Into<Vec<f64>>) -> Self {
        Self {
            target,
            features: Features::Dense(values.into()),
        }
    }

    /// Creates a sparse point from parallel key and value arrays.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LengthMismatch`] if the arrays differ in length and
    /// [`Error::UnsortedKeys`] if the keys are not strictly increasing.
    pub fn sparse(target: f64, keys: Vec<usize>, values: Vec<f64>) -> Result<Self> {
        if keys.len() != values.len() {
            return Err(Error::LengthMismatch {
                keys: keys.len(),
                values: values.len(),
            });
        }
        if keys.windows(2).any(|w| w[0] >= w[1]) {
            return Err(Error::UnsortedKeys);
        }
        Ok(Self {
            target,
            features: Features::Sparse { keys, values },
        })
    }

    /// Returns the target value.
    #[must_use]
    pub fn target(&self) -> f64 {
        self.target
    }

    /// Overwrites the target value.
    pub fn set_target(&mut self, target: f64) {
        self.target = target;
    }

    /// Returns `true` if the point stores an explicit key array.
    #[must_use]
    pub fn is_sparse(&self) -> bool {
        matches!(self.features, Features::Sparse { .. })
    }

    /// Number of stored entries (all attributes for dense points).
    #[must_use]
    pub fn num_entries(&self) -> usize {
        self.values().len()
    }

    /// The stored values in key order.
    #[must_use]
    pub fn values(&self) -> &[f64] {
        match &self.features {
            Features::Dense(values) | Features::Sparse { values, .. } => values,
        }
    }

    /// The value stored under `key`, or `0.0` if the key is absent.
    #[must_use]
    pub fn value(&self, key: usize) -> f64 {
        match &self.features {
            Features::Dense(values) => values.get(key).copied().unwrap_or(0.0),
            Features::Sparse { keys, values } => keys
                .binary_search(&key)
                .map_or(0.0, |position| values[position]),
        }
    }

    /// The largest stored key, or `None` for a point without entries.
    #[must_use]
    pub fn max_key(&self) -> Option<usize> {
        match &self.features {
            Features::Dense(values) => values.len().checked_sub(1),
            Features::Sparse { keys, .. } => keys.last().copied(),
        }
    }

    /// Iterates over `(key, value)` pairs in ascending key order.
    #[must_use]
    pub fn entries(&self) -> Entries<'_> {
        let inner = match &self.features {
            Features::Dense(values) => EntriesInner::Dense(values.iter().enumerate()),
            Features::Sparse { keys, values } => EntriesInner::Sparse(keys.iter().zip(values)),
        };
        Entries { inner }
    }

    /// Dense copy of the first `dims` attributes, keeping the target.
    #[must_use]
    pub fn truncated(&self, dims: usize) -> Self {
        Self::dense(self.target, (0..dims).map(|d| self.value(d)).collect::<Vec<_>>())
    }

    /// Merges the keys of two points, yielding `(key, self_value, other_value)`
    /// with zero substituted for a key missing on either side.
    #[must_use]
    pub fn aligned<'a>(&'a self, other: &'a Self) -> Aligned<'a> {
        Aligned {
            left: self.entries().peekable(),
            right: other.entries().peekable(),
        }
    }

    /// Inner product over the union of both key sets.
    #[must_use]
    pub fn dot(&self, other: &Self) -> f64 {
        self.aligned(other).map(|(_, a, b)| a * b).sum()
    }

    /// Squared Euclidean distance.
    #[must_use]
    pub fn squared_distance(&self, other: &Self) -> f64 {
        self.aligned(other).map(|(_, a, b)| (a - b).powi(2)).sum()
    }

    /// Euclidean distance.
    #[must_use]
    pub fn distance(&self, other: &Self) -> f64 {
        self.squared_distance(other).sqrt()
    }

    /// Euclidean distance over the keys inside `keys` only.
    ///
    /// `..m` compares the first `m` attributes, `m..` everything from `m` on.
    #[must_use]
    pub fn distance_within<R: RangeBounds<usize>>(&self, other: &Self, keys: R) -> f64 {
        self.aligned(other)
            .filter(|(key, _, _)| keys.contains(key))
            .map(|(_, a, b)| (a - b).powi(2))
            .sum::<f64>()
            .sqrt()
    }
}

/// Iterator over the `(key, value)` pairs of a [`Point`].
#[derive(Clone, Debug)]
pub struct Entries<'a> {
    inner: EntriesInner<'a>,
}

#[derive(Clone, Debug)]
enum EntriesInner<'a> {
    Dense(Enumerate<slice::Iter<'a, f64>>),
    Sparse(Zip<slice::Iter<'a, usize>, slice::Iter<'a, f64>>),
}

impl Iterator for Entries<'_> {
    type Item = (usize, f64);

    fn next(&mut self) -> Option<Self::Item> {
        match &mut self.inner {
            EntriesInner::Dense(iter) => iter.next().map(|(key, &value)| (key, value)),
            EntriesInner::Sparse(iter) => iter.next().map(|(&key, &value)| (key, value)),
        }
    }
}

/// Merge-style co-iteration over two points, see [`Point::aligned`].
#[derive(Clone, Debug)]
pub struct Aligned<'a> {
    left: Peekable<Entries<'a>>,
    right: Peekable<Entries<'a>>,
}

impl Iterator for Aligned<'_> {
    type Item = (usize, f64, f64);

    fn next(&mut self) -> Option<Self::Item> {
        match (self.left.peek().copied(), self.right.peek().copied()) {
            (None, None) => None,
            (Some((key, a)), None) => {
                self.left.next();
                Some((key, a, 0.0))
            }
            (None, Some((key, b))) => {
                self.right.next();
                Some((key, 0.0, b))
            }
            (Some((key_a, a)), Some((key_b, b))) => match key_a.cmp(&key_b) {
                Ordering::Less => {
                    self.left.next();
                    Some((key_a, a, 0.0))
                }
                Ordering::Greater => {
                    self.right.next();
                    Some((key_b, 0.0, b))
                }
                Ordering::Equal => {
                    self.left.next();
                    self.right.next();
                    Some((key_a, a, b))
                }
            },
        }
    }
}

/// An ordered, owned collection of points over a fixed attribute universe.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "RawDataset"))]
pub struct Dataset {
    num_values: usize,
    points: Vec<Point>,
}

/// Unchecked wire form of a [`Dataset`]; every point is range-checked on
/// conversion.
#[cfg(feature = "serde")]
#[derive(Deserialize)]
struct RawDataset {
    num_values: usize,
    points: Vec<Point>,
}

#[cfg(feature = "serde")]
impl TryFrom<RawDataset> for Dataset {
    type Error = Error;

    fn try_from(raw: RawDataset) -> Result<Self> {
        Self::with_points(raw.num_values, raw.points)
    }
}

impl Dataset {
    /// Creates an empty dataset whose points may use keys `0..num_values`.
    #[must_use]
    pub fn new(num_values: usize) -> Self {
        Self {
            num_values,
            points: Vec::new(),
        }
    }

    /// Creates a dataset and adds every point of `points`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeyOutOfRange`] if a point uses a key outside the
    /// declared universe.
    pub fn with_points(num_values: usize, points: impl IntoIterator<Item = Point>) -> Result<Self> {
        let mut dataset = Self::new(num_values);
        for point in points {
            dataset.add(point)?;
        }
        Ok(dataset)
    }

    /// The size of the key universe.
    #[must_use]
    pub fn num_values(&self) -> usize {
        self.num_values
    }

    /// Number of points.
    #[must_use]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Returns `true` if the dataset holds no points.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// The point at `index`, if any.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Point> {
        self.points.get(index)
    }

    /// The most recently added point.
    #[must_use]
    pub fn last(&self) -> Option<&Point> {
        self.points.last()
    }

    /// All points in order.
    #[must_use]
    pub fn points(&self) -> &[Point] {
        &self.points
    }

    /// Iterates over the points in order.
    pub fn iter(&self) -> slice::Iter<'_, Point> {
        self.points.iter()
    }

    /// Appends a point.
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeyOutOfRange`] if the point's largest key is not
    /// below [`num_values`](Self::num_values).
    pub fn add(&mut self, point: Point) -> Result<()> {
        self.check(&point)?;
        self.points.push(point);
        Ok(())
    }

    /// Appends copies of every point of `other`. Nothing is added if any
    /// point is out of range.
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeyOutOfRange`] if any point of `other` uses a key
    /// outside this dataset's universe.
    pub fn add_all(&mut self, other: &Self) -> Result<()> {
        for point in &other.points {
            self.check(point)?;
        }
        self.points.extend(other.points.iter().cloned());
        Ok(())
    }

    /// Removes and returns the point at `index`.
    pub fn remove(&mut self, index: usize) -> Option<Point> {
        (index < self.points.len()).then(|| self.points.remove(index))
    }

    /// Keeps only the points for which `keep` returns `true`.
    pub fn retain(&mut self, keep: impl FnMut(&Point) -> bool) {
        self.points.retain(keep);
    }

    /// All targets in order.
    #[must_use]
    pub fn targets(&self) -> Vec<f64> {
        self.points.iter().map(Point::target).collect()
    }

    /// Overwrites every target in place, e.g. with predicted values.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TargetCountMismatch`] if `targets` does not have one
    /// entry per point.
    pub fn set_targets(&mut self, targets: &[f64]) -> Result<()> {
        if targets.len() != self.points.len() {
            return Err(Error::TargetCountMismatch {
                expected: self.points.len(),
                got: targets.len(),
            });
        }
        for (point, &target) in self.points.iter_mut().zip(targets) {
            point.set_target(target);
        }
        Ok(())
    }

    /// The smallest target, or `None` for an empty dataset.
    #[must_use]
    pub fn min_target(&self) -> Option<f64> {
        self.points.iter().map(Point::target).reduce(f64::min)
    }

    /// The largest target, or `None` for an empty dataset.
    #[must_use]
    pub fn max_target(&self) -> Option<f64> {
        self.points.iter().map(Point::target).reduce(f64::max)
    }

    /// 1-based rank of `target`: one plus the number of points whose target
    /// is strictly greater.
    #[must_use]
    pub fn rank_of(&self, target: f64) -> usize {
        1 + self.points.iter().filter(|p| p.target() > target).count()
    }

    /// Shuffles the point order.
    pub fn shuffle(&mut self, rng: &mut fastrand::Rng) {
        rng.shuffle(&mut self.points);
    }

    fn check(&self, point: &Point) -> Result<()> {
        match point.max_key() {
            Some(key) if key >= self.num_values => Err(Error::KeyOutOfRange {
                key,
                num_values: self.num_values,
            }),
            _ => Ok(()),
        }
    }
}

impl Index<usize> for Dataset {
    type Output = Point;

    fn index(&self, index: usize) -> &Point {
        &self.points[index]
    }
}

impl<'a> IntoIterator for &'a Dataset {
    type Item = &'a Point;
    type IntoIter = slice::Iter<'a, Point>;

    fn into_iter(self) -> Self::IntoIter {
        self.points.iter()
    }
}
