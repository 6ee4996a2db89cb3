//! The sequential model-based optimization loop.
//!
//! An [`Smbo`] owns a finite search space whose targets are already known
//! (a lookup table of evaluated configurations) and reveals them one at a
//! time: every [`iterate`](Smbo::iterate) asks the acquisition function for a
//! candidate, removes it from the pool, records it in the [`History`] and
//! refits the surrogate. The caller decides how many steps to take.
//!
//! ```
//! use transfer_smbo::dataset::{Dataset, Point};
//! use transfer_smbo::smbo::Smbo;
//! use transfer_smbo::surrogate::GpSurrogate;
//!
//! let targets = [0.1, 0.9, 0.3, 0.7, 0.2, 1.0, 0.4, 0.6];
//! let space = Dataset::with_points(
//!     1,
//!     targets
//!         .iter()
//!         .enumerate()
//!         .map(|(i, &t)| Point::dense(t, vec![i as f64])),
//! )
//! .unwrap();
//!
//! let mut smbo = Smbo::with_seed(space, GpSurrogate::default(), 42);
//! while smbo.iterate().unwrap().is_some() {}
//! assert_eq!(smbo.best_accuracy(), Some(1.0));
//! assert_eq!(smbo.best_rank(), Some(1));
//! ```

use crate::acquisition::{Acquisition, ExpectedImprovement};
use crate::dataset::{Dataset, Point};
use crate::error::{Error, Result};
use crate::surrogate::Surrogate;
use crate::types::Candidate;

/// Points observed so far, each with its index in the search space.
#[derive(Clone, Debug, Default)]
pub struct History {
    points: Dataset,
    indices: Vec<usize>,
}

impl History {
    /// Creates an empty history over a key universe of `num_values`.
    #[must_use]
    pub fn new(num_values: usize) -> Self {
        Self {
            points: Dataset::new(num_values),
            indices: Vec::new(),
        }
    }

    /// Records the observation of search-space entry `index`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeyOutOfRange`] if the point does not fit the key
    /// universe.
    pub fn push(&mut self, index: usize, point: Point) -> Result<()> {
        self.points.add(point)?;
        self.indices.push(index);
        Ok(())
    }

    /// Observed points in observation order.
    #[must_use]
    pub fn points(&self) -> &Dataset {
        &self.points
    }

    /// Search-space indices in observation order.
    #[must_use]
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// The largest observed target.
    #[must_use]
    pub fn best_target(&self) -> Option<f64> {
        self.points.max_target()
    }

    /// Observations as candidates, in observation order.
    pub fn candidates(&self) -> impl Iterator<Item = Candidate<'_>> + '_ {
        self.indices
            .iter()
            .zip(self.points.iter())
            .map(|(&index, point)| Candidate::new(index, point))
    }
}

/// Sequential model-based optimization over a finite search space.
pub struct Smbo<S, A = ExpectedImprovement> {
    space: Dataset,
    history: History,
    candidates: Vec<usize>,
    surrogate: S,
    acquisition: A,
    best: Option<usize>,
    rng: fastrand::Rng,
}

impl<S: Surrogate> Smbo<S> {
    /// Expected-improvement search with a randomly seeded generator.
    #[must_use]
    pub fn new(space: Dataset, surrogate: S) -> Self {
        Self::with_acquisition(space, surrogate, ExpectedImprovement::default(), None)
    }

    /// Expected-improvement search whose tie-breaks follow `seed`.
    #[must_use]
    pub fn with_seed(space: Dataset, surrogate: S, seed: u64) -> Self {
        Self::with_acquisition(space, surrogate, ExpectedImprovement::default(), Some(seed))
    }
}

impl<S: Surrogate, A: Acquisition> Smbo<S, A> {
    /// Search with a custom acquisition function. Every point of `space`
    /// starts in the candidate pool.
    #[must_use]
    pub fn with_acquisition(space: Dataset, surrogate: S, acquisition: A, seed: Option<u64>) -> Self {
        Self {
            history: History::new(space.num_values()),
            candidates: (0..space.len()).collect(),
            space,
            surrogate,
            acquisition,
            best: None,
            rng: seed.map_or_else(fastrand::Rng::new, fastrand::Rng::with_seed),
        }
    }

    /// Selects, reveals and records one candidate, then refits the surrogate.
    ///
    /// Returns the search-space index of the selected point, or `None` once
    /// the pool is exhausted.
    ///
    /// # Errors
    ///
    /// Propagates acquisition and surrogate failures; the search should be
    /// abandoned after an error.
    pub fn iterate(&mut self) -> Result<Option<usize>> {
        let Some(position) = self.acquisition.select(
            &self.history,
            &self.surrogate,
            &self.space,
            &self.candidates,
            &mut self.rng,
        )?
        else {
            return Ok(None);
        };
        if position >= self.candidates.len() {
            return Err(Error::Internal("acquisition selected outside the pool"));
        }
        let index = self.candidates.remove(position);
        let point = self.space.get(index).ok_or(Error::UnknownCandidate(index))?;

        if self
            .best
            .is_none_or(|best| self.space[best].target() < point.target())
        {
            self.best = Some(index);
        }
        trace_debug!(index, target = point.target(), "candidate evaluated");

        self.history.push(index, point.clone())?;
        self.surrogate.train(&self.history)?;
        Ok(Some(index))
    }

    /// Target of the best point observed so far.
    #[must_use]
    pub fn best_accuracy(&self) -> Option<f64> {
        self.best_point().map(Point::target)
    }

    /// 1-based rank of the best observed point within the whole search
    /// space: one plus the number of points with a strictly greater target.
    #[must_use]
    pub fn best_rank(&self) -> Option<usize> {
        self.best_accuracy().map(|target| self.space.rank_of(target))
    }

    /// The best point observed so far.
    #[must_use]
    pub fn best_point(&self) -> Option<&Point> {
        self.best.map(|index| &self.space[index])
    }

    /// Search-space index of the best point observed so far.
    #[must_use]
    pub fn best_index(&self) -> Option<usize> {
        self.best
    }

    #[must_use]
    pub fn history(&self) -> &History {
        &self.history
    }

    /// Indices of the points not selected yet.
    #[must_use]
    pub fn candidates(&self) -> &[usize] {
        &self.candidates
    }

    #[must_use]
    pub fn space(&self) -> &Dataset {
        &self.space
    }

    #[must_use]
    pub fn surrogate(&self) -> &S {
        &self.surrogate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surrogate::GpSurrogate;

    const TARGETS: [f64; 8] = [0.1, 0.9, 0.3, 0.7, 0.2, 1.0, 0.4, 0.6];

    fn space() -> Dataset {
        Dataset::with_points(
            1,
            TARGETS
                .iter()
                .enumerate()
                .map(|(i, &t)| Point::dense(t, vec![i as f64])),
        )
        .unwrap()
    }

    #[test]
    fn first_step_shrinks_pool_and_sets_best() {
        let mut smbo = Smbo::with_seed(space(), GpSurrogate::default(), 11);
        let selected = smbo.iterate().unwrap().unwrap();

        assert_eq!(smbo.candidates().len(), 7);
        assert!(!smbo.candidates().contains(&selected));
        assert_eq!(smbo.history().indices(), &[selected]);
        assert_eq!(smbo.best_accuracy(), Some(TARGETS[selected]));
        assert_eq!(smbo.best_rank(), Some(space().rank_of(TARGETS[selected])));
        assert_eq!(smbo.best_accuracy() == Some(1.0), selected == 5);
    }

    #[test]
    fn first_pick_covers_the_tie() {
        // An uninformed surrogate ties every candidate, so different seeds
        // must eventually pick different points.
        let picks: std::collections::HashSet<usize> = (0..64)
            .map(|seed| {
                let mut smbo = Smbo::with_seed(space(), GpSurrogate::default(), seed);
                smbo.iterate().unwrap().unwrap()
            })
            .collect();
        assert!(picks.len() > 1);
    }

    #[test]
    fn same_seed_same_search() {
        let run = |seed| {
            let mut smbo = Smbo::with_seed(space(), GpSurrogate::default(), seed);
            (0..5).map(|_| smbo.iterate().unwrap().unwrap()).collect::<Vec<_>>()
        };
        assert_eq!(run(5), run(5));
    }

    #[test]
    fn exhausted_pool_returns_none() {
        let mut smbo = Smbo::with_seed(space(), GpSurrogate::default(), 3);
        let mut seen = Vec::new();
        while let Some(index) = smbo.iterate().unwrap() {
            seen.push(index);
        }
        seen.sort_unstable();
        assert_eq!(seen, (0..8).collect::<Vec<_>>());
        assert!(smbo.candidates().is_empty());
        assert_eq!(smbo.best_accuracy(), Some(1.0));
        assert_eq!(smbo.best_rank(), Some(1));
        assert_eq!(smbo.best_index(), Some(5));
        assert_eq!(smbo.iterate().unwrap(), None);
    }

    #[test]
    fn best_only_moves_on_strict_improvement() {
        let space = Dataset::with_points(
            1,
            [0.5, 0.5, 0.5].iter().enumerate().map(|(i, &t)| Point::dense(t, vec![i as f64])),
        )
        .unwrap();
        let mut smbo = Smbo::with_seed(space, GpSurrogate::default(), 0);
        let first = smbo.iterate().unwrap().unwrap();
        smbo.iterate().unwrap();
        smbo.iterate().unwrap();
        assert_eq!(smbo.best_index(), Some(first));
        assert_eq!(smbo.best_rank(), Some(1));
    }

    #[test]
    fn history_candidates_pair_indices_with_points() {
        let mut history = History::new(1);
        history.push(4, Point::dense(0.2, vec![4.0])).unwrap();
        history.push(1, Point::dense(0.9, vec![1.0])).unwrap();
        let pairs: Vec<(usize, f64)> = history
            .candidates()
            .map(|c| (c.index, c.point.target()))
            .collect();
        assert_eq!(pairs, vec![(4, 0.2), (1, 0.9)]);
        assert_eq!(history.best_target(), Some(0.9));
        assert!(history.push(0, Point::dense(0.0, vec![1.0, 2.0])).is_err());
        assert_eq!(history.len(), 2);
    }
}
