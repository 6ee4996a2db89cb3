//! Surrogate models queried by the acquisition function.
//!
//! A [`Surrogate`] is retrained on the full observation [`History`] after
//! every SMBO step and answers predictive distributions for candidates of the
//! search space. Two implementations ship with the crate:
//!
//! | Surrogate | Model |
//! |-----------|-------|
//! | [`GpSurrogate`] | A single Gaussian Process on the observations |
//! | [`TwoStageSurrogate`](two_stage::TwoStageSurrogate) | A local GP blended with per-task GPs from related tasks |

pub mod two_stage;

use crate::dataset::Dataset;
use crate::error::Result;
use crate::gp::GaussianProcess;
use crate::smbo::History;
use crate::types::{Candidate, Prediction};

pub use two_stage::{Similarity, TaskEnsemble, TwoStageSurrogate};

/// A model of the objective that can be refit and queried.
pub trait Surrogate {
    /// Refits the model on every observation made so far.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying regression fails.
    fn train(&mut self, history: &History) -> Result<()>;

    /// Predictive mean and standard deviation for a candidate.
    ///
    /// # Errors
    ///
    /// Returns an error if the candidate does not belong to the search space
    /// the surrogate was built for or cannot be evaluated by its model.
    fn predict(&self, candidate: Candidate<'_>) -> Result<Prediction>;
}

impl<S: Surrogate + ?Sized> Surrogate for Box<S> {
    fn train(&mut self, history: &History) -> Result<()> {
        (**self).train(history)
    }

    fn predict(&self, candidate: Candidate<'_>) -> Result<Prediction> {
        (**self).predict(candidate)
    }
}

/// How a [`GpSurrogate`] absorbs new observations.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Refit {
    /// Retrain from scratch on every call.
    #[default]
    Full,
    /// Extend the existing fit with [`GaussianProcess::online_update`] when
    /// the history grew by exactly one point; retrain otherwise.
    Incremental,
}

/// A plain Gaussian Process on the observed points.
///
/// ```
/// use transfer_smbo::dataset::{Dataset, Point};
/// use transfer_smbo::smbo::Smbo;
/// use transfer_smbo::surrogate::GpSurrogate;
///
/// let space = Dataset::with_points(
///     1,
///     (0..5).map(|i| Point::dense(f64::from(i) * 0.2, vec![f64::from(i)])),
/// )
/// .unwrap();
/// let mut smbo = Smbo::with_seed(space, GpSurrogate::default(), 7);
/// smbo.iterate().unwrap();
/// assert_eq!(smbo.history().len(), 1);
/// ```
#[derive(Clone, Debug, Default)]
pub struct GpSurrogate {
    gp: GaussianProcess,
    refit: Refit,
}

impl GpSurrogate {
    /// Wraps a configured regressor; its kernel, learning flag and epochs are
    /// used for every refit.
    #[must_use]
    pub fn new(gp: GaussianProcess) -> Self {
        Self {
            gp,
            refit: Refit::Full,
        }
    }

    /// Sets the refit strategy.
    #[must_use]
    pub fn with_refit(mut self, refit: Refit) -> Self {
        self.refit = refit;
        self
    }

    /// The wrapped regressor.
    #[must_use]
    pub fn gp(&self) -> &GaussianProcess {
        &self.gp
    }
}

impl Surrogate for GpSurrogate {
    fn train(&mut self, history: &History) -> Result<()> {
        let seen = self.gp.training_data().map(Dataset::len);
        match (self.refit, seen, history.points().last()) {
            (Refit::Incremental, Some(seen), Some(last)) if seen + 1 == history.len() => {
                self.gp.online_update(last)
            }
            _ => self.gp.train(history.points()),
        }
    }

    fn predict(&self, candidate: Candidate<'_>) -> Result<Prediction> {
        self.gp.predict_with_uncertainty(candidate.point)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Point;
    use crate::kernel::{Kernel, SquaredExponential};

    fn history(n: usize) -> History {
        let mut history = History::new(1);
        for i in 0..n {
            let x = i as f64;
            history
                .push(i, Point::dense((0.7 * x).cos(), vec![x]))
                .unwrap();
        }
        history
    }

    fn gp() -> GaussianProcess {
        GaussianProcess::new(Kernel::from(SquaredExponential::new().with_noise(0.2)))
    }

    #[test]
    fn untrained_surrogate_is_uninformed() {
        let surrogate = GpSurrogate::default();
        let point = Point::dense(0.0, vec![1.0]);
        let p = surrogate.predict(Candidate::new(0, &point)).unwrap();
        assert_eq!(p, Prediction::UNINFORMED);
    }

    #[test]
    fn incremental_refit_matches_full_refit() {
        let mut full = GpSurrogate::new(gp());
        let mut incremental = GpSurrogate::new(gp()).with_refit(Refit::Incremental);
        for n in 1..=5 {
            let h = history(n);
            full.train(&h).unwrap();
            incremental.train(&h).unwrap();
        }
        assert_eq!(incremental.gp().training_data().unwrap().len(), 5);

        let query = Point::dense(0.0, vec![2.5]);
        let a = full.predict(Candidate::new(0, &query)).unwrap();
        let b = incremental.predict(Candidate::new(0, &query)).unwrap();
        assert!((a.mean - b.mean).abs() < 1e-6);
        assert!((a.std_dev - b.std_dev).abs() < 1e-6);
    }

    #[test]
    fn boxed_surrogate_delegates() {
        let mut boxed: Box<dyn Surrogate> = Box::new(GpSurrogate::new(gp()));
        boxed.train(&history(3)).unwrap();
        let point = Point::dense(0.0, vec![1.0]);
        let p = boxed.predict(Candidate::new(0, &point)).unwrap();
        assert!(p.std_dev < 1.0);
    }
}
