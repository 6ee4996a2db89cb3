//! Two-stage transfer surrogate.
//!
//! Stage one trains, once, an ARD Gaussian Process per related task
//! ([`TaskEnsemble`]) and caches its prediction for every candidate of the
//! target search space. Stage two fits a local GP to the target task's own
//! observations and blends it with the cached predictions:
//!
//! ```text
//! μ(x) = (μ_local(x) + Σ_i w_i ĉ_i(x)) / (0.75 + Σ_i w_i)
//! ```
//!
//! where `ĉ_i` is task `i`'s cached prediction and `w_i` its similarity to
//! the target task, both Epanechnikov-weighted with `0.75 (1 - t²)` for
//! `t < 1` and `0` otherwise:
//!
//! | [`Similarity`] | `t` |
//! |----------------|-----|
//! | `Correlation` | fraction of observed pairs ordered differently by `ĉ_i` and the true targets, over the bandwidth |
//! | `Metafeatures` | distance between the first points of both tasks over the non-hyperparameter keys, over the bandwidth |
//!
//! The standard deviation is the local GP's; an unbounded one (no
//! observations yet) is reported as 1000.
//!
//! # Examples
//!
//! ```
//! use transfer_smbo::dataset::{Dataset, Point};
//! use transfer_smbo::smbo::Smbo;
//! use transfer_smbo::surrogate::{Similarity, TwoStageSurrogate};
//!
//! let grid = |shift: f64| {
//!     Dataset::with_points(
//!         1,
//!         (0..6).map(|i| {
//!             let x = f64::from(i) / 5.0;
//!             Point::dense(-(x - shift).powi(2), vec![x])
//!         }),
//!     )
//!     .unwrap()
//! };
//! let tasks = vec![grid(0.3), grid(0.5)];
//! let target = grid(0.4);
//!
//! let surrogate = TwoStageSurrogate::builder()
//!     .hyperparameter_dims(1)
//!     .similarity(Similarity::Correlation)
//!     .ensemble_epochs(5)
//!     .epochs(5)
//!     .build(&tasks, &target)
//!     .unwrap();
//!
//! let mut smbo = Smbo::with_seed(target, surrogate, 1);
//! for _ in 0..3 {
//!     smbo.iterate().unwrap();
//! }
//! assert!(smbo.best_rank().unwrap() <= 6);
//! ```

use std::sync::Arc;

use crate::dataset::{Dataset, Point};
use crate::error::{Error, Result};
use crate::gp::GaussianProcess;
use crate::kernel::Kernel;
use crate::smbo::History;
use crate::types::{Candidate, Prediction};

use super::Surrogate;

/// Similarity of a task with itself; also the local model's blending weight.
pub const SELF_SIMILARITY: f64 = 0.75;

/// Standard deviation reported while the local model is uninformed.
const UNBOUNDED_STD_DEV: f64 = 1000.0;

/// Default bandwidth of the similarity kernel.
pub const DEFAULT_BANDWIDTH: f64 = 0.1;
/// Default number of leading hyperparameter dimensions.
pub const DEFAULT_HYPERPARAMETER_DIMS: usize = 100;
/// Default kernel-learning epochs for every per-task model.
pub const DEFAULT_ENSEMBLE_EPOCHS: usize = 100;
/// Default kernel-learning epochs of the first local fit.
pub const DEFAULT_EPOCHS: usize = 100;
/// Default reduction of the local epoch budget after every fit.
pub const DEFAULT_EPOCH_DECAY: usize = 5;

/// How related tasks are weighted against the target task.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Similarity {
    /// Kendall-tau style rank agreement between a task model's cached
    /// predictions and the observed targets.
    #[default]
    Correlation,
    /// Euclidean distance between task metafeatures.
    Metafeatures,
}

// ---------------------------------------------------------------------------
// Task ensemble
// ---------------------------------------------------------------------------

/// Frozen per-task models with their predictions for one target search space.
///
/// Building the ensemble is the expensive part of a two-stage surrogate; wrap
/// it in an [`Arc`] and hand it to
/// [`build_with_ensemble`](TwoStageSurrogateBuilder::build_with_ensemble) to
/// share it between repeated searches on the same target.
#[derive(Clone, Debug)]
pub struct TaskEnsemble {
    hp_dims: usize,
    models: Vec<GaussianProcess>,
    /// `cache[task][candidate]`.
    cache: Vec<Vec<f64>>,
    /// First point of every task, untruncated.
    metafeatures: Vec<Point>,
    /// First point of the target search space, untruncated.
    target_metafeatures: Option<Point>,
    num_candidates: usize,
}

impl TaskEnsemble {
    /// Trains one model per task and caches its predictions for `target`.
    ///
    /// Every task's targets are min-max scaled to `[0, 1]` (a constant task
    /// maps to all zeros) and its points are cut to the first `hp_dims`
    /// attributes before fitting an ARD GP with kernel learning for `epochs`
    /// epochs.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyDataset`] if a task has no points and propagates
    /// any regression failure.
    pub fn build(tasks: &[Dataset], target: &Dataset, hp_dims: usize, epochs: usize) -> Result<Self> {
        let truncated_target = truncate(target, hp_dims)?;
        let mut models = Vec::with_capacity(tasks.len());
        let mut cache = Vec::with_capacity(tasks.len());
        let mut metafeatures = Vec::with_capacity(tasks.len());

        for task in tasks {
            let (Some(first), Some(min), Some(max)) =
                (task.get(0), task.min_target(), task.max_target())
            else {
                return Err(Error::EmptyDataset);
            };
            let range = if max - min == 0.0 { 1.0 } else { max - min };

            let mut scaled = truncate(task, hp_dims)?;
            let targets: Vec<f64> = scaled.targets().iter().map(|t| (t - min) / range).collect();
            scaled.set_targets(&targets)?;

            let mut gp = GaussianProcess::new(Kernel::ard(hp_dims))
                .with_kernel_learning(true)
                .with_epochs(epochs);
            gp.train(&scaled)?;
            trace_info!(task = models.len(), points = task.len(), "task model trained");

            cache.push(gp.predict_dataset(&truncated_target)?);
            models.push(gp);
            metafeatures.push(first.clone());
        }

        Ok(Self {
            hp_dims,
            models,
            cache,
            metafeatures,
            target_metafeatures: target.get(0).cloned(),
            num_candidates: target.len(),
        })
    }

    /// Number of related tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.models.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Number of leading attributes the models see.
    #[must_use]
    pub fn hyperparameter_dims(&self) -> usize {
        self.hp_dims
    }

    /// Size of the target search space the predictions were cached for.
    #[must_use]
    pub fn num_candidates(&self) -> usize {
        self.num_candidates
    }

    /// The trained per-task models.
    #[must_use]
    pub fn models(&self) -> &[GaussianProcess] {
        &self.models
    }

    /// Task `task`'s cached prediction for candidate `index`.
    #[must_use]
    pub fn cached(&self, task: usize, index: usize) -> Option<f64> {
        self.cache.get(task)?.get(index).copied()
    }

    fn correlation(&self, task: usize, history: &History, bandwidth: f64) -> Result<f64> {
        if history.len() < 2 {
            return Ok(SELF_SIMILARITY);
        }
        let cache = &self.cache[task];
        let observed = history
            .candidates()
            .map(|c| {
                cache
                    .get(c.index)
                    .map(|&predicted| (c.point.target(), predicted))
                    .ok_or(Error::UnknownCandidate(c.index))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut discordant = 0_usize;
        let mut total = 0_usize;
        for (i, &(y_i, c_i)) in observed.iter().enumerate() {
            for &(y_j, c_j) in &observed[i + 1..] {
                if (y_i < y_j) != (c_i < c_j) {
                    discordant += 1;
                }
                total += 1;
            }
        }
        #[allow(clippy::cast_precision_loss)]
        let t = discordant as f64 / total as f64 / bandwidth;
        Ok(epanechnikov(t))
    }

    fn metafeature_similarity(&self, task: usize, bandwidth: f64) -> f64 {
        self.target_metafeatures.as_ref().map_or(0.0, |target| {
            let distance = target.distance_within(&self.metafeatures[task], self.hp_dims..);
            epanechnikov(distance / bandwidth)
        })
    }
}

// ---------------------------------------------------------------------------
// Surrogate
// ---------------------------------------------------------------------------

/// Local GP blended with a similarity-weighted [`TaskEnsemble`].
#[derive(Clone, Debug)]
pub struct TwoStageSurrogate {
    ensemble: Arc<TaskEnsemble>,
    similarity: Similarity,
    bandwidth: f64,
    local: GaussianProcess,
    epochs: usize,
    epoch_decay: usize,
    weights: Vec<f64>,
}

impl TwoStageSurrogate {
    /// Returns a builder with the default configuration.
    #[must_use]
    pub fn builder() -> TwoStageSurrogateBuilder {
        TwoStageSurrogateBuilder::new()
    }

    /// The shared task ensemble.
    #[must_use]
    pub fn ensemble(&self) -> &Arc<TaskEnsemble> {
        &self.ensemble
    }

    /// Current similarity of every related task, in task order.
    #[must_use]
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// Kernel-learning epochs of the next local fit.
    #[must_use]
    pub fn epochs(&self) -> usize {
        self.epochs
    }

    /// The local model on the target task's observations.
    #[must_use]
    pub fn local_model(&self) -> &GaussianProcess {
        &self.local
    }
}

impl Surrogate for TwoStageSurrogate {
    fn train(&mut self, history: &History) -> Result<()> {
        let hp_dims = self.ensemble.hp_dims;
        let data = truncate(history.points(), hp_dims)?;
        let mut local = GaussianProcess::new(Kernel::ard(hp_dims))
            .with_kernel_learning(true)
            .with_epochs(self.epochs);
        self.epochs = self.epochs.saturating_sub(self.epoch_decay);
        local.train(&data)?;
        self.local = local;

        self.weights = (0..self.ensemble.len())
            .map(|task| match self.similarity {
                Similarity::Correlation => self.ensemble.correlation(task, history, self.bandwidth),
                Similarity::Metafeatures => {
                    Ok(self.ensemble.metafeature_similarity(task, self.bandwidth))
                }
            })
            .collect::<Result<_>>()?;
        trace_debug!(weights = ?self.weights, "task similarities");
        Ok(())
    }

    fn predict(&self, candidate: Candidate<'_>) -> Result<Prediction> {
        if candidate.index >= self.ensemble.num_candidates {
            return Err(Error::UnknownCandidate(candidate.index));
        }
        let local = self
            .local
            .predict_with_uncertainty(&candidate.point.truncated(self.ensemble.hp_dims))?;

        let mut numerator = local.mean;
        let mut denominator = SELF_SIMILARITY;
        for (cache, &weight) in self.ensemble.cache.iter().zip(&self.weights) {
            numerator += weight * cache[candidate.index];
            denominator += weight;
        }

        let std_dev = if local.std_dev.is_infinite() {
            UNBOUNDED_STD_DEV
        } else {
            local.std_dev
        };
        Ok(Prediction::new(numerator / denominator, std_dev))
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for [`TwoStageSurrogate`].
///
/// | Option | Default |
/// |--------|---------|
/// | `bandwidth` | 0.1 |
/// | `hyperparameter_dims` | 100 |
/// | `similarity` | [`Similarity::Correlation`] |
/// | `ensemble_epochs` | 100 |
/// | `epochs` | 100 |
/// | `epoch_decay` | 5 |
#[derive(Clone, Debug)]
pub struct TwoStageSurrogateBuilder {
    bandwidth: f64,
    hp_dims: usize,
    similarity: Similarity,
    ensemble_epochs: usize,
    epochs: usize,
    epoch_decay: usize,
}

impl TwoStageSurrogateBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            bandwidth: DEFAULT_BANDWIDTH,
            hp_dims: DEFAULT_HYPERPARAMETER_DIMS,
            similarity: Similarity::default(),
            ensemble_epochs: DEFAULT_ENSEMBLE_EPOCHS,
            epochs: DEFAULT_EPOCHS,
            epoch_decay: DEFAULT_EPOCH_DECAY,
        }
    }

    /// Bandwidth of the Epanechnikov similarity kernel; must be positive.
    #[must_use]
    pub fn bandwidth(mut self, bandwidth: f64) -> Self {
        self.bandwidth = bandwidth;
        self
    }

    /// Number of leading attributes that encode hyperparameters. Keys at or
    /// above it are metafeatures.
    #[must_use]
    pub fn hyperparameter_dims(mut self, dims: usize) -> Self {
        self.hp_dims = dims;
        self
    }

    #[must_use]
    pub fn similarity(mut self, similarity: Similarity) -> Self {
        self.similarity = similarity;
        self
    }

    /// Kernel-learning epochs for every per-task model.
    #[must_use]
    pub fn ensemble_epochs(mut self, epochs: usize) -> Self {
        self.ensemble_epochs = epochs;
        self
    }

    /// Kernel-learning epochs of the first local fit.
    #[must_use]
    pub fn epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs;
        self
    }

    /// Reduction of the local epoch budget after every fit, floored at zero.
    #[must_use]
    pub fn epoch_decay(mut self, decay: usize) -> Self {
        self.epoch_decay = decay;
        self
    }

    /// Trains a fresh [`TaskEnsemble`] on `tasks` for the search space
    /// `target` and builds the surrogate around it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidBandwidth`] for a non-positive bandwidth and
    /// any error of [`TaskEnsemble::build`].
    pub fn build(self, tasks: &[Dataset], target: &Dataset) -> Result<TwoStageSurrogate> {
        self.check_bandwidth()?;
        let ensemble = TaskEnsemble::build(tasks, target, self.hp_dims, self.ensemble_epochs)?;
        self.build_with_ensemble(Arc::new(ensemble))
    }

    /// Builds the surrogate around an existing ensemble. The ensemble's
    /// hyperparameter dimensions take precedence over the builder's.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidBandwidth`] for a non-positive bandwidth.
    pub fn build_with_ensemble(self, ensemble: Arc<TaskEnsemble>) -> Result<TwoStageSurrogate> {
        self.check_bandwidth()?;
        let weights = vec![SELF_SIMILARITY; ensemble.len()];
        Ok(TwoStageSurrogate {
            local: GaussianProcess::new(Kernel::ard(ensemble.hp_dims)),
            ensemble,
            similarity: self.similarity,
            bandwidth: self.bandwidth,
            epochs: self.epochs,
            epoch_decay: self.epoch_decay,
            weights,
        })
    }

    fn check_bandwidth(&self) -> Result<()> {
        if self.bandwidth > 0.0 && self.bandwidth.is_finite() {
            Ok(())
        } else {
            Err(Error::InvalidBandwidth(self.bandwidth))
        }
    }
}

impl Default for TwoStageSurrogateBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

fn epanechnikov(t: f64) -> f64 {
    if t < 1.0 {
        SELF_SIMILARITY * (1.0 - t * t)
    } else {
        0.0
    }
}

/// Dense copies of every point cut to the first `dims` attributes.
fn truncate(data: &Dataset, dims: usize) -> Result<Dataset> {
    Dataset::with_points(dims, data.iter().map(|point| point.truncated(dims)))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Points `(x, metafeature)` with targets `f(x)`.
    fn task(f: impl Fn(f64) -> f64, metafeature: f64) -> Dataset {
        Dataset::with_points(
            2,
            (0..6).map(|i| {
                let x = f64::from(i) / 5.0;
                Point::dense(f(x), vec![x, metafeature])
            }),
        )
        .unwrap()
    }

    fn ensemble(tasks: &[Dataset], target: &Dataset) -> Arc<TaskEnsemble> {
        Arc::new(TaskEnsemble::build(tasks, target, 1, 5).unwrap())
    }

    fn observe(target: &Dataset, indices: &[usize]) -> History {
        let mut history = History::new(target.num_values());
        for &i in indices {
            history.push(i, target[i].clone()).unwrap();
        }
        history
    }

    #[test]
    fn correlation_is_self_similarity_below_two_observations() {
        let target = task(|x| x, 0.0);
        let tasks = vec![task(|x| 1.0 - x, 0.0), task(|x| x * x, 0.0)];
        let ensemble = ensemble(&tasks, &target);
        for indices in [&[][..], &[3][..]] {
            let history = observe(&target, indices);
            for t in 0..ensemble.len() {
                assert_eq!(ensemble.correlation(t, &history, 0.1).unwrap(), 0.75);
            }
        }
    }

    #[test]
    fn correlation_counts_discordant_pairs() {
        let target = task(|x| x, 0.0);
        let ensemble = TaskEnsemble {
            hp_dims: 1,
            models: Vec::new(),
            cache: vec![
                vec![0.0, 0.1, 0.2, 0.3, 0.4, 0.5],
                vec![0.5, 0.4, 0.3, 0.2, 0.1, 0.0],
                vec![0.0, 0.1, 0.2, 0.3, 0.5, 0.4],
            ],
            metafeatures: Vec::new(),
            target_metafeatures: None,
            num_candidates: 6,
        };
        let history = observe(&target, &[0, 2, 4, 5]);

        // Same order everywhere.
        assert_eq!(ensemble.correlation(0, &history, 1.0).unwrap(), 0.75);
        // Every pair reversed.
        assert_eq!(ensemble.correlation(1, &history, 1.0).unwrap(), 0.0);
        // One of six pairs reversed.
        let t: f64 = 1.0 / 6.0 / 0.5;
        let expected = 0.75 * (1.0 - t * t);
        assert!((ensemble.correlation(2, &history, 0.5).unwrap() - expected).abs() < 1e-12);
        // Beyond the bandwidth.
        assert_eq!(ensemble.correlation(2, &history, 0.1).unwrap(), 0.0);
    }

    #[test]
    fn metafeature_similarity_uses_keys_beyond_hyperparameters() {
        let target = task(|x| x, 0.0);
        let tasks = vec![task(|x| x, 0.05), task(|x| x, 0.5)];
        let ensemble = ensemble(&tasks, &target);

        let t: f64 = 0.05 / 0.1;
        assert!((ensemble.metafeature_similarity(0, 0.1) - 0.75 * (1.0 - t * t)).abs() < 1e-12);
        assert_eq!(ensemble.metafeature_similarity(1, 0.1), 0.0);
    }

    #[test]
    fn constant_task_is_scaled_to_zero() {
        let target = task(|x| x, 0.0);
        let tasks = vec![task(|_| 3.0, 0.0)];
        let ensemble = ensemble(&tasks, &target);
        let data = ensemble.models()[0].training_data().unwrap();
        assert!(data.targets().iter().all(|&t| t == 0.0));
        for i in 0..target.len() {
            assert!(ensemble.cached(0, i).unwrap().abs() < 1e-6);
        }
    }

    #[test]
    fn untrained_prediction_blends_cache_with_sentinel_std_dev() {
        let target = task(|x| x, 0.0);
        let tasks = vec![task(|x| x, 0.0), task(|x| 1.0 - x, 0.0)];
        let surrogate = TwoStageSurrogate::builder()
            .hyperparameter_dims(1)
            .build_with_ensemble(ensemble(&tasks, &target))
            .unwrap();

        let candidate = Candidate::new(2, &target[2]);
        let p = surrogate.predict(candidate).unwrap();
        let cached: f64 = (0..2).map(|t| surrogate.ensemble().cached(t, 2).unwrap()).sum();
        let expected = 0.75 * cached / (0.75 + 0.75 * 2.0);
        assert!((p.mean - expected).abs() < 1e-12);
        assert_eq!(p.std_dev, 1000.0);
    }

    #[test]
    fn train_decays_local_epochs() {
        let target = task(|x| x, 0.0);
        let tasks = vec![task(|x| x, 0.0)];
        let mut surrogate = TwoStageSurrogate::builder()
            .epochs(7)
            .epoch_decay(5)
            .build_with_ensemble(ensemble(&tasks, &target))
            .unwrap();

        surrogate.train(&observe(&target, &[0])).unwrap();
        assert_eq!(surrogate.epochs(), 2);
        surrogate.train(&observe(&target, &[0, 5])).unwrap();
        assert_eq!(surrogate.epochs(), 0);
        surrogate.train(&observe(&target, &[0, 5, 2])).unwrap();
        assert_eq!(surrogate.epochs(), 0);
        assert!(surrogate.local_model().is_trained());
    }

    #[test]
    fn rejects_non_positive_bandwidth() {
        let target = task(|x| x, 0.0);
        for bandwidth in [0.0, -1.0, f64::NAN] {
            let result = TwoStageSurrogate::builder()
                .bandwidth(bandwidth)
                .hyperparameter_dims(1)
                .build(&[], &target);
            assert!(matches!(result, Err(Error::InvalidBandwidth(_))));
        }
    }

    #[test]
    fn unknown_candidate_is_an_error() {
        let target = task(|x| x, 0.0);
        let surrogate = TwoStageSurrogate::builder()
            .hyperparameter_dims(1)
            .build(&[], &target)
            .unwrap();
        let outside = Point::dense(0.0, vec![0.5, 0.0]);
        assert!(matches!(
            surrogate.predict(Candidate::new(6, &outside)),
            Err(Error::UnknownCandidate(6))
        ));
    }

    #[test]
    fn empty_task_is_rejected() {
        let target = task(|x| x, 0.0);
        let result = TaskEnsemble::build(&[Dataset::new(2)], &target, 1, 0);
        assert!(matches!(result, Err(Error::EmptyDataset)));
    }
}
