//! Repeated SMBO runs on a target task, averaged per step.
//!
//! A data directory holds one dataset file per task. The file named by the
//! experiment is the target search space; every other file is a related task
//! whose models feed the transfer surrogates. Each repetition starts a fresh
//! search of `tries` steps and the [`Report`] aggregates best accuracy, best
//! rank and elapsed time per step over all repetitions.

mod export;

pub use export::CSV_HEADER;

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::dataset::Dataset;
use crate::error::{Error, Result};
use crate::smbo::Smbo;
use crate::surrogate::two_stage::DEFAULT_BANDWIDTH;
use crate::surrogate::{GpSurrogate, Similarity, Surrogate, TaskEnsemble, TwoStageSurrogate};

/// Default number of SMBO steps per repetition.
pub const DEFAULT_TRIES: usize = 50;

/// Which surrogate drives the search.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum SurrogateKind {
    /// Two-stage transfer with metafeature-distance similarities.
    MetafeatureTransfer,
    /// Two-stage transfer with rank-correlation similarities.
    #[default]
    RankTransfer,
    /// A plain Gaussian Process without transfer.
    Gp,
}

impl SurrogateKind {
    /// Whether the surrogate uses related tasks.
    #[must_use]
    pub fn is_transfer(self) -> bool {
        !matches!(self, Self::Gp)
    }

    fn similarity(self) -> Similarity {
        match self {
            Self::MetafeatureTransfer => Similarity::Metafeatures,
            Self::RankTransfer | Self::Gp => Similarity::Correlation,
        }
    }
}

/// Settings of an [`Experiment`].
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ExperimentConfig {
    tries: usize,
    repeats: usize,
    seed: Option<u64>,
    sparse_grid: bool,
    surrogate: SurrogateKind,
    bandwidth: f64,
    hp_dims: usize,
    indicator_dims: usize,
}

impl ExperimentConfig {
    #[must_use]
    pub fn builder() -> ExperimentConfigBuilder {
        ExperimentConfigBuilder::default()
    }

    #[must_use]
    pub fn tries(&self) -> usize {
        self.tries
    }

    #[must_use]
    pub fn repeats(&self) -> usize {
        self.repeats
    }

    /// Master seed; `None` seeds from system entropy.
    #[must_use]
    pub fn seed(&self) -> Option<u64> {
        self.seed
    }

    #[must_use]
    pub fn sparse_grid(&self) -> bool {
        self.sparse_grid
    }

    #[must_use]
    pub fn surrogate(&self) -> SurrogateKind {
        self.surrogate
    }

    #[must_use]
    pub fn bandwidth(&self) -> f64 {
        self.bandwidth
    }

    /// Number of leading attributes that encode hyperparameters.
    #[must_use]
    pub fn hyperparameter_dims(&self) -> usize {
        self.hp_dims
    }

    /// Number of leading hyperparameter attributes that are 0/1 indicators.
    #[must_use]
    pub fn indicator_dims(&self) -> usize {
        self.indicator_dims
    }
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        ExperimentConfigBuilder::default().build()
    }
}

/// Builder for [`ExperimentConfig`].
///
/// | Setting | Default |
/// |---------|---------|
/// | `tries` | 50 |
/// | `repeats` | 1 |
/// | `seed` | `Some(0)` |
/// | `sparse_grid` | `true` |
/// | `surrogate` | [`SurrogateKind::RankTransfer`] |
/// | `bandwidth` | 0.1 |
/// | `hyperparameter_dims` | 100 |
/// | `indicator_dims` | 0 |
#[derive(Clone, Debug)]
pub struct ExperimentConfigBuilder {
    config: ExperimentConfig,
}

impl Default for ExperimentConfigBuilder {
    fn default() -> Self {
        Self {
            config: ExperimentConfig {
                tries: DEFAULT_TRIES,
                repeats: 1,
                seed: Some(0),
                sparse_grid: true,
                surrogate: SurrogateKind::default(),
                bandwidth: DEFAULT_BANDWIDTH,
                hp_dims: crate::surrogate::two_stage::DEFAULT_HYPERPARAMETER_DIMS,
                indicator_dims: 0,
            },
        }
    }
}

impl ExperimentConfigBuilder {
    #[must_use]
    pub fn tries(mut self, tries: usize) -> Self {
        self.config.tries = tries;
        self
    }

    /// Number of independent searches; values below one are raised to one.
    #[must_use]
    pub fn repeats(mut self, repeats: usize) -> Self {
        self.config.repeats = repeats.max(1);
        self
    }

    #[must_use]
    pub fn seed(mut self, seed: Option<u64>) -> Self {
        self.config.seed = seed;
        self
    }

    #[must_use]
    pub fn sparse_grid(mut self, enabled: bool) -> Self {
        self.config.sparse_grid = enabled;
        self
    }

    #[must_use]
    pub fn surrogate(mut self, kind: SurrogateKind) -> Self {
        self.config.surrogate = kind;
        self
    }

    #[must_use]
    pub fn bandwidth(mut self, bandwidth: f64) -> Self {
        self.config.bandwidth = bandwidth;
        self
    }

    #[must_use]
    pub fn hyperparameter_dims(mut self, dims: usize) -> Self {
        self.config.hp_dims = dims;
        self
    }

    #[must_use]
    pub fn indicator_dims(mut self, dims: usize) -> Self {
        self.config.indicator_dims = dims;
        self
    }

    #[must_use]
    pub fn build(self) -> ExperimentConfig {
        self.config
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Loads every file of `dir`, sorted by file name, and splits off the one
/// named `name` as the target task.
///
/// Returns `(related_tasks, target)`.
///
/// # Errors
///
/// Returns [`Error::MissingDataset`] if `dir` cannot be listed or has no file
/// called `name`, and any load error of [`Dataset::load`].
pub fn load_tasks(dir: impl AsRef<Path>, name: &str) -> Result<(Vec<Dataset>, Dataset)> {
    let dir = dir.as_ref();
    let missing = || Error::MissingDataset {
        name: name.to_owned(),
        dir: dir.display().to_string(),
    };

    let mut files: Vec<_> = std::fs::read_dir(dir)
        .map_err(|_| missing())?
        .filter_map(core::result::Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .collect();
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    if !files.iter().any(|path| path.file_name().is_some_and(|file| file == name)) {
        return Err(missing());
    }

    let mut tasks = Vec::with_capacity(files.len().saturating_sub(1));
    let mut target = None;
    for path in files {
        let dataset = Dataset::load(&path)?;
        if path.file_name().is_some_and(|file| file == name) {
            target = Some(dataset);
        } else {
            tasks.push(dataset);
        }
    }
    let target = target.ok_or_else(missing)?;
    trace_info!(tasks = tasks.len(), target = name, "tasks loaded");
    Ok((tasks, target))
}

/// Thins the hyperparameter grid of every task to a sparse subgrid.
///
/// For each non-indicator hyperparameter attribute (keys
/// `indicator_dims..hp_dims`) the distinct values of the first task are
/// sorted; a point survives only if, for every such attribute, its value sits
/// at a sorted position `p` with `(p + 2) % 3 == 0` (positions 1, 4, 7, ...).
/// When indicator attributes exist, a value of exactly zero marks an unused
/// hyperparameter and never removes a point. Values missing from the first
/// task's grid are not judged.
pub fn thin_grid(tasks: &mut [Dataset], hp_dims: usize, indicator_dims: usize) {
    let Some(reference) = tasks.first() else {
        return;
    };
    let grids: Vec<(usize, Vec<f64>)> = (indicator_dims..hp_dims)
        .map(|key| {
            let mut values: Vec<f64> = reference.iter().map(|p| p.value(key)).collect();
            values.sort_by(f64::total_cmp);
            values.dedup();
            (key, values)
        })
        .collect();

    #[allow(clippy::float_cmp)]
    let keep = |point: &crate::dataset::Point| {
        grids.iter().all(|(key, values)| {
            let value = point.value(*key);
            let Ok(position) = values.binary_search_by(|v| v.total_cmp(&value)) else {
                return true;
            };
            (position + 2) % 3 == 0 || (indicator_dims != 0 && value == 0.0)
        })
    };
    for task in tasks.iter_mut() {
        task.retain(&keep);
        trace_debug!(remaining = task.len(), "grid thinned");
    }
}

/// A loaded target task with its related tasks, ready to run.
#[derive(Clone, Debug)]
pub struct Experiment {
    config: ExperimentConfig,
    tasks: Vec<Dataset>,
    target: Dataset,
}

impl Experiment {
    /// Creates an experiment from datasets that are already in memory. No
    /// grid thinning is applied here.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyDataset`] for an empty target and
    /// [`Error::InvalidBandwidth`] if a transfer surrogate is configured with
    /// a non-positive bandwidth.
    pub fn new(config: ExperimentConfig, tasks: Vec<Dataset>, target: Dataset) -> Result<Self> {
        if target.is_empty() {
            return Err(Error::EmptyDataset);
        }
        if config.surrogate.is_transfer() && !(config.bandwidth > 0.0 && config.bandwidth.is_finite()) {
            return Err(Error::InvalidBandwidth(config.bandwidth));
        }
        Ok(Self {
            config,
            tasks,
            target,
        })
    }

    /// Loads the tasks of `dir` with [`load_tasks`] and, if the config asks
    /// for it, thins the related tasks with [`thin_grid`].
    ///
    /// # Errors
    ///
    /// Any error of [`load_tasks`] or [`Experiment::new`].
    pub fn from_dir(config: ExperimentConfig, dir: impl AsRef<Path>, name: &str) -> Result<Self> {
        let (mut tasks, target) = load_tasks(dir, name)?;
        if config.sparse_grid {
            thin_grid(&mut tasks, config.hp_dims, config.indicator_dims);
        }
        Self::new(config, tasks, target)
    }

    #[must_use]
    pub fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    /// Related tasks.
    #[must_use]
    pub fn tasks(&self) -> &[Dataset] {
        &self.tasks
    }

    /// Target search space.
    #[must_use]
    pub fn target(&self) -> &Dataset {
        &self.target
    }

    /// Runs every repetition and aggregates the results.
    ///
    /// Each repetition draws its own seed from a master generator seeded by
    /// the config. Transfer surrogates share one [`TaskEnsemble`] across
    /// repetitions. A repetition that reaches rank 1 stops searching; its
    /// remaining steps repeat the final values and do not count towards the
    /// time average.
    ///
    /// # Errors
    ///
    /// Propagates surrogate construction and search failures.
    #[allow(clippy::cast_precision_loss)]
    pub fn run(&self) -> Result<Report> {
        let tries = self.config.tries;
        let repeats = self.config.repeats;
        trace_info!(
            tries,
            repeats,
            surrogate = ?self.config.surrogate,
            tasks = self.tasks.len(),
            "starting experiment"
        );

        let mut master = self.config.seed.map_or_else(fastrand::Rng::new, fastrand::Rng::with_seed);
        let mut ensemble: Option<Arc<TaskEnsemble>> = None;

        let mut accuracy = vec![Vec::with_capacity(repeats); tries];
        let mut rank = vec![Vec::with_capacity(repeats); tries];
        let mut time = vec![0.0; tries];
        let mut count = vec![0_usize; tries];

        for repeat in 0..repeats {
            let seed = master.u64(..);
            trace_info!(seed, "starting repetition");
            let surrogate = self.surrogate(&mut ensemble)?;
            let mut smbo = Smbo::with_seed(self.target.clone(), surrogate, seed);

            let start = Instant::now();
            for step in 0..tries {
                if step > 0 && rank[step - 1].last() == Some(&1.0) {
                    let (a, r) = (accuracy[step - 1][repeat], rank[step - 1][repeat]);
                    accuracy[step].push(a);
                    rank[step].push(r);
                    continue;
                }
                smbo.iterate()?;
                let (Some(best_accuracy), Some(best_rank)) = (smbo.best_accuracy(), smbo.best_rank())
                else {
                    return Err(Error::Internal("search made no observation"));
                };
                accuracy[step].push(best_accuracy);
                rank[step].push(best_rank as f64);
                time[step] += start.elapsed().as_secs_f64() * 1000.0;
                count[step] += 1;
            }
        }

        let steps = (0..tries)
            .map(|step| {
                let (accuracy_mean, accuracy_std) = mean_and_std(&accuracy[step]);
                let (rank_mean, rank_std) = mean_and_std(&rank[step]);
                StepSummary {
                    step: step + 1,
                    accuracy_mean,
                    accuracy_std,
                    rank_mean,
                    rank_std,
                    mean_time_ms: (count[step] > 0).then(|| time[step] / count[step] as f64),
                }
            })
            .collect();
        Ok(Report { steps })
    }

    fn surrogate(&self, ensemble: &mut Option<Arc<TaskEnsemble>>) -> Result<Box<dyn Surrogate>> {
        let kind = self.config.surrogate;
        if !kind.is_transfer() {
            return Ok(Box::new(GpSurrogate::default()));
        }
        let builder = TwoStageSurrogate::builder()
            .bandwidth(self.config.bandwidth)
            .hyperparameter_dims(self.config.hp_dims)
            .similarity(kind.similarity());
        let surrogate = match ensemble {
            Some(shared) => builder.build_with_ensemble(Arc::clone(shared))?,
            None => {
                let surrogate = builder.build(&self.tasks, &self.target)?;
                *ensemble = Some(Arc::clone(surrogate.ensemble()));
                surrogate
            }
        };
        Ok(Box::new(surrogate))
    }
}

/// Aggregated results of one SMBO step over all repetitions.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct StepSummary {
    /// 1-based step number.
    pub step: usize,
    pub accuracy_mean: f64,
    /// Sample standard deviation; zero for a single repetition.
    pub accuracy_std: f64,
    pub rank_mean: f64,
    pub rank_std: f64,
    /// Mean milliseconds from the start of a repetition to the end of this
    /// step, over the repetitions that actually searched at this step.
    /// `None` when every repetition had already stopped.
    pub mean_time_ms: Option<f64>,
}

/// Per-step results of an [`Experiment`].
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Report {
    steps: Vec<StepSummary>,
}

impl Report {
    #[must_use]
    pub fn steps(&self) -> &[StepSummary] {
        &self.steps
    }
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

#[allow(clippy::cast_precision_loss)]
fn mean_and_std(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    if values.is_empty() {
        return (f64::NAN, f64::NAN);
    }
    let mean = values.iter().sum::<f64>() / n;
    if values.len() < 2 {
        return (mean, 0.0);
    }
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    (mean, variance.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Point;

    fn grid_task(offset: f64) -> Dataset {
        // One indicator attribute (key 0) and one numeric attribute (key 1)
        // with seven grid values.
        let mut points = Vec::new();
        for i in 0..7 {
            let x = f64::from(i);
            points.push(Point::dense(offset + x, vec![1.0, x]));
        }
        points.push(Point::dense(offset, vec![1.0, 0.0]));
        Dataset::with_points(2, points).unwrap()
    }

    #[test]
    fn thinning_keeps_every_third_value() {
        let task = Dataset::with_points(1, (0..7).map(|i| Point::dense(0.0, vec![f64::from(i)]))).unwrap();
        let mut tasks = vec![task];
        thin_grid(&mut tasks, 1, 0);
        let kept: Vec<f64> = tasks[0].iter().map(|p| p.value(0)).collect();
        assert_eq!(kept, vec![1.0, 4.0]);
    }

    #[test]
    fn thinning_keeps_zero_with_indicators() {
        let mut tasks = vec![grid_task(0.0), grid_task(1.0)];
        thin_grid(&mut tasks, 2, 1);
        for task in &tasks {
            let kept: Vec<f64> = task.iter().map(|p| p.value(1)).collect();
            assert_eq!(kept, vec![0.0, 1.0, 4.0, 0.0]);
        }
    }

    #[test]
    fn thinning_without_tasks_is_a_no_op() {
        let mut tasks: Vec<Dataset> = Vec::new();
        thin_grid(&mut tasks, 3, 1);
        assert!(tasks.is_empty());
    }

    #[test]
    fn sample_standard_deviation() {
        let (mean, std) = mean_and_std(&[1.0, 2.0, 3.0, 4.0]);
        assert!((mean - 2.5).abs() < 1e-12);
        assert!((std - 1.290_994_448_735_805_6).abs() < 1e-12);
        assert_eq!(mean_and_std(&[7.0]), (7.0, 0.0));
    }

    #[test]
    fn builder_defaults() {
        let config = ExperimentConfig::default();
        assert_eq!(config.tries(), DEFAULT_TRIES);
        assert_eq!(config.repeats(), 1);
        assert_eq!(config.seed(), Some(0));
        assert!(config.sparse_grid());
        assert_eq!(config.surrogate(), SurrogateKind::RankTransfer);
        assert_eq!(ExperimentConfig::builder().repeats(0).build().repeats(), 1);
    }

    #[test]
    fn transfer_rejects_non_positive_bandwidth() {
        let config = ExperimentConfig::builder().bandwidth(0.0).build();
        let result = Experiment::new(config, Vec::new(), grid_task(0.0));
        assert!(matches!(result, Err(Error::InvalidBandwidth(_))));

        let config = ExperimentConfig::builder()
            .bandwidth(0.0)
            .surrogate(SurrogateKind::Gp)
            .build();
        assert!(Experiment::new(config, Vec::new(), grid_task(0.0)).is_ok());
    }

    #[test]
    fn empty_target_is_rejected() {
        let result = Experiment::new(ExperimentConfig::default(), Vec::new(), Dataset::new(2));
        assert!(matches!(result, Err(Error::EmptyDataset)));
    }

    #[test]
    fn gp_run_reaches_rank_one_and_stops() {
        let target = grid_task(0.0);
        let config = ExperimentConfig::builder()
            .tries(10)
            .repeats(3)
            .surrogate(SurrogateKind::Gp)
            .build();
        let report = Experiment::new(config, Vec::new(), target).unwrap().run().unwrap();

        assert_eq!(report.steps().len(), 10);
        let last = &report.steps()[9];
        // Eight candidates: the search must have seen the best one by step 8.
        assert_eq!(last.rank_mean, 1.0);
        assert_eq!(last.rank_std, 0.0);
        assert_eq!(last.accuracy_mean, 6.0);
        assert_eq!(last.mean_time_ms, None);
        assert!(report.steps()[0].mean_time_ms.is_some());
        for pair in report.steps().windows(2) {
            assert!(pair[1].accuracy_mean >= pair[0].accuracy_mean);
        }
    }
}
