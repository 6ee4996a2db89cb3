//! Gaussian Process regression with incremental updates.
//!
//! A [`GaussianProcess`] starts **untrained**. [`train`](GaussianProcess::train)
//! moves it to the trained state; [`online_update`](GaussianProcess::online_update)
//! and later calls to `train` keep it there.
//!
//! # Training
//!
//! With kernel learning enabled, every epoch builds the Gram matrix, factorizes
//! it with diagonal jitter (at most ten escalations), solves for `α = K⁻¹ y`
//! and hands the jittered matrix to [`Kernel::gradient_step`]. The first
//! epoch reinitializes the kernel. A final factorization with the learned
//! parameters produces the `L` and `α` used for prediction.
//!
//! # Online update
//!
//! Appending a point extends `L` by one row instead of refactorizing:
//!
//! ```text
//! L ℓ = k*          ℓ* = √(k(x, x) - ℓᵀℓ)
//!
//!        ┌ L   0  ┐
//! L' =   └ ℓᵀ  ℓ* ┘
//! ```
//!
//! The result matches a full retrain up to the jitter the retrain adds.
//!
//! # Examples
//!
//! ```
//! use transfer_smbo::dataset::{Dataset, Point};
//! use transfer_smbo::gp::GaussianProcess;
//! use transfer_smbo::kernel::Kernel;
//!
//! let data = Dataset::with_points(
//!     1,
//!     [(0.0, 0.2), (1.0, 0.8), (2.0, 0.5)]
//!         .into_iter()
//!         .map(|(x, y)| Point::dense(y, vec![x])),
//! )
//! .unwrap();
//!
//! let mut gp = GaussianProcess::new(Kernel::squared_exponential());
//! gp.train(&data).unwrap();
//!
//! let prediction = gp
//!     .predict_with_uncertainty(&Point::dense(0.0, vec![1.0]))
//!     .unwrap();
//! assert!((prediction.mean - 0.8).abs() < 1e-3);
//! ```

use core::f64::consts::PI;

use nalgebra::{DMatrix, DVector};

use crate::dataset::{Dataset, Point};
use crate::error::{Error, Result};
use crate::kernel::Kernel;
use crate::linalg;
use crate::types::Prediction;

/// Default number of kernel-learning epochs.
pub const DEFAULT_EPOCHS: usize = 10;

/// Epochs between two likelihood log events while learning.
const LOG_EVERY: usize = 10;

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Gaussian Process regressor.
#[derive(Clone, Debug)]
pub struct GaussianProcess {
    kernel: Kernel,
    learn_kernel: bool,
    epochs: usize,
    fit: Option<Fit>,
}

/// Everything a trained model predicts from.
#[derive(Clone, Debug)]
struct Fit {
    data: Dataset,
    chol: DMatrix<f64>,
    alpha: DVector<f64>,
}

impl GaussianProcess {
    /// Creates an untrained regressor. Kernel learning is off and the epoch
    /// budget is [`DEFAULT_EPOCHS`].
    #[must_use]
    pub fn new(kernel: Kernel) -> Self {
        Self {
            kernel,
            learn_kernel: false,
            epochs: DEFAULT_EPOCHS,
            fit: None,
        }
    }

    /// Enables or disables hyperparameter learning during [`train`](Self::train).
    #[must_use]
    pub fn with_kernel_learning(mut self, learn: bool) -> Self {
        self.learn_kernel = learn;
        self
    }

    /// Sets the number of learning epochs.
    #[must_use]
    pub fn with_epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs;
        self
    }

    /// Fits the model to `data`, replacing any previous fit.
    ///
    /// The dataset is copied; later changes to `data` do not affect the model.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DimensionMismatch`] if the kernel cannot evaluate a
    /// point, [`Error::JitterExhausted`] if the Gram matrix stays indefinite
    /// and [`Error::SingularMatrix`] if a learning step cannot invert it.
    pub fn train(&mut self, data: &Dataset) -> Result<()> {
        self.kernel.check_dataset(data)?;
        let data = data.clone();
        let targets = DVector::from_vec(data.targets());

        if self.learn_kernel {
            for epoch in 0..self.epochs {
                let mut k = self.kernel.gram(&data);
                let chol = linalg::jittered_cholesky(&mut k)?;
                let alpha = linalg::cholesky_solve(&chol, &targets)?;
                if epoch % LOG_EVERY == LOG_EVERY - 1 {
                    trace_debug!(
                        epoch = epoch + 1,
                        epochs = self.epochs,
                        likelihood = log_likelihood(&chol, &alpha, &targets),
                        "kernel learning"
                    );
                }
                self.kernel.gradient_step(&data, &k, &alpha, epoch == 0)?;
            }
            trace_debug!(kernel = %self.kernel, "kernel learned");
        }

        let mut k = self.kernel.gram(&data);
        let chol = linalg::jittered_cholesky(&mut k)?;
        let alpha = linalg::cholesky_solve(&chol, &targets)?;
        self.fit = Some(Fit { data, chol, alpha });
        Ok(())
    }

    /// Predictive mean `k*ᵀ α` at `point`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotTrained`] before the first [`train`](Self::train)
    /// and [`Error::DimensionMismatch`] if the kernel cannot evaluate `point`.
    pub fn predict(&self, point: &Point) -> Result<f64> {
        let fit = self.fit.as_ref().ok_or(Error::NotTrained)?;
        self.kernel.check_point(point)?;
        Ok(cross_covariance(&self.kernel, &fit.data, point).dot(&fit.alpha))
    }

    /// Predictive mean for every point of `data`, in order.
    ///
    /// # Errors
    ///
    /// See [`predict`](Self::predict).
    pub fn predict_dataset(&self, data: &Dataset) -> Result<Vec<f64>> {
        data.iter().map(|point| self.predict(point)).collect()
    }

    /// Predictive mean and standard deviation at `point`.
    ///
    /// An untrained model answers [`Prediction::UNINFORMED`]. The variance
    /// `k(x, x) - vᵀv` with `L v = k*` is clamped at zero.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DimensionMismatch`] if the kernel cannot evaluate
    /// `point`.
    pub fn predict_with_uncertainty(&self, point: &Point) -> Result<Prediction> {
        let Some(fit) = self.fit.as_ref() else {
            return Ok(Prediction::UNINFORMED);
        };
        self.kernel.check_point(point)?;
        let k_star = cross_covariance(&self.kernel, &fit.data, point);
        let mean = k_star.dot(&fit.alpha);
        let v = linalg::forward_substitute(&fit.chol, &k_star)?;
        let variance = self.kernel.value(point, point) - v.dot(&v);
        Ok(Prediction::new(mean, variance.max(0.0).sqrt()))
    }

    /// Appends `point` to the training set by extending the Cholesky factor
    /// by one row, then recomputes `α`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotTrained`] before the first [`train`](Self::train),
    /// [`Error::DimensionMismatch`] / [`Error::KeyOutOfRange`] if the point
    /// does not fit the model, and [`Error::NotPositiveDefinite`] if the new
    /// pivot `k(x, x) - ℓᵀℓ` is not positive. The model is unchanged on error.
    pub fn online_update(&mut self, point: &Point) -> Result<()> {
        let fit = self.fit.as_mut().ok_or(Error::NotTrained)?;
        self.kernel.check_point(point)?;

        let k_star = cross_covariance(&self.kernel, &fit.data, point);
        let l = linalg::forward_substitute(&fit.chol, &k_star)?;
        let pivot = self.kernel.value(point, point) - l.dot(&l);
        if pivot.is_nan() || pivot <= 0.0 {
            return Err(Error::NotPositiveDefinite);
        }

        let n = fit.data.len();
        let mut chol = fit.chol.clone().resize(n + 1, n + 1, 0.0);
        for (j, &value) in l.iter().enumerate() {
            chol[(n, j)] = value;
        }
        chol[(n, n)] = pivot.sqrt();

        let targets = DVector::from_iterator(
            n + 1,
            fit.data.iter().map(Point::target).chain([point.target()]),
        );
        let alpha = linalg::cholesky_solve(&chol, &targets)?;
        fit.data.add(point.clone())?;
        fit.alpha = alpha;
        fit.chol = chol;
        Ok(())
    }

    /// Overwrites the training targets and recomputes `α` against the
    /// current factor. The kernel does not depend on targets, so `L` stays.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotTrained`] before the first [`train`](Self::train)
    /// and [`Error::TargetCountMismatch`] if `targets` does not have one
    /// entry per training point.
    pub fn set_targets(&mut self, targets: &[f64]) -> Result<()> {
        let fit = self.fit.as_mut().ok_or(Error::NotTrained)?;
        fit.data.set_targets(targets)?;
        fit.alpha = linalg::cholesky_solve(&fit.chol, &DVector::from_column_slice(targets))?;
        Ok(())
    }

    /// Log marginal likelihood `-½ yᵀα - Σ log L_ii - (n/2) log 2π` of the
    /// current fit, or `None` if untrained.
    #[must_use]
    pub fn log_marginal_likelihood(&self) -> Option<f64> {
        self.fit.as_ref().map(|fit| {
            let targets = DVector::from_vec(fit.data.targets());
            log_likelihood(&fit.chol, &fit.alpha, &targets)
        })
    }

    /// Returns `true` once [`train`](Self::train) has succeeded.
    #[must_use]
    pub fn is_trained(&self) -> bool {
        self.fit.is_some()
    }

    /// The solution of `K α = y`, or `None` if untrained.
    #[must_use]
    pub fn alpha(&self) -> Option<&[f64]> {
        self.fit.as_ref().map(|fit| fit.alpha.as_slice())
    }

    /// The lower-triangular Cholesky factor, or `None` if untrained.
    #[must_use]
    pub fn cholesky_factor(&self) -> Option<&DMatrix<f64>> {
        self.fit.as_ref().map(|fit| &fit.chol)
    }

    /// The model's own copy of its training points, or `None` if untrained.
    #[must_use]
    pub fn training_data(&self) -> Option<&Dataset> {
        self.fit.as_ref().map(|fit| &fit.data)
    }

    #[must_use]
    pub fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    /// Mutable access to the kernel. Changes take effect at the next
    /// [`train`](Self::train).
    pub fn kernel_mut(&mut self) -> &mut Kernel {
        &mut self.kernel
    }

    /// Replaces the kernel. Takes effect at the next [`train`](Self::train).
    pub fn set_kernel(&mut self, kernel: Kernel) {
        self.kernel = kernel;
    }

    #[must_use]
    pub fn learns_kernel(&self) -> bool {
        self.learn_kernel
    }

    pub fn set_kernel_learning(&mut self, learn: bool) {
        self.learn_kernel = learn;
    }

    #[must_use]
    pub fn epochs(&self) -> usize {
        self.epochs
    }

    pub fn set_epochs(&mut self, epochs: usize) {
        self.epochs = epochs;
    }
}

impl Default for GaussianProcess {
    fn default() -> Self {
        Self::new(Kernel::default())
    }
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Kernel values between every training point and `point`, in training order.
fn cross_covariance(kernel: &Kernel, data: &Dataset, point: &Point) -> DVector<f64> {
    DVector::from_iterator(data.len(), data.iter().map(|train| kernel.value(train, point)))
}

#[allow(clippy::cast_precision_loss)]
fn log_likelihood(chol: &DMatrix<f64>, alpha: &DVector<f64>, targets: &DVector<f64>) -> f64 {
    let n = chol.nrows() as f64;
    let log_det: f64 = chol.diagonal().iter().map(|d| d.ln()).sum();
    -0.5 * targets.dot(alpha) - log_det - 0.5 * n * (2.0 * PI).ln()
}
