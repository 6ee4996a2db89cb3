//! Covariance functions with learnable hyperparameters.
//!
//! Two squared-exponential variants are available behind the [`Kernel`] enum:
//!
//! | Variant | Parameters |
//! |---------|------------|
//! | [`SquaredExponential`] | signal `σf`, noise `σy`, one length-scale `σl` |
//! | [`ArdSquaredExponential`] | signal `σf`, noise `σy`, one `σl` per dimension |
//!
//! `k(x1, x2) = σf² exp(-½ Σ_d (x1_d - x2_d)² / σl_d²)`, plus `σy²` when both
//! arguments are the very same point object, so observation noise only enters
//! the covariance of a training point with itself.
//!
//! # Hyperparameter learning
//!
//! [`Kernel::gradient_step`] performs one AdaGrad ascent step on the log
//! marginal likelihood. For every parameter `θ`
//!
//! ```text
//! ∂ log p(y) / ∂θ = ½ tr((α αᵀ - K⁻¹) ∂K/∂θ)
//! sum_θ += grad²
//! θ     += rate / √sum_θ · grad
//! ```
//!
//! where `K⁻¹` comes from a fresh LU decomposition of the supplied (jittered)
//! Gram matrix.

mod ard;
mod se;

use core::fmt;

use nalgebra::{DMatrix, DVector};

pub use ard::ArdSquaredExponential;
pub use se::SquaredExponential;

use crate::dataset::{Dataset, Point};
use crate::error::{Error, Result};
use crate::linalg;

/// Default AdaGrad learning rate.
pub const DEFAULT_LEARNING_RATE: f64 = 0.1;
/// Initial signal standard deviation `σf`.
const DEFAULT_SIGNAL: f64 = 1.0;
/// Initial noise standard deviation `σy`.
const DEFAULT_NOISE: f64 = 0.001;
/// Initial length-scale `σl`.
const DEFAULT_LENGTH_SCALE: f64 = 1.0;
/// Starting value of every AdaGrad accumulator; keeps the first step finite.
const ADAGRAD_EPSILON: f64 = 0.001;

/// A positive scalar hyperparameter with its AdaGrad history.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct Learned {
    pub(crate) value: f64,
    sum_sq: f64,
}

impl Learned {
    pub(crate) fn new(value: f64) -> Self {
        Self {
            value,
            sum_sq: ADAGRAD_EPSILON,
        }
    }

    pub(crate) fn ascend(&mut self, gradient: f64, learning_rate: f64) {
        self.sum_sq += gradient * gradient;
        self.value += learning_rate / self.sum_sq.sqrt() * gradient;
    }
}

/// A covariance function over pairs of points.
#[derive(Clone, Debug, PartialEq)]
pub enum Kernel {
    /// Isotropic squared exponential.
    SquaredExponential(SquaredExponential),
    /// Squared exponential with one length-scale per dimension.
    Ard(ArdSquaredExponential),
}

impl Kernel {
    /// Isotropic squared-exponential kernel with default parameters.
    #[must_use]
    pub fn squared_exponential() -> Self {
        Self::SquaredExponential(SquaredExponential::new())
    }

    /// ARD squared-exponential kernel over `dims` dimensions with default
    /// parameters.
    #[must_use]
    pub fn ard(dims: usize) -> Self {
        Self::Ard(ArdSquaredExponential::new(dims))
    }

    /// Covariance between two points.
    #[must_use]
    pub fn value(&self, a: &Point, b: &Point) -> f64 {
        match self {
            Self::SquaredExponential(k) => k.value(a, b),
            Self::Ard(k) => k.value(a, b),
        }
    }

    /// Symmetric Gram matrix over all points of `data`, in order.
    #[must_use]
    pub fn gram(&self, data: &Dataset) -> DMatrix<f64> {
        let n = data.len();
        let mut k = DMatrix::zeros(n, n);
        for i in 0..n {
            for j in i..n {
                let value = self.value(&data[i], &data[j]);
                k[(i, j)] = value;
                k[(j, i)] = value;
            }
        }
        k
    }

    /// One AdaGrad step on the log marginal likelihood of `data`.
    ///
    /// `k` must be the (jittered) Gram matrix the current `alpha` was solved
    /// against. With `reinitialize` set, all parameters and accumulators are
    /// reset to their defaults before the step.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SingularMatrix`] if `k` cannot be inverted.
    pub fn gradient_step(
        &mut self,
        data: &Dataset,
        k: &DMatrix<f64>,
        alpha: &DVector<f64>,
        reinitialize: bool,
    ) -> Result<()> {
        if reinitialize {
            self.reset();
        }
        let weights = gradient_weights(k, alpha)?;
        match self {
            Self::SquaredExponential(kernel) => kernel.ascend(data, &weights),
            Self::Ard(kernel) => kernel.ascend(data, &weights),
        }
        Ok(())
    }

    /// Restores the default parameters and clears the AdaGrad history.
    pub fn reset(&mut self) {
        match self {
            Self::SquaredExponential(k) => k.reset(),
            Self::Ard(k) => k.reset(),
        }
    }

    /// Signal standard deviation `σf`.
    #[must_use]
    pub fn signal(&self) -> f64 {
        match self {
            Self::SquaredExponential(k) => k.signal(),
            Self::Ard(k) => k.signal(),
        }
    }

    /// Noise standard deviation `σy`.
    #[must_use]
    pub fn noise(&self) -> f64 {
        match self {
            Self::SquaredExponential(k) => k.noise(),
            Self::Ard(k) => k.noise(),
        }
    }

    /// Verifies that the kernel can evaluate `point`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DimensionMismatch`] if an ARD kernel has no
    /// length-scale for one of the point's keys.
    pub fn check_point(&self, point: &Point) -> Result<()> {
        match (self, point.max_key()) {
            (Self::Ard(k), Some(key)) if key >= k.dims() => Err(Error::DimensionMismatch {
                expected: k.dims(),
                got: key + 1,
            }),
            _ => Ok(()),
        }
    }

    /// Verifies that the kernel can evaluate every point of `data`.
    ///
    /// # Errors
    ///
    /// See [`check_point`](Self::check_point).
    pub fn check_dataset(&self, data: &Dataset) -> Result<()> {
        data.iter().try_for_each(|point| self.check_point(point))
    }
}

impl Default for Kernel {
    fn default() -> Self {
        Self::squared_exponential()
    }
}

impl From<SquaredExponential> for Kernel {
    fn from(kernel: SquaredExponential) -> Self {
        Self::SquaredExponential(kernel)
    }
}

impl From<ArdSquaredExponential> for Kernel {
    fn from(kernel: ArdSquaredExponential) -> Self {
        Self::Ard(kernel)
    }
}

impl fmt::Display for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SquaredExponential(k) => write!(
                f,
                "squared exponential: sigma_f={} sigma_y={} sigma_l={}",
                k.signal(),
                k.noise(),
                k.length_scale()
            ),
            Self::Ard(k) => write!(
                f,
                "ARD squared exponential: sigma_f={} sigma_y={} sigma_l={:?}",
                k.signal(),
                k.noise(),
                k.length_scales()
            ),
        }
    }
}

/// `α αᵀ - K⁻¹`, the matrix every parameter gradient is traced against.
fn gradient_weights(k: &DMatrix<f64>, alpha: &DVector<f64>) -> Result<DMatrix<f64>> {
    Ok(alpha * alpha.transpose() - linalg::inverse(k)?)
}

/// `½ tr(W D)` for symmetric `D`.
fn half_trace(weights: &DMatrix<f64>, derivative: &DMatrix<f64>) -> f64 {
    0.5 * weights.component_mul(derivative).sum()
}

/// Gradient for the noise parameter, whose `∂K/∂σy` is `2σy I`.
fn noise_gradient(weights: &DMatrix<f64>, noise: f64) -> f64 {
    0.5 * 2.0 * noise * weights.trace()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Log marginal likelihood of `data` under `kernel`, without jitter.
    #[allow(clippy::cast_precision_loss)]
    pub(super) fn log_likelihood(kernel: &Kernel, data: &Dataset) -> f64 {
        let targets = DVector::from_vec(data.targets());
        let cholesky = nalgebra::linalg::Cholesky::new(kernel.gram(data)).unwrap();
        let alpha = cholesky.solve(&targets);
        let log_det: f64 = cholesky.l().diagonal().iter().map(|d| d.ln()).sum();
        let n = data.len() as f64;
        -0.5 * targets.dot(&alpha) - log_det - 0.5 * n * (2.0 * core::f64::consts::PI).ln()
    }

    fn line(n: usize) -> Dataset {
        Dataset::with_points(
            2,
            (0..n).map(|i| {
                let x = i as f64 * 0.4;
                Point::dense(x.sin(), vec![x, 0.5 * x])
            }),
        )
        .unwrap()
    }

    fn assert_gram_shape(kernel: &Kernel, data: &Dataset) {
        let k = kernel.gram(data);
        for i in 0..data.len() {
            assert!(k[(i, i)] >= 0.0);
            for j in 0..data.len() {
                assert_eq!(k[(i, j)], k[(j, i)]);
                if i != j {
                    assert!(k[(i, j)] > 0.0);
                    assert!(k[(i, j)] <= k[(i, i)]);
                }
            }
        }
    }

    #[test]
    fn gram_is_symmetric_with_dominant_diagonal() {
        let data = line(6);
        assert_gram_shape(&Kernel::squared_exponential(), &data);
        assert_gram_shape(&Kernel::ard(2), &data);
    }

    #[test]
    fn noise_only_on_identical_objects() {
        let kernel = Kernel::squared_exponential();
        let a = Point::dense(0.0, vec![1.0, 2.0]);
        let b = a.clone();
        let sigma_y = kernel.noise();
        assert!((kernel.value(&a, &a) - kernel.value(&a, &b) - sigma_y * sigma_y).abs() < 1e-15);
        assert!((kernel.value(&a, &b) - 1.0).abs() < 1e-15);
    }

    #[test]
    fn ard_matches_isotropic_with_equal_length_scales() {
        let data = line(4);
        let se = Kernel::from(SquaredExponential::new().with_length_scale(0.7));
        let ard = Kernel::from(ArdSquaredExponential::new(2).with_length_scales(vec![0.7, 0.7]));
        let a = se.gram(&data);
        let b = ard.gram(&data);
        assert!((a - b).norm() < 1e-12);
    }

    #[test]
    fn check_point_rejects_keys_without_length_scale() {
        let kernel = Kernel::ard(2);
        assert!(kernel.check_point(&Point::dense(0.0, vec![1.0, 2.0])).is_ok());
        assert!(matches!(
            kernel.check_point(&Point::dense(0.0, vec![1.0, 2.0, 3.0])),
            Err(Error::DimensionMismatch {
                expected: 2,
                got: 3
            })
        ));
        assert!(
            Kernel::squared_exponential()
                .check_point(&Point::dense(0.0, vec![1.0; 9]))
                .is_ok()
        );
    }

    #[test]
    fn reinitialize_restores_defaults() {
        let data = line(5);
        let mut kernel = Kernel::from(
            SquaredExponential::new()
                .with_signal(3.0)
                .with_noise(0.5)
                .with_length_scale(4.0),
        );
        let mut k = kernel.gram(&data);
        let l = linalg::jittered_cholesky(&mut k).unwrap();
        let alpha = linalg::cholesky_solve(&l, &DVector::from_vec(data.targets())).unwrap();
        kernel.gradient_step(&data, &k, &alpha, true).unwrap();

        // One step from the defaults moves each parameter by at most the
        // learning rate.
        assert!((kernel.signal() - DEFAULT_SIGNAL).abs() <= DEFAULT_LEARNING_RATE + 1e-12);
        assert!((kernel.noise() - DEFAULT_NOISE).abs() <= DEFAULT_LEARNING_RATE + 1e-12);
    }

    #[test]
    fn adagrad_step_is_bounded_by_learning_rate() {
        let mut p = Learned::new(1.0);
        p.ascend(1e6, 0.1);
        assert!((p.value - 1.0 - 0.1).abs() < 1e-6);
        let mut q = Learned::new(1.0);
        q.ascend(0.0, 0.1);
        assert_eq!(q.value, 1.0);
    }
}
