use nalgebra::DMatrix;

use super::{
    DEFAULT_LEARNING_RATE, DEFAULT_LENGTH_SCALE, DEFAULT_NOISE, DEFAULT_SIGNAL, Learned,
    half_trace, noise_gradient,
};
use crate::dataset::{Dataset, Point};

/// Isotropic squared-exponential kernel.
///
/// ```
/// use transfer_smbo::dataset::Point;
/// use transfer_smbo::kernel::SquaredExponential;
///
/// let kernel = SquaredExponential::new().with_length_scale(2.0);
/// let a = Point::dense(0.0, vec![0.0]);
/// let b = Point::dense(0.0, vec![2.0]);
/// assert!((kernel.value(&a, &b) - (-0.5f64).exp()).abs() < 1e-12);
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct SquaredExponential {
    signal: Learned,
    noise: Learned,
    length_scale: Learned,
    learning_rate: f64,
}

impl SquaredExponential {
    /// `σf = 1`, `σy = 0.001`, `σl = 1`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            signal: Learned::new(DEFAULT_SIGNAL),
            noise: Learned::new(DEFAULT_NOISE),
            length_scale: Learned::new(DEFAULT_LENGTH_SCALE),
            learning_rate: DEFAULT_LEARNING_RATE,
        }
    }

    /// Sets the signal standard deviation `σf`.
    #[must_use]
    pub fn with_signal(mut self, signal: f64) -> Self {
        self.signal.value = signal;
        self
    }

    /// Sets the noise standard deviation `σy`.
    #[must_use]
    pub fn with_noise(mut self, noise: f64) -> Self {
        self.noise.value = noise;
        self
    }

    /// Sets the length-scale `σl`.
    #[must_use]
    pub fn with_length_scale(mut self, length_scale: f64) -> Self {
        self.length_scale.value = length_scale;
        self
    }

    /// Sets the AdaGrad learning rate.
    #[must_use]
    pub fn with_learning_rate(mut self, learning_rate: f64) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    #[must_use]
    pub fn signal(&self) -> f64 {
        self.signal.value
    }

    #[must_use]
    pub fn noise(&self) -> f64 {
        self.noise.value
    }

    #[must_use]
    pub fn length_scale(&self) -> f64 {
        self.length_scale.value
    }

    pub fn set_signal(&mut self, signal: f64) {
        self.signal.value = signal;
    }

    pub fn set_noise(&mut self, noise: f64) {
        self.noise.value = noise;
    }

    pub fn set_length_scale(&mut self, length_scale: f64) {
        self.length_scale.value = length_scale;
    }

    /// Covariance between two points; adds `σy²` iff `a` and `b` are the same
    /// object.
    #[must_use]
    pub fn value(&self, a: &Point, b: &Point) -> f64 {
        let sf = self.signal.value;
        let covariance = sf * sf * self.exponential(a.squared_distance(b));
        if core::ptr::eq(a, b) {
            covariance + self.noise.value * self.noise.value
        } else {
            covariance
        }
    }

    pub(super) fn reset(&mut self) {
        *self = Self::new().with_learning_rate(self.learning_rate);
    }

    /// Updates `σy`, then `σf`, then `σl`; the length-scale derivative sees
    /// the already updated signal.
    pub(super) fn ascend(&mut self, data: &Dataset, weights: &DMatrix<f64>) {
        let (squared, exponential) = self.pairwise(data);

        let gradient = noise_gradient(weights, self.noise.value);
        self.noise.ascend(gradient, self.learning_rate);

        let gradient = self.signal_gradient(&exponential, weights);
        self.signal.ascend(gradient, self.learning_rate);

        let gradient = self.length_scale_gradient(&squared, &exponential, weights);
        self.length_scale.ascend(gradient, self.learning_rate);
    }

    /// Squared distances and `exp(-d² / 2σl²)` between all pairs of `data`.
    fn pairwise(&self, data: &Dataset) -> (DMatrix<f64>, DMatrix<f64>) {
        let n = data.len();
        let mut squared = DMatrix::zeros(n, n);
        let mut exponential = DMatrix::zeros(n, n);
        for i in 0..n {
            for j in 0..=i {
                let d2 = data[i].squared_distance(&data[j]);
                let e = self.exponential(d2);
                squared[(i, j)] = d2;
                squared[(j, i)] = d2;
                exponential[(i, j)] = e;
                exponential[(j, i)] = e;
            }
        }
        (squared, exponential)
    }

    /// `∂K/∂σf = 2σf E`.
    fn signal_gradient(&self, exponential: &DMatrix<f64>, weights: &DMatrix<f64>) -> f64 {
        half_trace(weights, &(exponential * (2.0 * self.signal.value)))
    }

    /// `∂K/∂σl = σf² E ∘ D² / σl³`.
    fn length_scale_gradient(
        &self,
        squared: &DMatrix<f64>,
        exponential: &DMatrix<f64>,
        weights: &DMatrix<f64>,
    ) -> f64 {
        let sf = self.signal.value;
        let l3 = self.length_scale.value.powi(3);
        half_trace(weights, &(exponential.component_mul(squared) * (sf * sf / l3)))
    }

    fn exponential(&self, squared_distance: f64) -> f64 {
        let l = self.length_scale.value;
        (-squared_distance / (2.0 * l * l)).exp()
    }
}

impl Default for SquaredExponential {
    fn default() -> Self {
        Self::new()
    }
}
