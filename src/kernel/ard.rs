use nalgebra::DMatrix;

use super::{
    DEFAULT_LEARNING_RATE, DEFAULT_LENGTH_SCALE, DEFAULT_NOISE, DEFAULT_SIGNAL, Learned,
    half_trace, noise_gradient,
};
use crate::dataset::{Dataset, Point};

/// Squared-exponential kernel with automatic relevance determination: one
/// length-scale per input dimension.
///
/// Points evaluated by this kernel must not use keys at or beyond
/// [`dims`](Self::dims); see [`Kernel::check_point`](super::Kernel::check_point).
#[derive(Clone, Debug, PartialEq)]
pub struct ArdSquaredExponential {
    signal: Learned,
    noise: Learned,
    length_scales: Vec<Learned>,
    learning_rate: f64,
}

impl ArdSquaredExponential {
    /// `σf = 1`, `σy = 0.001` and `σl_d = 1` for all `dims` dimensions.
    #[must_use]
    pub fn new(dims: usize) -> Self {
        Self {
            signal: Learned::new(DEFAULT_SIGNAL),
            noise: Learned::new(DEFAULT_NOISE),
            length_scales: vec![Learned::new(DEFAULT_LENGTH_SCALE); dims],
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

    /// Replaces all length-scales; the number of dimensions follows
    /// `length_scales.len()`.
    #[must_use]
    pub fn with_length_scales(mut self, length_scales: Vec<f64>) -> Self {
        self.set_length_scales(length_scales);
        self
    }

    /// Sets the AdaGrad learning rate.
    #[must_use]
    pub fn with_learning_rate(mut self, learning_rate: f64) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    /// Number of input dimensions.
    #[must_use]
    pub fn dims(&self) -> usize {
        self.length_scales.len()
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
    pub fn length_scales(&self) -> Vec<f64> {
        self.length_scales.iter().map(|l| l.value).collect()
    }

    pub fn set_signal(&mut self, signal: f64) {
        self.signal.value = signal;
    }

    pub fn set_noise(&mut self, noise: f64) {
        self.noise.value = noise;
    }

    /// Replaces all length-scales and restarts their AdaGrad history.
    pub fn set_length_scales(&mut self, length_scales: Vec<f64>) {
        self.length_scales = length_scales.into_iter().map(Learned::new).collect();
    }

    /// Covariance between two points; adds `σy²` iff `a` and `b` are the same
    /// object.
    ///
    /// # Panics
    ///
    /// Panics if a point uses a key at or beyond [`dims`](Self::dims).
    #[must_use]
    pub fn value(&self, a: &Point, b: &Point) -> f64 {
        let sf = self.signal.value;
        let covariance = sf * sf * self.exponential(a, b);
        if core::ptr::eq(a, b) {
            covariance + self.noise.value * self.noise.value
        } else {
            covariance
        }
    }

    pub(super) fn reset(&mut self) {
        *self = Self::new(self.dims()).with_learning_rate(self.learning_rate);
    }

    /// Updates `σy`, then `σf`, then every `σl_d` in dimension order.
    pub(super) fn ascend(&mut self, data: &Dataset, weights: &DMatrix<f64>) {
        let exponential = self.pairwise(data);

        let gradient = noise_gradient(weights, self.noise.value);
        self.noise.ascend(gradient, self.learning_rate);

        let gradient = half_trace(weights, &(&exponential * (2.0 * self.signal.value)));
        self.signal.ascend(gradient, self.learning_rate);

        for d in 0..self.length_scales.len() {
            let gradient = self.length_scale_gradient(d, data, &exponential, weights);
            self.length_scales[d].ascend(gradient, self.learning_rate);
        }
    }

    /// `exp(-½ Σ_d (x_d - x'_d)² / σl_d²)` between all pairs of `data`.
    fn pairwise(&self, data: &Dataset) -> DMatrix<f64> {
        let n = data.len();
        let mut exponential = DMatrix::zeros(n, n);
        for i in 0..n {
            for j in 0..=i {
                let e = self.exponential(&data[i], &data[j]);
                exponential[(i, j)] = e;
                exponential[(j, i)] = e;
            }
        }
        exponential
    }

    /// `∂K/∂σl_d = σf² E ∘ (x_d - x'_d)² / σl_d³`.
    fn length_scale_gradient(
        &self,
        d: usize,
        data: &Dataset,
        exponential: &DMatrix<f64>,
        weights: &DMatrix<f64>,
    ) -> f64 {
        let n = data.len();
        let sf2 = self.signal.value * self.signal.value;
        let l3 = self.length_scales[d].value.powi(3);
        let mut derivative = DMatrix::zeros(n, n);
        for i in 0..n {
            for j in 0..=i {
                let diff = data[i].value(d) - data[j].value(d);
                let value = sf2 * exponential[(i, j)] * diff * diff / l3;
                derivative[(i, j)] = value;
                derivative[(j, i)] = value;
            }
        }
        half_trace(weights, &derivative)
    }

    fn exponential(&self, a: &Point, b: &Point) -> f64 {
        let scaled: f64 = a
            .aligned(b)
            .map(|(key, x, y)| {
                let l = self.length_scales[key].value;
                (x - y) * (x - y) / (l * l)
            })
            .sum();
        (-0.5 * scaled).exp()
    }
}
