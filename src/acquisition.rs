//! Acquisition functions that pick the next candidate to evaluate.
//!
//! [`ExpectedImprovement`] scores every remaining candidate by
//!
//! ```text
//! z  = (μ - ξ - y_max) / σ
//! EI = (μ - ξ - y_max) Φ(z) + σ φ(z)        (σ > 0, else 0)
//!    = σ (φ(z) + z Φ(z))
//! ```
//!
//! where `y_max` is the best target observed so far (`-1` before the first
//! observation) and `ξ` an exploration margin. Candidates tied at the maximum
//! score (exact floating-point equality) are broken uniformly at random with
//! the caller's generator, so a fixed seed reproduces the same search.

use crate::dataset::Dataset;
use crate::error::{Error, Result};
use crate::smbo::History;
use crate::surrogate::Surrogate;
use crate::types::{Candidate, Prediction};

/// Default exploration margin `ξ`.
pub const DEFAULT_XI: f64 = 0.01;

/// Incumbent used before anything has been observed.
const NO_INCUMBENT: f64 = -1.0;

/// Strategy for choosing the next candidate from the remaining pool.
pub trait Acquisition {
    /// Picks one entry of `candidates`, a list of indices into `space`, and
    /// returns its position in that list. Returns `None` for an empty list.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownCandidate`] if an index is outside `space` and
    /// propagates surrogate failures.
    fn select(
        &self,
        history: &History,
        surrogate: &dyn Surrogate,
        space: &Dataset,
        candidates: &[usize],
        rng: &mut fastrand::Rng,
    ) -> Result<Option<usize>>;
}

/// Expected Improvement over the best observed target.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ExpectedImprovement {
    xi: f64,
}

impl ExpectedImprovement {
    /// Creates the acquisition with exploration margin `xi`.
    #[must_use]
    pub fn new(xi: f64) -> Self {
        Self { xi }
    }

    /// The exploration margin `ξ`.
    #[must_use]
    pub fn xi(&self) -> f64 {
        self.xi
    }

    /// Expected improvement of `prediction` over `y_max`, clamped at zero.
    /// Undefined inputs (NaN mean) yield NaN.
    #[must_use]
    pub fn expected_improvement(&self, prediction: Prediction, y_max: f64) -> f64 {
        let sigma = prediction.std_dev;
        if sigma.is_nan() || sigma <= 0.0 {
            return 0.0;
        }
        let z = (prediction.mean - self.xi - y_max) / sigma;
        let ei = sigma * (norm_pdf(z) + z * norm_cdf(z));
        if ei < 0.0 { 0.0 } else { ei }
    }
}

impl Default for ExpectedImprovement {
    fn default() -> Self {
        Self::new(DEFAULT_XI)
    }
}

impl Acquisition for ExpectedImprovement {
    #[allow(clippy::float_cmp)]
    fn select(
        &self,
        history: &History,
        surrogate: &dyn Surrogate,
        space: &Dataset,
        candidates: &[usize],
        rng: &mut fastrand::Rng,
    ) -> Result<Option<usize>> {
        if candidates.is_empty() {
            return Ok(None);
        }
        let y_max = history.best_target().unwrap_or(NO_INCUMBENT);

        let mut best = f64::NEG_INFINITY;
        let mut ties = Vec::new();
        for (position, &index) in candidates.iter().enumerate() {
            let point = space.get(index).ok_or(Error::UnknownCandidate(index))?;
            let prediction = surrogate.predict(Candidate::new(index, point))?;
            let ei = self.expected_improvement(prediction, y_max);
            if ei > best {
                best = ei;
                ties.clear();
                ties.push(position);
            } else if ei == best {
                ties.push(position);
            }
        }

        if ties.is_empty() {
            return Err(Error::Internal(
                "expected improvement is undefined for every candidate",
            ));
        }
        let pick = ties[rng.usize(..ties.len())];
        trace_debug!(best_ei = best, ties = ties.len(), "candidate selected");
        Ok(Some(pick))
    }
}

// ---------------------------------------------------------------------------
// Normal distribution helpers
// ---------------------------------------------------------------------------

const INV_SQRT_PI: f64 = 0.5 * core::f64::consts::FRAC_2_SQRT_PI;
/// Relative accuracy the erfc expansions iterate to.
const ERFC_EPS: f64 = f64::EPSILON;
/// Iteration cap of both erfc expansions.
const ERFC_MAX_ITER: usize = 300;
/// Smallest magnitude the continued fraction lets a denominator reach.
const ERFC_TINY: f64 = 1e-300;

/// Standard normal PDF.
fn norm_pdf(x: f64) -> f64 {
    const INV_SQRT_2PI: f64 = 0.398_942_280_401_432_7;
    INV_SQRT_2PI * (-0.5 * x * x).exp()
}

/// Standard normal CDF with relative accuracy in both tails.
fn norm_cdf(x: f64) -> f64 {
    0.5 * erfc(-x * core::f64::consts::FRAC_1_SQRT_2)
}

/// Complementary error function.
///
/// `erfc(x) = Γ(½, x²) / √π` for `x ≥ 0`: the lower incomplete gamma series
/// below `x² = 1.5`, the Lentz continued fraction for the upper one above.
fn erfc(x: f64) -> f64 {
    if x.is_nan() {
        return f64::NAN;
    }
    if x < 0.0 {
        return 2.0 - erfc(-x);
    }
    // Subnormal from here on.
    if x >= 27.0 {
        return 0.0;
    }

    let t = x * x;
    let prefactor = (-t).exp() * x * INV_SQRT_PI;
    if t < 1.5 {
        let mut term = 2.0;
        let mut sum = term;
        let mut a = 0.5;
        for _ in 0..ERFC_MAX_ITER {
            a += 1.0;
            term *= t / a;
            sum += term;
            if term.abs() < sum.abs() * ERFC_EPS {
                break;
            }
        }
        1.0 - sum * prefactor
    } else {
        let mut b = t + 0.5;
        let mut c = 1.0 / ERFC_TINY;
        let mut d = 1.0 / b;
        let mut h = d;
        let mut i = 0.0;
        for _ in 0..ERFC_MAX_ITER {
            i += 1.0;
            let an = -i * (i - 0.5);
            b += 2.0;
            d = an * d + b;
            if d.abs() < ERFC_TINY {
                d = ERFC_TINY;
            }
            c = b + an / c;
            if c.abs() < ERFC_TINY {
                c = ERFC_TINY;
            }
            d = 1.0 / d;
            let delta = d * c;
            h *= delta;
            if (delta - 1.0).abs() < ERFC_EPS {
                break;
            }
        }
        prefactor * h
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Point;

    /// Answers a fixed prediction per candidate index.
    struct Fixed(Vec<Prediction>);

    impl Surrogate for Fixed {
        fn train(&mut self, _history: &History) -> Result<()> {
            Ok(())
        }

        fn predict(&self, candidate: Candidate<'_>) -> Result<Prediction> {
            Ok(self.0[candidate.index])
        }
    }

    fn space(n: usize) -> Dataset {
        Dataset::with_points(1, (0..n).map(|i| Point::dense(0.0, vec![i as f64]))).unwrap()
    }

    #[test]
    fn zero_std_dev_gives_zero() {
        let ei = ExpectedImprovement::default();
        assert_eq!(ei.expected_improvement(Prediction::new(5.0, 0.0), 0.0), 0.0);
        assert_eq!(ei.expected_improvement(Prediction::new(-5.0, 0.0), 0.0), 0.0);
    }

    #[test]
    fn positive_when_mean_beats_incumbent() {
        let ei = ExpectedImprovement::default();
        let value = ei.expected_improvement(Prediction::new(0.8, 0.1), 0.5);
        assert!(value > 0.29 - 0.01);
        assert!(ei.expected_improvement(Prediction::new(0.2, 1e-3), 0.5) >= 0.0);
    }

    #[test]
    fn unbounded_std_dev_is_infinite() {
        let ei = ExpectedImprovement::default();
        let value = ei.expected_improvement(Prediction::UNINFORMED, NO_INCUMBENT);
        assert!(value.is_infinite());
    }

    fn assert_relative(actual: f64, expected: f64, tolerance: f64) {
        assert!(
            ((actual - expected) / expected).abs() < tolerance,
            "{actual} != {expected}"
        );
    }

    #[test]
    fn normal_helpers_match_known_values() {
        assert_eq!(norm_cdf(0.0), 0.5);
        assert_relative(norm_cdf(1.96), 0.975_002_104_851_779_5, 1e-14);
        assert_relative(norm_cdf(-5.0), 2.866_515_718_791_939e-7, 1e-12);
        assert!((norm_cdf(-1.0) + norm_cdf(1.0) - 1.0).abs() < 1e-14);
        assert!((norm_pdf(0.0) - 0.398_942_280_4).abs() < 1e-9);
        assert_eq!(norm_cdf(f64::NEG_INFINITY), 0.0);
        assert_eq!(norm_cdf(f64::INFINITY), 1.0);
    }

    #[test]
    fn erfc_matches_known_values_on_both_expansions() {
        assert_eq!(erfc(0.0), 1.0);
        assert_relative(erfc(0.5), 0.479_500_122_186_953_5, 1e-14);
        assert_relative(erfc(1.0), 0.157_299_207_050_285_13, 1e-14);
        assert_relative(erfc(2.0), 0.004_677_734_981_047_266, 1e-13);
        assert_relative(erfc(-1.0), 1.842_700_792_949_714_9, 1e-14);
        assert_eq!(erfc(30.0), 0.0);
        assert!(erfc(f64::NAN).is_nan());
    }

    #[test]
    fn deep_tail_keeps_improvement_ordered() {
        let ei = ExpectedImprovement::new(0.0);
        let better = ei.expected_improvement(Prediction::new(-7.94, 1.0), 0.0);
        let worse = ei.expected_improvement(Prediction::new(-8.04, 1.0), 0.0);
        assert!(worse > 0.0);
        assert!(better > worse);

        let mut previous = 0.0;
        for step in 0..=1300 {
            let mean = -10.0 + f64::from(step) * 0.01;
            let value = ei.expected_improvement(Prediction::new(mean, 1.0), 0.0);
            assert!(value > previous, "not increasing at mean {mean}");
            previous = value;
        }
    }

    #[test]
    fn selects_the_maximum() {
        let surrogate = Fixed(vec![
            Prediction::new(0.1, 0.1),
            Prediction::new(0.9, 0.1),
            Prediction::new(0.5, 0.1),
        ]);
        let history = History::new(1);
        let mut rng = fastrand::Rng::with_seed(0);
        let pick = ExpectedImprovement::default()
            .select(&history, &surrogate, &space(3), &[0, 1, 2], &mut rng)
            .unwrap();
        assert_eq!(pick, Some(1));

        // Positions refer to the candidate list, not the space.
        let pick = ExpectedImprovement::default()
            .select(&history, &surrogate, &space(3), &[2, 1], &mut rng)
            .unwrap();
        assert_eq!(pick, Some(1));
    }

    #[test]
    fn ties_are_broken_at_random() {
        let surrogate = Fixed(vec![Prediction::UNINFORMED; 4]);
        let history = History::new(1);
        let mut rng = fastrand::Rng::with_seed(3);
        let mut seen = [false; 4];
        for _ in 0..200 {
            let pick = ExpectedImprovement::default()
                .select(&history, &surrogate, &space(4), &[0, 1, 2, 3], &mut rng)
                .unwrap()
                .unwrap();
            seen[pick] = true;
        }
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn empty_pool_selects_nothing() {
        let surrogate = Fixed(Vec::new());
        let mut rng = fastrand::Rng::with_seed(0);
        let pick = ExpectedImprovement::default()
            .select(&History::new(1), &surrogate, &space(0), &[], &mut rng)
            .unwrap();
        assert_eq!(pick, None);
    }

    #[test]
    fn undefined_scores_are_an_error() {
        let surrogate = Fixed(vec![Prediction::new(f64::NAN, 1.0); 2]);
        let mut rng = fastrand::Rng::with_seed(0);
        let result = ExpectedImprovement::default().select(
            &History::new(1),
            &surrogate,
            &space(2),
            &[0, 1],
            &mut rng,
        );
        assert!(matches!(result, Err(Error::Internal(_))));
    }
}
