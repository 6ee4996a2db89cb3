//! Dense linear algebra for symmetric positive-definite systems.

use nalgebra::{DMatrix, DVector};

use crate::error::{Error, Result};

/// Diagonal jitter of the first factorization attempt.
pub(crate) const INITIAL_JITTER: f64 = 1e-8;
/// Factor applied to the jitter after every failed attempt.
const JITTER_GROWTH: f64 = 1.01;
/// Number of factorization attempts before giving up.
pub(crate) const MAX_JITTER_ATTEMPTS: usize = 10;

/// Outcome of a single Cholesky attempt.
pub(crate) enum Factorization {
    /// Lower-triangular `L` with `K = L Lᵀ`.
    Factorized(DMatrix<f64>),
    NotPositiveDefinite,
}

pub(crate) fn factorize(k: &DMatrix<f64>) -> Factorization {
    match nalgebra::linalg::Cholesky::new(k.clone()) {
        Some(cholesky) => Factorization::Factorized(cholesky.unpack()),
        None => Factorization::NotPositiveDefinite,
    }
}

/// Cholesky factor of `k` after stabilizing its diagonal.
///
/// The jitter is added to `k` in place before every attempt, so on success
/// `k` holds the matrix that was actually factorized. The jitter level
/// starts over at [`INITIAL_JITTER`] on every call.
pub(crate) fn jittered_cholesky(k: &mut DMatrix<f64>) -> Result<DMatrix<f64>> {
    let mut jitter = INITIAL_JITTER;
    for _ in 0..MAX_JITTER_ATTEMPTS {
        for i in 0..k.nrows() {
            k[(i, i)] += jitter;
        }
        match factorize(k) {
            Factorization::Factorized(l) => return Ok(l),
            Factorization::NotPositiveDefinite => {
                trace_debug!(jitter, "gram matrix not positive definite");
                jitter *= JITTER_GROWTH;
            }
        }
    }
    Err(Error::JitterExhausted {
        attempts: MAX_JITTER_ATTEMPTS,
    })
}

/// Solves `L x = b` for lower-triangular `L`.
pub(crate) fn forward_substitute(l: &DMatrix<f64>, b: &DVector<f64>) -> Result<DVector<f64>> {
    l.solve_lower_triangular(b).ok_or(Error::SingularMatrix)
}

/// Solves `L Lᵀ x = b` by a forward and a backward substitution.
pub(crate) fn cholesky_solve(l: &DMatrix<f64>, b: &DVector<f64>) -> Result<DVector<f64>> {
    let y = forward_substitute(l, b)?;
    l.tr_solve_lower_triangular(&y).ok_or(Error::SingularMatrix)
}

/// Inverse of `k` through a fresh LU decomposition.
pub(crate) fn inverse(k: &DMatrix<f64>) -> Result<DMatrix<f64>> {
    k.clone().lu().try_inverse().ok_or(Error::SingularMatrix)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spd() -> DMatrix<f64> {
        DMatrix::from_row_slice(3, 3, &[4.0, 2.0, 0.6, 2.0, 5.0, 1.0, 0.6, 1.0, 3.0])
    }

    #[test]
    fn cholesky_solve_recovers_solution() {
        let mut k = spd();
        let l = jittered_cholesky(&mut k).unwrap();
        let x = DVector::from_vec(vec![1.0, -2.0, 0.5]);
        let b = &k * &x;
        let solved = cholesky_solve(&l, &b).unwrap();
        assert!((solved - x).norm() < 1e-10);
    }

    #[test]
    fn zero_pivot_is_reported() {
        let l = DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 2.0, 0.0]);
        let b = DVector::from_vec(vec![1.0, 1.0]);
        assert!(matches!(forward_substitute(&l, &b), Err(Error::SingularMatrix)));
        assert!(matches!(cholesky_solve(&l, &b), Err(Error::SingularMatrix)));
    }

    #[test]
    fn forward_substitution_ignores_upper_triangle() {
        let mut k = spd();
        let l = jittered_cholesky(&mut k).unwrap();
        let mut polluted = l.clone();
        polluted[(0, 2)] = 7.0;
        let b = DVector::from_vec(vec![0.5, 1.0, -1.5]);
        let x = forward_substitute(&polluted, &b).unwrap();
        assert!((&l * &x - b).norm() < 1e-12);
    }

    #[test]
    fn factor_reconstructs_jittered_matrix() {
        let mut k = spd();
        let l = jittered_cholesky(&mut k).unwrap();
        assert!((&l * l.transpose() - &k).norm() < 1e-10);
        for i in 0..3 {
            for j in i + 1..3 {
                assert_eq!(l[(i, j)], 0.0);
            }
        }
    }

    #[test]
    fn slightly_indefinite_matrix_is_rescued_by_jitter() {
        let mut k = DMatrix::from_row_slice(2, 2, &[1.0, 1.0 + 1e-12, 1.0 + 1e-12, 1.0]);
        assert!(matches!(
            factorize(&k),
            Factorization::NotPositiveDefinite
        ));
        let l = jittered_cholesky(&mut k).unwrap();
        assert!(l[(1, 1)] > 0.0);
        assert!(k[(0, 0)] > 1.0);
    }

    #[test]
    fn negative_definite_matrix_exhausts_jitter() {
        let mut k = DMatrix::from_diagonal_element(2, 2, -1.0);
        assert!(matches!(
            jittered_cholesky(&mut k),
            Err(Error::JitterExhausted { attempts: 10 })
        ));
    }

    #[test]
    fn inverse_of_identity() {
        let inv = inverse(&DMatrix::identity(3, 3)).unwrap();
        assert!((inv - DMatrix::<f64>::identity(3, 3)).norm() < 1e-12);
        assert!(matches!(
            inverse(&DMatrix::zeros(2, 2)),
            Err(Error::SingularMatrix)
        ));
    }
}
