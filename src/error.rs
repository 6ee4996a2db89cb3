#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Returned when a sparse point has a different number of keys and values.
    #[error("length mismatch: {keys} keys but {values} values")]
    LengthMismatch {
        /// The number of keys supplied.
        keys: usize,
        /// The number of values supplied.
        values: usize,
    },

    /// Returned when the keys of a sparse point are not strictly increasing.
    #[error("sparse keys must be strictly increasing")]
    UnsortedKeys,

    /// Returned when a point references an attribute outside its dataset.
    #[error("key {key} is out of range: the dataset declares {num_values} attributes")]
    KeyOutOfRange {
        /// The offending key.
        key: usize,
        /// The declared attribute count of the dataset.
        num_values: usize,
    },

    /// Returned when a bulk target overwrite has the wrong length.
    #[error("target count mismatch: expected {expected} targets but got {got}")]
    TargetCountMismatch {
        /// The number of points that need a target.
        expected: usize,
        /// The number of targets supplied.
        got: usize,
    },

    /// Returned when two collaborating objects disagree on a dimensionality.
    #[error("dimension mismatch: expected {expected} but got {got}")]
    DimensionMismatch {
        /// The expected dimensionality.
        expected: usize,
        /// The actual dimensionality.
        got: usize,
    },

    /// Returned when a model operation requires a trained model.
    #[error("model has not been trained")]
    NotTrained,

    /// Returned when the jittered Cholesky factorization keeps failing.
    #[error("gram matrix is not positive definite after {attempts} jitter attempts")]
    JitterExhausted {
        /// The number of factorization attempts made.
        attempts: usize,
    },

    /// Returned when an online update would produce a non-positive pivot.
    #[error("extended gram matrix is not positive definite")]
    NotPositiveDefinite,

    /// Returned when the gram matrix cannot be inverted.
    #[error("gram matrix is singular")]
    SingularMatrix,

    /// Returned when a similarity bandwidth is not positive.
    #[error("invalid bandwidth: {0} must be positive")]
    InvalidBandwidth(f64),

    /// Returned when an operation needs at least one point.
    #[error("dataset is empty")]
    EmptyDataset,

    /// Returned when a candidate index has no cached prediction.
    #[error("candidate {0} is not part of the search space")]
    UnknownCandidate(usize),

    /// Returned when the target dataset is missing from the data directory.
    #[error("data set '{name}' does not exist in {dir}")]
    MissingDataset {
        /// The requested file name.
        name: String,
        /// The searched directory.
        dir: String,
    },

    /// Returned when a dataset file contains a malformed line.
    #[error("parse error on line {line}: {message}")]
    Parse {
        /// The 1-based line number.
        line: usize,
        /// What went wrong.
        message: String,
    },

    /// Returned when reading or writing a dataset file fails.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Returned when an internal invariant is violated.
    #[error("internal error: {0}")]
    Internal(&'static str),
}

pub type Result<T> = core::result::Result<T, Error>;
