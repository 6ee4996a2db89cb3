#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![deny(unreachable_pub)]
#![deny(clippy::correctness)]
#![deny(clippy::suspicious)]
#![deny(clippy::style)]
#![deny(clippy::complexity)]
#![deny(clippy::perf)]
#![deny(clippy::pedantic)]
#![deny(clippy::std_instead_of_core)]

//! Sequential model-based optimization (SMBO) over finite search spaces, with
//! Gaussian Process surrogates and a two-stage transfer surrogate that reuses
//! models trained on related tasks.
//!
//! The search space is a [`Dataset`](dataset::Dataset) whose targets are
//! already known; the optimizer only looks at a target once it has selected
//! the point, which makes it a cheap benchmark for hyperparameter-optimization
//! strategies.
//!
//! # Getting Started
//!
//! ```
//! use transfer_smbo::prelude::*;
//!
//! let space = Dataset::with_points(
//!     1,
//!     (0..10).map(|i| {
//!         let x = f64::from(i);
//!         Point::dense(-(x - 6.0).powi(2), vec![x])
//!     }),
//! )
//! .unwrap();
//!
//! let mut smbo = Smbo::with_seed(space, GpSurrogate::default(), 0);
//! for _ in 0..10 {
//!     smbo.iterate().unwrap();
//! }
//! assert_eq!(smbo.best_rank(), Some(1));
//! ```
//!
//! # Core Concepts
//!
//! | Type | Role |
//! |------|------|
//! | [`Point`](dataset::Point) / [`Dataset`](dataset::Dataset) | Sparse or dense labelled vectors and collections of them. |
//! | [`Kernel`](kernel::Kernel) | Squared-exponential covariance, isotropic or per-dimension (ARD), with AdaGrad learning. |
//! | [`GaussianProcess`](gp::GaussianProcess) | Exact GP regression with online updates. |
//! | [`Surrogate`](surrogate::Surrogate) | Model refit after every step: [`GpSurrogate`](surrogate::GpSurrogate) or [`TwoStageSurrogate`](surrogate::TwoStageSurrogate). |
//! | [`Acquisition`](acquisition::Acquisition) | Picks the next candidate, by default [`ExpectedImprovement`](acquisition::ExpectedImprovement). |
//! | [`Smbo`](smbo::Smbo) | The optimization loop. |
//! | [`Experiment`](experiment::Experiment) | Repeated runs over a directory of tasks with per-step statistics. |
//!
//! # Feature Flags
//!
//! | Flag | What it enables | Default |
//! |------|----------------|---------|
//! | `serde` | `Serialize`/`Deserialize` on public data types, [`Report::to_json`](experiment::Report::to_json) | off |
//! | `tracing` | Structured log events via [`tracing`](https://docs.rs/tracing) at key points | off |
//! | `cli` | The `transfer-smbo` binary (enables `serde` and `tracing`) | off |

/// Emit a `tracing::info!` event when the `tracing` feature is enabled.
/// No-op otherwise.
#[cfg(feature = "tracing")]
macro_rules! trace_info {
    ($($arg:tt)*) => { tracing::info!($($arg)*) };
}

#[cfg(not(feature = "tracing"))]
macro_rules! trace_info {
    ($($arg:tt)*) => {};
}

/// Emit a `tracing::debug!` event when the `tracing` feature is enabled.
/// No-op otherwise.
#[cfg(feature = "tracing")]
macro_rules! trace_debug {
    ($($arg:tt)*) => { tracing::debug!($($arg)*) };
}

#[cfg(not(feature = "tracing"))]
macro_rules! trace_debug {
    ($($arg:tt)*) => {};
}

pub mod acquisition;
pub mod dataset;
mod error;
pub mod experiment;
pub mod gp;
pub mod kernel;
mod linalg;
pub mod smbo;
pub mod surrogate;
mod types;

pub use error::{Error, Result};
pub use types::{Candidate, Prediction};

/// Convenient wildcard import for the most common types.
///
/// ```
/// use transfer_smbo::prelude::*;
/// ```
pub mod prelude {
    pub use crate::acquisition::{Acquisition, ExpectedImprovement};
    pub use crate::dataset::{Dataset, Point, TextFormat};
    pub use crate::error::{Error, Result};
    pub use crate::experiment::{Experiment, ExperimentConfig, Report, SurrogateKind};
    pub use crate::gp::GaussianProcess;
    pub use crate::kernel::{ArdSquaredExponential, Kernel, SquaredExponential};
    pub use crate::smbo::{History, Smbo};
    pub use crate::surrogate::{
        GpSurrogate, Similarity, Surrogate, TaskEnsemble, TwoStageSurrogate,
    };
    pub use crate::types::{Candidate, Prediction};
}
