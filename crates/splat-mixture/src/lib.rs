#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// Pyramid construction, cancellation and progress reporting.
pub mod builder;

/// Child selection with color and KL acceptance tests.
pub mod child;

/// Reduction parameters.
pub mod config;

/// Error types for the mixture reduction engine.
pub mod error;

/// Symmetric 3x3 matrices.
pub mod linalg;

/// Randomized parent selection.
pub mod parent;

/// Gaussian records, levels and pyramids.
pub mod record;

/// Likelihoods, responsibilities and moment-matched merging.
pub mod responsibility;

/// Nearest neighbor queries over record positions.
pub mod spatial;

pub use builder::{BuildOutcome, BuildState, CancelToken, MixtureLevelBuilder, Progress};
pub use config::HemConfig;
pub use error::MixtureError;
pub use linalg::SymMat3;
pub use record::{GaussianRecord, MixtureLevel, Pyramid};
pub use responsibility::MomentAccumulator;
