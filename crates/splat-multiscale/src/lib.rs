#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// Gaussian point clouds exchanged with callers.
pub mod cloud;

/// Voxel and mixture downscaling for multiscale consumers.
pub mod downscale;

/// Error types for mixture creation.
pub mod error;

/// Concurrent creation of the pyramids of two clouds.
pub mod service;

pub use cloud::{Covariances, GaussianCloud};
pub use downscale::{DownscaleStrategy, MultiscaleSchedule, ScaleStep, VoxelParams};
pub use error::HemError;
pub use service::{
    CreationOutcome, CreationRequest, MixtureCreationService, MixturePyramids, MixtureSide,
};
pub use splat_mixture::{CancelToken, HemConfig};
