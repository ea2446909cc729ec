use splat_mixture::MixtureError;

/// Error types for mixture creation and multiscale scheduling.
#[derive(Debug, thiserror::Error)]
pub enum HemError {
    /// The reduction engine rejected its input or configuration.
    #[error("Mixture reduction error: {0}")]
    Mixture(#[from] MixtureError),

    /// A point cloud attribute holds NaN or infinity, or a weight is not positive.
    #[error("Invalid {field} at record {index}: must be finite")]
    NonFiniteInput {
        /// Index of the offending record.
        index: usize,
        /// Name of the offending attribute.
        field: &'static str,
    },

    /// The number of scales does not match the number of iteration budgets.
    #[error("Number of scales ({scales}) does not match number of iteration budgets ({iterations})")]
    ScaleCountMismatch {
        /// Number of scales of the downscale strategy.
        scales: usize,
        /// Number of iteration budgets.
        iterations: usize,
    },
}
