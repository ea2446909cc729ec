/// Error types for the mixture reduction engine.
///
/// Degenerate geometry and cancellation are never reported through this type:
/// the former is recovered locally, the latter is a [`crate::BuildOutcome`].
#[derive(Debug, thiserror::Error)]
pub enum MixtureError {
    /// Attribute arrays of a mixture do not have the same length.
    #[error("Mismatched array lengths: {left_name} ({left_len}) != {right_name} ({right_len})")]
    MismatchedArrayLengths {
        /// Label for the left-hand array.
        left_name: &'static str,
        /// Length of the left-hand array.
        left_len: usize,
        /// Label for the right-hand array.
        right_name: &'static str,
        /// Length of the right-hand array.
        right_len: usize,
    },

    /// An index subset refers to a record that does not exist.
    #[error("Index {index} is out of bounds for a mixture of {len} records")]
    IndexOutOfBounds {
        /// The offending index.
        index: usize,
        /// Number of records in the mixture.
        len: usize,
    },

    /// The same record appears in more than one index subset.
    #[error("Index {index} appears in more than one subset")]
    OverlappingSubsets {
        /// The duplicated index.
        index: usize,
    },

    /// A reduction parameter is outside its valid range.
    #[error("Invalid parameter `{name}` = {value}: {reason}")]
    InvalidParameter {
        /// Name of the parameter.
        name: &'static str,
        /// The rejected value.
        value: f64,
        /// What the parameter must satisfy.
        reason: &'static str,
    },

    /// A mixture has more records than the neighbor index can address.
    #[error("Mixture of {len} records exceeds the limit of {max} records")]
    TooManyRecords {
        /// Number of records in the mixture.
        len: usize,
        /// Largest supported number of records.
        max: usize,
    },
}
