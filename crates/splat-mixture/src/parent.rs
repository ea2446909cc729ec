use rand::Rng;

use crate::error::MixtureError;

/// Partition of a level's indices into parents and non-parents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentSplit {
    parents: Vec<usize>,
    non_parents: Vec<usize>,
    is_parent: Vec<bool>,
}

impl ParentSplit {
    /// Build the split from one flag per index.
    pub fn from_flags(is_parent: Vec<bool>) -> Self {
        let (parents, non_parents): (Vec<usize>, Vec<usize>) =
            (0..is_parent.len()).partition(|&i| is_parent[i]);
        Self {
            parents,
            non_parents,
            is_parent,
        }
    }

    /// Indices selected as parents, ascending.
    pub fn parents(&self) -> &[usize] {
        &self.parents
    }

    /// Indices not selected as parents, ascending.
    pub fn non_parents(&self) -> &[usize] {
        &self.non_parents
    }

    /// Whether `index` was selected as a parent.
    #[inline]
    pub fn is_parent(&self, index: usize) -> bool {
        self.is_parent.get(index).copied().unwrap_or(false)
    }

    /// Total number of indices covered by the split.
    #[inline]
    pub fn len(&self) -> usize {
        self.is_parent.len()
    }

    /// Check if the split covers no index.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.is_parent.is_empty()
    }
}

/// Randomized parent selection for one HEM level.
///
/// Each index becomes a parent independently with probability `1 / reduction_factor`.
#[derive(Debug, Clone, Copy)]
pub struct ParentSelector {
    probability: f64,
}

impl ParentSelector {
    /// Create a selector for the given reduction factor.
    ///
    /// # Errors
    ///
    /// Returns [`MixtureError::InvalidParameter`] unless `reduction_factor > 1`.
    pub fn new(reduction_factor: f64) -> Result<Self, MixtureError> {
        if reduction_factor.is_nan() || reduction_factor <= 1.0 {
            return Err(MixtureError::InvalidParameter {
                name: "reduction_factor",
                value: reduction_factor,
                reason: "must be greater than 1",
            });
        }
        Ok(Self {
            probability: 1.0 / reduction_factor,
        })
    }

    /// Probability of an index being selected as parent.
    pub fn probability(&self) -> f64 {
        self.probability
    }

    /// Draw the parent flags for `len` indices from `rng`.
    pub fn select<R: Rng + ?Sized>(&self, len: usize, rng: &mut R) -> ParentSplit {
        let flags = (0..len)
            .map(|_| rng.random::<f64>() < self.probability)
            .collect();
        ParentSplit::from_flags(flags)
    }
}
