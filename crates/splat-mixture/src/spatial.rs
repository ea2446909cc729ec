use std::num::NonZeroUsize;

use kiddo::immutable::float::kdtree::ImmutableKdTree;
use kiddo::SquaredEuclidean;

use crate::error::MixtureError;

/// A neighbor returned by a [`SpatialIndex`] query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    /// Index of the record in the indexed level.
    pub index: usize,
    /// Squared Euclidean distance to the query point.
    pub distance_sq: f64,
}

/// Nearest neighbor index over the positions of one mixture level.
///
/// The index is read-only once built and can be queried from many threads.
/// An empty level gives an empty index that never returns candidates.
pub struct SpatialIndex {
    kdtree: Option<ImmutableKdTree<f64, u32, 3, 32>>,
    len: usize,
}

impl SpatialIndex {
    /// Largest number of points an index can hold. Items are stored as `u32`.
    pub const MAX_LEN: usize = u32::MAX as usize;

    /// Check that a level of `len` records can be indexed.
    ///
    /// # Errors
    ///
    /// Returns [`MixtureError::TooManyRecords`] above [`SpatialIndex::MAX_LEN`].
    pub fn check_len(len: usize) -> Result<(), MixtureError> {
        if len > Self::MAX_LEN {
            return Err(MixtureError::TooManyRecords {
                len,
                max: Self::MAX_LEN,
            });
        }
        Ok(())
    }

    /// Build the index over `positions`.
    ///
    /// At most [`SpatialIndex::MAX_LEN`] points are supported; callers check
    /// the length with [`SpatialIndex::check_len`] when a level is created.
    pub fn new(positions: &[[f64; 3]]) -> Self {
        debug_assert!(positions.len() <= Self::MAX_LEN);
        let kdtree = (!positions.is_empty()).then(|| ImmutableKdTree::new_from_slice(positions));
        Self {
            kdtree,
            len: positions.len(),
        }
    }

    /// Number of indexed points.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if the index has no points.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Find the `k` nearest neighbors of `query`, closest first.
    pub fn knn(&self, query: &[f64; 3], k: usize) -> Vec<Neighbor> {
        let (Some(kdtree), Some(k)) = (&self.kdtree, NonZeroUsize::new(k)) else {
            return Vec::new();
        };
        let mut neighbors = kdtree
            .nearest_n::<SquaredEuclidean>(query, k)
            .into_iter()
            .map(|nn| Neighbor {
                index: nn.item as usize,
                distance_sq: nn.distance,
            })
            .collect::<Vec<_>>();
        sort_neighbors(&mut neighbors);
        neighbors
    }

    /// Find all neighbors within `radius` of `query`, closest first.
    pub fn radius(&self, query: &[f64; 3], radius: f64) -> Vec<Neighbor> {
        let Some(kdtree) = &self.kdtree else {
            return Vec::new();
        };
        if radius.is_nan() || radius < 0.0 {
            return Vec::new();
        }
        let mut neighbors = kdtree
            .within_unsorted::<SquaredEuclidean>(query, radius * radius)
            .into_iter()
            .map(|nn| Neighbor {
                index: nn.item as usize,
                distance_sq: nn.distance,
            })
            .collect::<Vec<_>>();
        sort_neighbors(&mut neighbors);
        neighbors
    }

    /// Find up to `k` nearest neighbors of `query` that lie within `radius`.
    pub fn knn_within(&self, query: &[f64; 3], k: usize, radius: f64) -> Vec<Neighbor> {
        if radius.is_nan() || radius < 0.0 {
            return Vec::new();
        }
        let radius_sq = radius * radius;
        let mut neighbors = self.knn(query, k);
        neighbors.retain(|nn| nn.distance_sq <= radius_sq);
        neighbors
    }
}

// order by distance, ties by index so results do not depend on the tree layout
fn sort_neighbors(neighbors: &mut [Neighbor]) {
    neighbors.sort_by(|a, b| {
        a.distance_sq
            .total_cmp(&b.distance_sq)
            .then(a.index.cmp(&b.index))
    });
}
