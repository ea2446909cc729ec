use rayon::prelude::*;

use crate::{
    parent::ParentSplit,
    record::{GaussianRecord, MixtureLevel},
    spatial::SpatialIndex,
};

/// Kullback-Leibler divergence `KL(child || parent)` between two Gaussians.
///
/// Returns `f64::INFINITY` when the parent covariance is singular and may
/// return NaN or infinity for a degenerate child; callers treat any
/// non-finite value as a rejection.
pub fn kl_divergence(child: &GaussianRecord, parent: &GaussianRecord) -> f64 {
    let Some(parent_precision) = parent.covariance.inverse() else {
        return f64::INFINITY;
    };
    let diff = child.position - parent.position;
    let smd = parent_precision.quadratic_form(diff);
    let trace = parent_precision.trace_of_product(&child.covariance);
    let log_det_ratio =
        (child.covariance.determinant() / parent.covariance.determinant()).ln();
    0.5 * (smd + trace - 3.0 - log_det_ratio)
}

/// Selects, for every parent of a level, the children it may absorb.
#[derive(Debug, Clone, Copy)]
pub struct ChildAssigner {
    distance_delta: f64,
    color_delta: f64,
    max_neighbors: usize,
}

impl ChildAssigner {
    /// Create an assigner.
    ///
    /// # Arguments
    ///
    /// * `distance_delta` - Scale of the search radius and of the KL acceptance threshold.
    /// * `color_delta` - Scale of the color acceptance threshold.
    /// * `max_neighbors` - Number of nearest neighbors queried per parent.
    pub fn new(distance_delta: f64, color_delta: f64, max_neighbors: usize) -> Self {
        Self {
            distance_delta,
            color_delta,
            max_neighbors,
        }
    }

    /// Conservative Euclidean search radius around `parent`.
    ///
    /// Zero when the largest covariance eigenvalue is not positive or not finite.
    pub fn search_radius(&self, parent: &GaussianRecord) -> f64 {
        let largest = parent.covariance.eigenvalues().z;
        if !largest.is_finite() || largest <= 0.0 {
            return 0.0;
        }
        let radius = self.distance_delta * largest.sqrt();
        if radius.is_finite() {
            radius
        } else {
            0.0
        }
    }

    /// Whether `child` passes the color and KL tests against `parent`.
    pub fn accepts(&self, parent: &GaussianRecord, child: &GaussianRecord) -> bool {
        let color_threshold = 0.5 * self.color_delta * self.color_delta;
        let color_distance = child.color.distance(parent.color);
        if color_distance.is_nan() || color_distance > color_threshold {
            return false;
        }
        let kl_threshold = 0.5 * self.distance_delta * self.distance_delta;
        kl_divergence(child, parent) <= kl_threshold
    }

    /// Compute the candidate list of every parent of `split`.
    ///
    /// Lists are returned in the order of [`ParentSplit::parents`]. Each list
    /// starts with the parent itself followed by the accepted non-parents,
    /// closest first. Other parents are never candidates.
    pub fn assign(
        &self,
        level: &MixtureLevel,
        index: &SpatialIndex,
        split: &ParentSplit,
    ) -> Vec<Vec<usize>> {
        split
            .parents()
            .par_iter()
            .map(|&p| self.candidates(level, index, split, p))
            .collect()
    }

    fn candidates(
        &self,
        level: &MixtureLevel,
        index: &SpatialIndex,
        split: &ParentSplit,
        p: usize,
    ) -> Vec<usize> {
        let parent = &level[p];
        let mut children = vec![p];

        let radius = self.search_radius(parent);
        if radius == 0.0 {
            return children;
        }

        let query = parent.position.to_array();
        children.extend(
            index
                .knn_within(&query, self.max_neighbors, radius)
                .into_iter()
                .map(|nn| nn.index)
                .filter(|&c| c != p && !split.is_parent(c))
                .filter(|&c| self.accepts(parent, &level[c])),
        );
        children
    }
}
