use glam::DVec3;
use rayon::prelude::*;

use crate::{
    linalg::SymMat3,
    parent::ParentSplit,
    record::{GaussianRecord, MixtureLevel},
};

/// Upper clamp of a likelihood contribution.
pub const MAX_LIKELIHOOD: f64 = 1e8;

/// Lower clamp of a likelihood contribution.
pub const MIN_LIKELIHOOD: f64 = f64::MIN_POSITIVE;

// 1 / (2 pi)^(3/2)
const GAUSSIAN_NORM: f64 = 0.063_493_635_934_240_97;

/// Likelihood of `child` under `parent`, raised to the child's weight.
///
/// Evaluates the normal density of the parent at the child's mean, damped by
/// the trace term `trace(parent_cov^-1 * child_cov)` so that the spread of the
/// child is accounted for. A singular parent covariance gives zero, and so
/// does any NaN produced on the way.
pub fn hem_likelihood(parent: &GaussianRecord, child: &GaussianRecord) -> f64 {
    let det = parent.covariance.determinant();
    if !det.is_finite() || det <= 0.0 {
        return 0.0;
    }
    let Some(precision) = parent.covariance.inverse() else {
        return 0.0;
    };

    let diff = parent.position - child.position;
    let smd = precision.quadratic_form(diff);
    let trace = precision.trace_of_product(&child.covariance);

    let exponent = -0.5 * (smd + trace);
    let density = GAUSSIAN_NORM * precision.determinant().sqrt() * exponent.exp();
    let likelihood = density.powf(child.weight);

    if likelihood.is_nan() {
        0.0
    } else {
        likelihood
    }
}

/// Weighted and clamped likelihood contribution `w_parent * L(child | parent)`.
///
/// The result is always finite and strictly positive.
pub fn weighted_likelihood(parent: &GaussianRecord, child: &GaussianRecord) -> f64 {
    let likelihood = hem_likelihood(parent, child).clamp(MIN_LIKELIHOOD, MAX_LIKELIHOOD);
    let weighted = parent.weight * likelihood;
    if weighted > 0.0 && weighted.is_finite() {
        weighted
    } else {
        MIN_LIKELIHOOD
    }
}

/// Counters of a single reduction pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReductionStats {
    /// Number of parents, i.e. merged output records.
    pub parents: usize,
    /// Non-parents claimed by at least one parent.
    pub claimed: usize,
    /// Records copied unchanged because no parent claimed them.
    pub pass_through: usize,
    /// Merged covariances shifted back to positive semi-definite.
    pub conditioned: usize,
}

/// Output of [`ResponsibilityAggregator::reduce`].
#[derive(Debug, Clone)]
pub struct Reduction {
    /// The next, coarser level.
    pub level: MixtureLevel,
    /// Counters of the pass.
    pub stats: ReductionStats,
}

/// Likelihood contributions of one pass.
#[derive(Debug, Clone)]
pub struct LikelihoodTable {
    /// Contribution of every candidate, aligned with the candidate lists.
    pub contributions: Vec<Vec<f64>>,
    /// Per record sum of the contributions of all parents listing it.
    pub sum_lw: Vec<f64>,
}

/// Single hierarchical EM merging pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResponsibilityAggregator;

impl ResponsibilityAggregator {
    /// Create the aggregator.
    pub fn new() -> Self {
        Self
    }

    /// Compute the likelihood of every (parent, candidate) pair and the per-record sums.
    ///
    /// # Arguments
    ///
    /// * `level` - The level being reduced.
    /// * `parents` - Parent indices, aligned with `candidates`.
    /// * `candidates` - Candidate list of each parent.
    pub fn likelihoods(
        &self,
        level: &MixtureLevel,
        parents: &[usize],
        candidates: &[Vec<usize>],
    ) -> LikelihoodTable {
        let contributions = parents
            .par_iter()
            .zip(candidates.par_iter())
            .map(|(&p, children)| {
                let parent = &level[p];
                children
                    .iter()
                    .map(|&c| weighted_likelihood(parent, &level[c]))
                    .collect::<Vec<_>>()
            })
            .collect::<Vec<_>>();

        // sequential so the sums do not depend on the thread schedule
        let mut sum_lw = vec![0.0; level.len()];
        for (children, lws) in candidates.iter().zip(contributions.iter()) {
            for (&c, &lw) in children.iter().zip(lws.iter()) {
                sum_lw[c] += lw;
            }
        }

        LikelihoodTable {
            contributions,
            sum_lw,
        }
    }

    /// Merge every parent with its candidates and build the next level.
    ///
    /// The merged parents come first, in parent order, followed by the records
    /// that were neither a parent nor claimed, in their original order.
    pub fn reduce(
        &self,
        level: &MixtureLevel,
        split: &ParentSplit,
        candidates: &[Vec<usize>],
    ) -> Reduction {
        let parents = split.parents();
        let table = self.likelihoods(level, parents, candidates);

        let merged = parents
            .par_iter()
            .zip(candidates.par_iter())
            .zip(table.contributions.par_iter())
            .map(|((&p, children), lws)| merge_parent(level, p, children, lws, &table.sum_lw))
            .collect::<Vec<_>>();

        let mut stats = ReductionStats {
            parents: parents.len(),
            ..Default::default()
        };

        let mut records = Vec::with_capacity(level.len());
        for (record, conditioned) in merged {
            stats.conditioned += conditioned as usize;
            records.push(record);
        }

        for (i, record) in level.iter().enumerate() {
            if split.is_parent(i) {
                continue;
            }
            if table.sum_lw[i] == 0.0 {
                records.push(*record);
                stats.pass_through += 1;
            } else {
                stats.claimed += 1;
            }
        }

        Reduction {
            level: MixtureLevel::new(records),
            stats,
        }
    }
}

/// Weighted first and second moments of a set of Gaussians.
///
/// Spread is accumulated relative to `origin`, which should lie close to the
/// merged records to keep the differences small.
#[derive(Debug, Clone, Copy)]
pub struct MomentAccumulator {
    origin: DVec3,
    weight: f64,
    position: DVec3,
    color: DVec3,
    covariance: SymMat3,
    opacity: f64,
}

impl MomentAccumulator {
    /// Create an empty accumulator centered at `origin`.
    pub fn new(origin: DVec3) -> Self {
        Self {
            origin,
            weight: 0.0,
            position: DVec3::ZERO,
            color: DVec3::ZERO,
            covariance: SymMat3::ZERO,
            opacity: 0.0,
        }
    }

    /// Add `record` with the given responsibility.
    ///
    /// Contributions with a non-finite effective weight are ignored.
    pub fn add(&mut self, record: &GaussianRecord, responsibility: f64) {
        let w = responsibility * record.weight;
        if !w.is_finite() {
            return;
        }
        let offset = record.position - self.origin;
        self.weight += w;
        self.position += w * record.position;
        self.color += w * record.color;
        self.covariance += w * (record.covariance + SymMat3::outer(offset));
        self.opacity += w * record.opacity;
    }

    /// Accumulated weight.
    pub fn weight(&self) -> f64 {
        self.weight
    }

    /// The moment-matched Gaussian and whether its covariance had to be
    /// conditioned back to positive semi-definite.
    ///
    /// `None` if the accumulated weight is not positive.
    pub fn finish(&self) -> Option<(GaussianRecord, bool)> {
        if self.weight.is_nan() || self.weight <= 0.0 {
            return None;
        }
        let inv_weight = 1.0 / self.weight;
        let position = inv_weight * self.position;
        let covariance =
            inv_weight * self.covariance - SymMat3::outer(position - self.origin);
        let (covariance, conditioned) = covariance.condition_psd();

        let merged = GaussianRecord {
            position,
            covariance,
            color: inv_weight * self.color,
            opacity: inv_weight * self.opacity,
            weight: self.weight,
        };
        Some((merged, conditioned))
    }
}

// Returns the merged record and whether its covariance had to be conditioned.
fn merge_parent(
    level: &MixtureLevel,
    p: usize,
    children: &[usize],
    lws: &[f64],
    sum_lw: &[f64],
) -> (GaussianRecord, bool) {
    let parent = level[p];
    if children.iter().all(|&c| c == p) {
        return (parent, false);
    }

    let mut moments = MomentAccumulator::new(parent.position);
    for (&c, &lw) in children.iter().zip(lws.iter()) {
        if sum_lw[c] == 0.0 {
            continue;
        }
        moments.add(&level[c], lw / sum_lw[c]);
    }

    match moments.finish() {
        Some((merged, conditioned)) if merged.is_finite() => (merged, conditioned),
        Some(_) => {
            log::warn!("merged record of parent {p} is not finite, keeping the parent");
            (parent.with_weight(moments.weight()), false)
        }
        None => (parent, false),
    }
}
