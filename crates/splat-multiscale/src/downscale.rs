use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use splat_mixture::{MixtureError, MixtureLevel, MomentAccumulator, Pyramid};

use crate::error::HemError;

/// Voxel sizes of a voxel-downscaled schedule, coarsest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoxelParams {
    /// Edge length of the cubic voxels of every scale.
    pub voxel_sizes: Vec<f64>,
}

impl VoxelParams {
    /// Create the parameters.
    ///
    /// # Errors
    ///
    /// Returns [`MixtureError::InvalidParameter`] if a voxel size is not positive and finite.
    pub fn new(voxel_sizes: Vec<f64>) -> Result<Self, MixtureError> {
        if let Some(&size) = voxel_sizes
            .iter()
            .find(|size| !size.is_finite() || **size <= 0.0)
        {
            return Err(MixtureError::InvalidParameter {
                name: "voxel_size",
                value: size,
                reason: "must be positive and finite",
            });
        }
        Ok(Self { voxel_sizes })
    }
}

/// How the coarser scales of a multiscale schedule are produced.
#[derive(Debug, Clone)]
pub enum DownscaleStrategy {
    /// Merge the Gaussians falling into the same voxel.
    Voxel(VoxelParams),
    /// Use the levels of a prebuilt mixture pyramid.
    Mixture(Pyramid),
}

impl DownscaleStrategy {
    /// Number of scales the strategy provides.
    pub fn num_scales(&self) -> usize {
        match self {
            DownscaleStrategy::Voxel(params) => params.voxel_sizes.len(),
            DownscaleStrategy::Mixture(pyramid) => pyramid.len(),
        }
    }
}

/// One scale of a multiscale schedule.
#[derive(Debug, Clone, PartialEq)]
pub struct ScaleStep {
    /// The mixture at this scale.
    pub level: MixtureLevel,
    /// Iteration budget of the consumer at this scale.
    pub max_iterations: usize,
}

/// Coarse-to-fine sequence of scales with an iteration budget each.
#[derive(Debug, Clone)]
pub struct MultiscaleSchedule {
    strategy: DownscaleStrategy,
    iterations: Vec<usize>,
}

impl MultiscaleSchedule {
    /// Create a schedule.
    ///
    /// # Arguments
    ///
    /// * `strategy` - Source of the scales.
    /// * `iterations` - One iteration budget per scale, coarsest first.
    ///
    /// # Errors
    ///
    /// Returns [`HemError::ScaleCountMismatch`] if the number of budgets differs
    /// from the number of scales.
    pub fn new(strategy: DownscaleStrategy, iterations: Vec<usize>) -> Result<Self, HemError> {
        let scales = strategy.num_scales();
        if scales != iterations.len() {
            return Err(HemError::ScaleCountMismatch {
                scales,
                iterations: iterations.len(),
            });
        }
        Ok(Self {
            strategy,
            iterations,
        })
    }

    /// The strategy of the schedule.
    pub fn strategy(&self) -> &DownscaleStrategy {
        &self.strategy
    }

    /// Number of scales.
    pub fn len(&self) -> usize {
        self.iterations.len()
    }

    /// Check if the schedule has no scale.
    pub fn is_empty(&self) -> bool {
        self.iterations.is_empty()
    }

    /// Materialize the scales, coarsest first.
    ///
    /// Voxel schedules downscale `source`; mixture schedules read their own
    /// pyramid from its coarsest level to level 0 and ignore `source`.
    pub fn steps(&self, source: &MixtureLevel) -> Vec<ScaleStep> {
        match &self.strategy {
            DownscaleStrategy::Voxel(params) => params
                .voxel_sizes
                .iter()
                .zip(&self.iterations)
                .map(|(&size, &max_iterations)| ScaleStep {
                    level: voxel_downscale(source, size),
                    max_iterations,
                })
                .collect(),
            DownscaleStrategy::Mixture(pyramid) => pyramid
                .levels()
                .iter()
                .rev()
                .zip(&self.iterations)
                .map(|(level, &max_iterations)| ScaleStep {
                    level: level.clone(),
                    max_iterations,
                })
                .collect(),
        }
    }

    /// Thread a state through every scale, coarsest first.
    ///
    /// This is the driver loop of a multiscale consumer such as a registration:
    /// the state of one scale (e.g. the current transformation) seeds the next.
    /// Stops at the first error.
    pub fn run<S, E>(
        &self,
        source: &MixtureLevel,
        init: S,
        mut step: impl FnMut(S, &ScaleStep) -> Result<S, E>,
    ) -> Result<S, E> {
        let mut state = init;
        for (scale, scale_step) in self.steps(source).iter().enumerate() {
            log::debug!(
                "scale {scale}: {} records, {} iterations",
                scale_step.level.len(),
                scale_step.max_iterations
            );
            state = step(state, scale_step)?;
        }
        Ok(state)
    }
}

/// Merge the Gaussians of every voxel of edge `voxel_size` into one moment-matched Gaussian.
///
/// Voxels are emitted in the order of their first record.
pub fn voxel_downscale(level: &MixtureLevel, voxel_size: f64) -> MixtureLevel {
    let mut slots: HashMap<(i64, i64, i64), usize> = HashMap::new();
    let mut voxels: Vec<MomentAccumulator> = Vec::new();

    for record in level.iter() {
        let key = (
            (record.position.x / voxel_size).floor() as i64,
            (record.position.y / voxel_size).floor() as i64,
            (record.position.z / voxel_size).floor() as i64,
        );
        let slot = *slots.entry(key).or_insert_with(|| {
            voxels.push(MomentAccumulator::new(record.position));
            voxels.len() - 1
        });
        voxels[slot].add(record, 1.0);
    }

    let mut conditioned = 0;
    let records: MixtureLevel = voxels
        .iter()
        .filter_map(MomentAccumulator::finish)
        .map(|(record, was_conditioned)| {
            conditioned += was_conditioned as usize;
            record
        })
        .collect();

    log::debug!(
        "voxel size {voxel_size}: {} -> {} records ({conditioned} conditioned)",
        level.len(),
        records.len()
    );
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use glam::DVec3;
    use splat_mixture::{GaussianRecord, SymMat3};

    fn level(xs: &[f64]) -> MixtureLevel {
        xs.iter()
            .map(|&x| {
                GaussianRecord::new(
                    DVec3::new(x, 0.5, 0.5),
                    SymMat3::from_diagonal(DVec3::splat(0.01)),
                    DVec3::splat(0.2),
                    1.0,
                )
            })
            .collect()
    }

    #[test]
    fn test_voxel_params_rejects_non_positive() {
        assert!(VoxelParams::new(vec![1.0, 0.0]).is_err());
        assert!(VoxelParams::new(vec![f64::NAN]).is_err());
    }

    #[test]
    fn test_voxel_downscale_merges_per_voxel() {
        let source = level(&[0.2, 0.4, 1.5, 0.6]);
        let coarse = voxel_downscale(&source, 1.0);

        assert_eq!(coarse.len(), 2);
        assert_relative_eq!(coarse[0].weight, 3.0, epsilon = 1e-12);
        assert_relative_eq!(coarse[0].position.x, 0.4, epsilon = 1e-12);
        // 0.01 plus the variance of {0.2, 0.4, 0.6}
        assert_relative_eq!(coarse[0].covariance.xx, 0.01 + 0.08 / 3.0, epsilon = 1e-12);
        assert_relative_eq!(coarse[0].covariance.yy, 0.01, epsilon = 1e-12);
        assert_eq!(coarse[1], source[2]);
        assert_relative_eq!(coarse.total_weight(), source.total_weight(), epsilon = 1e-12);
    }

    #[test]
    fn test_schedule_count_mismatch() -> Result<(), MixtureError> {
        let strategy = DownscaleStrategy::Voxel(VoxelParams::new(vec![2.0, 1.0])?);
        let result = MultiscaleSchedule::new(strategy, vec![50]);
        assert!(matches!(
            result,
            Err(HemError::ScaleCountMismatch {
                scales: 2,
                iterations: 1
            })
        ));
        Ok(())
    }

    #[test]
    fn test_mixture_schedule_is_coarse_to_fine() -> Result<(), HemError> {
        let fine = level(&[0.0, 1.0, 2.0]);
        let coarse = level(&[1.0]);
        let pyramid = Pyramid::new(vec![fine.clone(), coarse.clone()]);
        let schedule = MultiscaleSchedule::new(DownscaleStrategy::Mixture(pyramid), vec![30, 10])?;

        let steps = schedule.steps(&MixtureLevel::default());
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].level, coarse);
        assert_eq!(steps[0].max_iterations, 30);
        assert_eq!(steps[1].level, fine);
        assert_eq!(steps[1].max_iterations, 10);
        Ok(())
    }

    #[test]
    fn test_run_threads_state() -> Result<(), HemError> {
        let strategy = DownscaleStrategy::Voxel(VoxelParams::new(vec![4.0, 1.0, 0.1])?);
        let schedule = MultiscaleSchedule::new(strategy, vec![1, 2, 3])?;
        let source = level(&[0.05, 0.5, 1.5, 2.5, 3.5]);

        let sizes = schedule.run(&source, Vec::new(), |mut sizes, step| {
            sizes.push((step.level.len(), step.max_iterations));
            Ok::<_, HemError>(sizes)
        })?;
        assert_eq!(sizes, vec![(1, 1), (4, 2), (5, 3)]);
        Ok(())
    }
}
