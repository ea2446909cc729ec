use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use rand::Rng;

use crate::{
    child::ChildAssigner,
    config::HemConfig,
    error::MixtureError,
    parent::ParentSelector,
    record::{MixtureLevel, Pyramid},
    responsibility::{Reduction, ResponsibilityAggregator},
    spatial::SpatialIndex,
};

/// Shared flag used to stop a running build at the next level boundary.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Create a token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Every clone of the token observes it.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Lifecycle of a [`MixtureLevelBuilder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildState {
    /// No build started yet.
    Idle,
    /// A build is computing the given level.
    Running {
        /// Level currently being produced.
        level: usize,
    },
    /// The last build produced every level.
    Completed,
    /// The last build stopped at a level boundary.
    Cancelled,
}

/// Result of a build.
#[derive(Debug, Clone)]
pub enum BuildOutcome {
    /// Every level was produced.
    Completed(Pyramid),
    /// The input held no record; nothing was computed.
    Empty,
    /// Cancellation was observed before the last level.
    Cancelled,
}

impl BuildOutcome {
    /// The pyramid of a completed build.
    pub fn pyramid(&self) -> Option<&Pyramid> {
        match self {
            BuildOutcome::Completed(pyramid) => Some(pyramid),
            _ => None,
        }
    }

    /// Consume the outcome and return the pyramid of a completed build.
    pub fn into_pyramid(self) -> Option<Pyramid> {
        match self {
            BuildOutcome::Completed(pyramid) => Some(pyramid),
            _ => None,
        }
    }

    /// Whether the build was cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, BuildOutcome::Cancelled)
    }
}

/// Progress report emitted after level 0 and after every reduction pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    /// Number of completed reduction passes.
    pub completed: usize,
    /// Total number of reduction passes of the build.
    pub total: usize,
}

impl Progress {
    /// Completion in percent.
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 100;
        }
        ((self.completed.min(self.total) * 100) / self.total) as u8
    }
}

/// Check that `subsets` are disjoint selections of a level of `len` records.
///
/// Returns the number of selected records.
///
/// # Errors
///
/// Returns [`MixtureError::IndexOutOfBounds`] or [`MixtureError::OverlappingSubsets`].
pub fn validate_subsets(len: usize, subsets: &[Vec<usize>]) -> Result<usize, MixtureError> {
    let mut seen = HashSet::new();
    for &index in subsets.iter().flatten() {
        if index >= len {
            return Err(MixtureError::IndexOutOfBounds { index, len });
        }
        if !seen.insert(index) {
            return Err(MixtureError::OverlappingSubsets { index });
        }
    }
    Ok(seen.len())
}

/// Builds the level pyramid of a Gaussian mixture by repeated hierarchical EM passes.
pub struct MixtureLevelBuilder {
    config: HemConfig,
    selector: ParentSelector,
    cancel: CancelToken,
    state: BuildState,
}

impl MixtureLevelBuilder {
    /// Create a builder.
    ///
    /// # Errors
    ///
    /// Returns [`MixtureError::InvalidParameter`] if the configuration is invalid.
    pub fn new(config: HemConfig) -> Result<Self, MixtureError> {
        config.validate()?;
        Ok(Self {
            config,
            selector: ParentSelector::new(config.reduction_factor)?,
            cancel: CancelToken::new(),
            state: BuildState::Idle,
        })
    }

    /// Use `cancel` as the cancellation token of this builder.
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// A clone of the cancellation token.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// The configuration of the builder.
    pub fn config(&self) -> &HemConfig {
        &self.config
    }

    /// The current state of the builder.
    pub fn state(&self) -> BuildState {
        self.state
    }

    /// Run one reduction pass on `level`.
    ///
    /// `depth` is the index of `level` in the pyramid and selects the decayed deltas.
    pub fn reduce_level<R: Rng + ?Sized>(
        &self,
        level: &MixtureLevel,
        depth: usize,
        rng: &mut R,
    ) -> Reduction {
        let (distance_delta, color_delta) = self.config.level_deltas(depth);

        let split = self.selector.select(level.len(), rng);
        let index = SpatialIndex::new(&level.positions());
        let candidates = ChildAssigner::new(distance_delta, color_delta, self.config.max_neighbors)
            .assign(level, &index, &split);

        ResponsibilityAggregator::new().reduce(level, &split, &candidates)
    }

    /// Build the pyramid of `level0`.
    ///
    /// Level 0 is `level0` itself. Cancellation is checked before every pass, so
    /// a pass that already started always completes.
    ///
    /// # Arguments
    ///
    /// * `level0` - The finest level.
    /// * `rng` - Source of the parent selection.
    /// * `on_progress` - Called after level 0 and after every pass.
    pub fn build<R: Rng + ?Sized>(
        &mut self,
        level0: &MixtureLevel,
        rng: &mut R,
        mut on_progress: impl FnMut(Progress),
    ) -> BuildOutcome {
        if level0.is_empty() {
            self.state = BuildState::Completed;
            return BuildOutcome::Empty;
        }

        let total = self.config.cluster_level;
        match self.run_levels(level0, rng, 0, total, &mut on_progress) {
            Some(levels) => {
                self.state = BuildState::Completed;
                BuildOutcome::Completed(Pyramid::new(levels))
            }
            None => {
                self.state = BuildState::Cancelled;
                BuildOutcome::Cancelled
            }
        }
    }

    /// Build one pyramid per disjoint subset of `level0` and concatenate them level by level.
    ///
    /// Subsets are reduced independently so no record ever merges across a
    /// subset boundary. Records outside every subset are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`MixtureError::IndexOutOfBounds`] or
    /// [`MixtureError::OverlappingSubsets`] if the subsets are not a valid
    /// disjoint selection of `level0`.
    pub fn build_subsets<R: Rng + ?Sized>(
        &mut self,
        level0: &MixtureLevel,
        subsets: &[Vec<usize>],
        rng: &mut R,
        mut on_progress: impl FnMut(Progress),
    ) -> Result<BuildOutcome, MixtureError> {
        if validate_subsets(level0.len(), subsets)? == 0 {
            self.state = BuildState::Completed;
            return Ok(BuildOutcome::Empty);
        }

        let parts = subsets
            .iter()
            .map(|subset| level0.select(subset))
            .collect::<Result<Vec<_>, _>>()?;

        let total = self.config.cluster_level * parts.len();
        let mut pyramids = Vec::with_capacity(parts.len());
        for (i, part) in parts.iter().enumerate() {
            let offset = i * self.config.cluster_level;
            match self.run_levels(part, rng, offset, total, &mut on_progress) {
                Some(levels) => pyramids.push(levels),
                None => {
                    self.state = BuildState::Cancelled;
                    return Ok(BuildOutcome::Cancelled);
                }
            }
        }

        let levels = (0..=self.config.cluster_level)
            .map(|depth| MixtureLevel::concat(pyramids.iter().map(|levels| &levels[depth])))
            .collect();

        self.state = BuildState::Completed;
        Ok(BuildOutcome::Completed(Pyramid::new(levels)))
    }

    // Returns `None` if cancellation was observed before a pass.
    fn run_levels<R: Rng + ?Sized>(
        &mut self,
        level0: &MixtureLevel,
        rng: &mut R,
        offset: usize,
        total: usize,
        on_progress: &mut dyn FnMut(Progress),
    ) -> Option<Vec<MixtureLevel>> {
        self.state = BuildState::Running { level: 0 };

        let mut levels = Vec::with_capacity(self.config.cluster_level + 1);
        levels.push(level0.clone());
        on_progress(Progress {
            completed: offset,
            total,
        });

        for depth in 0..self.config.cluster_level {
            if self.cancel.is_cancelled() {
                log::debug!("build cancelled before level {}", depth + 1);
                return None;
            }
            self.state = BuildState::Running { level: depth + 1 };

            let current = &levels[depth];
            let start = std::time::Instant::now();
            let Reduction { level, stats } = self.reduce_level(current, depth, rng);

            log::debug!(
                "level {}: {} -> {} records ({} parents, {} claimed, {} pass-through) in {:?}",
                depth + 1,
                current.len(),
                level.len(),
                stats.parents,
                stats.claimed,
                stats.pass_through,
                start.elapsed()
            );
            if stats.conditioned > 0 {
                log::warn!(
                    "level {}: {} merged covariances were not positive semi-definite",
                    depth + 1,
                    stats.conditioned
                );
            }

            levels.push(level);
            on_progress(Progress {
                completed: offset + depth + 1,
                total,
            });
        }

        Some(levels)
    }
}
