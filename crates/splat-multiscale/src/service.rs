use std::sync::Mutex;

use rand::{rngs::StdRng, Rng, SeedableRng};
use splat_mixture::{
    builder::validate_subsets, BuildOutcome, CancelToken, HemConfig, MixtureError, MixtureLevel,
    MixtureLevelBuilder, Progress, Pyramid,
};

use crate::{cloud::GaussianCloud, error::HemError};

/// One side of a creation request: a cloud and its optional plane subsets.
#[derive(Debug, Clone)]
pub struct MixtureSide {
    /// The finest level of the side.
    pub cloud: GaussianCloud,
    /// Disjoint index subsets reduced independently, one per detected plane.
    pub planes: Option<Vec<Vec<usize>>>,
}

impl MixtureSide {
    /// A side reducing the whole cloud.
    pub fn new(cloud: GaussianCloud) -> Self {
        Self {
            cloud,
            planes: None,
        }
    }

    /// Reduce only the given plane subsets.
    pub fn with_planes(mut self, planes: Vec<Vec<usize>>) -> Self {
        self.planes = Some(planes);
        self
    }
}

/// Input of [`MixtureCreationService::create`].
#[derive(Debug, Clone)]
pub struct CreationRequest {
    /// The first cloud, usually the registration source.
    pub first: MixtureSide,
    /// The second cloud, usually the registration target.
    pub second: MixtureSide,
    /// Reduction parameters shared by both sides.
    pub config: HemConfig,
    /// Seed of the parent selection; drawn from the OS when absent.
    pub seed: Option<u64>,
}

impl CreationRequest {
    /// Create an unseeded request.
    pub fn new(first: MixtureSide, second: MixtureSide, config: HemConfig) -> Self {
        Self {
            first,
            second,
            config,
            seed: None,
        }
    }

    /// Make the parent selection reproducible.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

/// The pyramids of both sides.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MixturePyramids {
    /// Pyramid of the first cloud; empty for an empty cloud.
    pub first: Pyramid,
    /// Pyramid of the second cloud; empty for an empty cloud.
    pub second: Pyramid,
}

impl MixturePyramids {
    /// Convert every level of both pyramids into a caller representation.
    pub fn map_levels<T>(&self, f: impl Fn(&MixtureLevel) -> T) -> (Vec<T>, Vec<T>) {
        let first = self.first.levels().iter().map(&f).collect();
        let second = self.second.levels().iter().map(&f).collect();
        (first, second)
    }

    /// Convert every level of both pyramids into a [`GaussianCloud`].
    pub fn to_clouds(&self) -> (Vec<GaussianCloud>, Vec<GaussianCloud>) {
        self.map_levels(GaussianCloud::from_mixture_level)
    }
}

/// Result of [`MixtureCreationService::create`].
#[derive(Debug, Clone)]
pub enum CreationOutcome {
    /// Both pyramids were built.
    Completed(MixturePyramids),
    /// Cancellation was observed on at least one side; no pyramid is returned.
    Cancelled,
}

impl CreationOutcome {
    /// Consume the outcome and return the pyramids of a completed run.
    pub fn into_pyramids(self) -> Option<MixturePyramids> {
        match self {
            CreationOutcome::Completed(pyramids) => Some(pyramids),
            CreationOutcome::Cancelled => None,
        }
    }
}

/// Builds the mixture pyramids of two point clouds concurrently.
#[derive(Debug, Clone, Default)]
pub struct MixtureCreationService {
    cancel: CancelToken,
}

impl MixtureCreationService {
    /// Create the service.
    pub fn new() -> Self {
        Self::default()
    }

    /// A token that cancels both sides of any running creation.
    ///
    /// Cancellation is permanent for this service; later calls to
    /// [`Self::create`] return [`CreationOutcome::Cancelled`] as well.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Build both pyramids.
    ///
    /// Inputs and configuration are validated before any computation. The two
    /// sides run concurrently and share the cancellation token, so a
    /// cancellation stops both at their next level boundary.
    ///
    /// # Arguments
    ///
    /// * `request` - The clouds, plane subsets, parameters and seed.
    /// * `on_progress` - Receives the aggregate progress of both sides in percent.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration, a cloud or a plane subset is invalid.
    pub fn create(
        &self,
        request: &CreationRequest,
        on_progress: impl Fn(u8) + Sync,
    ) -> Result<CreationOutcome, HemError> {
        let config = request.config;
        config.validate()?;

        let first_level = request.first.cloud.to_mixture_level()?;
        let second_level = request.second.cloud.to_mixture_level()?;
        for (level, side) in [(&first_level, &request.first), (&second_level, &request.second)] {
            if let Some(planes) = &side.planes {
                validate_subsets(level.len(), planes)?;
            }
        }

        let mut seeds = match request.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => {
                let mut tr = rand::rng();
                StdRng::from_rng(&mut tr)
            }
        };
        let first_rng = StdRng::seed_from_u64(seeds.random());
        let second_rng = StdRng::seed_from_u64(seeds.random());

        let first_passes = pass_count(&first_level, request.first.planes.as_deref(), &config);
        let second_passes = pass_count(&second_level, request.second.planes.as_deref(), &config);
        let total = first_passes + second_passes;

        log::info!(
            "creating mixture pyramids: {} + {} records, {} levels",
            first_level.len(),
            second_level.len(),
            config.cluster_level
        );
        let start = std::time::Instant::now();

        // held across the callback so both sides report in increasing order
        let completed = Mutex::new(0usize);
        let report = |delta: usize| {
            let Ok(mut done) = completed.lock() else {
                return;
            };
            *done += delta;
            on_progress(
                Progress {
                    completed: *done,
                    total,
                }
                .percent(),
            );
        };

        let (first, second) = rayon::join(
            || {
                self.build_side(
                    &first_level,
                    request.first.planes.as_deref(),
                    config,
                    first_rng,
                    &report,
                )
            },
            || {
                self.build_side(
                    &second_level,
                    request.second.planes.as_deref(),
                    config,
                    second_rng,
                    &report,
                )
            },
        );
        let (first, second) = (first?, second?);

        let pyramids = match (first, second) {
            (BuildOutcome::Cancelled, _) | (_, BuildOutcome::Cancelled) => {
                log::info!("mixture creation cancelled after {:?}", start.elapsed());
                return Ok(CreationOutcome::Cancelled);
            }
            (first, second) => MixturePyramids {
                first: first.into_pyramid().unwrap_or_default(),
                second: second.into_pyramid().unwrap_or_default(),
            },
        };

        on_progress(100);
        log::info!(
            "mixture pyramids created in {:?}: {} and {} records at the coarsest level",
            start.elapsed(),
            pyramids.first.coarsest().map_or(0, MixtureLevel::len),
            pyramids.second.coarsest().map_or(0, MixtureLevel::len)
        );

        Ok(CreationOutcome::Completed(pyramids))
    }

    fn build_side(
        &self,
        level: &MixtureLevel,
        planes: Option<&[Vec<usize>]>,
        config: HemConfig,
        mut rng: StdRng,
        report: &(impl Fn(usize) + Sync),
    ) -> Result<BuildOutcome, MixtureError> {
        let mut builder = MixtureLevelBuilder::new(config)?.with_cancel_token(self.cancel.clone());

        // the builder reports cumulative counts, the aggregate wants increments
        let mut last = 0;
        let on_progress = |progress: Progress| {
            report(progress.completed - last);
            last = progress.completed;
        };

        match planes {
            Some(planes) => builder.build_subsets(level, planes, &mut rng, on_progress),
            None => Ok(builder.build(level, &mut rng, on_progress)),
        }
    }
}

// Number of reduction passes a side performs when it is not cancelled.
fn pass_count(level: &MixtureLevel, planes: Option<&[Vec<usize>]>, config: &HemConfig) -> usize {
    match planes {
        Some(planes) if planes.iter().any(|plane| !plane.is_empty()) => {
            planes.len() * config.cluster_level
        }
        Some(_) => 0,
        None if level.is_empty() => 0,
        None => config.cluster_level,
    }
}
