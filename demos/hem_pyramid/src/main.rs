use std::path::PathBuf;

use argh::FromArgs;
use rand::{rngs::StdRng, Rng, SeedableRng};
use splat_multiscale::{
    CreationOutcome, CreationRequest, Covariances, DownscaleStrategy, GaussianCloud, HemConfig,
    MixtureCreationService, MixtureSide, MultiscaleSchedule, VoxelParams,
};

#[derive(FromArgs)]
/// Build the Gaussian mixture pyramids of two synthetic point clouds
struct Args {
    /// number of Gaussians per cloud
    #[argh(option, default = "20000")]
    num_points: usize,

    /// edge length of the cube the Gaussians are drawn in
    #[argh(option, default = "10.0")]
    extent: f64,

    /// path to a JSON file with the reduction parameters
    #[argh(option)]
    config: Option<PathBuf>,

    /// number of reduction passes, overrides the config file
    #[argh(option)]
    cluster_level: Option<usize>,

    /// seed of the point generation and of the parent selection
    #[argh(option)]
    seed: Option<u64>,

    /// voxel sizes of a comparison voxel schedule, coarsest first
    #[argh(option)]
    voxel_size: Vec<f64>,
}

fn synthetic_cloud(
    n: usize,
    extent: f64,
    rng: &mut StdRng,
) -> Result<GaussianCloud, Box<dyn std::error::Error>> {
    let mut positions = Vec::with_capacity(n);
    let mut covariances = Vec::with_capacity(n);
    let mut colors = Vec::with_capacity(n);
    let mut opacities = Vec::with_capacity(n);
    for _ in 0..n {
        positions.push([
            rng.random_range(0.0..extent),
            rng.random_range(0.0..extent),
            rng.random_range(0.0..extent),
        ]);
        let (sx, sy, sz) = (
            rng.random_range(0.005..0.05),
            rng.random_range(0.005..0.05),
            rng.random_range(0.005..0.05),
        );
        covariances.push([sx, 0.0, 0.0, sy, 0.0, sz]);
        colors.push([rng.random(), rng.random(), rng.random()]);
        opacities.push(rng.random_range(-2.0..2.0));
    }
    Ok(GaussianCloud::new(
        positions,
        opacities,
        Covariances::Compact(covariances),
        colors,
    )?)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args: Args = argh::from_env();

    let mut config = match &args.config {
        Some(path) => serde_json::from_str::<HemConfig>(&std::fs::read_to_string(path)?)?,
        None => HemConfig::default(),
    };
    if let Some(cluster_level) = args.cluster_level {
        config = config.with_cluster_level(cluster_level);
    }

    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => {
            let mut tr = rand::rng();
            StdRng::from_rng(&mut tr)
        }
    };
    let first = synthetic_cloud(args.num_points, args.extent, &mut rng)?;
    let second = synthetic_cloud(args.num_points, args.extent, &mut rng)?;

    let mut request = CreationRequest::new(
        MixtureSide::new(first.clone()),
        MixtureSide::new(second),
        config,
    );
    if let Some(seed) = args.seed {
        request = request.with_seed(seed);
    }

    let service = MixtureCreationService::new();

    ctrlc::set_handler({
        let cancel_token = service.cancel_token();
        move || {
            println!("Received Ctrl-C signal. Sending cancel signal !!");
            cancel_token.cancel();
        }
    })?;

    let now = std::time::Instant::now();
    let outcome = service.create(&request, |percent| log::info!("progress: {percent}%"))?;

    let pyramids = match outcome {
        CreationOutcome::Completed(pyramids) => pyramids,
        CreationOutcome::Cancelled => {
            println!("Cancelled after {:?}.", now.elapsed());
            return Ok(());
        }
    };
    println!("Elapsed time: {:?}", now.elapsed());

    let (first_sizes, second_sizes) =
        pyramids.map_levels(|level| (level.len(), level.total_weight()));
    for (depth, (first, second)) in first_sizes.iter().zip(second_sizes.iter()).enumerate() {
        println!(
            "level {depth}: first {} records (weight {:.3}), second {} records (weight {:.3})",
            first.0, first.1, second.0, second.1
        );
    }

    if !args.voxel_size.is_empty() {
        let source = first.to_mixture_level()?;
        let iterations = vec![0; args.voxel_size.len()];
        let schedule = MultiscaleSchedule::new(
            DownscaleStrategy::Voxel(VoxelParams::new(args.voxel_size)?),
            iterations,
        )?;
        for step in schedule.steps(&source) {
            println!("voxel scale: {} records", step.level.len());
        }
    }

    Ok(())
}
