use rand::{rngs::StdRng, Rng, SeedableRng};

use splat_multiscale::{
    CancelToken, CreationOutcome, CreationRequest, Covariances, DownscaleStrategy, GaussianCloud,
    HemConfig, HemError, MixtureCreationService, MixtureSide, MultiscaleSchedule,
};

fn random_cloud(n: usize, seed: u64) -> Result<GaussianCloud, HemError> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut positions = Vec::with_capacity(n);
    let mut covariances = Vec::with_capacity(n);
    let mut colors = Vec::with_capacity(n);
    for _ in 0..n {
        positions.push([
            rng.random_range(0.0..5.0),
            rng.random_range(0.0..5.0),
            rng.random_range(0.0..5.0),
        ]);
        let s = rng.random_range(0.01..0.05);
        covariances.push([s, 0.0, 0.0, s, 0.0, s]);
        colors.push([rng.random(), rng.random(), rng.random()]);
    }
    GaussianCloud::new(
        positions,
        vec![0.0; n],
        Covariances::Compact(covariances),
        colors,
    )
}

#[test]
fn config_from_json_uses_defaults() -> Result<(), Box<dyn std::error::Error>> {
    let config: HemConfig = serde_json::from_str(r#"{ "reduction_factor": 4.0, "cluster_level": 2 }"#)?;
    assert_eq!(
        config,
        HemConfig::default()
            .with_reduction_factor(4.0)
            .with_cluster_level(2)
    );
    config.validate()?;
    Ok(())
}

#[test]
fn seeded_creation_is_reproducible() -> Result<(), HemError> {
    let request = CreationRequest::new(
        MixtureSide::new(random_cloud(400, 1)?),
        MixtureSide::new(random_cloud(300, 2)?),
        HemConfig::default(),
    )
    .with_seed(42);

    let service = MixtureCreationService::new();
    let a = service.create(&request, |_| {})?.into_pyramids();
    let b = service.create(&request, |_| {})?.into_pyramids();

    let a = a.expect("completed run");
    assert_eq!(Some(&a), b.as_ref());
    assert_eq!(a.first.len(), 4);
    assert_eq!(a.first.levels()[0].len(), 400);
    assert_eq!(a.second.levels()[0].len(), 300);

    let (first_clouds, second_clouds) = a.to_clouds();
    assert_eq!(first_clouds.len(), 4);
    assert_eq!(second_clouds[0].len(), 300);
    Ok(())
}

#[test]
fn empty_side_gives_empty_pyramid() -> Result<(), HemError> {
    let empty = GaussianCloud::new(vec![], vec![], Covariances::Full(vec![]), vec![])?;
    let request = CreationRequest::new(
        MixtureSide::new(empty),
        MixtureSide::new(random_cloud(100, 3)?),
        HemConfig::default(),
    )
    .with_seed(0);

    let pyramids = MixtureCreationService::new()
        .create(&request, |_| {})?
        .into_pyramids()
        .expect("completed run");
    assert!(pyramids.first.is_empty());
    assert_eq!(pyramids.second.len(), 4);
    Ok(())
}

#[test]
fn cancellation_returns_no_pyramid() -> Result<(), HemError> {
    let request = CreationRequest::new(
        MixtureSide::new(random_cloud(500, 4)?),
        MixtureSide::new(random_cloud(500, 5)?),
        HemConfig::default(),
    );

    let service = MixtureCreationService::new();
    let cancel: CancelToken = service.cancel_token();
    let outcome = service.create(&request, |_| cancel.cancel())?;

    assert!(matches!(outcome, CreationOutcome::Cancelled));
    Ok(())
}

#[test]
fn plane_subsets_are_validated_and_concatenated() -> Result<(), HemError> {
    let planes = vec![(0..100).collect::<Vec<_>>(), (150..200).collect()];
    let request = CreationRequest::new(
        MixtureSide::new(random_cloud(200, 6)?).with_planes(planes),
        MixtureSide::new(random_cloud(200, 7)?),
        HemConfig::default().with_cluster_level(1),
    )
    .with_seed(9);

    let pyramids = MixtureCreationService::new()
        .create(&request, |_| {})?
        .into_pyramids()
        .expect("completed run");
    assert_eq!(pyramids.first.levels()[0].len(), 150);
    assert!(pyramids.first.levels()[1].len() <= 150);

    let overlapping = CreationRequest::new(
        MixtureSide::new(random_cloud(10, 6)?).with_planes(vec![vec![0, 1], vec![1]]),
        MixtureSide::new(random_cloud(10, 7)?),
        HemConfig::default(),
    );
    assert!(MixtureCreationService::new()
        .create(&overlapping, |_| panic!("nothing may run"))
        .is_err());
    Ok(())
}

#[test]
fn pyramid_drives_a_multiscale_schedule() -> Result<(), HemError> {
    let cloud = random_cloud(300, 8)?;
    let request = CreationRequest::new(
        MixtureSide::new(cloud.clone()),
        MixtureSide::new(cloud),
        HemConfig::default().with_cluster_level(2),
    )
    .with_seed(1);
    let pyramids = MixtureCreationService::new()
        .create(&request, |_| {})?
        .into_pyramids()
        .expect("completed run");

    let source = pyramids.first.levels()[0].clone();
    let schedule = MultiscaleSchedule::new(
        DownscaleStrategy::Mixture(pyramids.first),
        vec![50, 30, 10],
    )?;

    let visited = schedule.run(&source, Vec::new(), |mut visited, step| {
        visited.push(step.level.len());
        Ok::<_, HemError>(visited)
    })?;
    assert_eq!(visited.len(), 3);
    assert_eq!(visited[2], 300);
    assert!(visited[0] <= visited[1]);
    Ok(())
}
