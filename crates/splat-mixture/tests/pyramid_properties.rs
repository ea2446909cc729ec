use approx::assert_abs_diff_eq;
use glam::DVec3;
use rand::{rngs::StdRng, Rng, SeedableRng};

use splat_mixture::{
    BuildOutcome, BuildState, GaussianRecord, HemConfig, MixtureError, MixtureLevel,
    MixtureLevelBuilder, Pyramid, SymMat3,
};

fn random_level(num_records: usize, extent: f64, seed: u64) -> MixtureLevel {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..num_records)
        .map(|_| {
            let position = DVec3::new(
                rng.random_range(0.0..extent),
                rng.random_range(0.0..extent),
                rng.random_range(0.0..extent),
            );
            let variance = DVec3::new(
                rng.random_range(0.01..0.05),
                rng.random_range(0.01..0.05),
                rng.random_range(0.01..0.05),
            );
            let color = DVec3::new(rng.random(), rng.random(), rng.random());
            GaussianRecord::new(position, SymMat3::from_diagonal(variance), color, 0.8)
        })
        .collect()
}

fn build(level: &MixtureLevel, config: HemConfig, seed: u64) -> Result<Pyramid, MixtureError> {
    let mut builder = MixtureLevelBuilder::new(config)?;
    let outcome = builder.build(level, &mut StdRng::seed_from_u64(seed), |_| {});
    Ok(outcome.into_pyramid().expect("completed build"))
}

#[test]
fn pyramid_of_dense_cloud() -> Result<(), MixtureError> {
    let level0 = random_level(1000, 10.0, 17);
    let config = HemConfig::default()
        .with_reduction_factor(3.0)
        .with_distance_delta(2.5)
        .with_color_delta(2.5)
        .with_cluster_level(2);
    let pyramid = build(&level0, config, 5)?;

    assert_eq!(pyramid.len(), 3);
    assert_eq!(pyramid.levels()[0], level0);

    for pair in pyramid.levels().windows(2) {
        assert!(pair[1].len() <= pair[0].len());
    }
    for level in pyramid.levels() {
        assert!(level.is_finite());
        assert_abs_diff_eq!(level.total_weight(), 1000.0, epsilon = 1e-4);
    }
    // a cloud this dense must actually shrink
    assert!(pyramid.levels()[2].len() < 1000);
    Ok(())
}

#[test]
fn every_record_is_accounted_for() -> Result<(), MixtureError> {
    let level0 = random_level(500, 5.0, 3);
    let builder = MixtureLevelBuilder::new(HemConfig::default())?;
    let reduction = builder.reduce_level(&level0, 0, &mut StdRng::seed_from_u64(11));

    let stats = reduction.stats;
    assert_eq!(stats.parents + stats.claimed + stats.pass_through, level0.len());
    assert_eq!(reduction.level.len(), stats.parents + stats.pass_through);
    assert_abs_diff_eq!(reduction.level.total_weight(), 500.0, epsilon = 1e-6);
    Ok(())
}

#[test]
fn build_is_deterministic_for_a_seed() -> Result<(), MixtureError> {
    let level0 = random_level(800, 8.0, 21);
    let a = build(&level0, HemConfig::default(), 99)?;
    let b = build(&level0, HemConfig::default(), 99)?;
    assert_eq!(a, b);
    Ok(())
}

#[test]
fn degenerate_covariances_produce_no_nan() -> Result<(), MixtureError> {
    let mut records = random_level(300, 3.0, 8).into_records();
    for (i, record) in records.iter_mut().enumerate() {
        match i % 3 {
            0 => record.covariance = SymMat3::ZERO,
            // flat along z
            1 => record.covariance = SymMat3::from_diagonal(DVec3::new(0.02, 0.02, 0.0)),
            _ => {}
        }
    }
    let level0 = MixtureLevel::new(records);
    let pyramid = build(&level0, HemConfig::default(), 1)?;

    for level in pyramid.levels() {
        assert!(level.is_finite());
        assert_abs_diff_eq!(level.total_weight(), 300.0, epsilon = 1e-6);
    }
    Ok(())
}

#[test]
fn zero_parent_probability_keeps_every_level() -> Result<(), MixtureError> {
    let level0 = random_level(200, 4.0, 2);
    let config = HemConfig::default().with_reduction_factor(f64::INFINITY);
    let pyramid = build(&level0, config, 0)?;

    for level in pyramid.levels() {
        assert_eq!(level, &level0);
    }
    Ok(())
}

#[test]
fn cancellation_after_first_level() -> Result<(), MixtureError> {
    let level0 = random_level(300, 4.0, 4);
    let mut builder = MixtureLevelBuilder::new(HemConfig::default())?;
    let cancel = builder.cancel_token();

    let mut reports = Vec::new();
    let outcome = builder.build(&level0, &mut StdRng::seed_from_u64(0), |progress| {
        reports.push(progress.completed);
        if progress.completed == 0 {
            cancel.cancel();
        }
    });

    assert!(outcome.is_cancelled());
    assert_eq!(builder.state(), BuildState::Cancelled);
    assert_eq!(reports, vec![0]);
    Ok(())
}

#[test]
fn empty_input_is_not_an_error() -> Result<(), MixtureError> {
    let mut builder = MixtureLevelBuilder::new(HemConfig::default())?;
    let mut rng = StdRng::seed_from_u64(0);

    let outcome = builder.build(&MixtureLevel::default(), &mut rng, |_| {});
    assert!(matches!(outcome, BuildOutcome::Empty));

    let outcome = builder.build_subsets(&random_level(10, 1.0, 0), &[vec![], vec![]], &mut rng, |_| {})?;
    assert!(matches!(outcome, BuildOutcome::Empty));
    Ok(())
}

#[test]
fn subsets_never_merge_across() -> Result<(), MixtureError> {
    // two interleaved populations told apart by their opacity
    let mut records = random_level(900, 4.0, 12).into_records();
    for (i, record) in records.iter_mut().enumerate() {
        record.opacity = if i % 3 == 0 { 0.0 } else { 1.0 };
    }
    let level0 = MixtureLevel::new(records);

    let first: Vec<usize> = (0..900).filter(|i| i % 3 == 0).collect();
    // every third record of the second population is left out
    let second: Vec<usize> = (0..900).filter(|i| i % 3 == 1).collect();

    let mut builder = MixtureLevelBuilder::new(HemConfig::default())?;
    let mut reports = Vec::new();
    let outcome = builder.build_subsets(
        &level0,
        &[first.clone(), second.clone()],
        &mut StdRng::seed_from_u64(6),
        |progress| reports.push(progress.percent()),
    )?;
    let pyramid = outcome.into_pyramid().expect("completed build");

    assert_eq!(reports.last(), Some(&100));
    assert_eq!(pyramid.levels()[0].len(), first.len() + second.len());

    for level in pyramid.levels() {
        let mut first_weight = 0.0;
        let mut second_weight = 0.0;
        for record in level.iter() {
            if record.opacity < 1e-9 {
                first_weight += record.weight;
            } else if record.opacity > 1.0 - 1e-9 {
                second_weight += record.weight;
            } else {
                panic!("record mixes both subsets: opacity {}", record.opacity);
            }
        }
        assert_abs_diff_eq!(first_weight, first.len() as f64, epsilon = 1e-6);
        assert_abs_diff_eq!(second_weight, second.len() as f64, epsilon = 1e-6);
    }
    Ok(())
}
