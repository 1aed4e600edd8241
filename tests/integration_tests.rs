//! End-to-end tests: seeding over a sharded dataset, grid clustering on
//! the resulting weighted sample, and cross-validated evaluation.

use approx::{assert_abs_diff_eq, assert_relative_eq};
use ksketch::{
    cross_validate, run_grid, Centers, Crossfold, Dataset, GridConfig, KMeansParallel,
    LloydRefiner, LocalDataset, Point, SketchError, StoppingCriteria, WeightedPoint,
};

fn two_blobs(per_blob: usize) -> Vec<Point> {
    let mut points = Vec::with_capacity(per_blob * 2);
    for i in 0..per_blob {
        let jitter = (i % 10) as f64 * 0.01;
        points.push(Point::named(format!("low{i}"), vec![jitter, jitter]));
        points.push(Point::named(
            format!("high{i}"),
            vec![10.0 + jitter, 10.0 - jitter],
        ));
    }
    points
}

#[test]
fn test_seed_then_cluster_recovers_blob_structure() {
    let data = LocalDataset::from_items(two_blobs(50), 4);
    let engine = KMeansParallel::new(32, 8, 42);
    let folds = engine
        .seed(
            &data,
            3,
            4,
            &[Point::new(vec![0.0, 0.0])],
            &Crossfold::single(),
        )
        .unwrap();
    assert_eq!(folds.len(), 1);

    // Candidate weights account for every dataset point.
    let total: f64 = folds[0].iter().map(WeightedPoint::weight).sum();
    assert_abs_diff_eq!(total, data.len() as f64);

    let config = GridConfig::new(vec![2]).best_of(3).seed(7).workers(2);
    let results = run_grid(
        &LloydRefiner,
        &folds[0],
        &config,
        &StoppingCriteria::standard(),
    )
    .unwrap();
    assert_eq!(results.len(), 1);
    let centers = &results[0].centers;
    assert_eq!(centers.len(), 2);

    // One center near each blob.
    let (_, d_low) = centers.closest(&[0.0, 0.0]).unwrap();
    let (_, d_high) = centers.closest(&[10.0, 10.0]).unwrap();
    assert!(d_low < 1.0, "no center near the low blob: {d_low}");
    assert!(d_high < 1.0, "no center near the high blob: {d_high}");

    // And the full-dataset cost under those centers is tiny.
    let cost = engine.cost(&data, centers).unwrap();
    assert!(cost < 10.0, "cost {cost} too high for recovered blobs");
}

#[test]
fn test_zero_iterations_passes_through_initial_points() {
    let data = LocalDataset::from_items(two_blobs(30), 3);
    let engine = KMeansParallel::default();
    let initial = vec![Point::new(vec![0.0, 0.0]), Point::new(vec![10.0, 10.0])];
    let folds = engine
        .seed(&data, 0, 5, &initial, &Crossfold::single())
        .unwrap();
    assert_eq!(folds[0].len(), 2);
    for (candidate, original) in folds[0].iter().zip(&initial) {
        assert_eq!(candidate.point().values(), original.values());
    }
}

#[test]
fn test_cost_is_invariant_to_shard_arrangement() {
    let points = two_blobs(40);
    let engine = KMeansParallel::default();
    let centers = Centers::new(vec![Point::new(vec![2.0, 3.0])]);

    let single = engine
        .cost(&LocalDataset::from_items(points.clone(), 1), &centers)
        .unwrap();
    let many = engine
        .cost(&LocalDataset::from_items(points.clone(), 7), &centers)
        .unwrap();
    let mut reversed = points;
    reversed.reverse();
    let backwards = engine
        .cost(&LocalDataset::from_items(reversed, 7), &centers)
        .unwrap();

    assert_relative_eq!(single, many, max_relative = 1e-9);
    assert_relative_eq!(single, backwards, max_relative = 1e-9);
}

#[test]
fn test_seeding_is_reproducible_across_shard_layouts() {
    let points = two_blobs(40);
    let engine = KMeansParallel::new(32, 8, 911);
    let initial = [Point::new(vec![0.0, 0.0])];
    let crossfold = Crossfold::new(2, 5).unwrap();

    let a = engine
        .seed(
            &LocalDataset::from_items(points.clone(), 4),
            2,
            3,
            &initial,
            &crossfold,
        )
        .unwrap();
    let b = engine
        .seed(
            &LocalDataset::from_items(points, 4),
            2,
            3,
            &initial,
            &crossfold,
        )
        .unwrap();
    assert_eq!(a, b);
}

#[test]
fn test_cross_validation_on_well_separated_blobs() {
    // Seed two folds, train on the first, hold the second out. Blobs this
    // far apart must look stable at k=2.
    let data = LocalDataset::from_items(two_blobs(60), 4);
    let engine = KMeansParallel::new(32, 8, 17);
    let crossfold = Crossfold::new(2, 23).unwrap();
    let folds = engine
        .seed(
            &data,
            3,
            4,
            &[Point::new(vec![0.0, 0.0])],
            &crossfold,
        )
        .unwrap();

    let config = GridConfig::new(vec![1, 2]).best_of(3).seed(3).workers(2);
    let stats = cross_validate(
        &LloydRefiner,
        &folds,
        &config,
        &StoppingCriteria::standard(),
    )
    .unwrap();
    assert_eq!(stats.len(), 2);
    assert_eq!(stats[0].k, 1);
    assert_eq!(stats[1].k, 2);

    let two = &stats[1];
    assert_abs_diff_eq!(two.prediction_strength, 1.0, epsilon = 1e-9);
    assert_eq!(two.stable_clusters, 2);
    assert_abs_diff_eq!(two.stable_points, 1.0, epsilon = 1e-9);
    assert!(two.test_cost < stats[0].test_cost);
}

#[test]
fn test_grid_failure_names_the_failing_trial() {
    // Three candidates cannot seed five clusters.
    let sample: Vec<WeightedPoint> = (0..3)
        .map(|i| WeightedPoint::new(Point::new(vec![f64::from(i), 0.0]), 1.0))
        .collect();
    let config = GridConfig::new(vec![2, 5]).best_of(2);
    let err = run_grid(
        &LloydRefiner,
        &sample,
        &config,
        &StoppingCriteria::standard(),
    )
    .unwrap_err();
    match err {
        SketchError::Trial { k, source, .. } => {
            assert_eq!(k, 5);
            assert!(matches!(
                *source,
                SketchError::InsufficientCandidates {
                    requested: 5,
                    available: 3
                }
            ));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_grid_config_survives_serialization() {
    let config = GridConfig::new(vec![2, 4, 8]).best_of(3).seed(99).workers(4);
    let json = serde_json::to_string(&config).unwrap();
    let back: GridConfig = serde_json::from_str(&json).unwrap();
    assert_eq!(back.cluster_counts, config.cluster_counts);
    assert_eq!(back.best_of, config.best_of);
    assert_eq!(back.seed, config.seed);
    assert_eq!(back.workers, config.workers);
}

#[test]
fn test_assignments_cover_dataset_with_exact_distances() {
    let data = LocalDataset::from_items(two_blobs(10), 2);
    let engine = KMeansParallel::default();
    let configs = vec![Centers::new(vec![
        Point::new(vec![0.0, 0.0]),
        Point::new(vec![10.0, 10.0]),
    ])];
    let records = engine.assignments(&data, &configs, Some(&[3])).unwrap();
    assert_eq!(records.len(), data.len());
    for record in &records {
        assert_eq!(record.cluster_id, 3);
        let id = record.point_id.as_deref().unwrap();
        let expected_center = usize::from(id.starts_with("high"));
        assert_eq!(record.closest_center_id, expected_center);
        assert!(record.distance < 1.0);
    }
}
