//! # Cost Map Benchmark

use criterion::{criterion_group, criterion_main, Criterion};
use std::time::{Duration, Instant};

use nalgebra::Point2;
use vehicle_lib::{
    map::{CostMap, CostMapParams, ObstacleObservation},
    nav::{PathPlanner, PathPlannerParams},
};

fn cost_map_benchmark(c: &mut Criterion) {
    // ---- Build a map with a scattered obstacle field ----

    let params = CostMapParams::default();

    let now = Instant::now();
    let observations: Vec<ObstacleObservation> = (0..200)
        .map(|i| {
            let x = 100.0 + (i as f64 * 37.0) % 1800.0;
            let y = 100.0 + (i as f64 * 91.0) % 1800.0;
            ObstacleObservation {
                position_m: Point2::new(x, y),
                distance_m: 50.0,
                timestamp: now,
            }
        })
        .collect();

    c.bench_function("CostMap::ingest", |b| {
        let mut map = CostMap::new(params.clone()).unwrap();
        b.iter(|| map.ingest(&observations, now))
    });

    let mut map = CostMap::new(params).unwrap();
    map.ingest(&observations, now);

    c.bench_function("CostMap::snapshot", |b| b.iter(|| map.snapshot()));

    // ---- Planning over the populated map ----

    let view = map.snapshot();
    let planner = PathPlanner::new(PathPlannerParams::default());

    c.bench_function("PathPlanner::plan::astar", |b| {
        b.iter(|| {
            planner
                .plan(
                    &view,
                    Point2::new(10.0, 10.0),
                    Point2::new(1990.0, 1990.0),
                    Duration::from_secs(30),
                )
                .unwrap()
        })
    });
}

criterion_group!(benches, cost_map_benchmark);
criterion_main!(benches);
