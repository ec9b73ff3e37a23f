use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use strata::prelude::*;

#[derive(Clone, Copy, Debug, PartialEq)]
struct Value(u64);

#[derive(Clone, Copy, Debug, PartialEq)]
struct Visits(u32);

#[derive(Clone, Copy, Debug, PartialEq)]
struct Group(u8);

#[derive(Clone, Copy, Debug, PartialEq)]
struct Extra;

fn populated(config: WorldConfig, count: u64) -> World {
    let world = World::with_config(config).unwrap();
    for i in 0..count {
        if i % 3 == 0 {
            world.spawn((Value(i), Visits(0), Extra)).unwrap();
        } else {
            world.spawn((Value(i), Visits(0), Group((i % 7) as u8))).unwrap();
        }
    }
    world
}

fn expected_sum(count: u64) -> u64 {
    (0..count).sum()
}

fn assert_visited_once(world: &World) {
    let query = world.query::<(Visits,)>().build().unwrap();
    let mut rows = 0;
    query
        .run(|v| {
            assert_eq!(v.0, 1);
            v.0 = 0;
            rows += 1;
        })
        .unwrap();
    assert_eq!(rows, query.count());
}

#[test]
fn parallel_strategies_match_sequential_sum() {
    const COUNT: u64 = 10_007;
    let world = populated(WorldConfig::default().with_worker_threads(4), COUNT);
    let query = world.query::<(Value, Visits)>().build().unwrap();

    let mut sequential = 0;
    query.run(|v, _| sequential += v.0).unwrap();
    assert_eq!(sequential, expected_sum(COUNT));

    for chunk_size in [0, 1, 7, 64, 1000, usize::MAX] {
        let total = AtomicU64::new(0);
        query
            .run_parallel(chunk_size, |v, visits| {
                total.fetch_add(v.0, Ordering::Relaxed);
                visits.0 += 1;
            })
            .unwrap();
        assert_eq!(total.into_inner(), sequential, "run_parallel chunk {chunk_size}");
        assert_visited_once(&world);

        let total = AtomicU64::new(0);
        query
            .job(chunk_size, |v, visits| {
                total.fetch_add(v.0, Ordering::Relaxed);
                visits.0 += 1;
            })
            .unwrap();
        assert_eq!(total.into_inner(), sequential, "job chunk {chunk_size}");
        assert_visited_once(&world);
    }

    let total = AtomicU64::new(0);
    query
        .raw_parallel(|values, mut visits| {
            let sum: u64 = values.into_slice().iter().map(|v| v.0).sum();
            total.fetch_add(sum, Ordering::Relaxed);
            for v in visits.as_mut_slice() {
                v.0 += 1;
            }
        })
        .unwrap();
    assert_eq!(total.into_inner(), sequential);
    assert_visited_once(&world);
}

#[test]
fn uniform_variants_share_one_value() {
    let world = populated(WorldConfig::default().with_worker_threads(3), 500);
    let query = world.query::<(Value,)>().build().unwrap();
    let offset = 10u64;

    query.run_parallel_uniform(16, &offset, |o, v| v.0 += o).unwrap();
    query.job_uniform(16, &offset, |o, v| v.0 += o).unwrap();

    let mut sum = 0;
    query.run(|v| sum += v.0).unwrap();
    assert_eq!(sum, expected_sum(500) + 500 * 2 * offset);
}

#[test]
fn blocking_join_and_spin_join_agree() {
    const COUNT: u64 = 2_048;
    for policy in [
        WaitPolicy::Block,
        WaitPolicy::Spin {
            spins_before_yield: 1,
        },
    ] {
        let config = WorldConfig::default()
            .with_worker_threads(4)
            .with_max_degree_of_parallelism(8)
            .with_parallel_wait(policy);
        let world = populated(config, COUNT);
        let query = world.query::<(Value, Visits)>().build().unwrap();

        let total = AtomicU64::new(0);
        query
            .run_parallel(3, |v, visits| {
                total.fetch_add(v.0, Ordering::Relaxed);
                visits.0 += 1;
            })
            .unwrap();
        assert_eq!(total.into_inner(), expected_sum(COUNT), "{policy:?}");
        assert_visited_once(&world);
    }
}

#[test]
fn single_threaded_world_still_runs_every_strategy() {
    let world = populated(WorldConfig::single_threaded(), 100);
    let query = world.query::<(Value, Visits)>().build().unwrap();

    query.run_parallel(1, |_, visits| visits.0 += 1).unwrap();
    assert_visited_once(&world);
    query.job(1, |_, visits| visits.0 += 1).unwrap();
    assert_visited_once(&world);
    query
        .raw_parallel(|_, mut visits| visits.as_mut_slice().iter_mut().for_each(|v| v.0 += 1))
        .unwrap();
    assert_visited_once(&world);
}

#[test]
fn panics_surface_after_all_partitions_finish() {
    let world = populated(WorldConfig::default().with_worker_threads(4), 4_000);
    let query = world.query::<(Value, Visits)>().build().unwrap();
    let finished = AtomicUsize::new(0);

    let outcome = catch_unwind(AssertUnwindSafe(|| {
        query.run_parallel(10, |v, _| {
            if v.0 == 1_234 {
                panic!("boom");
            }
            finished.fetch_add(1, Ordering::Relaxed);
        })
    }));
    assert!(outcome.is_err());
    assert!(!world.is_locked());

    let outcome = catch_unwind(AssertUnwindSafe(|| {
        query.job(10, |v, _| {
            if v.0 == 2_345 {
                panic!("boom");
            }
        })
    }));
    assert!(outcome.is_err());
    assert!(!world.is_locked());

    // The world is still usable and the borrows were released.
    let mut rows = 0;
    query.run(|_, _| rows += 1).unwrap();
    assert_eq!(rows, 4_000);
    assert!(finished.load(Ordering::Relaxed) > 0);
}

#[test]
fn edits_from_workers_are_deferred() {
    let world = populated(WorldConfig::default().with_worker_threads(4), 1_000);
    let query = world.query::<(Value,)>().not::<Extra>().build().unwrap();
    let tagged = world.query::<(Value,)>().has::<Extra>().build().unwrap();
    let before = tagged.count();
    let targets: Vec<Identity> = query.entities();

    query
        .run_parallel(8, |v| {
            if v.0 % 2 == 0 {
                v.0 += 1;
            }
        })
        .unwrap();

    let outcomes = AtomicUsize::new(0);
    let targets = &targets;
    let world_ref = &world;
    query
        .job(32, |v| {
            let index = (v.0 as usize) % targets.len();
            if world_ref.add_component(targets[index], Extra).unwrap() == EditOutcome::Deferred {
                outcomes.fetch_add(1, Ordering::Relaxed);
            }
        })
        .unwrap();

    assert_eq!(outcomes.into_inner(), targets.len());
    assert_eq!(world.pending_commands(), 0);
    assert!(tagged.count() > before);
}

#[test]
fn concurrent_queries_on_disjoint_components() {
    let world = populated(WorldConfig::default().with_worker_threads(2), 3_000);
    let values = world.query::<(Value,)>().build().unwrap();
    let visits = world.query::<(Visits,)>().build().unwrap();

    std::thread::scope(|scope| {
        scope.spawn(|| {
            for _ in 0..10 {
                values.run_parallel(64, |v| v.0 += 1).unwrap();
            }
        });
        scope.spawn(|| {
            for _ in 0..10 {
                visits.job(64, |v| v.0 += 1).unwrap();
            }
        });
    });

    let mut sum = 0;
    values.run(|v| sum += v.0).unwrap();
    assert_eq!(sum, expected_sum(3_000) + 3_000 * 10);
    let mut visited = 0;
    visits.run(|v| visited += v.0 as u64).unwrap();
    assert_eq!(visited, 3_000 * 10);
}
