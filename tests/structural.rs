use strata::engine::error::NotInStorageError;
use strata::prelude::*;

#[derive(Clone, Copy, Debug, PartialEq)]
struct Int(i32);

#[derive(Clone, Copy, Debug, PartialEq)]
struct Matrix([[f32; 4]; 4]);

impl Matrix {
    fn diagonal(value: f32) -> Self {
        let mut m = [[0.0; 4]; 4];
        for (i, row) in m.iter_mut().enumerate() {
            row[i] = value;
        }
        Matrix(m)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct Tagged(u8);

#[derive(Clone, Copy, Debug, PartialEq)]
struct Likes(f32);

fn world() -> World {
    World::with_config(WorldConfig::default().with_worker_threads(4)).unwrap()
}

#[test]
fn spawn_get_and_despawn() {
    let world = world();
    let e = world.spawn((Int(7), Matrix::diagonal(1.0))).unwrap();

    assert!(world.is_alive(e));
    assert_eq!(world.component_count(e).unwrap(), 2);
    assert_eq!(*world.get::<Int>(e).unwrap(), Int(7));

    *world.get::<Int>(e).unwrap() = Int(9);
    assert_eq!(world.get::<Int>(e).unwrap().0, 9);

    assert_eq!(world.despawn(e).unwrap(), EditOutcome::Applied);
    assert!(!world.is_alive(e));
    assert!(matches!(world.get::<Int>(e), Err(ECSError::StaleEntity(_))));
    assert!(matches!(world.despawn(e), Err(ECSError::StaleEntity(_))));
}

#[test]
fn reused_slots_reject_old_handles() {
    let world = world();
    let old = world.spawn((Int(1),)).unwrap();
    assert_eq!(world.despawn(old).unwrap(), EditOutcome::Applied);
    let new = world.spawn((Int(2),)).unwrap();

    assert_eq!(old.index(), new.index());
    assert_ne!(old, new);
    assert!(matches!(world.get::<Int>(old), Err(ECSError::StaleEntity(_))));
    assert_eq!(world.get::<Int>(new).unwrap().0, 2);
}

#[test]
fn swap_remove_patches_the_moved_entity() {
    let world = world();
    let ids: Vec<_> = (0..4).map(|i| world.spawn((Int(i),)).unwrap()).collect();

    assert_eq!(world.despawn(ids[1]).unwrap(), EditOutcome::Applied);

    // The last entity now lives in row 1 and still resolves to its own value.
    for (i, &e) in ids.iter().enumerate() {
        if i == 1 {
            continue;
        }
        assert_eq!(world.get::<Int>(e).unwrap().0, i as i32);
    }
    assert_eq!(world.entity_count(), 3);
}

#[test]
fn adding_and_removing_components_moves_between_tables() {
    let world = world();
    let e = world.spawn((Int(3),)).unwrap();
    let before = world.table_count();

    assert_eq!(world.add_component(e, Tagged(1)).unwrap(), EditOutcome::Applied);
    assert!(world.has::<Tagged>(e).unwrap());
    assert_eq!(world.get::<Int>(e).unwrap().0, 3);
    assert_eq!(world.table_count(), before + 1);

    // Overwrites in place, no new table.
    assert_eq!(world.add_component(e, Tagged(2)).unwrap(), EditOutcome::Applied);
    assert_eq!(world.get::<Tagged>(e).unwrap().0, 2);
    assert_eq!(world.table_count(), before + 1);

    assert_eq!(world.remove_component::<Tagged>(e).unwrap(), EditOutcome::Applied);
    assert!(!world.has::<Tagged>(e).unwrap());
    assert_eq!(world.get::<Int>(e).unwrap().0, 3);

    // Absent component: nothing happens.
    assert_eq!(world.remove_component::<Tagged>(e).unwrap(), EditOutcome::Applied);
    assert_eq!(world.component_count(e).unwrap(), 1);

    assert!(matches!(
        world.get::<Tagged>(e),
        Err(ECSError::NotInStorage(NotInStorageError { component: Some(_), .. }))
    ));
}

#[test]
fn removing_the_last_component_keeps_the_entity() {
    let world = world();
    let e = world.spawn((Int(1),)).unwrap();
    assert_eq!(world.remove_component::<Int>(e).unwrap(), EditOutcome::Applied);
    assert!(world.is_alive(e));
    assert_eq!(world.component_count(e).unwrap(), 0);
    assert_eq!(world.add_component(e, Int(5)).unwrap(), EditOutcome::Applied);
    assert_eq!(world.get::<Int>(e).unwrap().0, 5);
}

#[test]
fn edits_while_locked_are_deferred_until_unlock() {
    let world = world();
    let e = world.spawn((Int(1),)).unwrap();

    let lock = world.lock();
    assert!(world.is_locked());

    let spawned = world.spawn((Int(2),)).unwrap();
    assert!(world.is_alive(spawned));
    assert_eq!(world.add_component(e, Tagged(4)).unwrap(), EditOutcome::Deferred);
    assert_eq!(world.pending_commands(), 2);
    assert_eq!(world.apply_deferred(), 0);
    assert!(!world.has::<Tagged>(e).unwrap());
    drop(lock);

    assert!(!world.is_locked());
    assert_eq!(world.pending_commands(), 0);
    assert!(world.has::<Tagged>(e).unwrap());
    assert_eq!(world.get::<Int>(spawned).unwrap().0, 2);
}

#[test]
fn deferred_spawn_is_not_in_storage_yet() {
    let world = world();
    let lock = world.lock();
    let e = world.spawn((Int(1),)).unwrap();
    drop(lock);
    assert_eq!(world.get::<Int>(e).unwrap().0, 1);

    let guard = world.get::<Int>(e).unwrap();
    let pending = world.spawn((Int(2),)).unwrap();
    assert_eq!(world.component_count(pending).unwrap(), 0);
    drop(guard);
    assert_eq!(world.component_count(pending).unwrap(), 1);
}

#[test]
fn nested_locks_flush_once_the_outermost_is_released() {
    let world = world();
    let e = world.spawn((Int(1),)).unwrap();

    let outer = world.lock();
    {
        let _inner = world.lock();
        assert_eq!(world.despawn(e).unwrap(), EditOutcome::Deferred);
    }
    assert!(world.is_alive(e));
    assert_eq!(world.pending_commands(), 1);
    drop(outer);
    assert!(!world.is_alive(e));
}

#[test]
fn rejecting_edits_while_locked_when_deferral_is_off() {
    let config = WorldConfig::single_threaded().with_deferred_structural_edits(false);
    let world = World::with_config(config).unwrap();
    let e = world.spawn((Int(1),)).unwrap();

    let lock = world.lock();
    assert!(matches!(
        world.add_component(e, Tagged(0)),
        Err(ECSError::ConcurrentStructuralEdit)
    ));
    let live = world.entity_count();
    assert!(matches!(
        world.spawn((Int(2),)),
        Err(ECSError::ConcurrentStructuralEdit)
    ));
    assert_eq!(world.entity_count(), live);
    drop(lock);

    assert_eq!(world.add_component(e, Tagged(0)).unwrap(), EditOutcome::Applied);
}

#[test]
fn edits_from_inside_a_callback_apply_after_the_run() {
    let world = world();
    let ids: Vec<_> = (0..6).map(|i| world.spawn((Int(i),)).unwrap()).collect();
    let query = world.query::<(Int,)>().build().unwrap();
    let untagged = world.query::<(Int,)>().not::<Tagged>().build().unwrap();

    let mut outcomes = Vec::new();
    query
        .run(|value| {
            if value.0 % 2 == 0 {
                outcomes.push(world.add_component(ids[value.0 as usize], Tagged(1)).unwrap());
            }
        })
        .unwrap();
    assert_eq!(outcomes, vec![EditOutcome::Deferred; 3]);
    assert_eq!(untagged.count(), 3);

    let mut doomed = Some(ids[1]);
    query
        .run(|_| {
            if let Some(e) = doomed.take() {
                assert_eq!(world.despawn(e).unwrap(), EditOutcome::Deferred);
                assert!(world.is_alive(e));
            }
        })
        .unwrap();
    assert!(!world.is_alive(ids[1]));
    assert_eq!(query.count(), 5);
}

#[test]
fn scenario_third_component_on_half_of_the_entities() {
    let world = world();
    let ids: Vec<_> = (0..10)
        .map(|i| world.spawn((Int(i), Matrix::diagonal(0.0))).unwrap())
        .collect();

    let pairs = world.query::<(Int, Matrix)>().build().unwrap();
    pairs
        .run(|int, matrix| *matrix = Matrix::diagonal(int.0 as f32))
        .unwrap();
    for (i, &e) in ids.iter().enumerate() {
        assert_eq!(*world.get::<Matrix>(e).unwrap(), Matrix::diagonal(i as f32));
    }

    for &e in ids.iter().take(5) {
        assert_eq!(world.add_component(e, Tagged(0)).unwrap(), EditOutcome::Applied);
    }
    let triples = world.query::<(Int, Matrix, Tagged)>().build().unwrap();
    assert_eq!(pairs.count(), 10);
    assert_eq!(triples.count(), 5);
}

#[test]
fn scenario_third_component_with_parallel_strategies() {
    let fill = |int: &mut Int, matrix: &mut Matrix| *matrix = Matrix::diagonal(int.0 as f32);
    let number = |int: &mut Int, _: &mut Matrix, tag: &mut Tagged| tag.0 = int.0 as u8;

    for use_jobs in [false, true] {
        let world = world();
        let ids: Vec<_> = (0..10)
            .map(|i| world.spawn((Int(i), Matrix::diagonal(0.0))).unwrap())
            .collect();
        let pairs = world.query::<(Int, Matrix)>().build().unwrap();

        if use_jobs {
            pairs.job(2, fill).unwrap();
        } else {
            pairs.run_parallel(2, fill).unwrap();
        }
        for (i, &e) in ids.iter().enumerate() {
            assert_eq!(*world.get::<Matrix>(e).unwrap(), Matrix::diagonal(i as f32));
        }

        let tag_first_half = |int: &mut Int, _: &mut Matrix| {
            if int.0 < 5 {
                let outcome = world.add_component(ids[int.0 as usize], Tagged(0)).unwrap();
                assert_eq!(outcome, EditOutcome::Deferred);
            }
        };
        if use_jobs {
            pairs.job(2, tag_first_half).unwrap();
        } else {
            pairs.run_parallel(2, tag_first_half).unwrap();
        }

        let triples = world.query::<(Int, Matrix, Tagged)>().build().unwrap();
        assert_eq!(pairs.count(), 10);
        assert_eq!(triples.count(), 5);

        if use_jobs {
            triples.job(2, number).unwrap();
        } else {
            triples.run_parallel(2, number).unwrap();
        }
        for (i, &e) in ids.iter().enumerate().take(5) {
            assert_eq!(*world.get::<Tagged>(e).unwrap(), Tagged(i as u8));
            assert_eq!(*world.get::<Matrix>(e).unwrap(), Matrix::diagonal(i as f32));
        }
        assert!(!world.has::<Tagged>(ids[5]).unwrap());
    }
}

#[test]
fn relations_are_distinct_keys_per_target() {
    let world = world();
    let alice = world.spawn((Int(1),)).unwrap();
    let bob = world.spawn((Int(2),)).unwrap();
    let carol = world.spawn((Int(3),)).unwrap();

    assert_eq!(world.add_relation(alice, bob, Likes(0.5)).unwrap(), EditOutcome::Applied);
    assert_eq!(world.add_relation(alice, carol, Likes(0.9)).unwrap(), EditOutcome::Applied);

    assert!(world.has_relation::<Likes>(alice, bob).unwrap());
    assert!(world.has_relation::<Likes>(alice, carol).unwrap());
    assert!(!world.has::<Likes>(alice).unwrap());
    assert!(!world.has_relation::<Likes>(bob, alice).unwrap());
    assert_eq!(world.get_relation::<Likes>(alice, carol).unwrap().0, 0.9);

    assert_eq!(world.remove_relation::<Likes>(alice, bob).unwrap(), EditOutcome::Applied);
    assert!(!world.has_relation::<Likes>(alice, bob).unwrap());
    assert_eq!(world.component_count(alice).unwrap(), 2);

    assert_eq!(world.despawn(carol).unwrap(), EditOutcome::Applied);
    assert!(matches!(
        world.add_relation(alice, carol, Likes(1.0)),
        Err(ECSError::StaleEntity(_))
    ));
}

#[test]
fn identity_is_not_a_component() {
    let world = world();
    assert!(matches!(
        world.spawn((Identity::NONE,)),
        Err(ECSError::TypeMismatch(_))
    ));
    assert!(matches!(
        world.query::<(Identity,)>().build(),
        Err(ECSError::TypeMismatch(_))
    ));
    let e = world.spawn(()).unwrap();
    assert!(matches!(
        world.add_component(e, Identity::NONE),
        Err(ECSError::TypeMismatch(_))
    ));
}

#[test]
fn bundles_spawn_like_tuples() {
    let world = world();
    let bundle = Bundle::new().with(Int(4)).unwrap().with(Tagged(2)).unwrap();
    let e = world.spawn(bundle).unwrap();
    assert!(world.has::<Int>(e).unwrap());
    assert!(world.has::<Tagged>(e).unwrap());
}

#[test]
fn bundles_with_dead_relation_targets_are_rejected() {
    let world = world();
    let target = world.spawn((Int(1),)).unwrap();
    let mut live = Bundle::new().with(Int(2)).unwrap();
    live.insert_relation(target, Likes(0.2)).unwrap();
    let mut stale = Bundle::new().with(Int(3)).unwrap();
    stale.insert_relation(target, Likes(0.3)).unwrap();

    let e = world.spawn(live).unwrap();
    assert!(world.has_relation::<Likes>(e, target).unwrap());

    assert_eq!(world.despawn(target).unwrap(), EditOutcome::Applied);
    let before = world.entity_count();
    assert!(matches!(world.spawn(stale), Err(ECSError::StaleEntity(_))));
    assert_eq!(world.entity_count(), before);
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct ChildOf;

#[test]
fn relation_targets_outnumber_four_thousand_component_ids() {
    let world = world();
    let families: Vec<_> = (0..5_000)
        .map(|i| {
            let parent = world.spawn((Int(i),)).unwrap();
            let child = world.spawn((Int(-i),)).unwrap();
            (parent, child)
        })
        .collect();

    for &(parent, child) in &families {
        assert_eq!(world.add_relation(child, parent, ChildOf).unwrap(), EditOutcome::Applied);
    }

    let (first_parent, first_child) = families[0];
    let (last_parent, last_child) = families[4_999];
    assert!(world.has_relation::<ChildOf>(last_child, last_parent).unwrap());
    assert!(!world.has_relation::<ChildOf>(first_child, last_parent).unwrap());
    assert_eq!(*world.get_relation::<ChildOf>(last_child, last_parent).unwrap(), ChildOf);

    let children = world
        .query::<(Int,)>()
        .has_relation::<ChildOf>(last_parent)
        .build()
        .unwrap();
    assert_eq!(children.entities(), vec![last_child]);
    assert!(world.has_relation::<ChildOf>(first_child, first_parent).unwrap());
}
