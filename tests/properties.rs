use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use proptest::prelude::*;
use strata::prelude::*;
use strata::{Mask, MaskPool};

#[derive(Clone, Copy, Debug, PartialEq)]
struct Key(u64);

#[derive(Clone, Copy, Debug, PartialEq)]
struct A(u32);

#[derive(Clone, Copy, Debug, PartialEq)]
struct B(u32);

#[derive(Clone, Copy, Debug, PartialEq)]
struct C(u32);

#[derive(Clone, Debug)]
enum Op {
    Spawn(u8),
    Despawn(usize),
    Add(usize, u8),
    Remove(usize, u8),
    Lock(Vec<Op>),
}

fn leaf_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0u8..8).prop_map(Op::Spawn),
        1 => any::<usize>().prop_map(Op::Despawn),
        2 => (any::<usize>(), 0u8..3).prop_map(|(i, c)| Op::Add(i, c)),
        2 => (any::<usize>(), 0u8..3).prop_map(|(i, c)| Op::Remove(i, c)),
    ]
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        8 => leaf_op(),
        1 => prop::collection::vec(leaf_op(), 1..6).prop_map(Op::Lock),
    ]
}

fn small_world() -> World {
    World::with_config(WorldConfig::default().with_worker_threads(2)).unwrap()
}

/// Expected component set per live entity.
#[derive(Default)]
struct Model {
    live: Vec<(Identity, u64)>,
    components: HashMap<u64, BTreeSet<u8>>,
    next_key: u64,
}

fn spawn_with(world: &World, key: u64, set: u8) -> Identity {
    let mut bundle = Bundle::new().with(Key(key)).unwrap();
    if set & 1 != 0 {
        bundle.insert(A(key as u32)).unwrap();
    }
    if set & 2 != 0 {
        bundle.insert(B(key as u32)).unwrap();
    }
    if set & 4 != 0 {
        bundle.insert(C(key as u32)).unwrap();
    }
    world.spawn(bundle).unwrap()
}

fn add(world: &World, e: Identity, component: u8, key: u64) {
    let outcome = match component {
        0 => world.add_component(e, A(key as u32)),
        1 => world.add_component(e, B(key as u32)),
        _ => world.add_component(e, C(key as u32)),
    };
    assert!(matches!(outcome, Ok(EditOutcome::Applied | EditOutcome::Deferred)));
}

fn remove(world: &World, e: Identity, component: u8) {
    let outcome = match component {
        0 => world.remove_component::<A>(e),
        1 => world.remove_component::<B>(e),
        _ => world.remove_component::<C>(e),
    };
    assert!(matches!(outcome, Ok(EditOutcome::Applied | EditOutcome::Deferred)));
}

fn apply(world: &World, model: &mut Model, op: &Op) {
    match op {
        Op::Spawn(set) => {
            let key = model.next_key;
            model.next_key += 1;
            let e = spawn_with(world, key, *set);
            model.live.push((e, key));
            let components = (0u8..3).filter(|&bit| *set & (1u8 << bit) != 0).collect();
            model.components.insert(key, components);
        }
        Op::Despawn(i) if !model.live.is_empty() => {
            let (e, key) = model.live.swap_remove(i % model.live.len());
            assert!(world.despawn(e).is_ok());
            model.components.remove(&key);
        }
        Op::Add(i, c) if !model.live.is_empty() => {
            let (e, key) = model.live[i % model.live.len()];
            add(world, e, *c, key);
            model.components.entry(key).or_default().insert(*c);
        }
        Op::Remove(i, c) if !model.live.is_empty() => {
            let (e, key) = model.live[i % model.live.len()];
            remove(world, e, *c);
            model.components.entry(key).or_default().remove(c);
        }
        Op::Lock(ops) => {
            let _lock = world.lock();
            for op in ops {
                apply(world, model, op);
            }
        }
        _ => {}
    }
}

fn check(world: &World, model: &Model) {
    assert_eq!(world.entity_count(), model.live.len());
    for &(e, key) in &model.live {
        let expected = &model.components[&key];
        assert!(world.is_alive(e));
        assert_eq!(world.get::<Key>(e).unwrap().0, key);
        assert_eq!(world.has::<A>(e).unwrap(), expected.contains(&0));
        assert_eq!(world.has::<B>(e).unwrap(), expected.contains(&1));
        assert_eq!(world.has::<C>(e).unwrap(), expected.contains(&2));
        assert_eq!(world.component_count(e).unwrap(), 1 + expected.len());
        if expected.contains(&0) {
            assert_eq!(world.get::<A>(e).unwrap().0, key as u32);
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn locations_follow_every_structural_edit(ops in prop::collection::vec(op(), 1..60)) {
        let world = small_world();
        let mut model = Model::default();
        for op in &ops {
            apply(&world, &mut model, op);
            check(&world, &model);
        }
    }

    #[test]
    fn query_cache_matches_every_qualifying_table(sets in prop::collection::vec(0u8..8, 0..40)) {
        let world = small_world();
        let query = world.query::<(Key, A)>().not::<B>().build().unwrap();
        let any = world.query::<(Key,)>().any::<B>().any::<C>().build().unwrap();

        for (key, &set) in sets.iter().enumerate() {
            spawn_with(&world, key as u64, set);
        }

        let expected = sets.iter().filter(|&&s| s & 1 != 0 && s & 2 == 0).count();
        prop_assert_eq!(query.count(), expected);
        let expected_any = sets.iter().filter(|&&s| s & 6 != 0).count();
        prop_assert_eq!(any.count(), expected_any);

        let mut visited = 0;
        query.run(|_, _| visited += 1).unwrap();
        prop_assert_eq!(visited, expected);
    }

    #[test]
    fn parallel_sum_equals_sequential_sum(
        values in prop::collection::vec(0u64..1_000_000, 0..600),
        chunk in 0usize..80,
    ) {
        let world = small_world();
        for (i, &value) in values.iter().enumerate() {
            if i % 2 == 0 {
                world.spawn((Key(value),)).unwrap();
            } else {
                world.spawn((Key(value), A(0))).unwrap();
            }
        }
        let query = world.query::<(Key,)>().build().unwrap();

        let mut sequential = 0;
        query.run(|k| sequential += k.0).unwrap();
        prop_assert_eq!(sequential, values.iter().sum::<u64>());

        let parallel = AtomicU64::new(0);
        query.run_parallel(chunk, |k| { parallel.fetch_add(k.0, Ordering::Relaxed); }).unwrap();
        prop_assert_eq!(parallel.into_inner(), sequential);

        let jobs = AtomicU64::new(0);
        query.job(chunk, |k| { jobs.fetch_add(k.0, Ordering::Relaxed); }).unwrap();
        prop_assert_eq!(jobs.into_inner(), sequential);
    }

    #[test]
    fn released_masks_come_back_empty(ids in prop::collection::vec(0u32..4096, 0..32)) {
        let mut mask = MaskPool::rent();
        for &id in &ids {
            mask.add(id);
        }
        prop_assert_eq!(mask.len(), ids.iter().collect::<BTreeSet<_>>().len());
        MaskPool::release(mask);

        let rented: Vec<Mask> = (0..40).map(|_| MaskPool::rent()).collect();
        prop_assert!(rented.iter().all(Mask::is_empty));
        for mask in rented {
            MaskPool::release(mask);
        }
    }
}
