#![allow(dead_code)]

use strata::prelude::*;

pub const AGENTS_SMALL: usize = 10_000;
pub const AGENTS_MED: usize = 100_000;
pub const AGENTS_LARGE: usize = 1_000_000;

#[derive(Clone, Copy)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

#[derive(Clone, Copy)]
pub struct Velocity {
    pub dx: f32,
    pub dy: f32,
}

#[derive(Clone, Copy)]
pub struct Wealth {
    pub value: f32,
}

#[derive(Clone, Copy)]
pub struct Resting;

pub fn make_world(threads: usize) -> World {
    World::with_config(WorldConfig::default().with_worker_threads(threads))
        .expect("world construction failed in benchmark")
}

/// Spawns `agent_count` movers; every fourth one also carries `Resting`,
/// so queries see two tables.
pub fn populate(world: &World, agent_count: usize) -> ECSResult<()> {
    for i in 0..agent_count {
        let position = Position { x: i as f32, y: 0.0 };
        let velocity = Velocity { dx: 1.0, dy: 0.5 };
        let wealth = Wealth { value: 100.0 };
        if i % 4 == 0 {
            world.spawn((position, velocity, wealth, Resting))?;
        } else {
            world.spawn((position, velocity, wealth))?;
        }
    }
    Ok(())
}
