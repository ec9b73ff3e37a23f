//! # Engine Module
//!
//! Storage and query engine.
//!
//! - Entity handles and the location index
//! - Component registry, masks and pools
//! - Archetype tables and the graph that owns them
//! - The world, its lock and deferred edits
//! - Cached queries and their execution strategies
//!
//! Public API exposure is controlled by `lib.rs`.

pub mod types;
pub mod error;
pub mod entity;
pub mod component;
pub mod storage;
pub mod mask;
pub mod pool;
pub mod bundle;
pub mod table;
pub mod graph;
pub mod commands;
pub mod borrow;
pub mod config;
pub mod sync;
pub mod partition;
pub mod world;
pub mod query;
pub mod strategies;
