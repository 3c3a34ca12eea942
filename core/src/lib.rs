//! Tick-based economy simulation for tabletop campaigns.
//!
//! Shops, items, cities and resource nodes live in SQLite. Each campaign
//! has a clock that advances in discrete one-hour ticks; every tick runs
//! production, demand, consumption, repricing, viability and maintenance
//! against a loaded world snapshot and commits the result atomically.

pub mod clock;
pub mod command;
pub mod config;
pub mod consumption_step;
pub mod demand_step;
pub mod engine;
pub mod error;
pub mod event;
pub mod maintenance_step;
pub mod market;
pub mod modifier;
pub mod pricing;
pub mod production_step;
pub mod repository;
pub mod repricing_step;
pub mod rng;
pub mod scheduler;
pub mod service;
pub mod snapshot;
pub mod step;
pub mod store;
pub mod types;
pub mod viability_step;
