//! The tick processor: one economic tick from a loaded world to a commit.
//!
//! EXECUTION ORDER (fixed, documented, never reordered):
//!   1. Production   resource nodes add regional and global supply
//!   2. Demand       per (city, item) demand estimates
//!   3. Consumption  NPC purchases drain stock and raise realized demand
//!   4. Repricing    every active inventory line gets a new price
//!   5. Viability    shops with worthless inventory are flagged
//!   6. Maintenance  upkeep costs are recorded
//!
//! RULES:
//!   - Steps execute in registration order, every tick.
//!   - All randomness flows through the per-(campaign, tick) TickRng.
//!   - The processor never writes. It returns a WorldCommit and the
//!     caller persists it in one transaction.

use crate::{
    clock::SimClock,
    config::SimConfig,
    consumption_step::ConsumptionStep,
    demand_step::DemandStep,
    error::SimResult,
    event::{LogEntry, SimEvent},
    maintenance_step::MaintenanceStep,
    production_step::ProductionStep,
    repository::WorldCommit,
    repricing_step::RepricingStep,
    rng::RngBank,
    snapshot::WorldSnapshot,
    step::{TickContext, TickStats, TickStep},
    types::{Tick, Timestamp},
    viability_step::ViabilityStep,
};
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// What a caller learns about one committed tick.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TickReport {
    pub tick:          Tick,
    pub shops_updated: usize,
    pub items_updated: usize,
    pub price_changes: usize,
    pub duration_ms:   u64,
}

pub struct TickOutcome {
    pub commit: WorldCommit,
    pub report: TickReport,
    pub stats:  TickStats,
}

pub struct TickProcessor {
    config:   SimConfig,
    rng_bank: RngBank,
    steps:    Vec<Box<dyn TickStep>>,
}

impl TickProcessor {
    pub fn new(config: SimConfig) -> Self {
        Self {
            rng_bank: RngBank::new(config.seed),
            config,
            steps: Vec::new(),
        }
    }

    /// A processor with every step registered in the documented order.
    pub fn build(config: SimConfig) -> Self {
        let mut processor = Self::new(config);
        processor.register(Box::new(ProductionStep));
        processor.register(Box::new(DemandStep));
        processor.register(Box::new(ConsumptionStep));
        processor.register(Box::new(RepricingStep));
        processor.register(Box::new(ViabilityStep));
        processor.register(Box::new(MaintenanceStep));
        processor
    }

    /// Register a step. Call in the documented execution order.
    pub fn register(&mut self, step: Box<dyn TickStep>) {
        self.steps.push(step);
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    /// Compute the tick after `clock.current_tick` against `world`.
    ///
    /// On error nothing has been written; the caller discards the world.
    pub fn run(
        &self,
        world: WorldSnapshot,
        clock: &SimClock,
        now: Timestamp,
        batch_id: Option<&str>,
    ) -> SimResult<TickOutcome> {
        let started = Instant::now();
        let campaign_id = clock.campaign_id;
        let tick = clock.current_tick + 1;
        let rng = self.rng_bank.for_tick(campaign_id, tick);
        let mut ctx = TickContext::new(campaign_id, tick, now, &self.config, world, rng);

        for step in &self.steps {
            log::trace!("tick={tick} campaign={campaign_id} running {}", step.name());
            step.run(&mut ctx)?;
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        let mut next_clock = clock.clone();
        next_clock.advance(now);
        if next_clock.performance.record(duration_ms, self.config.tick_budget_ms) {
            log::warn!(
                "tick={tick} campaign={campaign_id} took {duration_ms}ms, over the {}ms budget",
                self.config.tick_budget_ms
            );
        }

        let stats = ctx.stats.clone();
        ctx.events.push(SimEvent::Tick {
            shops_updated:    stats.shops_updated,
            items_updated:    stats.items_updated,
            price_changes:    stats.price_changes,
            units_produced:   stats.units_produced,
            units_consumed:   stats.units_consumed,
            estimated_demand: stats.estimated_demand,
            skipped_refs:     stats.skipped_refs,
            upkeep_total:     stats.upkeep_total,
            duration_ms,
            batch_id:         batch_id.map(str::to_string),
        });

        let events = ctx
            .events
            .iter()
            .map(|event| LogEntry::new(campaign_id, tick, event, now))
            .collect::<Result<Vec<_>, _>>()?;
        let inventory = ctx
            .touched_lines()
            .filter_map(|key| ctx.world.inventory.get(key).cloned())
            .collect();
        let regional = ctx
            .world
            .market
            .changed_regional()
            .map(|(key, agg)| (key, agg.clone()))
            .collect();
        let global = ctx
            .world
            .market
            .changed_global()
            .map(|(id, agg)| (id, agg.clone()))
            .collect();

        let report = TickReport {
            tick,
            shops_updated: stats.shops_updated,
            items_updated: stats.items_updated,
            price_changes: stats.price_changes,
            duration_ms,
        };
        let commit = WorldCommit {
            campaign_id,
            inventory,
            regional,
            global,
            production: ctx.production,
            events,
            clock: Some(next_clock),
        };
        Ok(TickOutcome { commit, report, stats })
    }
}
