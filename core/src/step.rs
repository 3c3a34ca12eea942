//! Tick step trait and the per-tick working state it operates on.
//!
//! RULE: Every stage of a tick implements TickStep.
//! The processor runs the registered steps in order, every tick.
//! Execution order is fixed and documented in engine.rs.
//! RULE: steps only mutate the in-memory TickContext. Nothing reaches
//! storage until the whole tick has succeeded.

use crate::{
    config::SimConfig,
    error::SimResult,
    event::SimEvent,
    repository::ProductionRecord,
    rng::TickRng,
    snapshot::WorldSnapshot,
    types::{CampaignId, CityId, ItemId, ShopId, Tick, Timestamp},
};
use std::collections::{BTreeMap, BTreeSet};

/// Counters reported in the tick's summary event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickStats {
    pub shops_updated:    usize,
    pub items_updated:    usize,
    pub price_changes:    usize,
    pub units_produced:   f64,
    pub units_consumed:   i64,
    pub estimated_demand: f64,
    pub skipped_refs:     usize,
    pub upkeep_total:     f64,
}

pub struct TickContext<'a> {
    pub campaign_id: CampaignId,
    /// The tick being computed (committed tick + 1).
    pub tick:        Tick,
    pub now:         Timestamp,
    pub config:      &'a SimConfig,
    pub world:       WorldSnapshot,
    pub rng:         TickRng,
    /// Estimated demand per (city, item) this tick. Read-only after the
    /// demand step.
    pub city_demand: BTreeMap<(CityId, ItemId), f64>,
    pub production:  Vec<ProductionRecord>,
    pub events:      Vec<SimEvent>,
    pub stats:       TickStats,
    touched_lines:   BTreeSet<(ShopId, ItemId)>,
}

impl<'a> TickContext<'a> {
    pub fn new(
        campaign_id: CampaignId,
        tick: Tick,
        now: Timestamp,
        config: &'a SimConfig,
        world: WorldSnapshot,
        rng: TickRng,
    ) -> Self {
        Self {
            campaign_id,
            tick,
            now,
            config,
            world,
            rng,
            city_demand: BTreeMap::new(),
            production: Vec::new(),
            events: Vec::new(),
            stats: TickStats::default(),
            touched_lines: BTreeSet::new(),
        }
    }

    /// Mark an inventory line as changed so it is written at commit.
    pub fn touch_line(&mut self, shop_id: ShopId, item_id: ItemId) {
        self.touched_lines.insert((shop_id, item_id));
    }

    pub fn touched_lines(&self) -> impl Iterator<Item = &(ShopId, ItemId)> {
        self.touched_lines.iter()
    }

    /// Record a dangling reference: warn, count and log it, then move on.
    pub fn skip_reference(&mut self, step: &'static str, detail: String) {
        log::warn!("tick={} campaign={} {step}: skipped {detail}", self.tick, self.campaign_id);
        self.stats.skipped_refs += 1;
        self.events.push(SimEvent::ReferenceSkipped {
            step: step.to_string(),
            detail,
        });
    }
}

/// The contract every tick step must fulfill.
pub trait TickStep: Send + Sync {
    /// Unique stable name for this step.
    fn name(&self) -> &'static str;

    /// Called once per tick by the processor, after every earlier step.
    fn run(&self, ctx: &mut TickContext<'_>) -> SimResult<()>;
}
