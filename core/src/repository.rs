//! The persistence seam between the engine and whatever stores campaign data.
//!
//! RULE: a [`WorldCommit`] is applied all-or-nothing. If `commit` returns
//! an error, none of its rows may be visible afterwards.

use crate::{
    clock::SimClock,
    error::SimResult,
    event::LogEntry,
    market::MarketAggregate,
    snapshot::{InventoryLine, WorldSnapshot},
    types::{CampaignId, CityId, ItemId, NodeId, Tick, Timestamp},
};
use serde::{Deserialize, Serialize};

/// One resource node's output for one tick. Write-once.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProductionRecord {
    pub node_id:         NodeId,
    pub tick:            Tick,
    pub amount_produced: f64,
    pub quality:         f64,
    pub produced_at:     Timestamp,
}

/// Everything one tick (or one stock transfer) writes.
#[derive(Debug, Clone, Default)]
pub struct WorldCommit {
    pub campaign_id: CampaignId,
    /// Inventory lines whose stock or price changed.
    pub inventory:   Vec<InventoryLine>,
    pub regional:    Vec<((CityId, ItemId), MarketAggregate)>,
    pub global:      Vec<(ItemId, MarketAggregate)>,
    pub production:  Vec<ProductionRecord>,
    pub events:      Vec<LogEntry>,
    /// Tick progress to persist. Only current_tick, last_tick_time and
    /// performance are written from it; state and errors are owned by
    /// [`EconomyRepository::save_clock_state`].
    pub clock:       Option<SimClock>,
}

pub trait EconomyRepository: Send + Sync {
    /// Load active shops, their inventories, items, cities, production
    /// nodes, upkeep, aggregates and the modifiers effective at `now`.
    fn load_world(&self, campaign_id: CampaignId, now: Timestamp) -> SimResult<WorldSnapshot>;

    /// Apply a commit atomically.
    fn commit(&self, commit: &WorldCommit) -> SimResult<()>;

    fn load_clock(&self, campaign_id: CampaignId) -> SimResult<Option<SimClock>>;

    /// Create the clock row if it does not exist yet. Never overwrites.
    fn init_clock(&self, clock: &SimClock) -> SimResult<()>;

    /// Persist state, last_error and last_error_time, appending `events`
    /// in the same transaction.
    fn save_clock_state(&self, clock: &SimClock, events: &[LogEntry]) -> SimResult<()>;

    /// Clocks currently in the running state, ascending by campaign id.
    fn running_clocks(&self) -> SimResult<Vec<SimClock>>;

    /// Most recent entries first.
    fn recent_logs(&self, campaign_id: CampaignId, limit: usize) -> SimResult<Vec<LogEntry>>;
}
