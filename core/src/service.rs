//! Campaign-facing operations: clock control, manual and batched ticks,
//! status, logs and stock transfers.
//!
//! RULES:
//!   - At most one tick (or transfer) runs per campaign at a time. A second
//!     request while one holds the campaign's tick lock is rejected with
//!     TickInProgress, never queued.
//!   - Clock state changes are serialized by a separate per-campaign lock,
//!     so pausing never waits for an in-flight tick and never aborts it.
//!   - A failed tick rolls back, moves the campaign to ErrorPaused and
//!     logs the error. Nothing else changes.

use crate::{
    clock::{ClockEvent, ClockState, PerformanceMetrics, SimClock, SpeedSetting, TimePeriod},
    config::SimConfig,
    engine::{TickProcessor, TickReport},
    error::{SimError, SimResult},
    event::{LogEntry, SimEvent},
    market::{MarketService, SourceAllocation, TransactionOutcome},
    repository::{EconomyRepository, WorldCommit},
    snapshot::WorldSnapshot,
    types::{CampaignId, ItemId, ShopId, Tick, Timestamp},
};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeSet, HashMap},
    sync::{Arc, Mutex, MutexGuard, TryLockError},
    time::Instant,
};
use uuid::Uuid;

/// Where "now" comes from. Tests substitute a fixed clock.
pub type TimeSource = Arc<dyn Fn() -> Timestamp + Send + Sync>;

#[derive(Default)]
struct CampaignSlot {
    tick:  Mutex<()>,
    state: Mutex<()>,
}

impl CampaignSlot {
    fn try_tick(&self, campaign_id: CampaignId) -> SimResult<MutexGuard<'_, ()>> {
        match self.tick.try_lock() {
            Ok(guard) => Ok(guard),
            Err(TryLockError::WouldBlock) => Err(SimError::TickInProgress(campaign_id)),
            // The guarded value is (), so a poisoned lock carries no bad state.
            Err(TryLockError::Poisoned(poisoned)) => Ok(poisoned.into_inner()),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, ()> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn tick_in_progress(&self) -> bool {
        matches!(self.tick.try_lock(), Err(TryLockError::WouldBlock))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CampaignStatus {
    pub campaign_id:      CampaignId,
    pub state:            String,
    pub speed:            String,
    pub current_tick:     Tick,
    pub last_tick_time:   Timestamp,
    pub performance:      PerformanceMetrics,
    pub last_error:       Option<String>,
    pub last_error_time:  Option<Timestamp>,
    pub tick_in_progress: bool,
}

/// Result of `run_time_period`. A failure part-way through is reported
/// here, not as an Err: the ticks before it stay committed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PeriodSummary {
    pub campaign_id:     CampaignId,
    pub period:          String,
    pub batch_id:        String,
    pub ticks_requested: u64,
    pub ticks_completed: u64,
    pub first_tick:      Option<Tick>,
    pub last_tick:       Option<Tick>,
    pub price_changes:   usize,
    pub duration_ms:     u64,
    pub error:           Option<String>,
    pub error_category:  Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransferReport {
    pub target_shop: ShopId,
    pub item_id:     ItemId,
    pub requested:   i64,
    pub transferred: i64,
    pub legs:        Vec<TransactionOutcome>,
}

pub struct SimulationService<R: EconomyRepository> {
    repo:      R,
    processor: TickProcessor,
    slots:     Mutex<HashMap<CampaignId, Arc<CampaignSlot>>>,
    time:      TimeSource,
}

impl<R: EconomyRepository> SimulationService<R> {
    pub fn new(repo: R, config: SimConfig) -> Self {
        if let Err(err) = config.validate() {
            log::warn!("service: config failed validation ({err}); affected clocks will never be due");
        }
        Self {
            repo,
            processor: TickProcessor::build(config),
            slots: Mutex::new(HashMap::new()),
            time: Arc::new(chrono::Utc::now),
        }
    }

    pub fn with_time_source(mut self, time: TimeSource) -> Self {
        self.time = time;
        self
    }

    pub fn repository(&self) -> &R {
        &self.repo
    }

    pub fn config(&self) -> &SimConfig {
        self.processor.config()
    }

    pub fn now(&self) -> Timestamp {
        (self.time)()
    }

    fn slot(&self, campaign_id: CampaignId) -> Arc<CampaignSlot> {
        let mut slots = self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        slots.entry(campaign_id).or_default().clone()
    }

    fn load_or_init_clock(&self, campaign_id: CampaignId) -> SimResult<SimClock> {
        if let Some(clock) = self.repo.load_clock(campaign_id)? {
            return Ok(clock);
        }
        let clock = SimClock::new(campaign_id, self.now());
        self.repo.init_clock(&clock)?;
        log::info!("campaign={campaign_id} clock initialized, paused at tick 0");
        Ok(clock)
    }

    fn status_of(&self, clock: &SimClock, slot: &CampaignSlot) -> CampaignStatus {
        CampaignStatus {
            campaign_id:      clock.campaign_id,
            state:            clock.state.label().to_string(),
            speed:            clock.state.speed_label().to_string(),
            current_tick:     clock.current_tick,
            last_tick_time:   clock.last_tick_time,
            performance:      clock.performance.clone(),
            last_error:       clock.last_error.clone(),
            last_error_time:  clock.last_error_time,
            tick_in_progress: slot.tick_in_progress(),
        }
    }

    fn state_change_entry(&self, clock: &SimClock, from: ClockState, reason: Option<String>) -> SimResult<LogEntry> {
        let event = SimEvent::StateChange {
            from: from.label().to_string(),
            to: clock.state.label().to_string(),
            reason,
        };
        Ok(LogEntry::new(clock.campaign_id, clock.current_tick, &event, self.now())?)
    }

    // ── Clock control ──────────────────────────────────────────

    /// "pause", "1x", "5x", "100x" or "1000x". Invalid input and
    /// ErrorPaused campaigns are rejected without changing anything.
    pub fn set_speed(&self, campaign_id: CampaignId, speed: &str) -> SimResult<CampaignStatus> {
        let setting = SpeedSetting::parse(speed)?;
        let slot = self.slot(campaign_id);
        let _state = slot.lock_state();

        let mut clock = self.load_or_init_clock(campaign_id)?;
        let from = clock.apply(ClockEvent::SetSpeed(setting))?;
        let entry = self.state_change_entry(&clock, from, Some(format!("set_speed {}", setting.as_str())))?;
        self.repo.save_clock_state(&clock, &[entry])?;

        log::info!(
            "campaign={campaign_id} speed {} -> {} ({})",
            from.speed_label(),
            clock.state.speed_label(),
            clock.state.label()
        );
        Ok(self.status_of(&clock, &slot))
    }

    /// Leave ErrorPaused for Paused. The recorded error is cleared.
    pub fn resume(&self, campaign_id: CampaignId) -> SimResult<CampaignStatus> {
        let slot = self.slot(campaign_id);
        let _state = slot.lock_state();

        let mut clock = self.load_or_init_clock(campaign_id)?;
        let reason = clock.last_error.clone().map(|e| format!("resumed after: {e}"));
        let from = clock.resume()?;
        let entry = self.state_change_entry(&clock, from, reason)?;
        self.repo.save_clock_state(&clock, &[entry])?;

        log::info!("campaign={campaign_id} resumed from {} at tick {}", from.label(), clock.current_tick);
        Ok(self.status_of(&clock, &slot))
    }

    /// Is a scheduled tick due now? Unknown campaigns are never due.
    pub fn should_tick(&self, campaign_id: CampaignId) -> SimResult<bool> {
        let Some(clock) = self.repo.load_clock(campaign_id)? else {
            return Ok(false);
        };
        Ok(clock.should_tick(self.now(), self.config().base_tick_interval_secs))
    }

    pub fn get_status(&self, campaign_id: CampaignId) -> SimResult<CampaignStatus> {
        let slot = self.slot(campaign_id);
        let clock = match self.repo.load_clock(campaign_id)? {
            Some(clock) => clock,
            None => SimClock::new(campaign_id, self.now()),
        };
        Ok(self.status_of(&clock, &slot))
    }

    pub fn get_recent_logs(&self, campaign_id: CampaignId, limit: usize) -> SimResult<Vec<LogEntry>> {
        self.repo.recent_logs(campaign_id, limit)
    }

    /// Clocks the scheduler should consider, ascending by campaign id.
    pub fn running_campaigns(&self) -> SimResult<Vec<SimClock>> {
        self.repo.running_clocks()
    }

    // ── Ticks ──────────────────────────────────────────────────

    /// Run exactly one tick now, regardless of speed or pause.
    pub fn run_manual_tick(&self, campaign_id: CampaignId) -> SimResult<TickReport> {
        let slot = self.slot(campaign_id);
        let _tick = slot.try_tick(campaign_id)?;

        let clock = self.load_or_init_clock(campaign_id)?;
        reject_if_error_paused(&clock, "manual_tick")?;
        let (report, _) = self.tick_once(&slot, &clock, None)?;
        Ok(report)
    }

    /// Run a whole period's worth of ticks in one batch.
    ///
    /// Stops at the first failing tick; earlier ticks stay committed and
    /// the summary reports how many completed.
    pub fn run_time_period(&self, campaign_id: CampaignId, period: &str) -> SimResult<PeriodSummary> {
        let period = TimePeriod::parse(period)?;
        let slot = self.slot(campaign_id);
        let _tick = slot.try_tick(campaign_id)?;

        let mut clock = self.load_or_init_clock(campaign_id)?;
        reject_if_error_paused(&clock, "run_time_period")?;

        let batch_id = Uuid::new_v4().to_string();
        let started = Instant::now();
        let mut summary = PeriodSummary {
            campaign_id,
            period: period.as_str().to_string(),
            batch_id: batch_id.clone(),
            ticks_requested: period.ticks(),
            ticks_completed: 0,
            first_tick: None,
            last_tick: None,
            price_changes: 0,
            duration_ms: 0,
            error: None,
            error_category: None,
        };
        log::info!(
            "campaign={campaign_id} batch={batch_id} running {} ({} ticks) from tick {}",
            period.as_str(),
            period.ticks(),
            clock.current_tick
        );

        for _ in 0..period.ticks() {
            match self.tick_once(&slot, &clock, Some(&batch_id)) {
                Ok((report, next)) => {
                    summary.ticks_completed += 1;
                    summary.first_tick.get_or_insert(report.tick);
                    summary.last_tick = Some(report.tick);
                    summary.price_changes += report.price_changes;
                    clock = next;
                }
                Err(err) => {
                    summary.error = Some(err.to_string());
                    summary.error_category = Some(err.category().as_str().to_string());
                    break;
                }
            }
        }

        summary.duration_ms = started.elapsed().as_millis() as u64;
        log::info!(
            "campaign={campaign_id} batch={batch_id} completed {}/{} ticks in {}ms",
            summary.ticks_completed,
            summary.ticks_requested,
            summary.duration_ms
        );
        Ok(summary)
    }

    /// The scheduler's entry point: tick only if the clock says one is due.
    pub fn run_scheduled_tick(&self, campaign_id: CampaignId) -> SimResult<Option<TickReport>> {
        let slot = self.slot(campaign_id);
        let _tick = slot.try_tick(campaign_id)?;

        let Some(clock) = self.repo.load_clock(campaign_id)? else {
            return Ok(None);
        };
        if !clock.should_tick(self.now(), self.config().base_tick_interval_secs) {
            return Ok(None);
        }
        let (report, _) = self.tick_once(&slot, &clock, None)?;
        Ok(Some(report))
    }

    /// Caller must hold the campaign's tick lock.
    fn tick_once(&self, slot: &CampaignSlot, clock: &SimClock, batch_id: Option<&str>) -> SimResult<(TickReport, SimClock)> {
        let now = self.now();
        match self.process_tick(clock, now, batch_id) {
            Ok(done) => Ok(done),
            Err(err) => {
                self.fail_campaign(slot, clock.campaign_id, clock.current_tick + 1, &err);
                Err(err)
            }
        }
    }

    fn process_tick(&self, clock: &SimClock, now: Timestamp, batch_id: Option<&str>) -> SimResult<(TickReport, SimClock)> {
        let campaign_id = clock.campaign_id;
        let world = self.repo.load_world(campaign_id, now)?;
        let outcome = self.processor.run(world, clock, now, batch_id)?;
        self.repo.commit(&outcome.commit)?;

        let next = outcome.commit.clock.unwrap_or_else(|| clock.clone());
        log::info!(
            "tick={} campaign={campaign_id} committed: {} shops, {} items, {} price changes in {}ms",
            outcome.report.tick,
            outcome.report.shops_updated,
            outcome.report.items_updated,
            outcome.report.price_changes,
            outcome.report.duration_ms
        );
        Ok((outcome.report, next))
    }

    /// Move the campaign to ErrorPaused and log why. Failures while
    /// recording the failure are logged and swallowed.
    fn fail_campaign(&self, slot: &CampaignSlot, campaign_id: CampaignId, tick: Tick, err: &SimError) {
        log::error!("tick={tick} campaign={campaign_id} failed: {err}");
        let _state = slot.lock_state();
        let now = self.now();

        let recorded = (|| -> SimResult<()> {
            let mut clock = self.load_or_init_clock(campaign_id)?;
            let from = clock.record_failure(err.to_string(), now)?;
            let error = SimEvent::Error {
                message:  err.to_string(),
                category: err.category().as_str().to_string(),
            };
            let change = SimEvent::StateChange {
                from:   from.label().to_string(),
                to:     clock.state.label().to_string(),
                reason: Some(err.to_string()),
            };
            let entries = [
                LogEntry::new(campaign_id, tick, &error, now)?,
                LogEntry::new(campaign_id, tick, &change, now)?,
            ];
            self.repo.save_clock_state(&clock, &entries)
        })();

        if let Err(record_err) = recorded {
            log::error!("campaign={campaign_id} could not record tick failure: {record_err}");
        }
    }

    // ── Sourcing ───────────────────────────────────────────────

    /// Where `amount` units of `item_id` for `shop_id` could come from.
    /// Read-only.
    pub fn find_item_sources(
        &self,
        campaign_id: CampaignId,
        shop_id: ShopId,
        item_id: ItemId,
        amount: i64,
    ) -> SimResult<Vec<SourceAllocation>> {
        if amount <= 0 {
            return Err(SimError::InvalidAmount {
                amount,
                reason: "requested amount must be positive".into(),
            });
        }
        let world = self.repo.load_world(campaign_id, self.now())?;
        check_shop_and_item(&world, shop_id, item_id)?;
        Ok(MarketService::new(self.config()).find_item_sources(&world, shop_id, item_id, amount))
    }

    /// Pull up to `amount` units of `item_id` into `target_shop` from the
    /// sources `find_item_sources` picks, and commit the moves atomically.
    /// Partial fills are allowed; finding no stock at all is an error.
    pub fn transfer_stock(
        &self,
        campaign_id: CampaignId,
        target_shop: ShopId,
        item_id: ItemId,
        amount: i64,
    ) -> SimResult<TransferReport> {
        if amount <= 0 {
            return Err(SimError::InvalidAmount {
                amount,
                reason: "transfer amount must be positive".into(),
            });
        }
        let slot = self.slot(campaign_id);
        let _tick = slot.try_tick(campaign_id)?;

        let clock = self.load_or_init_clock(campaign_id)?;
        let now = self.now();
        let mut world = self.repo.load_world(campaign_id, now)?;
        check_shop_and_item(&world, target_shop, item_id)?;

        let market = MarketService::new(self.config());
        let sources = market.find_item_sources(&world, target_shop, item_id, amount);
        if sources.is_empty() {
            return Err(SimError::InsufficientStock {
                shop_id: target_shop,
                item_id,
                available: 0,
                requested: amount,
            });
        }

        let mut legs = Vec::with_capacity(sources.len());
        let mut events = Vec::with_capacity(sources.len());
        let mut touched = BTreeSet::new();
        for source in &sources {
            let leg = market.process_transaction(&mut world, source.shop_id, target_shop, item_id, source.amount, now)?;
            touched.insert((leg.source_shop, item_id));
            touched.insert((leg.target_shop, item_id));
            let event = SimEvent::Transfer {
                source_shop:  leg.source_shop,
                target_shop:  leg.target_shop,
                item_id,
                amount:       leg.amount,
                price:        leg.target_price,
                cross_region: leg.cross_region,
            };
            events.push(LogEntry::new(campaign_id, clock.current_tick, &event, now)?);
            legs.push(leg);
        }

        let commit = WorldCommit {
            campaign_id,
            inventory: touched.iter().filter_map(|key| world.inventory.get(key).cloned()).collect(),
            regional: world.market.changed_regional().map(|(k, a)| (k, a.clone())).collect(),
            global: world.market.changed_global().map(|(k, a)| (k, a.clone())).collect(),
            production: Vec::new(),
            events,
            clock: None,
        };
        self.repo.commit(&commit)?;

        let transferred: i64 = legs.iter().map(|l| l.amount).sum();
        log::info!(
            "campaign={campaign_id} transfer item={item_id} -> shop {target_shop}: {transferred}/{amount} units from {} sources",
            legs.len()
        );
        Ok(TransferReport {
            target_shop,
            item_id,
            requested: amount,
            transferred,
            legs,
        })
    }
}

fn reject_if_error_paused(clock: &SimClock, operation: &str) -> SimResult<()> {
    if clock.state == ClockState::ErrorPaused {
        return Err(SimError::InvalidTransition {
            campaign_id: clock.campaign_id,
            state:       clock.state.label().to_string(),
            event:       operation.to_string(),
        });
    }
    Ok(())
}

fn check_shop_and_item(world: &WorldSnapshot, shop_id: ShopId, item_id: ItemId) -> SimResult<()> {
    if !world.shops.contains_key(&shop_id) {
        return Err(SimError::MissingReference {
            entity:   "shop",
            id:       shop_id,
            referrer: format!("campaign {}", world.campaign_id),
        });
    }
    if !world.items.contains_key(&item_id) {
        return Err(SimError::MissingReference {
            entity:   "item",
            id:       item_id,
            referrer: format!("campaign {}", world.campaign_id),
        });
    }
    Ok(())
}
