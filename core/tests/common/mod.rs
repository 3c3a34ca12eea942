//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use chrono::{Duration, TimeZone, Utc};
use crossbeam_channel::{Receiver, Sender};
use marketsim_core::{
    clock::SimClock,
    config::SimConfig,
    error::{SimError, SimResult},
    event::LogEntry,
    modifier::{DemandModifier, ModifierScope, ModifierTarget},
    repository::{EconomyRepository, WorldCommit},
    service::{SimulationService, TimeSource},
    snapshot::{City, InventoryLine, Item, ResourceNode, Shop, ShopUpkeep, SourcingPreference, WorldSnapshot},
    store::SimStore,
    types::{CampaignId, Tick, Timestamp},
};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex,
};

pub const CAMPAIGN: CampaignId = 1;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn t0() -> Timestamp {
    Utc.with_ymd_and_hms(2026, 4, 1, 8, 0, 0).unwrap()
}

/// A wall clock the test moves by hand.
#[derive(Clone)]
pub struct ManualTime(Arc<Mutex<Timestamp>>);

impl ManualTime {
    pub fn new(start: Timestamp) -> Self {
        Self(Arc::new(Mutex::new(start)))
    }

    pub fn advance_secs(&self, secs: i64) {
        let mut now = self.0.lock().unwrap();
        *now += Duration::seconds(secs);
    }

    pub fn source(&self) -> TimeSource {
        let inner = Arc::clone(&self.0);
        Arc::new(move || *inner.lock().unwrap())
    }
}

pub fn migrated_store() -> SimStore {
    let store = SimStore::in_memory().expect("in-memory store");
    store.migrate().expect("migration");
    store
}

/// Two regions, three cities, four shops, three items, two nodes.
///
/// North: Neverwinter (1, pop 2000) with shop 10, Luskan (2, pop 500) with shop 11.
/// South: Baldur's Gate (3, unknown pop) with shops 12 and 13.
pub fn seed_world(store: &SimStore, campaign_id: CampaignId) {
    seed_shops(store, campaign_id);
    seed_producers(store, campaign_id);
}

/// Items, cities, shops, stock and upkeep. No resource nodes, no modifiers.
pub fn seed_shops(store: &SimStore, campaign_id: CampaignId) {
    let items = [
        Item { id: 1, name: "Hempen rope".into(), base_price: 10.0, rarity: "common".into() },
        Item { id: 2, name: "Potion of healing".into(), base_price: 50.0, rarity: "uncommon".into() },
        Item { id: 3, name: "Longsword".into(), base_price: 120.0, rarity: "3".into() },
    ];
    for item in &items {
        store.insert_item(campaign_id, item).unwrap();
    }

    let cities = [
        City { id: 1, name: "Neverwinter".into(), region: Some("North".into()), population: Some(2000) },
        City { id: 2, name: "Luskan".into(), region: Some("North".into()), population: Some(500) },
        City { id: 3, name: "Baldur's Gate".into(), region: Some("South".into()), population: None },
    ];
    for city in &cities {
        store.insert_city(campaign_id, city).unwrap();
    }

    for (id, city) in [(10, 1), (11, 2), (12, 3), (13, 3)] {
        store
            .insert_shop(campaign_id, &Shop { id, name: format!("Shop {id}"), city_id: Some(city), active: true })
            .unwrap();
        for item in &items {
            store
                .upsert_inventory(&InventoryLine {
                    shop_id: id,
                    item_id: item.id,
                    stock: 400,
                    dynamic_price: item.base_price,
                    sourcing: match id {
                        10 => SourcingPreference::Regional,
                        11 => SourcingPreference::Global,
                        _ => SourcingPreference::Hybrid,
                    },
                })
                .unwrap();
        }
        store.insert_upkeep(&ShopUpkeep { shop_id: id, daily_cost: 5.0 }).unwrap();
    }
}

/// Two resource nodes and a North-wide demand modifier.
pub fn seed_producers(store: &SimStore, campaign_id: CampaignId) {
    store
        .insert_resource_node(campaign_id, &ResourceNode {
            id: 1,
            name: "Neverwinter Wood".into(),
            item_id: Some(1),
            city_id: Some(1),
            production_rate: 6.0,
            quality: 0.5,
        })
        .unwrap();
    store
        .insert_resource_node(campaign_id, &ResourceNode {
            id: 2,
            name: "Forge of the South".into(),
            item_id: Some(3),
            city_id: Some(3),
            production_rate: 1.0,
            quality: 1.0,
        })
        .unwrap();

    store
        .insert_modifier(campaign_id, &DemandModifier {
            id: 1,
            name: "Goblin raids".into(),
            scope: ModifierScope::Regional,
            effect_value: 0.3,
            start_date: None,
            end_date: None,
            is_active: true,
            targets: vec![ModifierTarget::Region("North".into())],
        })
        .unwrap();
}

pub fn seeded_service(time: &ManualTime) -> SimulationService<SimStore> {
    init_logging();
    let store = migrated_store();
    seed_world(&store, CAMPAIGN);
    SimulationService::new(store, SimConfig::default()).with_time_source(time.source())
}

/// Wraps the real store and can be told to fail or stall commits.
pub struct TestRepository {
    pub inner:    SimStore,
    fail_at_tick: AtomicU64,
    gate:         Option<Gate>,
}

/// Commits announce themselves on `entered` and wait for `release`.
pub struct Gate {
    pub entered: Sender<()>,
    pub release: Receiver<()>,
}

impl TestRepository {
    pub fn new(inner: SimStore) -> Self {
        Self { inner, fail_at_tick: AtomicU64::new(0), gate: None }
    }

    pub fn with_gate(inner: SimStore, gate: Gate) -> Self {
        Self { inner, fail_at_tick: AtomicU64::new(0), gate: Some(gate) }
    }

    /// Fail the commit of this tick (and every later one). 0 disables.
    pub fn fail_at_tick(&self, tick: Tick) {
        self.fail_at_tick.store(tick, Ordering::SeqCst);
    }
}

impl EconomyRepository for TestRepository {
    fn load_world(&self, campaign_id: CampaignId, now: Timestamp) -> SimResult<WorldSnapshot> {
        self.inner.load_world(campaign_id, now)
    }

    fn commit(&self, commit: &WorldCommit) -> SimResult<()> {
        if let Some(gate) = &self.gate {
            let _ = gate.entered.send(());
            let _ = gate.release.recv();
        }
        let fail_at = self.fail_at_tick.load(Ordering::SeqCst);
        if let Some(clock) = &commit.clock {
            if fail_at > 0 && clock.current_tick >= fail_at {
                return Err(SimError::StoreUnavailable(format!("disk full at tick {}", clock.current_tick)));
            }
        }
        self.inner.commit(commit)
    }

    fn load_clock(&self, campaign_id: CampaignId) -> SimResult<Option<SimClock>> {
        self.inner.load_clock(campaign_id)
    }

    fn init_clock(&self, clock: &SimClock) -> SimResult<()> {
        self.inner.init_clock(clock)
    }

    fn save_clock_state(&self, clock: &SimClock, events: &[LogEntry]) -> SimResult<()> {
        self.inner.save_clock_state(clock, events)
    }

    fn running_clocks(&self) -> SimResult<Vec<SimClock>> {
        self.inner.running_clocks()
    }

    fn recent_logs(&self, campaign_id: CampaignId, limit: usize) -> SimResult<Vec<LogEntry>> {
        self.inner.recent_logs(campaign_id, limit)
    }
}

pub fn test_service(repo: TestRepository, time: &ManualTime) -> SimulationService<TestRepository> {
    init_logging();
    seed_world(&repo.inner, CAMPAIGN);
    SimulationService::new(repo, SimConfig::default()).with_time_source(time.source())
}
