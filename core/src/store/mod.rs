//! SQLite persistence layer.
//!
//! RULE: Only the store talks to the database.
//! Tick steps work on an in-memory WorldSnapshot and never execute SQL.
//! RULE: one tick is one transaction. A failed commit leaves no trace.

mod campaign;
mod journal;
mod market;
mod world;

use crate::{
    clock::SimClock,
    error::{SimError, SimResult},
    event::LogEntry,
    repository::{EconomyRepository, WorldCommit},
    snapshot::WorldSnapshot,
    types::{CampaignId, Timestamp},
};
use rusqlite::Connection;
use std::sync::{Mutex, MutexGuard};

pub struct SimStore {
    conn: Mutex<Connection>,
    path: Option<String>, // None for :memory:, Some(path) for file
}

impl SimStore {
    pub fn open(path: &str) -> SimResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL mode only for real files (shared-memory and :memory: ignore it).
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path.to_string()),
        })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> SimResult<Self> {
        let conn = Connection::open(":memory:")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn: Mutex::new(conn), path: None })
    }

    /// Open and migrate in one step.
    pub fn open_migrated(path: Option<&str>) -> SimResult<Self> {
        let store = match path {
            Some(p) => Self::open(p)?,
            None => Self::in_memory()?,
        };
        store.migrate()?;
        Ok(store)
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> SimResult<()> {
        let conn = self.conn()?;
        conn.execute_batch(include_str!("../../../migrations/001_foundation.sql"))?;
        conn.execute_batch(include_str!("../../../migrations/002_economy.sql"))?;
        Ok(())
    }

    /// A poisoned lock means a writer panicked mid-statement; treat the
    /// store as unavailable rather than trusting the connection.
    fn conn(&self) -> SimResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| SimError::StoreUnavailable("connection lock poisoned".into()))
    }

    // ── Commit ─────────────────────────────────────────────────

    /// Write everything one tick (or transfer) produced, atomically.
    pub fn commit_world(&self, commit: &WorldCommit) -> SimResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        for line in &commit.inventory {
            world::upsert_inventory_line(&tx, line)?;
        }
        for ((city_id, item_id), agg) in &commit.regional {
            market::upsert_regional(&tx, commit.campaign_id, *city_id, *item_id, agg)?;
        }
        for (item_id, agg) in &commit.global {
            market::upsert_global(&tx, commit.campaign_id, *item_id, agg)?;
        }
        for record in &commit.production {
            market::insert_production(&tx, commit.campaign_id, record)?;
        }
        for entry in &commit.events {
            journal::insert_entry(&tx, entry)?;
        }
        if let Some(clock) = &commit.clock {
            campaign::write_progress(&tx, clock)?;
        }
        tx.commit()?;
        Ok(())
    }
}

impl EconomyRepository for SimStore {
    fn load_world(&self, campaign_id: CampaignId, now: Timestamp) -> SimResult<WorldSnapshot> {
        self.load_world_snapshot(campaign_id, now)
    }

    fn commit(&self, commit: &WorldCommit) -> SimResult<()> {
        self.commit_world(commit)
    }

    fn load_clock(&self, campaign_id: CampaignId) -> SimResult<Option<SimClock>> {
        self.clock(campaign_id)
    }

    fn init_clock(&self, clock: &SimClock) -> SimResult<()> {
        self.insert_clock(clock)
    }

    fn save_clock_state(&self, clock: &SimClock, events: &[LogEntry]) -> SimResult<()> {
        self.update_clock_state(clock, events)
    }

    fn running_clocks(&self) -> SimResult<Vec<SimClock>> {
        self.clocks_in_state("running")
    }

    fn recent_logs(&self, campaign_id: CampaignId, limit: usize) -> SimResult<Vec<LogEntry>> {
        self.latest_entries(campaign_id, limit)
    }
}
