//! Store methods for campaign clocks.
//!
//! Tick progress (current_tick, last_tick_time, performance) and clock
//! state (state, speed, last_error) are written by separate statements so
//! a speed change never races a committing tick.

use crate::{
    clock::{ClockState, PerformanceMetrics, SimClock, SpeedSetting},
    error::{SimError, SimResult},
    event::LogEntry,
    types::{CampaignId, Timestamp},
};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{journal, SimStore};

const CLOCK_COLUMNS: &str = "campaign_id, state, speed, current_tick, last_tick_time,
                             performance, last_error, last_error_time";

/// Raw column values, decoded outside the rusqlite row closure so
/// decode failures surface as SimError.
struct ClockRow {
    campaign_id:     CampaignId,
    state:           String,
    speed:           Option<String>,
    current_tick:    i64,
    last_tick_time:  Timestamp,
    performance:     String,
    last_error:      Option<String>,
    last_error_time: Option<Timestamp>,
}

impl ClockRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            campaign_id:     row.get(0)?,
            state:           row.get(1)?,
            speed:           row.get(2)?,
            current_tick:    row.get(3)?,
            last_tick_time:  row.get(4)?,
            performance:     row.get(5)?,
            last_error:      row.get(6)?,
            last_error_time: row.get(7)?,
        })
    }

    fn decode(self) -> SimResult<SimClock> {
        let state = match (self.state.as_str(), self.speed.as_deref()) {
            ("paused", _) => ClockState::Paused,
            ("error_paused", _) => ClockState::ErrorPaused,
            ("running", Some(speed)) => match SpeedSetting::parse(speed)? {
                SpeedSetting::Run(speed) => ClockState::Running(speed),
                SpeedSetting::Pause => ClockState::Paused,
            },
            (state, speed) => {
                return Err(SimError::Other(anyhow::anyhow!(
                    "campaign {} has unreadable clock state {state:?} (speed {speed:?})",
                    self.campaign_id
                )));
            }
        };
        Ok(SimClock {
            campaign_id:     self.campaign_id,
            state,
            current_tick:    self.current_tick.max(0) as u64,
            last_tick_time:  self.last_tick_time,
            performance:     serde_json::from_str::<PerformanceMetrics>(&self.performance)?,
            last_error:      self.last_error,
            last_error_time: self.last_error_time,
        })
    }
}

fn speed_column(state: &ClockState) -> Option<&'static str> {
    match state {
        ClockState::Running(speed) => Some(speed.as_str()),
        ClockState::Paused | ClockState::ErrorPaused => None,
    }
}

pub(super) fn write_progress(conn: &Connection, clock: &SimClock) -> SimResult<()> {
    let updated = conn.execute(
        "UPDATE campaign_clock
         SET current_tick = ?2, last_tick_time = ?3, performance = ?4
         WHERE campaign_id = ?1",
        params![
            clock.campaign_id,
            clock.current_tick as i64,
            clock.last_tick_time,
            serde_json::to_string(&clock.performance)?,
        ],
    )?;
    if updated == 0 {
        return Err(SimError::MissingReference {
            entity:   "campaign_clock",
            id:       clock.campaign_id,
            referrer: "tick commit".into(),
        });
    }
    Ok(())
}

impl SimStore {
    pub fn clock(&self, campaign_id: CampaignId) -> SimResult<Option<SimClock>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!("SELECT {CLOCK_COLUMNS} FROM campaign_clock WHERE campaign_id = ?1"),
                params![campaign_id],
                ClockRow::from_row,
            )
            .optional()?;
        row.map(ClockRow::decode).transpose()
    }

    pub fn insert_clock(&self, clock: &SimClock) -> SimResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO campaign_clock
                 (campaign_id, state, speed, current_tick, last_tick_time,
                  performance, last_error, last_error_time)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                clock.campaign_id,
                clock.state.label(),
                speed_column(&clock.state),
                clock.current_tick as i64,
                clock.last_tick_time,
                serde_json::to_string(&clock.performance)?,
                clock.last_error,
                clock.last_error_time,
            ],
        )?;
        Ok(())
    }

    /// Persist state and error fields plus the log entries describing the
    /// change, in one transaction.
    pub fn update_clock_state(&self, clock: &SimClock, events: &[LogEntry]) -> SimResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let updated = tx.execute(
            "UPDATE campaign_clock
             SET state = ?2, speed = ?3, last_error = ?4, last_error_time = ?5
             WHERE campaign_id = ?1",
            params![
                clock.campaign_id,
                clock.state.label(),
                speed_column(&clock.state),
                clock.last_error,
                clock.last_error_time,
            ],
        )?;
        if updated == 0 {
            return Err(SimError::MissingReference {
                entity:   "campaign_clock",
                id:       clock.campaign_id,
                referrer: "clock state update".into(),
            });
        }
        for entry in events {
            journal::insert_entry(&tx, entry)?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn clocks_in_state(&self, state: &str) -> SimResult<Vec<SimClock>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {CLOCK_COLUMNS} FROM campaign_clock WHERE state = ?1 ORDER BY campaign_id ASC"
        ))?;
        let rows = stmt
            .query_map(params![state], ClockRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(ClockRow::decode).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ClockEvent, SimSpeed};
    use chrono::{TimeZone, Utc};

    fn store() -> SimStore {
        let store = SimStore::in_memory().unwrap();
        store.migrate().unwrap();
        store
    }

    #[test]
    fn clock_row_round_trips() {
        let store = store();
        let t0 = Utc.with_ymd_and_hms(2026, 3, 3, 12, 0, 0).unwrap();
        let mut clock = SimClock::new(9, t0);
        store.insert_clock(&clock).unwrap();

        clock.apply(ClockEvent::SetSpeed(SpeedSetting::Run(SimSpeed::X100))).unwrap();
        store.update_clock_state(&clock, &[]).unwrap();

        let loaded = store.clock(9).unwrap().unwrap();
        assert_eq!(loaded, clock);
        assert_eq!(store.clocks_in_state("running").unwrap().len(), 1);
    }

    #[test]
    fn insert_never_overwrites() {
        let store = store();
        let t0 = Utc.with_ymd_and_hms(2026, 3, 3, 12, 0, 0).unwrap();
        let mut clock = SimClock::new(2, t0);
        clock.current_tick = 40;
        store.insert_clock(&clock).unwrap();
        store.insert_clock(&SimClock::new(2, t0)).unwrap();
        assert_eq!(store.clock(2).unwrap().unwrap().current_tick, 40);
    }

    #[test]
    fn state_update_without_row_is_rejected() {
        let store = store();
        let clock = SimClock::new(3, Utc::now());
        assert!(matches!(
            store.update_clock_state(&clock, &[]),
            Err(SimError::MissingReference { entity: "campaign_clock", .. })
        ));
    }
}
