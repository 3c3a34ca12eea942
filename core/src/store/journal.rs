//! Store methods for the append-only simulation log.

use crate::{
    error::SimResult,
    event::LogEntry,
    types::CampaignId,
};
use rusqlite::{params, Connection};

use super::SimStore;

pub(super) fn insert_entry(conn: &Connection, entry: &LogEntry) -> SimResult<()> {
    conn.execute(
        "INSERT INTO simulation_log (campaign_id, tick_id, event_type, details, timestamp)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            entry.campaign_id,
            entry.tick_id as i64,
            entry.event_type,
            entry.details,
            entry.timestamp,
        ],
    )?;
    Ok(())
}

impl SimStore {
    /// Newest first.
    pub fn latest_entries(&self, campaign_id: CampaignId, limit: usize) -> SimResult<Vec<LogEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, campaign_id, tick_id, event_type, details, timestamp
             FROM simulation_log WHERE campaign_id = ?1
             ORDER BY id DESC LIMIT ?2",
        )?;
        let entries = stmt
            .query_map(params![campaign_id, limit as i64], |row| {
                Ok(LogEntry {
                    id:          Some(row.get(0)?),
                    campaign_id: row.get(1)?,
                    tick_id:     row.get::<_, i64>(2)? as u64,
                    event_type:  row.get(3)?,
                    details:     row.get(4)?,
                    timestamp:   row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    // ── Test / summary helpers ────────────────────────────────────────

    pub fn log_count(&self, campaign_id: CampaignId) -> SimResult<i64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM simulation_log WHERE campaign_id = ?1",
            params![campaign_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Number of log entries of one type (for tests).
    pub fn log_count_of_type(&self, campaign_id: CampaignId, event_type: &str) -> SimResult<i64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM simulation_log WHERE campaign_id = ?1 AND event_type = ?2",
            params![campaign_id, event_type],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}
