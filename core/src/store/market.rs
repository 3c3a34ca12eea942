//! Store methods for market aggregates and production history.

use crate::{
    error::SimResult,
    market::{MarketAggregate, MarketBook},
    repository::ProductionRecord,
    types::{CampaignId, CityId, ItemId},
};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::SimStore;

fn aggregate(row: &Row<'_>, offset: usize) -> rusqlite::Result<MarketAggregate> {
    Ok(MarketAggregate {
        total_supply:  row.get(offset)?,
        total_demand:  row.get(offset + 1)?,
        average_price: row.get(offset + 2)?,
        last_updated:  row.get(offset + 3)?,
    })
}

pub(super) fn upsert_regional(
    conn:        &Connection,
    campaign_id: CampaignId,
    city_id:     CityId,
    item_id:     ItemId,
    agg:         &MarketAggregate,
) -> SimResult<()> {
    conn.execute(
        "INSERT INTO regional_market
             (campaign_id, city_id, item_id, total_supply, total_demand, average_price, last_updated)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT (city_id, item_id) DO UPDATE SET
             total_supply  = excluded.total_supply,
             total_demand  = excluded.total_demand,
             average_price = excluded.average_price,
             last_updated  = excluded.last_updated",
        params![
            campaign_id,
            city_id,
            item_id,
            agg.total_supply,
            agg.total_demand,
            agg.average_price,
            agg.last_updated,
        ],
    )?;
    Ok(())
}

pub(super) fn upsert_global(
    conn:        &Connection,
    campaign_id: CampaignId,
    item_id:     ItemId,
    agg:         &MarketAggregate,
) -> SimResult<()> {
    conn.execute(
        "INSERT INTO global_market
             (campaign_id, item_id, total_supply, total_demand, average_price, last_updated)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT (item_id) DO UPDATE SET
             total_supply  = excluded.total_supply,
             total_demand  = excluded.total_demand,
             average_price = excluded.average_price,
             last_updated  = excluded.last_updated",
        params![
            campaign_id,
            item_id,
            agg.total_supply,
            agg.total_demand,
            agg.average_price,
            agg.last_updated,
        ],
    )?;
    Ok(())
}

pub(super) fn insert_production(conn: &Connection, campaign_id: CampaignId, record: &ProductionRecord) -> SimResult<()> {
    conn.execute(
        "INSERT INTO production_record
             (campaign_id, node_id, tick, amount_produced, quality, produced_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            campaign_id,
            record.node_id,
            record.tick as i64,
            record.amount_produced,
            record.quality,
            record.produced_at,
        ],
    )?;
    Ok(())
}

/// Every aggregate row of the campaign, loaded untouched.
pub(super) fn load_book(conn: &Connection, campaign_id: CampaignId) -> SimResult<MarketBook> {
    let mut book = MarketBook::default();

    let mut stmt = conn.prepare(
        "SELECT city_id, item_id, total_supply, total_demand, average_price, last_updated
         FROM regional_market WHERE campaign_id = ?1",
    )?;
    let rows = stmt.query_map(params![campaign_id], |row| {
        Ok((row.get::<_, CityId>(0)?, row.get::<_, ItemId>(1)?, aggregate(row, 2)?))
    })?;
    for row in rows {
        let (city_id, item_id, agg) = row?;
        book.load_regional(city_id, item_id, agg);
    }

    let mut stmt = conn.prepare(
        "SELECT item_id, total_supply, total_demand, average_price, last_updated
         FROM global_market WHERE campaign_id = ?1",
    )?;
    let rows = stmt.query_map(params![campaign_id], |row| {
        Ok((row.get::<_, ItemId>(0)?, aggregate(row, 1)?))
    })?;
    for row in rows {
        let (item_id, agg) = row?;
        book.load_global(item_id, agg);
    }

    Ok(book)
}

impl SimStore {
    pub fn regional_aggregate(&self, city_id: CityId, item_id: ItemId) -> SimResult<Option<MarketAggregate>> {
        let conn = self.conn()?;
        let agg = conn
            .query_row(
                "SELECT total_supply, total_demand, average_price, last_updated
                 FROM regional_market WHERE city_id = ?1 AND item_id = ?2",
                params![city_id, item_id],
                |row| aggregate(row, 0),
            )
            .optional()?;
        Ok(agg)
    }

    pub fn global_aggregate(&self, item_id: ItemId) -> SimResult<Option<MarketAggregate>> {
        let conn = self.conn()?;
        let agg = conn
            .query_row(
                "SELECT total_supply, total_demand, average_price, last_updated
                 FROM global_market WHERE item_id = ?1",
                params![item_id],
                |row| aggregate(row, 0),
            )
            .optional()?;
        Ok(agg)
    }

    // ── Test / summary helpers ────────────────────────────────────────

    /// Sum of total_demand across the campaign's regional rows.
    pub fn total_regional_demand(&self, campaign_id: CampaignId) -> SimResult<f64> {
        let conn = self.conn()?;
        let total: f64 = conn.query_row(
            "SELECT COALESCE(SUM(total_demand), 0.0) FROM regional_market WHERE campaign_id = ?1",
            params![campaign_id],
            |row| row.get(0),
        )?;
        Ok(total)
    }

    pub fn production_count(&self, campaign_id: CampaignId) -> SimResult<i64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM production_record WHERE campaign_id = ?1",
            params![campaign_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}
