//! Store methods for world entities: items, cities, shops, inventories,
//! resource nodes, upkeep and demand modifiers.
//!
//! The insert methods are the seeding surface used by campaign setup and
//! tests; the tick engine itself only reads through `load_world_snapshot`.

use crate::{
    error::SimResult,
    modifier::{DemandModifier, ModifierScope, ModifierTarget},
    snapshot::{City, InventoryLine, Item, ResourceNode, Shop, ShopUpkeep, SourcingPreference, WorldSnapshot},
    types::{CampaignId, ItemId, ShopId, Timestamp},
};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::BTreeMap;

use super::{market, SimStore};

fn inventory_line(row: &Row<'_>) -> rusqlite::Result<(InventoryLine, String)> {
    let line = InventoryLine {
        shop_id:       row.get(0)?,
        item_id:       row.get(1)?,
        stock:         row.get(2)?,
        dynamic_price: row.get(3)?,
        sourcing:      SourcingPreference::Hybrid,
    };
    Ok((line, row.get(4)?))
}

/// Unknown sourcing values fall back to hybrid.
fn with_sourcing((mut line, raw): (InventoryLine, String)) -> InventoryLine {
    line.sourcing = SourcingPreference::parse(&raw).unwrap_or_else(|| {
        log::warn!(
            "store: shop={} item={} has unknown sourcing {raw:?}; using hybrid",
            line.shop_id,
            line.item_id
        );
        SourcingPreference::default()
    });
    line
}

pub(super) fn upsert_inventory_line(conn: &Connection, line: &InventoryLine) -> SimResult<()> {
    conn.execute(
        "INSERT INTO shop_inventory (shop_id, item_id, stock, dynamic_price, sourcing_preference)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT (shop_id, item_id) DO UPDATE SET
             stock               = excluded.stock,
             dynamic_price       = excluded.dynamic_price,
             sourcing_preference = excluded.sourcing_preference",
        params![
            line.shop_id,
            line.item_id,
            line.stock,
            line.dynamic_price,
            line.sourcing.as_str(),
        ],
    )?;
    Ok(())
}

fn load_modifiers(conn: &Connection, campaign_id: CampaignId, now: Timestamp) -> SimResult<Vec<DemandModifier>> {
    let mut targets: BTreeMap<i64, Vec<ModifierTarget>> = BTreeMap::new();
    let mut stmt = conn.prepare(
        "SELECT t.modifier_id, t.entity_type, t.entity_id
         FROM modifier_target t
         JOIN demand_modifier m ON m.modifier_id = t.modifier_id
         WHERE m.campaign_id = ?1 AND m.is_active = 1
         ORDER BY t.id ASC",
    )?;
    let rows = stmt.query_map(params![campaign_id], |row| {
        Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?))
    })?;
    for row in rows {
        let (modifier_id, entity_type, entity_id) = row?;
        match ModifierTarget::from_parts(&entity_type, &entity_id) {
            Some(target) => targets.entry(modifier_id).or_default().push(target),
            None => log::warn!(
                "store: modifier={modifier_id} has unreadable target {entity_type}:{entity_id}; ignored"
            ),
        }
    }

    let mut stmt = conn.prepare(
        "SELECT modifier_id, name, scope, effect_value, start_date, end_date, is_active
         FROM demand_modifier
         WHERE campaign_id = ?1 AND is_active = 1
         ORDER BY modifier_id ASC",
    )?;
    let rows = stmt.query_map(params![campaign_id], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, f64>(3)?,
            row.get::<_, Option<Timestamp>>(4)?,
            row.get::<_, Option<Timestamp>>(5)?,
            row.get::<_, bool>(6)?,
        ))
    })?;

    let mut modifiers = Vec::new();
    for row in rows {
        let (id, name, scope, effect_value, start_date, end_date, is_active) = row?;
        let Some(scope) = ModifierScope::parse(&scope) else {
            log::warn!("store: modifier={id} has unknown scope {scope:?}; ignored");
            continue;
        };
        let modifier = DemandModifier {
            id,
            name,
            scope,
            effect_value,
            start_date,
            end_date,
            is_active,
            targets: targets.remove(&id).unwrap_or_default(),
        };
        if modifier.is_effective_at(now) {
            modifiers.push(modifier);
        }
    }
    Ok(modifiers)
}

impl SimStore {
    /// Read everything one tick needs. Inactive shops and their lines are
    /// left out; references are loaded as stored, dangling ones included.
    pub fn load_world_snapshot(&self, campaign_id: CampaignId, now: Timestamp) -> SimResult<WorldSnapshot> {
        let conn = self.conn()?;
        let mut world = WorldSnapshot::new(campaign_id);

        let mut stmt = conn.prepare(
            "SELECT item_id, name, base_price, rarity FROM item WHERE campaign_id = ?1",
        )?;
        let items = stmt.query_map(params![campaign_id], |row| {
            Ok(Item {
                id:         row.get(0)?,
                name:       row.get(1)?,
                base_price: row.get(2)?,
                rarity:     row.get(3)?,
            })
        })?;
        for item in items {
            let item = item?;
            world.items.insert(item.id, item);
        }

        let mut stmt = conn.prepare(
            "SELECT city_id, name, region, population FROM city WHERE campaign_id = ?1",
        )?;
        let cities = stmt.query_map(params![campaign_id], |row| {
            Ok(City {
                id:         row.get(0)?,
                name:       row.get(1)?,
                region:     row.get(2)?,
                population: row.get(3)?,
            })
        })?;
        for city in cities {
            let city = city?;
            world.cities.insert(city.id, city);
        }

        let mut stmt = conn.prepare(
            "SELECT shop_id, name, city_id, active FROM shop WHERE campaign_id = ?1 AND active = 1",
        )?;
        let shops = stmt.query_map(params![campaign_id], |row| {
            Ok(Shop {
                id:      row.get(0)?,
                name:    row.get(1)?,
                city_id: row.get(2)?,
                active:  row.get(3)?,
            })
        })?;
        for shop in shops {
            let shop = shop?;
            world.shops.insert(shop.id, shop);
        }

        let mut stmt = conn.prepare(
            "SELECT si.shop_id, si.item_id, si.stock, si.dynamic_price, si.sourcing_preference
             FROM shop_inventory si
             JOIN shop s ON s.shop_id = si.shop_id
             WHERE s.campaign_id = ?1 AND s.active = 1",
        )?;
        let lines = stmt.query_map(params![campaign_id], inventory_line)?;
        for line in lines {
            let line = with_sourcing(line?);
            world.inventory.insert((line.shop_id, line.item_id), line);
        }

        let mut stmt = conn.prepare(
            "SELECT node_id, name, item_id, city_id, production_rate, quality
             FROM resource_node WHERE campaign_id = ?1 ORDER BY node_id ASC",
        )?;
        world.nodes = stmt
            .query_map(params![campaign_id], |row| {
                Ok(ResourceNode {
                    id:              row.get(0)?,
                    name:            row.get(1)?,
                    item_id:         row.get(2)?,
                    city_id:         row.get(3)?,
                    production_rate: row.get(4)?,
                    quality:         row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut stmt = conn.prepare(
            "SELECT u.shop_id, u.daily_cost
             FROM shop_upkeep u
             JOIN shop s ON s.shop_id = u.shop_id
             WHERE s.campaign_id = ?1 AND s.active = 1
             ORDER BY u.shop_id ASC",
        )?;
        world.upkeep = stmt
            .query_map(params![campaign_id], |row| {
                Ok(ShopUpkeep {
                    shop_id:    row.get(0)?,
                    daily_cost: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        world.modifiers = load_modifiers(&conn, campaign_id, now)?;
        world.market = market::load_book(&conn, campaign_id)?;

        log::debug!(
            "store: campaign={campaign_id} loaded {} shops, {} lines, {} nodes, {} modifiers",
            world.shops.len(),
            world.inventory.len(),
            world.nodes.len(),
            world.modifiers.len()
        );
        Ok(world)
    }

    // ── Seeding ────────────────────────────────────────────────

    pub fn insert_item(&self, campaign_id: CampaignId, item: &Item) -> SimResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO item (item_id, campaign_id, name, base_price, rarity)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![item.id, campaign_id, item.name, item.base_price, item.rarity],
        )?;
        Ok(())
    }

    pub fn insert_city(&self, campaign_id: CampaignId, city: &City) -> SimResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO city (city_id, campaign_id, name, region, population)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![city.id, campaign_id, city.name, city.region, city.population],
        )?;
        Ok(())
    }

    pub fn insert_shop(&self, campaign_id: CampaignId, shop: &Shop) -> SimResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO shop (shop_id, campaign_id, name, city_id, active)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![shop.id, campaign_id, shop.name, shop.city_id, shop.active],
        )?;
        Ok(())
    }

    pub fn set_shop_active(&self, shop_id: ShopId, active: bool) -> SimResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE shop SET active = ?2 WHERE shop_id = ?1",
            params![shop_id, active],
        )?;
        Ok(())
    }

    pub fn upsert_inventory(&self, line: &InventoryLine) -> SimResult<()> {
        let conn = self.conn()?;
        upsert_inventory_line(&conn, line)
    }

    pub fn insert_resource_node(&self, campaign_id: CampaignId, node: &ResourceNode) -> SimResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO resource_node (node_id, campaign_id, name, item_id, city_id, production_rate, quality)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                node.id,
                campaign_id,
                node.name,
                node.item_id,
                node.city_id,
                node.production_rate,
                node.quality,
            ],
        )?;
        Ok(())
    }

    pub fn insert_upkeep(&self, upkeep: &ShopUpkeep) -> SimResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO shop_upkeep (shop_id, daily_cost) VALUES (?1, ?2)",
            params![upkeep.shop_id, upkeep.daily_cost],
        )?;
        Ok(())
    }

    /// Insert a modifier and its targets together.
    pub fn insert_modifier(&self, campaign_id: CampaignId, modifier: &DemandModifier) -> SimResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO demand_modifier
                 (modifier_id, campaign_id, name, scope, effect_value, start_date, end_date, is_active)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                modifier.id,
                campaign_id,
                modifier.name,
                modifier.scope.as_str(),
                modifier.effect_value,
                modifier.start_date,
                modifier.end_date,
                modifier.is_active,
            ],
        )?;
        for target in &modifier.targets {
            tx.execute(
                "INSERT INTO modifier_target (modifier_id, entity_type, entity_id) VALUES (?1, ?2, ?3)",
                params![modifier.id, target.entity_type(), target.entity_id()],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    // ── Test / summary helpers ────────────────────────────────────────

    pub fn inventory_line(&self, shop_id: ShopId, item_id: ItemId) -> SimResult<Option<InventoryLine>> {
        let conn = self.conn()?;
        let line = conn
            .query_row(
                "SELECT shop_id, item_id, stock, dynamic_price, sourcing_preference
                 FROM shop_inventory WHERE shop_id = ?1 AND item_id = ?2",
                params![shop_id, item_id],
                inventory_line,
            )
            .optional()?;
        Ok(line.map(with_sourcing))
    }

    /// Every inventory line of the campaign's shops, active or not.
    pub fn inventory_lines(&self, campaign_id: CampaignId) -> SimResult<Vec<InventoryLine>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT si.shop_id, si.item_id, si.stock, si.dynamic_price, si.sourcing_preference
             FROM shop_inventory si
             JOIN shop s ON s.shop_id = si.shop_id
             WHERE s.campaign_id = ?1
             ORDER BY si.shop_id, si.item_id",
        )?;
        let lines = stmt
            .query_map(params![campaign_id], inventory_line)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(lines.into_iter().map(with_sourcing).collect())
    }
}
