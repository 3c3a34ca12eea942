//! Market aggregates and cross-shop sourcing.
//!
//! Regional aggregates are keyed by (city, item), global ones by item.
//! Rows are created on first touch with average_price = base_price.
//! The book remembers which rows changed so the store only writes those.

use crate::{
    config::{MarketConfig, PricingConfig, SimConfig},
    error::{SimError, SimResult},
    pricing::sourcing_blend,
    snapshot::{InventoryLine, Item, SourcingPreference, WorldSnapshot},
    types::{CityId, ItemId, ShopId, Timestamp},
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MarketAggregate {
    pub total_supply:  f64,
    pub total_demand:  f64,
    pub average_price: f64,
    pub last_updated:  Timestamp,
}

impl MarketAggregate {
    fn fresh(base_price: f64, now: Timestamp) -> Self {
        Self {
            total_supply:  0.0,
            total_demand:  0.0,
            average_price: base_price,
            last_updated:  now,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MarketBook {
    regional:         BTreeMap<(CityId, ItemId), MarketAggregate>,
    global:           BTreeMap<ItemId, MarketAggregate>,
    touched_regional: BTreeSet<(CityId, ItemId)>,
    touched_global:   BTreeSet<ItemId>,
}

impl MarketBook {
    /// Seed a row loaded from storage. Does not mark it as changed.
    pub fn load_regional(&mut self, city_id: CityId, item_id: ItemId, agg: MarketAggregate) {
        self.regional.insert((city_id, item_id), agg);
    }

    pub fn load_global(&mut self, item_id: ItemId, agg: MarketAggregate) {
        self.global.insert(item_id, agg);
    }

    pub fn regional(&self, city_id: CityId, item_id: ItemId) -> Option<&MarketAggregate> {
        self.regional.get(&(city_id, item_id))
    }

    pub fn global(&self, item_id: ItemId) -> Option<&MarketAggregate> {
        self.global.get(&item_id)
    }

    /// Rows changed since load, ascending by key.
    pub fn changed_regional(&self) -> impl Iterator<Item = ((CityId, ItemId), &MarketAggregate)> {
        self.touched_regional
            .iter()
            .filter_map(|key| self.regional.get(key).map(|agg| (*key, agg)))
    }

    pub fn changed_global(&self) -> impl Iterator<Item = (ItemId, &MarketAggregate)> {
        self.touched_global
            .iter()
            .filter_map(|id| self.global.get(id).map(|agg| (*id, agg)))
    }

    fn regional_entry(&mut self, city_id: CityId, item: &Item, now: Timestamp) -> &mut MarketAggregate {
        self.touched_regional.insert((city_id, item.id));
        self.regional
            .entry((city_id, item.id))
            .or_insert_with(|| MarketAggregate::fresh(item.base_price, now))
    }

    fn global_entry(&mut self, item: &Item, now: Timestamp) -> &mut MarketAggregate {
        self.touched_global.insert(item.id);
        self.global
            .entry(item.id)
            .or_insert_with(|| MarketAggregate::fresh(item.base_price, now))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Supply,
    Demand,
}

/// One (source shop, units) pair from [`MarketService::find_item_sources`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceAllocation {
    pub shop_id: ShopId,
    pub amount:  i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransactionOutcome {
    pub source_shop:  ShopId,
    pub target_shop:  ShopId,
    pub item_id:      ItemId,
    pub amount:       i64,
    pub target_price: f64,
    pub cross_region: bool,
}

pub struct MarketService<'a> {
    market:  &'a MarketConfig,
    pricing: &'a PricingConfig,
}

impl<'a> MarketService<'a> {
    pub fn new(config: &'a SimConfig) -> Self {
        Self {
            market:  &config.market,
            pricing: &config.pricing,
        }
    }

    // ── Aggregate updates ──────────────────────────────────────

    pub fn update_regional_supply(&self, book: &mut MarketBook, city_id: CityId, item: &Item, delta: f64, now: Timestamp) {
        let agg = book.regional_entry(city_id, item, now);
        self.apply(agg, Side::Supply, delta, item.base_price, self.market.regional_depth, now);
    }

    pub fn update_regional_demand(&self, book: &mut MarketBook, city_id: CityId, item: &Item, delta: f64, now: Timestamp) {
        let agg = book.regional_entry(city_id, item, now);
        self.apply(agg, Side::Demand, delta, item.base_price, self.market.regional_depth, now);
    }

    pub fn update_global_supply(&self, book: &mut MarketBook, item: &Item, delta: f64, now: Timestamp) {
        let agg = book.global_entry(item, now);
        self.apply(agg, Side::Supply, delta, item.base_price, self.market.global_depth, now);
    }

    pub fn update_global_demand(&self, book: &mut MarketBook, item: &Item, delta: f64, now: Timestamp) {
        let agg = book.global_entry(item, now);
        self.apply(agg, Side::Demand, delta, item.base_price, self.market.global_depth, now);
    }

    fn apply(&self, agg: &mut MarketAggregate, side: Side, delta: f64, base_price: f64, depth: f64, now: Timestamp) {
        let total = match side {
            Side::Supply => &mut agg.total_supply,
            Side::Demand => &mut agg.total_demand,
        };
        *total = (*total + delta).max(0.0);
        agg.average_price = self.average_price(base_price, agg.total_supply, agg.total_demand, depth);
        agg.last_updated = now;
    }

    /// base × (1 + sensitivity × pressure), pressure = (D − S) / (D + S + depth).
    ///
    /// Pressure lies in (−1, 1), so the result stays strictly within
    /// base × (1 ± sensitivity); it rises with demand and falls with supply.
    pub fn average_price(&self, base_price: f64, supply: f64, demand: f64, depth: f64) -> f64 {
        let denom = demand + supply + depth.max(1.0);
        let pressure = (demand - supply) / denom;
        base_price * (1.0 + self.market.price_sensitivity * pressure)
    }

    // ── Price resolution ───────────────────────────────────────

    /// Market price of `item` for `shop` in `city_id`, blended per the
    /// shop's sourcing preference. A shop without a line for the item
    /// gets the base price.
    pub fn get_item_price(&self, world: &WorldSnapshot, shop_id: ShopId, item: &Item, city_id: Option<CityId>) -> f64 {
        let Some(line) = world.inventory.get(&(shop_id, item.id)) else {
            return item.base_price;
        };
        let (regional, global) = self.averages(world, item.id, city_id);
        sourcing_blend(self.pricing, line.sourcing, item.base_price, regional, global)
    }

    /// (regional, global) average prices. `None` where no row exists yet.
    pub fn averages(&self, world: &WorldSnapshot, item_id: ItemId, city_id: Option<CityId>) -> (Option<f64>, Option<f64>) {
        let regional = city_id
            .and_then(|c| world.market.regional(c, item_id))
            .map(|a| a.average_price);
        let global = world.market.global(item_id).map(|a| a.average_price);
        (regional, global)
    }

    // ── Sourcing ───────────────────────────────────────────────

    /// Locate up to `amount` units of `item_id` for `shop_id` in other shops.
    ///
    /// Same-region shops are drained first, then every other shop.
    /// Both passes run in ascending shop id, so identical state always
    /// produces identical allocations. The sum never exceeds `amount`.
    pub fn find_item_sources(&self, world: &WorldSnapshot, shop_id: ShopId, item_id: ItemId, amount: i64) -> Vec<SourceAllocation> {
        let mut sources = Vec::new();
        if amount <= 0 {
            return sources;
        }
        let mut remaining = amount;
        let mut used = BTreeSet::new();

        let passes: [&dyn Fn(ShopId) -> bool; 2] = [
            &|candidate| same_region(world, shop_id, candidate),
            &|_| true,
        ];
        for in_pass in passes {
            for shop in world.shops.values() {
                if remaining == 0 {
                    return sources;
                }
                if shop.id == shop_id || !shop.active || used.contains(&shop.id) || !in_pass(shop.id) {
                    continue;
                }
                let stock = world
                    .inventory
                    .get(&(shop.id, item_id))
                    .map(|l| l.stock)
                    .unwrap_or(0);
                if stock <= 0 {
                    continue;
                }
                let take = stock.min(remaining);
                sources.push(SourceAllocation { shop_id: shop.id, amount: take });
                used.insert(shop.id);
                remaining -= take;
            }
        }
        sources
    }

    /// Move `amount` units from `source` to `target`.
    ///
    /// Fails without touching anything if the source lacks stock. The
    /// source city's regional supply drops and the target city's regional
    /// demand rises; a cross-region move also shifts the global aggregate.
    /// The target line (created as hybrid if absent) is repriced at the
    /// blended market price.
    pub fn process_transaction(
        &self,
        world: &mut WorldSnapshot,
        source: ShopId,
        target: ShopId,
        item_id: ItemId,
        amount: i64,
        now: Timestamp,
    ) -> SimResult<TransactionOutcome> {
        if amount <= 0 {
            return Err(SimError::InvalidAmount {
                amount,
                reason: "transfer amount must be positive".into(),
            });
        }
        if source == target {
            return Err(SimError::InvalidAmount {
                amount,
                reason: format!("source and target are both shop {source}"),
            });
        }
        let item = world.items.get(&item_id).cloned().ok_or_else(|| SimError::MissingReference {
            entity:   "item",
            id:       item_id,
            referrer: format!("transfer {source}->{target}"),
        })?;
        for shop in [source, target] {
            if !world.shops.contains_key(&shop) {
                return Err(SimError::MissingReference {
                    entity:   "shop",
                    id:       shop,
                    referrer: format!("transfer of item {item_id}"),
                });
            }
        }
        let available = world.inventory.get(&(source, item_id)).map(|l| l.stock).unwrap_or(0);
        if available < amount {
            return Err(SimError::InsufficientStock {
                shop_id: source,
                item_id,
                available,
                requested: amount,
            });
        }

        if let Some(line) = world.inventory.get_mut(&(source, item_id)) {
            line.stock -= amount;
        }
        world
            .inventory
            .entry((target, item_id))
            .and_modify(|l| l.stock += amount)
            .or_insert_with(|| InventoryLine {
                shop_id:       target,
                item_id,
                stock:         amount,
                dynamic_price: item.base_price,
                sourcing:      SourcingPreference::default(),
            });

        let source_city = world.shop_city(source).map(|c| c.id);
        let target_city = world.shop_city(target).map(|c| c.id);
        let cross_region = !same_region(world, source, target);
        match (source_city, target_city) {
            (Some(sc), Some(tc)) => {
                self.update_regional_supply(&mut world.market, sc, &item, -(amount as f64), now);
                self.update_regional_demand(&mut world.market, tc, &item, amount as f64, now);
                if cross_region {
                    self.update_global_supply(&mut world.market, &item, -(amount as f64), now);
                    self.update_global_demand(&mut world.market, &item, amount as f64, now);
                }
            }
            _ => log::warn!(
                "market: transfer {source}->{target} item={item_id} has a shop without a city; aggregates unchanged"
            ),
        }

        let blended = self.get_item_price(world, target, &item, target_city);
        let target_price = if blended.is_finite() {
            blended.max(self.pricing.price_floor)
        } else {
            self.pricing.price_floor
        };
        if let Some(line) = world.inventory.get_mut(&(target, item_id)) {
            line.dynamic_price = target_price;
        }

        Ok(TransactionOutcome {
            source_shop: source,
            target_shop: target,
            item_id,
            amount,
            target_price,
            cross_region,
        })
    }
}

/// Two shops share a region when their cities carry the same region name,
/// or when they sit in the same city.
pub fn same_region(world: &WorldSnapshot, a: ShopId, b: ShopId) -> bool {
    match (world.shop_city(a), world.shop_city(b)) {
        (Some(ca), Some(cb)) => {
            ca.id == cb.id || (ca.region.is_some() && ca.region == cb.region)
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{City, Shop};
    use chrono::{TimeZone, Utc};

    fn now() -> Timestamp {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
    }

    fn item() -> Item {
        Item { id: 1, name: "Rope".into(), base_price: 10.0, rarity: "common".into() }
    }

    #[test]
    fn totals_clamp_at_zero_and_price_is_bounded() {
        let config = SimConfig::default();
        let service = MarketService::new(&config);
        let mut book = MarketBook::default();

        service.update_regional_supply(&mut book, 1, &item(), -50.0, now());
        let agg = book.regional(1, 1).unwrap();
        assert_eq!(agg.total_supply, 0.0);
        assert_eq!(agg.average_price, 10.0);

        service.update_regional_demand(&mut book, 1, &item(), 1e12, now());
        let agg = book.regional(1, 1).unwrap();
        assert!(agg.average_price < 15.0 && agg.average_price > 14.9);

        service.update_regional_supply(&mut book, 1, &item(), 1e15, now());
        let agg = book.regional(1, 1).unwrap();
        assert!(agg.average_price > 5.0 && agg.average_price < 10.0);
    }

    #[test]
    fn average_price_is_monotonic() {
        let config = SimConfig::default();
        let service = MarketService::new(&config);
        let mut last = 0.0;
        for demand in [0.0, 10.0, 100.0, 1000.0, 10_000.0] {
            let p = service.average_price(10.0, 100.0, demand, 1000.0);
            assert!(p > last);
            last = p;
        }
        let mut last = f64::MAX;
        for supply in [0.0, 10.0, 100.0, 1000.0, 10_000.0] {
            let p = service.average_price(10.0, supply, 100.0, 1000.0);
            assert!(p < last);
            last = p;
        }
    }

    #[test]
    fn only_touched_rows_are_reported() {
        let config = SimConfig::default();
        let service = MarketService::new(&config);
        let mut book = MarketBook::default();
        book.load_global(1, MarketAggregate::fresh(10.0, now()));
        book.load_global(2, MarketAggregate::fresh(10.0, now()));
        let mut other = item();
        other.id = 2;
        service.update_global_demand(&mut book, &other, 3.0, now());
        let changed: Vec<ItemId> = book.changed_global().map(|(id, _)| id).collect();
        assert_eq!(changed, vec![2]);
    }

    fn two_region_world() -> WorldSnapshot {
        let mut world = WorldSnapshot::new(1);
        world.items.insert(1, item());
        for (id, region) in [(1, "North"), (2, "North"), (3, "South")] {
            world.cities.insert(id, City { id, name: format!("c{id}"), region: Some(region.into()), population: None });
        }
        for (id, city) in [(10, 1), (11, 2), (12, 3), (13, 3)] {
            world.shops.insert(id, Shop { id, name: format!("s{id}"), city_id: Some(city), active: true });
        }
        for (shop, stock) in [(10, 0), (11, 4), (12, 6), (13, 9)] {
            world.inventory.insert((shop, 1), InventoryLine {
                shop_id: shop,
                item_id: 1,
                stock,
                dynamic_price: 10.0,
                sourcing: SourcingPreference::Regional,
            });
        }
        world
    }

    #[test]
    fn sources_prefer_region_then_ascending_ids() {
        let config = SimConfig::default();
        let service = MarketService::new(&config);
        let world = two_region_world();

        let small = service.find_item_sources(&world, 10, 1, 3);
        assert_eq!(small, vec![SourceAllocation { shop_id: 11, amount: 3 }]);

        let large = service.find_item_sources(&world, 10, 1, 12);
        assert_eq!(large, vec![
            SourceAllocation { shop_id: 11, amount: 4 },
            SourceAllocation { shop_id: 12, amount: 6 },
            SourceAllocation { shop_id: 13, amount: 2 },
        ]);

        let huge = service.find_item_sources(&world, 10, 1, 1000);
        assert_eq!(huge.iter().map(|s| s.amount).sum::<i64>(), 19);
        assert!(service.find_item_sources(&world, 10, 1, 0).is_empty());
    }

    #[test]
    fn transaction_moves_stock_and_aggregates() {
        let config = SimConfig::default();
        let service = MarketService::new(&config);
        let mut world = two_region_world();

        let outcome = service.process_transaction(&mut world, 12, 10, 1, 5, now()).unwrap();
        assert!(outcome.cross_region);
        assert_eq!(world.inventory[&(12, 1)].stock, 1);
        assert_eq!(world.inventory[&(10, 1)].stock, 5);
        assert_eq!(world.market.regional(1, 1).unwrap().total_demand, 5.0);
        assert_eq!(world.market.global(1).unwrap().total_demand, 5.0);
        assert!(outcome.target_price >= 1.0);

        let local = service.process_transaction(&mut world, 11, 10, 1, 2, now()).unwrap();
        assert!(!local.cross_region);
        assert_eq!(world.market.global(1).unwrap().total_demand, 5.0);
    }

    #[test]
    fn insufficient_stock_leaves_world_untouched() {
        let config = SimConfig::default();
        let service = MarketService::new(&config);
        let mut world = two_region_world();

        let err = service.process_transaction(&mut world, 11, 10, 1, 50, now()).unwrap_err();
        assert!(matches!(err, SimError::InsufficientStock { available: 4, requested: 50, .. }));
        assert_eq!(world.inventory[&(11, 1)].stock, 4);
        assert_eq!(world.inventory[&(10, 1)].stock, 0);
        assert_eq!(world.market.changed_regional().count(), 0);
    }
}
