//! World snapshot: everything one tick reads, loaded in one pass.
//!
//! The tick pipeline mutates a snapshot in memory and hands the result
//! to the store as a single commit. Maps are ordered by id so every
//! iteration is deterministic.

use crate::{
    market::MarketBook,
    modifier::DemandModifier,
    types::{CampaignId, CityId, ItemId, NodeId, ShopId},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Item {
    pub id:         ItemId,
    pub name:       String,
    pub base_price: f64,
    /// Free-form: a number ("3") or a named tier ("rare").
    pub rarity:     String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct City {
    pub id:         CityId,
    pub name:       String,
    pub region:     Option<String>,
    pub population: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Shop {
    pub id:      ShopId,
    pub name:    String,
    pub city_id: Option<CityId>,
    pub active:  bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SourcingPreference {
    Regional,
    Global,
    #[default]
    Hybrid,
}

impl SourcingPreference {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "regional" => Some(Self::Regional),
            "global"   => Some(Self::Global),
            "hybrid"   => Some(Self::Hybrid),
            _          => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Regional => "regional",
            Self::Global   => "global",
            Self::Hybrid   => "hybrid",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InventoryLine {
    pub shop_id:       ShopId,
    pub item_id:       ItemId,
    pub stock:         i64,
    pub dynamic_price: f64,
    pub sourcing:      SourcingPreference,
}

/// A production source: a mine, farm, forest...
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceNode {
    pub id:              NodeId,
    pub name:            String,
    pub item_id:         Option<ItemId>,
    pub city_id:         Option<CityId>,
    /// Units per tick before quality.
    pub production_rate: f64,
    /// 0.0 to 1.0.
    pub quality:         f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ShopUpkeep {
    pub shop_id:    ShopId,
    pub daily_cost: f64,
}

#[derive(Debug, Clone, Default)]
pub struct WorldSnapshot {
    pub campaign_id: CampaignId,
    pub items:       BTreeMap<ItemId, Item>,
    pub cities:      BTreeMap<CityId, City>,
    pub shops:       BTreeMap<ShopId, Shop>,
    pub inventory:   BTreeMap<(ShopId, ItemId), InventoryLine>,
    pub nodes:       Vec<ResourceNode>,
    pub upkeep:      Vec<ShopUpkeep>,
    /// Only the modifiers effective at load time.
    pub modifiers:   Vec<DemandModifier>,
    pub market:      MarketBook,
}

impl WorldSnapshot {
    pub fn new(campaign_id: CampaignId) -> Self {
        Self {
            campaign_id,
            ..Default::default()
        }
    }

    /// The city a shop trades in, if it has one and it exists.
    pub fn shop_city(&self, shop_id: ShopId) -> Option<&City> {
        self.shops
            .get(&shop_id)
            .and_then(|s| s.city_id)
            .and_then(|c| self.cities.get(&c))
    }

    pub fn city_region(&self, city_id: CityId) -> Option<&str> {
        self.cities.get(&city_id).and_then(|c| c.region.as_deref())
    }

    /// Inventory lines of one shop, ascending by item id.
    pub fn lines_for_shop(&self, shop_id: ShopId) -> impl Iterator<Item = &InventoryLine> {
        self.inventory
            .range((shop_id, ItemId::MIN)..=(shop_id, ItemId::MAX))
            .map(|(_, line)| line)
    }
}
