//! Demand modifiers: GM-authored, time-windowed additive demand deltas.
//!
//! The engine only reads modifiers. Resolution is a pure function of
//! (modifiers, now, context) and is called many times per tick.

use crate::types::{CityId, ItemId, ShopId, Timestamp};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ModifierScope {
    Global,
    Regional,
    City,
    Shop,
    Item,
}

impl ModifierScope {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "global"   => Some(Self::Global),
            "regional" => Some(Self::Regional),
            "city"     => Some(Self::City),
            "shop"     => Some(Self::Shop),
            "item"     => Some(Self::Item),
            _          => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Global   => "global",
            Self::Regional => "regional",
            Self::City     => "city",
            Self::Shop     => "shop",
            Self::Item     => "item",
        }
    }
}

/// The entity a non-global modifier applies to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "entity_type", content = "entity_id", rename_all = "snake_case")]
pub enum ModifierTarget {
    Region(String),
    City(CityId),
    Shop(ShopId),
    Item(ItemId),
}

impl ModifierTarget {
    /// Build from the stored (entity_type, entity_id) pair.
    pub fn from_parts(entity_type: &str, entity_id: &str) -> Option<Self> {
        match entity_type {
            "region" => Some(Self::Region(entity_id.to_string())),
            "city"   => entity_id.parse().ok().map(Self::City),
            "shop"   => entity_id.parse().ok().map(Self::Shop),
            "item"   => entity_id.parse().ok().map(Self::Item),
            _        => None,
        }
    }

    pub fn entity_type(&self) -> &'static str {
        match self {
            Self::Region(_) => "region",
            Self::City(_)   => "city",
            Self::Shop(_)   => "shop",
            Self::Item(_)   => "item",
        }
    }

    pub fn entity_id(&self) -> String {
        match self {
            Self::Region(r) => r.clone(),
            Self::City(id) | Self::Shop(id) | Self::Item(id) => id.to_string(),
        }
    }

    pub fn matches(&self, ctx: &ModifierContext<'_>) -> bool {
        match self {
            Self::Region(r) => ctx.region == Some(r.as_str()),
            Self::City(id)  => ctx.city == Some(*id),
            Self::Shop(id)  => ctx.shop == Some(*id),
            Self::Item(id)  => ctx.item == Some(*id),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DemandModifier {
    pub id:           i64,
    pub name:         String,
    pub scope:        ModifierScope,
    /// Additive delta around the 1.0 baseline.
    pub effect_value: f64,
    pub start_date:   Option<Timestamp>,
    pub end_date:     Option<Timestamp>,
    pub is_active:    bool,
    pub targets:      Vec<ModifierTarget>,
}

impl DemandModifier {
    /// Active flag set and `now` inside [start_date, end_date]. Open ends are unbounded.
    pub fn is_effective_at(&self, now: Timestamp) -> bool {
        if !self.is_active {
            return false;
        }
        if self.start_date.is_some_and(|start| now < start) {
            return false;
        }
        if self.end_date.is_some_and(|end| now > end) {
            return false;
        }
        true
    }
}

/// The (region, city, shop, item) coordinates a factor is resolved for.
/// Unset coordinates never match a target.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModifierContext<'a> {
    pub region: Option<&'a str>,
    pub city:   Option<CityId>,
    pub shop:   Option<ShopId>,
    pub item:   Option<ItemId>,
}

/// Aggregate demand factor: 1.0 + Σ applicable effect values.
///
/// Global modifiers apply once, unconditionally. Every other modifier
/// applies once per target matching the context. Stacking is additive.
pub fn resolve_demand_factor(
    modifiers: &[DemandModifier],
    now: Timestamp,
    ctx: &ModifierContext<'_>,
) -> f64 {
    let mut factor = 1.0;
    for modifier in modifiers.iter().filter(|m| m.is_effective_at(now)) {
        match modifier.scope {
            ModifierScope::Global => factor += modifier.effect_value,
            ModifierScope::Regional
            | ModifierScope::City
            | ModifierScope::Shop
            | ModifierScope::Item => {
                let hits = modifier.targets.iter().filter(|t| t.matches(ctx)).count();
                factor += modifier.effect_value * hits as f64;
            }
        }
    }
    factor
}

/// Turn a resolved factor into a demand multiplier that can never be negative.
pub fn demand_multiplier(factor: f64, floor: f64) -> f64 {
    let floor = floor.max(0.0);
    if factor.is_nan() {
        return floor;
    }
    factor.max(floor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn now() -> Timestamp {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn modifier(id: i64, scope: ModifierScope, effect: f64, targets: Vec<ModifierTarget>) -> DemandModifier {
        DemandModifier {
            id,
            name: format!("m{id}"),
            scope,
            effect_value: effect,
            start_date: None,
            end_date: None,
            is_active: true,
            targets,
        }
    }

    fn city_ctx(city: CityId) -> ModifierContext<'static> {
        ModifierContext { city: Some(city), ..Default::default() }
    }

    #[test]
    fn city_and_global_modifiers_add() {
        let mods = vec![
            modifier(1, ModifierScope::City, -0.3, vec![ModifierTarget::City(2)]),
            modifier(2, ModifierScope::Global, 0.1, vec![]),
        ];
        let in_city_2 = resolve_demand_factor(&mods, now(), &city_ctx(2));
        let in_city_3 = resolve_demand_factor(&mods, now(), &city_ctx(3));
        assert!((in_city_2 - 0.8).abs() < 1e-9, "got {in_city_2}");
        assert!((in_city_3 - 1.1).abs() < 1e-9, "got {in_city_3}");
    }

    #[test]
    fn resolution_is_idempotent() {
        let mods = vec![
            modifier(1, ModifierScope::Item, 0.25, vec![ModifierTarget::Item(9)]),
            modifier(2, ModifierScope::Global, -0.05, vec![]),
        ];
        let before = mods.clone();
        let ctx = ModifierContext { item: Some(9), ..Default::default() };
        let a = resolve_demand_factor(&mods, now(), &ctx);
        let b = resolve_demand_factor(&mods, now(), &ctx);
        assert_eq!(a, b);
        assert_eq!(mods, before);
    }

    #[test]
    fn window_and_active_flag_respected() {
        let mut expired = modifier(1, ModifierScope::Global, 0.5, vec![]);
        expired.end_date = Some(now() - Duration::hours(1));
        let mut future = modifier(2, ModifierScope::Global, 0.5, vec![]);
        future.start_date = Some(now() + Duration::hours(1));
        let mut inactive = modifier(3, ModifierScope::Global, 0.5, vec![]);
        inactive.is_active = false;
        let mut bounded = modifier(4, ModifierScope::Global, 0.2, vec![]);
        bounded.start_date = Some(now() - Duration::hours(1));
        bounded.end_date = Some(now() + Duration::hours(1));

        let factor = resolve_demand_factor(
            &[expired, future, inactive, bounded],
            now(),
            &ModifierContext::default(),
        );
        assert!((factor - 1.2).abs() < 1e-9);
    }

    #[test]
    fn each_matching_target_counts_once() {
        let mods = vec![modifier(
            1,
            ModifierScope::Shop,
            0.1,
            vec![ModifierTarget::Shop(4), ModifierTarget::City(1), ModifierTarget::Shop(5)],
        )];
        let ctx = ModifierContext { city: Some(1), shop: Some(4), ..Default::default() };
        let factor = resolve_demand_factor(&mods, now(), &ctx);
        assert!((factor - 1.2).abs() < 1e-9);
    }

    #[test]
    fn region_target_matches_by_name() {
        let mods = vec![modifier(
            1,
            ModifierScope::Regional,
            0.4,
            vec![ModifierTarget::Region("Sword Coast".into())],
        )];
        let hit = ModifierContext { region: Some("Sword Coast"), ..Default::default() };
        let miss = ModifierContext { region: Some("Underdark"), ..Default::default() };
        assert!((resolve_demand_factor(&mods, now(), &hit) - 1.4).abs() < 1e-9);
        assert_eq!(resolve_demand_factor(&mods, now(), &miss), 1.0);
    }

    #[test]
    fn multiplier_never_negative() {
        assert_eq!(demand_multiplier(-0.7, 0.0), 0.0);
        assert_eq!(demand_multiplier(-0.7, 0.1), 0.1);
        assert_eq!(demand_multiplier(1.3, 0.1), 1.3);
        assert_eq!(demand_multiplier(f64::NAN, 0.0), 0.0);
    }

    #[test]
    fn target_parts_round_trip() {
        let t = ModifierTarget::from_parts("city", "12").unwrap();
        assert_eq!(t, ModifierTarget::City(12));
        assert_eq!((t.entity_type(), t.entity_id()), ("city", "12".to_string()));
        assert!(ModifierTarget::from_parts("city", "twelve").is_none());
        assert!(ModifierTarget::from_parts("planet", "1").is_none());
    }
}
