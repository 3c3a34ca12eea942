//! Dynamic pricing.
//!
//! price = anchor × rarity × stock pressure × demand × (1 + fluctuation)
//!
//! where `anchor` is the sourcing blend of regional/global average prices.
//! The result is rounded to cents and never drops below the price floor.

use crate::{
    config::{DemandConfig, PricingConfig, SimConfig},
    modifier::demand_multiplier,
    rng::TickRng,
    snapshot::SourcingPreference,
};

/// Numeric rank for an item's rarity. Digits parse directly, named D&D
/// tiers map to 1..=6, anything else gets `default_rank`.
pub fn rarity_rank(rarity: &str, default_rank: u32) -> u32 {
    let normalized = rarity.trim().to_ascii_lowercase().replace(['_', '-'], " ");
    if let Ok(n) = normalized.parse::<u32>() {
        return n.max(1);
    }
    match normalized.as_str() {
        "common"    => 1,
        "uncommon"  => 2,
        "rare"      => 3,
        "very rare" => 4,
        "legendary" => 5,
        "artifact"  => 6,
        _           => default_rank.max(1),
    }
}

/// Blend regional and global averages per the line's sourcing preference.
/// A missing average contributes `base_price` instead.
pub fn sourcing_blend(
    config: &PricingConfig,
    sourcing: SourcingPreference,
    base_price: f64,
    regional_avg: Option<f64>,
    global_avg: Option<f64>,
) -> f64 {
    let regional = regional_avg.unwrap_or(base_price);
    let global = global_avg.unwrap_or(base_price);
    match sourcing {
        SourcingPreference::Regional => regional,
        SourcingPreference::Global   => global,
        SourcingPreference::Hybrid   => {
            regional * config.hybrid_regional_weight + global * config.hybrid_global_weight
        }
    }
}

/// Everything the price of one inventory line depends on.
#[derive(Debug, Clone)]
pub struct PriceInputs<'a> {
    pub base_price:    f64,
    pub rarity:        &'a str,
    pub stock:         i64,
    /// Resolved modifier factor (1.0 = neutral).
    pub demand_factor: f64,
    pub sourcing:      SourcingPreference,
    pub regional_avg:  Option<f64>,
    pub global_avg:    Option<f64>,
}

pub struct PricingEngine<'a> {
    config: &'a PricingConfig,
    demand: &'a DemandConfig,
}

impl<'a> PricingEngine<'a> {
    pub fn new(config: &'a SimConfig) -> Self {
        Self {
            config: &config.pricing,
            demand: &config.demand,
        }
    }

    /// Draw a fluctuation from the configured bounds and price the line.
    pub fn price(&self, inputs: &PriceInputs<'_>, rng: &mut TickRng) -> f64 {
        let fluctuation = rng.uniform(
            self.config.min_price_change_percent / 100.0,
            self.config.max_price_change_percent / 100.0,
        );
        self.price_with_fluctuation(inputs, fluctuation)
    }

    /// Deterministic core of [`price`](Self::price).
    pub fn price_with_fluctuation(&self, inputs: &PriceInputs<'_>, fluctuation: f64) -> f64 {
        let mut anchor = sourcing_blend(
            self.config,
            inputs.sourcing,
            inputs.base_price,
            inputs.regional_avg,
            inputs.global_avg,
        );
        if !anchor.is_finite() || anchor <= 0.0 {
            anchor = inputs.base_price;
        }

        let rank = rarity_rank(inputs.rarity, self.config.default_rarity_rank);
        let rarity_mult = 1.0 + self.config.rarity_weight * (rank - 1) as f64;
        let demand_mult = demand_multiplier(inputs.demand_factor, self.demand.min_demand_multiplier);

        let raw = anchor
            * rarity_mult
            * self.stock_multiplier(inputs.stock)
            * demand_mult
            * (1.0 + fluctuation);

        self.clamp(raw)
    }

    /// 1.25 when empty, 1.0 at the reference level, approaching 0.75 as stock grows.
    pub fn stock_multiplier(&self, stock: i64) -> f64 {
        let reference = self.config.stock_reference;
        if reference <= 0.0 {
            return 1.0;
        }
        let pressure = reference / (stock.max(0) as f64 + reference);
        0.75 + 0.5 * pressure
    }

    /// Round to cents and apply the floor. Non-finite input lands on the floor.
    pub fn clamp(&self, raw: f64) -> f64 {
        if !raw.is_finite() {
            return self.config.price_floor;
        }
        let rounded = (raw * 100.0).round() / 100.0;
        rounded.max(self.config.price_floor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::RngBank;

    fn inputs(stock: i64, factor: f64) -> PriceInputs<'static> {
        PriceInputs {
            base_price: 100.0,
            rarity: "1",
            stock,
            demand_factor: factor,
            sourcing: SourcingPreference::Hybrid,
            regional_avg: None,
            global_avg: None,
        }
    }

    #[test]
    fn fixed_seed_gives_fixed_price_within_bounds() {
        let config = SimConfig::default();
        let engine = PricingEngine::new(&config);
        let bank = RngBank::new(config.seed);

        let a = engine.price(&inputs(10, 1.0), &mut bank.for_tick(1, 1));
        let b = engine.price(&inputs(10, 1.0), &mut bank.for_tick(1, 1));
        assert_eq!(a, b);

        let neutral = engine.price_with_fluctuation(&inputs(10, 1.0), 0.0);
        let lo = engine.price_with_fluctuation(&inputs(10, 1.0), -0.05);
        let hi = engine.price_with_fluctuation(&inputs(10, 1.0), 0.05);
        assert!((neutral - 116.67).abs() < 0.01, "neutral={neutral}");
        assert!(a >= lo && a <= hi, "{a} not in [{lo}, {hi}]");
    }

    #[test]
    fn price_never_below_floor() {
        let config = SimConfig::default();
        let engine = PricingEngine::new(&config);
        for stock in [0, 1, 10_000, i64::MAX] {
            for factor in [-5.0, 0.0, 0.001, 1.0, 50.0] {
                let p = engine.price_with_fluctuation(&inputs(stock, factor), -0.05);
                assert!(p >= config.pricing.price_floor, "stock={stock} factor={factor} p={p}");
            }
        }
        let mut cheap = inputs(1_000_000, 1.0);
        cheap.base_price = 0.01;
        assert_eq!(engine.price_with_fluctuation(&cheap, 0.0), 1.0);
        cheap.base_price = f64::NAN;
        assert_eq!(engine.price_with_fluctuation(&cheap, 0.0), 1.0);
    }

    #[test]
    fn scarcity_raises_price() {
        let config = SimConfig::default();
        let engine = PricingEngine::new(&config);
        let scarce = engine.price_with_fluctuation(&inputs(0, 1.0), 0.0);
        let plenty = engine.price_with_fluctuation(&inputs(500, 1.0), 0.0);
        assert!(scarce > plenty);
    }

    #[test]
    fn blend_follows_sourcing() {
        let config = PricingConfig::default();
        let regional = sourcing_blend(&config, SourcingPreference::Regional, 10.0, Some(20.0), Some(40.0));
        let global = sourcing_blend(&config, SourcingPreference::Global, 10.0, Some(20.0), Some(40.0));
        let hybrid = sourcing_blend(&config, SourcingPreference::Hybrid, 10.0, Some(20.0), Some(40.0));
        let missing = sourcing_blend(&config, SourcingPreference::Hybrid, 10.0, None, Some(40.0));
        assert_eq!(regional, 20.0);
        assert_eq!(global, 40.0);
        assert!((hybrid - 26.0).abs() < 1e-9);
        assert!((missing - 19.0).abs() < 1e-9);
    }

    #[test]
    fn rarity_parsing() {
        assert_eq!(rarity_rank("3", 5), 3);
        assert_eq!(rarity_rank("0", 5), 1);
        assert_eq!(rarity_rank("Very Rare", 5), 4);
        assert_eq!(rarity_rank("very_rare", 5), 4);
        assert_eq!(rarity_rank("mythic-ish", 5), 5);
        assert_eq!(rarity_rank("", 2), 2);
    }
}
