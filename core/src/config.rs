use serde::{Deserialize, Serialize};

/// One week at 1x. Anything longer is a typo, not a campaign.
pub const MAX_BASE_TICK_INTERVAL_SECS: f64 = 604_800.0;

/// Tuning knobs for the simulation engine.
///
/// Every field has a default so a config file only needs to name the
/// values it overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Master seed; every per-tick RNG stream is derived from it.
    pub seed: u64,

    // ── Clock ──────────────────────────────────────────────────
    /// Seconds between ticks at 1x. Faster speeds divide this.
    pub base_tick_interval_secs: f64,
    /// Soft wall-clock budget for one tick. Overruns are counted, never enforced.
    pub tick_budget_ms: u64,

    pub pricing: PricingConfig,
    pub market: MarketConfig,
    pub demand: DemandConfig,
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingConfig {
    /// Lower bound of the per-tick random fluctuation, in percent.
    pub min_price_change_percent: f64,
    /// Upper bound of the per-tick random fluctuation, in percent.
    pub max_price_change_percent: f64,
    /// No dynamic price ever drops below this.
    pub price_floor: f64,
    /// Rank used when an item's rarity cannot be parsed.
    pub default_rarity_rank: u32,
    /// Price uplift per rarity rank above 1.
    pub rarity_weight: f64,
    /// Stock level at which stock pressure is neutral.
    pub stock_reference: f64,
    /// Weights for the hybrid sourcing blend.
    pub hybrid_regional_weight: f64,
    pub hybrid_global_weight: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketConfig {
    /// Smoothing depth for regional pressure; larger = slower price response.
    pub regional_depth: f64,
    pub global_depth: f64,
    /// Maximum fractional deviation of average_price from base_price.
    pub price_sensitivity: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DemandConfig {
    /// Units demanded per city per item per tick at the reference population.
    pub base_city_demand: f64,
    pub reference_population: f64,
    /// Floor for the resolved demand multiplier. Never negative.
    pub min_demand_multiplier: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub poll_interval_ms: u64,
    pub worker_threads: usize,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 0x5EED_0F_C0FFEE,
            base_tick_interval_secs: 60.0,
            tick_budget_ms: 250,
            pricing: PricingConfig::default(),
            market: MarketConfig::default(),
            demand: DemandConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            min_price_change_percent: -5.0,
            max_price_change_percent: 5.0,
            price_floor: 1.0,
            default_rarity_rank: 5,
            rarity_weight: 0.1,
            stock_reference: 50.0,
            hybrid_regional_weight: 0.7,
            hybrid_global_weight: 0.3,
        }
    }
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            regional_depth: 1000.0,
            global_depth: 5000.0,
            price_sensitivity: 0.5,
        }
    }
}

impl Default for DemandConfig {
    fn default() -> Self {
        Self {
            base_city_demand: 10.0,
            reference_population: 1000.0,
            min_demand_multiplier: 0.0,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 50,
            worker_threads: 4,
        }
    }
}

impl SimConfig {
    /// Load from a JSON file. Missing fields keep their defaults.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let config: SimConfig = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Cannot parse {path}: {e}"))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that would break price or interval invariants.
    pub fn validate(&self) -> anyhow::Result<()> {
        if !(self.base_tick_interval_secs > 0.0 && self.base_tick_interval_secs <= MAX_BASE_TICK_INTERVAL_SECS) {
            anyhow::bail!("base_tick_interval_secs must be in (0, {MAX_BASE_TICK_INTERVAL_SECS}]");
        }
        if self.pricing.min_price_change_percent > self.pricing.max_price_change_percent {
            anyhow::bail!("min_price_change_percent exceeds max_price_change_percent");
        }
        if self.pricing.min_price_change_percent <= -100.0 {
            anyhow::bail!("min_price_change_percent must be above -100");
        }
        if !(self.pricing.price_floor > 0.0) {
            anyhow::bail!("price_floor must be positive");
        }
        if self.demand.min_demand_multiplier < 0.0 {
            anyhow::bail!("min_demand_multiplier must not be negative");
        }
        if self.scheduler.worker_threads == 0 {
            anyhow::bail!("scheduler.worker_threads must be at least 1");
        }
        Ok(())
    }
}
