//! Demand step: estimate what each city wants of each item this tick.
//!
//! estimate = base_city_demand × population weight × demand multiplier
//!
//! The estimate only lands in the in-memory per-city demand table. Market aggregates
//! see demand once it is realized by the consumption step.

use crate::{
    error::SimResult,
    modifier::{demand_multiplier, resolve_demand_factor, ModifierContext},
    step::{TickContext, TickStep},
};

pub struct DemandStep;

impl TickStep for DemandStep {
    fn name(&self) -> &'static str {
        "demand"
    }

    fn run(&self, ctx: &mut TickContext<'_>) -> SimResult<()> {
        let demand = &ctx.config.demand;
        let mut total = 0.0;

        for city in ctx.world.cities.values() {
            // Unknown population weighs like the reference city.
            let weight = match (city.population, demand.reference_population > 0.0) {
                (Some(pop), true) => pop as f64 / demand.reference_population,
                _ => 1.0,
            };
            for item in ctx.world.items.values() {
                let scope = ModifierContext {
                    region: city.region.as_deref(),
                    city:   Some(city.id),
                    shop:   None,
                    item:   Some(item.id),
                };
                let factor = resolve_demand_factor(&ctx.world.modifiers, ctx.now, &scope);
                let estimate = demand.base_city_demand
                    * weight
                    * demand_multiplier(factor, demand.min_demand_multiplier);
                if estimate.is_finite() && estimate > 0.0 {
                    ctx.city_demand.insert((city.id, item.id), estimate);
                    total += estimate;
                }
            }
        }

        ctx.stats.estimated_demand += total;
        log::debug!("tick={} demand: estimated {total:.2} units across {} pairs", ctx.tick, ctx.city_demand.len());
        Ok(())
    }
}
