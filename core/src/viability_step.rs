//! Viability step: flag shops whose inventory is worth nothing.

use crate::{
    error::SimResult,
    event::SimEvent,
    step::{TickContext, TickStep},
};

pub struct ViabilityStep;

impl TickStep for ViabilityStep {
    fn name(&self) -> &'static str {
        "viability"
    }

    fn run(&self, ctx: &mut TickContext<'_>) -> SimResult<()> {
        let mut bankrupt = Vec::new();
        for shop in ctx.world.shops.values().filter(|s| s.active) {
            let value: f64 = ctx
                .world
                .lines_for_shop(shop.id)
                .map(|l| l.stock as f64 * l.dynamic_price)
                .sum();
            if value <= 0.0 {
                bankrupt.push((shop.id, value));
            }
        }

        for (shop_id, inventory_value) in bankrupt {
            log::info!("tick={} viability: shop {shop_id} inventory value {inventory_value:.2}", ctx.tick);
            ctx.events.push(SimEvent::Bankruptcy { shop_id, inventory_value });
        }
        Ok(())
    }
}
