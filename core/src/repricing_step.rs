//! Repricing step: every inventory line of every active shop gets a new
//! dynamic price from the pricing engine.

use crate::{
    error::SimResult,
    event::SimEvent,
    market::MarketService,
    modifier::{resolve_demand_factor, ModifierContext},
    pricing::{PriceInputs, PricingEngine},
    step::{TickContext, TickStep},
    types::{ItemId, ShopId},
};

/// Differences below half a cent are rounding noise, not a price change.
const PRICE_EPSILON: f64 = 0.005;

pub struct RepricingStep;

impl TickStep for RepricingStep {
    fn name(&self) -> &'static str {
        "repricing"
    }

    fn run(&self, ctx: &mut TickContext<'_>) -> SimResult<()> {
        let pricing = PricingEngine::new(ctx.config);
        let market = MarketService::new(ctx.config);
        let shop_ids: Vec<ShopId> = ctx.world.shops.values().filter(|s| s.active).map(|s| s.id).collect();

        for shop_id in shop_ids {
            let city_id = ctx.world.shop_city(shop_id).map(|c| c.id);
            let region = city_id
                .and_then(|c| ctx.world.city_region(c))
                .map(str::to_string);

            let item_ids: Vec<ItemId> = ctx.world.lines_for_shop(shop_id).map(|l| l.item_id).collect();
            let mut repriced = 0usize;
            for item_id in item_ids {
                let Some(item) = ctx.world.items.get(&item_id).cloned() else {
                    ctx.skip_reference(self.name(), format!("shop {shop_id} prices missing item {item_id}"));
                    continue;
                };
                let Some(line) = ctx.world.inventory.get(&(shop_id, item_id)) else {
                    continue;
                };
                let scope = ModifierContext {
                    region: region.as_deref(),
                    city:   city_id,
                    shop:   Some(shop_id),
                    item:   Some(item_id),
                };
                let (regional_avg, global_avg) = market.averages(&ctx.world, item_id, city_id);
                let inputs = PriceInputs {
                    base_price:    item.base_price,
                    rarity:        &item.rarity,
                    stock:         line.stock,
                    demand_factor: resolve_demand_factor(&ctx.world.modifiers, ctx.now, &scope),
                    sourcing:      line.sourcing,
                    regional_avg,
                    global_avg,
                };
                let old_price = line.dynamic_price;
                let new_price = pricing.price(&inputs, &mut ctx.rng);

                if let Some(line) = ctx.world.inventory.get_mut(&(shop_id, item_id)) {
                    line.dynamic_price = new_price;
                }
                ctx.touch_line(shop_id, item_id);
                repriced += 1;
                if (new_price - old_price).abs() >= PRICE_EPSILON {
                    ctx.stats.price_changes += 1;
                    ctx.events.push(SimEvent::PriceChange {
                        shop_id,
                        item_id,
                        old_price,
                        new_price,
                    });
                }
            }

            if repriced > 0 {
                ctx.stats.shops_updated += 1;
                ctx.stats.items_updated += repriced;
            }
        }

        log::debug!(
            "tick={} repricing: {} lines across {} shops, {} changed",
            ctx.tick,
            ctx.stats.items_updated,
            ctx.stats.shops_updated,
            ctx.stats.price_changes
        );
        Ok(())
    }
}
