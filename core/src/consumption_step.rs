//! Consumption step: NPC buyers empty shop shelves.
//!
//! Every line with stock sells min(city demand, stock) whole units. The
//! city's estimate is the same for each of its shops; a sale in one shop
//! does not reduce what the next one sells. Each purchase raises the
//! regional and global demand totals by the units sold.

use crate::{
    error::SimResult,
    event::SimEvent,
    market::MarketService,
    step::{TickContext, TickStep},
    types::{ItemId, ShopId},
};

pub struct ConsumptionStep;

impl TickStep for ConsumptionStep {
    fn name(&self) -> &'static str {
        "consumption"
    }

    fn run(&self, ctx: &mut TickContext<'_>) -> SimResult<()> {
        let market = MarketService::new(ctx.config);
        let shop_ids: Vec<ShopId> = ctx.world.shops.values().filter(|s| s.active).map(|s| s.id).collect();

        for shop_id in shop_ids {
            let Some(city_ref) = ctx.world.shops.get(&shop_id).and_then(|s| s.city_id) else {
                continue;
            };
            if !ctx.world.cities.contains_key(&city_ref) {
                ctx.skip_reference(self.name(), format!("shop {shop_id} references missing city {city_ref}"));
                continue;
            }

            let item_ids: Vec<ItemId> = ctx.world.lines_for_shop(shop_id).map(|l| l.item_id).collect();
            for item_id in item_ids {
                let Some(item) = ctx.world.items.get(&item_id).cloned() else {
                    ctx.skip_reference(self.name(), format!("shop {shop_id} stocks missing item {item_id}"));
                    continue;
                };
                let Some(demand) = ctx.city_demand.get(&(city_ref, item_id)).copied() else {
                    continue;
                };
                let Some(line) = ctx.world.inventory.get_mut(&(shop_id, item_id)) else {
                    continue;
                };

                let wanted = demand.floor() as i64;
                let bought = wanted.min(line.stock);
                if bought <= 0 {
                    continue;
                }
                line.stock -= bought;
                let revenue = bought as f64 * line.dynamic_price;

                market.update_regional_demand(&mut ctx.world.market, city_ref, &item, bought as f64, ctx.now);
                market.update_global_demand(&mut ctx.world.market, &item, bought as f64, ctx.now);
                ctx.touch_line(shop_id, item_id);
                ctx.stats.units_consumed += bought;
                ctx.events.push(SimEvent::Purchase {
                    shop_id,
                    item_id,
                    amount: bought,
                    revenue,
                });
            }
        }

        log::debug!("tick={} consumption: {} units sold", ctx.tick, ctx.stats.units_consumed);
        Ok(())
    }
}
