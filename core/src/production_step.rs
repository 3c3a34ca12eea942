//! Production step: resource nodes add supply.
//!
//! Each node yields production_rate × quality units of its item into its
//! city's regional aggregate and the item's global aggregate, and leaves a
//! production record behind.

use crate::{
    error::SimResult,
    event::SimEvent,
    market::MarketService,
    repository::ProductionRecord,
    step::{TickContext, TickStep},
};

pub struct ProductionStep;

impl TickStep for ProductionStep {
    fn name(&self) -> &'static str {
        "production"
    }

    fn run(&self, ctx: &mut TickContext<'_>) -> SimResult<()> {
        let market = MarketService::new(ctx.config);
        let nodes = std::mem::take(&mut ctx.world.nodes);
        let mut processed = 0usize;
        let mut produced = 0.0;

        for node in &nodes {
            let item = match node.item_id.and_then(|id| ctx.world.items.get(&id)) {
                Some(item) => item.clone(),
                None => {
                    ctx.skip_reference(self.name(), format!("node {} references missing item {:?}", node.id, node.item_id));
                    continue;
                }
            };
            let Some(city_id) = node.city_id.filter(|id| ctx.world.cities.contains_key(id)) else {
                ctx.skip_reference(self.name(), format!("node {} references missing city {:?}", node.id, node.city_id));
                continue;
            };

            let amount = node.production_rate * node.quality;
            if !amount.is_finite() || amount <= 0.0 {
                log::debug!("tick={} production: node {} yields nothing", ctx.tick, node.id);
                continue;
            }

            market.update_regional_supply(&mut ctx.world.market, city_id, &item, amount, ctx.now);
            market.update_global_supply(&mut ctx.world.market, &item, amount, ctx.now);
            ctx.production.push(ProductionRecord {
                node_id:         node.id,
                tick:            ctx.tick,
                amount_produced: amount,
                quality:         node.quality,
                produced_at:     ctx.now,
            });
            processed += 1;
            produced += amount;
        }
        ctx.world.nodes = nodes;

        if processed > 0 {
            ctx.stats.units_produced += produced;
            ctx.events.push(SimEvent::Production {
                nodes_processed: processed,
                units_produced:  produced,
            });
            log::debug!("tick={} production: {processed} nodes produced {produced:.2} units", ctx.tick);
        }
        Ok(())
    }
}
