//! Maintenance step: record each active shop's upkeep cost.

use crate::{
    error::SimResult,
    event::SimEvent,
    step::{TickContext, TickStep},
};

pub struct MaintenanceStep;

impl TickStep for MaintenanceStep {
    fn name(&self) -> &'static str {
        "maintenance"
    }

    fn run(&self, ctx: &mut TickContext<'_>) -> SimResult<()> {
        let upkeep = std::mem::take(&mut ctx.world.upkeep);
        for row in &upkeep {
            if !ctx.world.shops.get(&row.shop_id).is_some_and(|s| s.active) {
                ctx.skip_reference(self.name(), format!("upkeep for missing shop {}", row.shop_id));
                continue;
            }
            ctx.stats.upkeep_total += row.daily_cost;
            ctx.events.push(SimEvent::Maintenance {
                shop_id: row.shop_id,
                cost:    row.daily_cost,
            });
        }
        ctx.world.upkeep = upkeep;
        Ok(())
    }
}
