//! market-runner: headless driver for the campaign market simulation.
//!
//! Usage:
//!   market-runner --seed 12345 --ticks 48 --db market.db
//!   market-runner --campaign 2 --period week --config tuning.json
//!   market-runner --db market.db --ipc-mode
//!
//! In IPC mode each stdin line is a JSON control command
//! (`{"cmd":"set_speed","campaign_id":1,"speed":"5x"}`) and each stdout
//! line is the JSON response. `{"cmd":"quit"}` or EOF ends the session.
//! Running campaigns are ticked in the background while the session is open.

use anyhow::Result;
use marketsim_core::{
    command::{CommandResponse, ControlCommand},
    config::SimConfig,
    modifier::{DemandModifier, ModifierScope, ModifierTarget},
    scheduler::{NeverAutoPause, Scheduler},
    service::SimulationService,
    snapshot::{City, InventoryLine, Item, ResourceNode, Shop, ShopUpkeep, SourcingPreference},
    store::SimStore,
    types::CampaignId,
};
use std::env;
use std::io::{self, BufRead, Write};
use std::sync::Arc;

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let campaign_id = parse_arg(&args, "--campaign", 1 as CampaignId);
    let ticks = parse_arg(&args, "--ticks", 24u64);
    let ipc_mode = args.iter().any(|a| a == "--ipc-mode");
    let db = string_arg(&args, "--db");
    let period = string_arg(&args, "--period");

    let mut config = match string_arg(&args, "--config") {
        Some(path) => SimConfig::load(path)?,
        None => SimConfig::default(),
    };
    config.seed = parse_arg(&args, "--seed", config.seed);
    config.validate()?;

    if !ipc_mode {
        println!("market-runner");
        println!("  seed:      {}", config.seed);
        println!("  campaign:  {campaign_id}");
        match period {
            Some(p) => println!("  period:    {p}"),
            None => println!("  ticks:     {ticks}"),
        }
        println!("  db:        {}", db.unwrap_or(":memory:"));
        println!();
    }

    let store = SimStore::open_migrated(db)?;
    if store.inventory_lines(campaign_id)?.is_empty() {
        log::info!("campaign={campaign_id} has no world yet, seeding demo world");
        seed_demo_world(&store, campaign_id)?;
    }

    let service = Arc::new(SimulationService::new(store, config));

    if ipc_mode {
        let scheduler = Scheduler::start(Arc::clone(&service), Arc::new(NeverAutoPause))?;
        let outcome = run_ipc_loop(&service);
        scheduler.stop();
        outcome?;
    } else {
        run_batch(&service, campaign_id, period, ticks)?;
        print_summary(&service, campaign_id)?;
    }

    Ok(())
}

fn run_batch(
    service: &SimulationService<SimStore>,
    campaign_id: CampaignId,
    period: Option<&str>,
    ticks: u64,
) -> Result<()> {
    if let Some(period) = period {
        let summary = service.run_time_period(campaign_id, period)?;
        println!(
            "period {}: {}/{} ticks, {} price changes, {}ms (batch {})",
            summary.period,
            summary.ticks_completed,
            summary.ticks_requested,
            summary.price_changes,
            summary.duration_ms,
            summary.batch_id
        );
        if let Some(err) = &summary.error {
            println!("  stopped early: {err}");
        }
        return Ok(());
    }

    for _ in 0..ticks {
        let report = service.run_manual_tick(campaign_id)?;
        log::debug!(
            "tick={} shops={} items={} price_changes={}",
            report.tick,
            report.shops_updated,
            report.items_updated,
            report.price_changes
        );
    }
    Ok(())
}

fn run_ipc_loop(service: &SimulationService<SimStore>) -> Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut handle = stdin.lock();
    let mut buffer = String::new();

    loop {
        buffer.clear();
        let bytes_read = handle.read_line(&mut buffer)?;
        if bytes_read == 0 {
            break; // EOF
        }
        if buffer.trim().is_empty() {
            continue;
        }

        let raw: serde_json::Value = match serde_json::from_str(&buffer) {
            Ok(v) => v,
            Err(e) => {
                write_error(&mut stdout, &e.to_string())?;
                continue;
            }
        };
        if raw["cmd"] == "quit" {
            break;
        }

        let response = match serde_json::from_value::<ControlCommand>(raw) {
            Ok(command) => service.execute(command),
            Err(e) => {
                write_error(&mut stdout, &e.to_string())?;
                continue;
            }
        };
        writeln!(stdout, "{}", serde_json::to_string(&response)?)?;
        stdout.flush()?;
    }
    Ok(())
}

fn write_error(out: &mut impl Write, message: &str) -> Result<()> {
    let response = CommandResponse {
        ok:       false,
        message:  message.to_string(),
        category: Some("validation".into()),
        data:     serde_json::Value::Null,
    };
    writeln!(out, "{}", serde_json::to_string(&response)?)?;
    out.flush()?;
    Ok(())
}

fn print_summary(service: &SimulationService<SimStore>, campaign_id: CampaignId) -> Result<()> {
    let status = service.get_status(campaign_id)?;
    let store = service.repository();

    println!("=== RUN SUMMARY ===");
    println!("  campaign:        {campaign_id}");
    println!("  state:           {} ({})", status.state, status.speed);
    println!("  final tick:      {}", status.current_tick);
    println!("  avg tick:        {:.1}ms", status.performance.avg_tick_ms);
    println!("  budget overruns: {}", status.performance.budget_overruns);
    println!("  production runs: {}", store.production_count(campaign_id)?);
    println!("  realized demand: {:.0}", store.total_regional_demand(campaign_id)?);

    println!();
    println!("=== SHELVES ===");
    for line in store.inventory_lines(campaign_id)? {
        println!(
            "  shop {:>3} | item {:>3} | stock {:>5} | price {:>8.2} | {}",
            line.shop_id,
            line.item_id,
            line.stock,
            line.dynamic_price,
            line.sourcing.as_str()
        );
    }
    Ok(())
}

/// A small two-region world so a fresh database has something to trade.
/// Entity ids are global, so each campaign seeds its own id block.
fn seed_demo_world(store: &SimStore, campaign_id: CampaignId) -> Result<()> {
    let base = campaign_id * 100;
    let items = [
        Item { id: base + 1, name: "Hempen rope".into(), base_price: 2.0, rarity: "common".into() },
        Item { id: base + 2, name: "Potion of healing".into(), base_price: 50.0, rarity: "uncommon".into() },
        Item { id: base + 3, name: "Longsword".into(), base_price: 15.0, rarity: "common".into() },
        Item { id: base + 4, name: "Spell scroll".into(), base_price: 300.0, rarity: "rare".into() },
    ];
    for item in &items {
        store.insert_item(campaign_id, item)?;
    }

    let cities = [
        City { id: base + 1, name: "Neverwinter".into(), region: Some("Sword Coast North".into()), population: Some(23_000) },
        City { id: base + 2, name: "Luskan".into(), region: Some("Sword Coast North".into()), population: Some(14_000) },
        City { id: base + 3, name: "Baldur's Gate".into(), region: Some("Western Heartlands".into()), population: Some(42_000) },
    ];
    for city in &cities {
        store.insert_city(campaign_id, city)?;
    }

    let shops = [
        (1, "The Driftwood Tavern", 1, SourcingPreference::Regional),
        (2, "Ship of the Ten Towns", 2, SourcingPreference::Hybrid),
        (3, "Sorcerous Sundries", 3, SourcingPreference::Global),
        (4, "Felogyr's Fireworks", 3, SourcingPreference::Hybrid),
    ];
    for (id, name, city_id, sourcing) in shops {
        let (id, city_id) = (base + id, base + city_id);
        store.insert_shop(campaign_id, &Shop { id, name: name.into(), city_id: Some(city_id), active: true })?;
        for item in &items {
            store.upsert_inventory(&InventoryLine {
                shop_id: id,
                item_id: item.id,
                stock: 100,
                dynamic_price: item.base_price,
                sourcing,
            })?;
        }
        store.insert_upkeep(&ShopUpkeep { shop_id: id, daily_cost: 12.0 })?;
    }

    store.insert_resource_node(campaign_id, &ResourceNode {
        id: base + 1,
        name: "Neverwinter Wood".into(),
        item_id: Some(base + 1),
        city_id: Some(base + 1),
        production_rate: 8.0,
        quality: 0.75,
    })?;
    store.insert_resource_node(campaign_id, &ResourceNode {
        id: base + 2,
        name: "Steel Watch Foundry".into(),
        item_id: Some(base + 3),
        city_id: Some(base + 3),
        production_rate: 3.0,
        quality: 1.0,
    })?;

    store.insert_modifier(campaign_id, &DemandModifier {
        id: base + 1,
        name: "Orc raids along the High Road".into(),
        scope: ModifierScope::Regional,
        effect_value: 0.25,
        start_date: None,
        end_date: None,
        is_active: true,
        targets: vec![ModifierTarget::Region("Sword Coast North".into())],
    })?;
    Ok(())
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}

fn string_arg<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2).find(|w| w[0] == flag).map(|w| w[1].as_str())
}
