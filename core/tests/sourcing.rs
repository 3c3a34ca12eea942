//! Cross-shop sourcing and stock transfers through the service.

mod common;

use common::{seeded_service, ManualTime, CAMPAIGN};
use marketsim_core::{
    error::SimError,
    market::SourceAllocation,
    snapshot::{InventoryLine, SourcingPreference},
};

fn set_stock(service: &marketsim_core::service::SimulationService<marketsim_core::store::SimStore>, shop: i64, item: i64, stock: i64) {
    let store = service.repository();
    let mut line = store.inventory_line(shop, item).unwrap().unwrap_or(InventoryLine {
        shop_id: shop,
        item_id: item,
        stock: 0,
        dynamic_price: 10.0,
        sourcing: SourcingPreference::Hybrid,
    });
    line.stock = stock;
    store.upsert_inventory(&line).unwrap();
}

#[test]
fn same_region_shops_are_drained_first() {
    let time = ManualTime::new(common::t0());
    let service = seeded_service(&time);
    set_stock(&service, 11, 2, 5);
    set_stock(&service, 12, 2, 7);
    set_stock(&service, 13, 2, 9);

    let sources = service.find_item_sources(CAMPAIGN, 10, 2, 15).unwrap();
    assert_eq!(sources, vec![
        SourceAllocation { shop_id: 11, amount: 5 },
        SourceAllocation { shop_id: 12, amount: 7 },
        SourceAllocation { shop_id: 13, amount: 3 },
    ]);
    // Read-only.
    assert_eq!(service.repository().inventory_line(11, 2).unwrap().unwrap().stock, 5);
}

#[test]
fn sources_never_exceed_request() {
    let time = ManualTime::new(common::t0());
    let service = seeded_service(&time);
    for amount in [1, 399, 400, 401, 5000] {
        let total: i64 = service
            .find_item_sources(CAMPAIGN, 10, 1, amount)
            .unwrap()
            .iter()
            .map(|s| s.amount)
            .sum();
        assert!(total <= amount, "amount={amount} total={total}");
    }
    assert!(matches!(
        service.find_item_sources(CAMPAIGN, 10, 1, 0),
        Err(SimError::InvalidAmount { amount: 0, .. })
    ));
    assert!(matches!(
        service.find_item_sources(CAMPAIGN, 99, 1, 3),
        Err(SimError::MissingReference { entity: "shop", id: 99, .. })
    ));
}

#[test]
fn transfer_moves_stock_and_logs_each_leg() {
    let time = ManualTime::new(common::t0());
    let service = seeded_service(&time);
    set_stock(&service, 11, 2, 5);
    set_stock(&service, 10, 2, 0);

    let report = service.transfer_stock(CAMPAIGN, 10, 2, 20).unwrap();
    assert_eq!(report.transferred, 20);
    assert_eq!(report.legs.len(), 2);
    assert!(!report.legs[0].cross_region);
    assert!(report.legs[1].cross_region);

    let store = service.repository();
    let target = store.inventory_line(10, 2).unwrap().unwrap();
    assert_eq!(target.stock, 20);
    assert!(target.dynamic_price >= service.config().pricing.price_floor);
    assert_eq!(store.inventory_line(11, 2).unwrap().unwrap().stock, 0);
    assert_eq!(store.inventory_line(12, 2).unwrap().unwrap().stock, 385);

    // Neverwinter saw 20 units of realized demand; only the cross-region leg
    // reached the global book.
    assert_eq!(store.regional_aggregate(1, 2).unwrap().unwrap().total_demand, 20.0);
    assert_eq!(store.global_aggregate(2).unwrap().unwrap().total_demand, 15.0);
    assert_eq!(store.log_count_of_type(CAMPAIGN, "transfer").unwrap(), 2);
}

#[test]
fn transfer_with_no_stock_anywhere_fails_cleanly() {
    let time = ManualTime::new(common::t0());
    let service = seeded_service(&time);
    for shop in [11, 12, 13] {
        set_stock(&service, shop, 3, 0);
    }

    let err = service.transfer_stock(CAMPAIGN, 10, 3, 4).unwrap_err();
    assert!(matches!(err, SimError::InsufficientStock { available: 0, requested: 4, .. }));
    assert_eq!(service.repository().inventory_line(10, 3).unwrap().unwrap().stock, 400);
    assert_eq!(service.repository().log_count(CAMPAIGN).unwrap(), 0);
}
