//! Simulation log events: the append-only audit trail.
//!
//! RULE: entries are written once and never updated or deleted.
//! RULE: the engine never reads these back to decide anything.

use crate::types::{CampaignId, ItemId, ShopId, Tick, Timestamp};
use serde::{Deserialize, Serialize};

/// Every event the engine records.
/// Variants are only ever appended.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SimEvent {
    Tick {
        shops_updated:    usize,
        items_updated:    usize,
        price_changes:    usize,
        units_produced:   f64,
        units_consumed:   i64,
        estimated_demand: f64,
        skipped_refs:     usize,
        upkeep_total:     f64,
        duration_ms:      u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        batch_id:         Option<String>,
    },
    Error {
        message:  String,
        category: String,
    },
    PriceChange {
        shop_id:   ShopId,
        item_id:   ItemId,
        old_price: f64,
        new_price: f64,
    },
    Purchase {
        shop_id: ShopId,
        item_id: ItemId,
        amount:  i64,
        revenue: f64,
    },
    Bankruptcy {
        shop_id:         ShopId,
        inventory_value: f64,
    },
    Maintenance {
        shop_id: ShopId,
        cost:    f64,
    },
    StateChange {
        from: String,
        to:   String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    Production {
        nodes_processed: usize,
        units_produced:  f64,
    },
    Transfer {
        source_shop:  ShopId,
        target_shop:  ShopId,
        item_id:      ItemId,
        amount:       i64,
        price:        f64,
        cross_region: bool,
    },
    ReferenceSkipped {
        step:   String,
        detail: String,
    },
}

impl SimEvent {
    /// Stable name stored in the event_type column.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Tick { .. }             => "tick",
            Self::Error { .. }            => "error",
            Self::PriceChange { .. }      => "price_change",
            Self::Purchase { .. }         => "purchase",
            Self::Bankruptcy { .. }       => "bankruptcy",
            Self::Maintenance { .. }      => "maintenance",
            Self::StateChange { .. }      => "state_change",
            Self::Production { .. }       => "production",
            Self::Transfer { .. }         => "transfer",
            Self::ReferenceSkipped { .. } => "reference_skipped",
        }
    }
}

/// A log entry as persisted. `details` is the JSON-serialized SimEvent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogEntry {
    pub id:          Option<i64>,
    pub campaign_id: CampaignId,
    pub tick_id:     Tick,
    pub event_type:  String,
    pub details:     String,
    pub timestamp:   Timestamp,
}

impl LogEntry {
    pub fn new(campaign_id: CampaignId, tick_id: Tick, event: &SimEvent, timestamp: Timestamp) -> serde_json::Result<Self> {
        Ok(Self {
            id: None,
            campaign_id,
            tick_id,
            event_type: event.event_type().to_string(),
            details: serde_json::to_string(event)?,
            timestamp,
        })
    }

    pub fn event(&self) -> serde_json::Result<SimEvent> {
        serde_json::from_str(&self.details)
    }
}
