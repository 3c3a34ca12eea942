//! Shared primitive types used across the entire simulation.

use chrono::{DateTime, Utc};

/// A simulation tick. One tick = one in-game hour.
pub type Tick = u64;

/// Campaign (simulated world) identifier. One clock per campaign.
pub type CampaignId = i64;

pub type ShopId = i64;
pub type ItemId = i64;
pub type CityId = i64;
pub type NodeId = i64;

/// Wall-clock timestamp. Always UTC.
pub type Timestamp = DateTime<Utc>;
