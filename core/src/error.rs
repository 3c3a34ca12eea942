use crate::types::{CampaignId, ItemId, ShopId};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SimError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // ── Validation ─────────────────────────────────
    #[error("Invalid speed setting: {0}")]
    InvalidSpeed(String),

    #[error("Invalid time period: {0}")]
    InvalidPeriod(String),

    #[error("Invalid amount {amount}: {reason}")]
    InvalidAmount { amount: i64, reason: String },

    // ── Reference ──────────────────────────────────
    #[error("Missing {entity} {id} referenced by {referrer}")]
    MissingReference {
        entity:   &'static str,
        id:       i64,
        referrer: String,
    },

    // ── Processing ─────────────────────────────────
    #[error("Insufficient stock in shop {shop_id} for item {item_id}: have {available}, need {requested}")]
    InsufficientStock {
        shop_id:   ShopId,
        item_id:   ItemId,
        available: i64,
        requested: i64,
    },

    #[error("Campaign {campaign_id}: cannot apply {event} while {state}")]
    InvalidTransition {
        campaign_id: CampaignId,
        state:       String,
        event:       String,
    },

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    // ── Concurrency ────────────────────────────────
    #[error("A tick is already in progress for campaign {0}")]
    TickInProgress(CampaignId),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// The four failure classes the response layer distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Validation,
    Reference,
    Processing,
    Concurrency,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation  => "validation",
            Self::Reference   => "reference",
            Self::Processing  => "processing",
            Self::Concurrency => "concurrency",
        }
    }
}

impl SimError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidSpeed(_)
            | Self::InvalidPeriod(_)
            | Self::InvalidAmount { .. }
            | Self::InsufficientStock { .. }
            | Self::InvalidTransition { .. } => ErrorCategory::Validation,
            Self::MissingReference { .. } => ErrorCategory::Reference,
            Self::TickInProgress(_) => ErrorCategory::Concurrency,
            Self::Database(_)
            | Self::Serialization(_)
            | Self::StoreUnavailable(_)
            | Self::Other(_) => ErrorCategory::Processing,
        }
    }
}

pub type SimResult<T> = Result<T, SimError>;
