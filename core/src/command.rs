//! Control commands accepted from an outer surface (IPC, HTTP adapter,
//! admin console) and the uniform response they produce.

use crate::{
    error::{SimError, SimResult},
    repository::EconomyRepository,
    service::SimulationService,
    types::{CampaignId, ItemId, ShopId},
};
use serde::{Deserialize, Serialize};

const DEFAULT_LOG_LIMIT: usize = 50;

/// Every control command.
/// Variants are only ever appended.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum ControlCommand {
    SetSpeed {
        campaign_id: CampaignId,
        speed:       String,
    },
    ManualTick {
        campaign_id: CampaignId,
    },
    RunPeriod {
        campaign_id: CampaignId,
        period:      String,
    },
    Resume {
        campaign_id: CampaignId,
    },
    Status {
        campaign_id: CampaignId,
    },
    Logs {
        campaign_id: CampaignId,
        #[serde(default)]
        limit:       Option<usize>,
    },
    Sources {
        campaign_id: CampaignId,
        shop_id:     ShopId,
        item_id:     ItemId,
        amount:      i64,
    },
    Transfer {
        campaign_id: CampaignId,
        target_shop: ShopId,
        item_id:     ItemId,
        amount:      i64,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandResponse {
    pub ok:       bool,
    pub message:  String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default)]
    pub data:     serde_json::Value,
}

impl CommandResponse {
    pub fn success(message: impl Into<String>, data: serde_json::Value) -> Self {
        Self { ok: true, message: message.into(), category: None, data }
    }

    pub fn failure(err: &SimError) -> Self {
        Self {
            ok:       false,
            message:  err.to_string(),
            category: Some(err.category().as_str().to_string()),
            data:     serde_json::Value::Null,
        }
    }
}

impl<R: EconomyRepository> SimulationService<R> {
    /// Run one command. Never panics and never returns Err: failures
    /// become `ok: false` responses carrying the error category.
    pub fn execute(&self, command: ControlCommand) -> CommandResponse {
        match self.dispatch(command) {
            Ok(response) => response,
            Err(err) => {
                log::warn!("command rejected: {err}");
                CommandResponse::failure(&err)
            }
        }
    }

    fn dispatch(&self, command: ControlCommand) -> SimResult<CommandResponse> {
        let response = match command {
            ControlCommand::SetSpeed { campaign_id, speed } => {
                let status = self.set_speed(campaign_id, &speed)?;
                CommandResponse::success(
                    format!("campaign {campaign_id} speed set to {}", status.speed),
                    serde_json::to_value(status)?,
                )
            }
            ControlCommand::ManualTick { campaign_id } => {
                let report = self.run_manual_tick(campaign_id)?;
                CommandResponse::success(
                    format!("tick {} processed", report.tick),
                    serde_json::to_value(report)?,
                )
            }
            ControlCommand::RunPeriod { campaign_id, period } => {
                let summary = self.run_time_period(campaign_id, &period)?;
                let message = match &summary.error {
                    None => format!("{} ticks processed", summary.ticks_completed),
                    Some(err) => format!(
                        "stopped after {} of {} ticks: {err}",
                        summary.ticks_completed, summary.ticks_requested
                    ),
                };
                CommandResponse {
                    ok:       summary.error.is_none(),
                    message,
                    category: summary.error_category.clone(),
                    data:     serde_json::to_value(summary)?,
                }
            }
            ControlCommand::Resume { campaign_id } => {
                let status = self.resume(campaign_id)?;
                CommandResponse::success(
                    format!("campaign {campaign_id} resumed"),
                    serde_json::to_value(status)?,
                )
            }
            ControlCommand::Status { campaign_id } => {
                let status = self.get_status(campaign_id)?;
                CommandResponse::success(
                    format!("campaign {campaign_id} is {}", status.state),
                    serde_json::to_value(status)?,
                )
            }
            ControlCommand::Logs { campaign_id, limit } => {
                let logs = self.get_recent_logs(campaign_id, limit.unwrap_or(DEFAULT_LOG_LIMIT))?;
                CommandResponse::success(format!("{} entries", logs.len()), serde_json::to_value(logs)?)
            }
            ControlCommand::Sources { campaign_id, shop_id, item_id, amount } => {
                let sources = self.find_item_sources(campaign_id, shop_id, item_id, amount)?;
                CommandResponse::success(format!("{} sources", sources.len()), serde_json::to_value(sources)?)
            }
            ControlCommand::Transfer { campaign_id, target_shop, item_id, amount } => {
                let report = self.transfer_stock(campaign_id, target_shop, item_id, amount)?;
                CommandResponse::success(
                    format!("{} of {} units transferred", report.transferred, report.requested),
                    serde_json::to_value(report)?,
                )
            }
        };
        Ok(response)
    }
}
