//! Notifications emitted by the state machine
//!
//! Notifications are observational only; nothing inside the engine consumes
//! them. Each carries the campaign name and maps to a dotted subject.

use crate::types::{Address, Amount};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    /// A campaign was initiated
    CampaignCreated {
        /// Campaign name
        name: String,
    },

    /// A contribution was recorded
    FundsAdded {
        /// Campaign name
        name: String,
        /// Contributor
        contributor: Address,
        /// Amount added by this call
        amount: Amount,
    },

    /// A campaign was cancelled and its refunds committed
    Cancelled {
        /// Campaign name
        name: String,
    },

    /// A campaign was processed into a new group
    Processed {
        /// Campaign name
        name: String,
        /// Address of the created group
        group: Address,
    },
}

impl Notification {
    /// Dotted subject for routing
    pub fn subject(&self) -> &'static str {
        match self {
            Notification::CampaignCreated { .. } => "crowdfund.campaign.created",
            Notification::FundsAdded { .. } => "crowdfund.funds.added",
            Notification::Cancelled { .. } => "crowdfund.campaign.cancelled",
            Notification::Processed { .. } => "crowdfund.campaign.processed",
        }
    }

    /// Campaign name the notification refers to
    pub fn name(&self) -> &str {
        match self {
            Notification::CampaignCreated { name }
            | Notification::FundsAdded { name, .. }
            | Notification::Cancelled { name }
            | Notification::Processed { name, .. } => name,
        }
    }

    /// JSON encoding
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notification::CampaignCreated { name } => write!(f, "NewCrowdfund({})", name),
            Notification::FundsAdded {
                name,
                contributor,
                amount,
            } => write!(f, "FundsAdded({}, {}, {})", name, contributor, amount),
            Notification::Cancelled { name } => write!(f, "Cancelled({})", name),
            Notification::Processed { name, group } => write!(f, "Processed({}, {})", name, group),
        }
    }
}
