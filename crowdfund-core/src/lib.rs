//! Crowdfund Core
//!
//! Value-custody state machine for pooled-contribution campaigns.
//!
//! # Architecture
//!
//! - **Ledger**: Per-campaign contributor → amount record, insertion ordered
//! - **Registry**: Open campaigns keyed by the hash of their name
//! - **State machine**: initiate / contribute / cancel / process
//! - **Staged settlement**: External handoffs are staged and then committed or reverted

#![forbid(unsafe_code)]
//!
//! # Invariants
//!
//! - Custody conservation: held value == Σ(open ledgers) + Σ(in-flight refunds) + Σ(unclaimed refunds)
//! - Ledger entries are strictly positive and only grow while a campaign is open
//! - At most one open campaign per name hash
//! - A terminal transition retires the campaign before any value leaves custody

#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod types;
pub mod crypto;
pub mod ledger;
pub mod registry;
pub mod machine;
pub mod events;
pub mod clock;
pub mod error;
pub mod config;

// Re-exports
pub use error::{Error, Result};
pub use types::{
    Address, Amount, Campaign, CampaignId, CampaignParams, CampaignStatus, CrowdfundView,
    DeploymentPlan, RefundBatch, RefundOutcome,
};
pub use crypto::campaign_id;
pub use ledger::ContributionLedger;
pub use registry::CampaignRegistry;
pub use machine::CrowdfundStateMachine;
pub use events::Notification;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
