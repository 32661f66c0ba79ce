//! Core types for the crowdfund engine
//!
//! All types are designed for:
//! - Exact arithmetic (integer base units, checked)
//! - Deterministic identifiers (hash of the campaign name)
//! - Serde round-tripping for notifications and replay scripts

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Value-asset amount in base units
pub type Amount = u128;

/// Participant or contract handle
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address(String);

impl Address {
    /// Create new address
    pub fn new(addr: impl Into<String>) -> Self {
        Self(addr.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Address {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Campaign identifier: SHA-256 of the campaign name
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CampaignId([u8; 32]);

impl CampaignId {
    /// Create from raw digest bytes
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Parse from a 64-character hex string
    pub fn from_hex(s: &str) -> Option<Self> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes).ok()?;
        Some(Self(bytes))
    }

    /// Lowercase hex encoding
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for CampaignId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for CampaignId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CampaignId({})", &self.to_hex()[..16])
    }
}

/// Parameters supplied when a campaign is initiated
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignParams {
    /// Deployment collaborator invoked on success
    pub target: Address,

    /// Value-asset units per membership share
    pub unit_price: Amount,

    /// Cancellation becomes possible at this instant
    pub deadline: DateTime<Utc>,

    /// Human-readable group name (hashed into the campaign id)
    pub name: String,

    /// Short symbol for the group to be created
    pub symbol: String,

    /// Opaque deployment instructions, forwarded verbatim
    #[serde(default)]
    pub payload: Vec<u8>,
}

/// Lifecycle status of an open campaign
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CampaignStatus {
    /// Accepting contributions
    Open,
    /// Waiting on the external deployment started by `process`
    Settling,
}

/// Open campaign record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Campaign {
    /// Hash of `params.name`
    pub id: CampaignId,

    /// Immutable creation parameters
    pub params: CampaignParams,

    /// Current status
    pub status: CampaignStatus,

    /// Address that initiated the campaign
    pub initiator: Address,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl Campaign {
    /// Campaign name
    pub fn name(&self) -> &str {
        &self.params.name
    }

    /// Whether the deadline has been reached at `now`
    pub fn deadline_reached(&self, now: DateTime<Utc>) -> bool {
        now >= self.params.deadline
    }
}

/// Snapshot returned by `get_crowdfund`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrowdfundView {
    /// Campaign id
    pub id: CampaignId,

    /// Stored parameters
    pub details: CampaignParams,

    /// Current status
    pub status: CampaignStatus,

    /// Contributors in first-contribution order
    pub contributors: Vec<Address>,

    /// Contributions, index-aligned with `contributors`
    pub contributions: Vec<Amount>,
}

impl CrowdfundView {
    /// Sum of all contributions
    pub fn total(&self) -> Amount {
        self.contributions.iter().sum()
    }
}

/// Everything the deployment collaborator needs to create the group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentPlan {
    /// Campaign being processed
    pub campaign_id: CampaignId,

    /// Deployment collaborator
    pub target: Address,

    /// Group name
    pub name: String,

    /// Group symbol
    pub symbol: String,

    /// Opaque deployment payload
    pub payload: Vec<u8>,

    /// Members in contribution order
    pub members: Vec<Address>,

    /// Share counts, index-aligned with `members`
    pub shares: Vec<u128>,

    /// Full pooled value, forwarded as the group treasury
    pub treasury: Amount,
}

impl DeploymentPlan {
    /// Total shares minted
    pub fn total_shares(&self) -> u128 {
        self.shares.iter().sum()
    }
}

/// Refunds committed by a terminal transition, awaiting disbursement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundBatch {
    /// Batch identifier
    pub batch_id: Uuid,

    /// Originating campaign (None for unclaimed-refund retries)
    pub campaign_id: Option<CampaignId>,

    /// Campaign name, or empty for retries
    pub name: String,

    /// Refunds in disbursement order
    pub entries: Vec<(Address, Amount)>,
}

impl RefundBatch {
    /// Total value in the batch
    pub fn total(&self) -> Amount {
        self.entries.iter().map(|(_, amount)| *amount).sum()
    }
}

/// Result of one outbound refund transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundOutcome {
    /// Recipient
    pub contributor: Address,

    /// Amount attempted
    pub amount: Amount,

    /// Failure reason, None on success
    pub error: Option<String>,
}

impl RefundOutcome {
    /// Successful transfer
    pub fn succeeded(contributor: Address, amount: Amount) -> Self {
        Self {
            contributor,
            amount,
            error: None,
        }
    }

    /// Failed transfer
    pub fn failed(contributor: Address, amount: Amount, reason: impl Into<String>) -> Self {
        Self {
            contributor,
            amount,
            error: Some(reason.into()),
        }
    }

    /// Whether the transfer went through
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}
