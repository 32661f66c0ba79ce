//! Error types for the crowdfund state machine

use crate::types::{Address, CampaignId};
use thiserror::Error;

/// Result type for crowdfund operations
pub type Result<T> = std::result::Result<T, Error>;

/// Crowdfund errors
///
/// Every variant except [`Error::InvariantViolation`] is a rejected
/// precondition: the operation made no state change and may be retried once
/// the precondition holds.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// An open campaign already exists under this name hash
    #[error("Duplicate campaign: {0}")]
    DuplicateCampaign(CampaignId),

    /// No open campaign under this name hash
    #[error("No such campaign: {0}")]
    NoSuchCampaign(CampaignId),

    /// Cancel attempted before the deadline
    #[error("Fund still open: campaign {0} has not reached its deadline")]
    OpenFund(CampaignId),

    /// A new contributor tried to join after the deadline
    #[error("Deadline passed: campaign {0} no longer accepts new contributors")]
    DeadlinePassed(CampaignId),

    /// A new contributor would exceed the member limit
    #[error("Capacity exceeded: campaign {campaign} already has {limit} contributors")]
    CapacityExceeded {
        /// Campaign that is full
        campaign: CampaignId,
        /// Configured member limit
        limit: usize,
    },

    /// Campaign is waiting on an external deployment
    #[error("Transition in progress for campaign {0}")]
    TransitionInProgress(CampaignId),

    /// The deployment collaborator rejected or failed the handoff
    #[error("Deployment failed: {0}")]
    DeploymentFailed(String),

    /// Contribution of zero value
    #[error("Contribution must be positive")]
    ZeroContribution,

    /// Invalid campaign parameters
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    /// No unclaimed refund is owed to this contributor
    #[error("Nothing to refund for {0}")]
    NothingToRefund(Address),

    /// Checked arithmetic overflowed
    #[error("Amount overflow")]
    AmountOverflow,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Accounting invariant violation (custody conservation, etc.)
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),
}

impl Error {
    /// Whether the error leaves the engine in a consistent, retryable state
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Error::InvariantViolation(_))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Config(err.to_string())
    }
}
