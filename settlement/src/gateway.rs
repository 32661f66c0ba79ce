//! Settlement gateway
//!
//! Boundary adapter between the state machine and the outside world. Two
//! collaborators sit behind it:
//!
//! - [`GroupFactory`]: creates the governed group and takes the pooled value
//!   as its treasury, in one atomic call
//! - [`ValueTransfer`]: sends value to a single recipient
//!
//! Either may fail, and either may call back into the engine while it runs.

use async_trait::async_trait;
use crowdfund_core::{Address, Amount, DeploymentPlan, RefundOutcome};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Collaborator failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// Recipient refused or could not receive the transfer
    #[error("Transfer rejected: {0}")]
    TransferRejected(String),

    /// Factory reverted the deployment; no value moved
    #[error("Deployment reverted: {0}")]
    DeploymentReverted(String),

    /// Collaborator not reachable
    #[error("Collaborator unavailable: {0}")]
    Unavailable(String),
}

/// Deployment collaborator
#[async_trait]
pub trait GroupFactory: Send + Sync {
    /// Deploy a group for `plan`, funded with `plan.treasury`
    ///
    /// Must either deploy and take the treasury, or fail with no effect.
    async fn deploy_group(&self, plan: &DeploymentPlan) -> Result<Address, GatewayError>;
}

/// Outbound value transfer primitive
#[async_trait]
pub trait ValueTransfer: Send + Sync {
    /// Send `amount` to `to`
    async fn transfer(&self, to: &Address, amount: Amount) -> Result<(), GatewayError>;
}

/// Gateway used by the engine for every outbound value movement
#[derive(Clone)]
pub struct SettlementGateway {
    factory: Arc<dyn GroupFactory>,
    transfers: Arc<dyn ValueTransfer>,
}

impl SettlementGateway {
    /// Create gateway from its collaborators
    pub fn new(factory: Arc<dyn GroupFactory>, transfers: Arc<dyn ValueTransfer>) -> Self {
        Self { factory, transfers }
    }

    /// Deploy the group described by `plan`, forwarding its treasury
    ///
    /// Called exactly once per `process` attempt. The factory runs in its own
    /// task; a panic or abort there is reported as `Unavailable`.
    pub async fn deploy(&self, plan: &DeploymentPlan) -> Result<Address, GatewayError> {
        tracing::info!(
            campaign = %plan.campaign_id,
            target = %plan.target,
            members = plan.members.len(),
            treasury = plan.treasury,
            "Deploying group"
        );

        let factory = self.factory.clone();
        let owned = plan.clone();
        let result = tokio::spawn(async move { factory.deploy_group(&owned).await })
            .await
            .unwrap_or_else(|e| {
                Err(GatewayError::Unavailable(format!(
                    "deployment task failed: {}",
                    e
                )))
            });

        match result {
            Ok(group) => {
                tracing::info!(campaign = %plan.campaign_id, group = %group, "Group deployed");
                Ok(group)
            }
            Err(e) => {
                tracing::warn!(campaign = %plan.campaign_id, error = %e, "Group deployment failed");
                Err(e)
            }
        }
    }

    /// Send a single refund
    ///
    /// The transfer runs in its own task; a panic or abort there counts as a
    /// failed refund.
    pub async fn refund(&self, contributor: &Address, amount: Amount) -> RefundOutcome {
        let transfers = self.transfers.clone();
        let to = contributor.clone();
        let result = tokio::spawn(async move { transfers.transfer(&to, amount).await })
            .await
            .unwrap_or_else(|e| {
                Err(GatewayError::Unavailable(format!(
                    "refund task failed: {}",
                    e
                )))
            });

        match result {
            Ok(()) => RefundOutcome::succeeded(contributor.clone(), amount),
            Err(e) => {
                tracing::warn!(contributor = %contributor, amount, error = %e, "Refund transfer failed");
                RefundOutcome::failed(contributor.clone(), amount, e.to_string())
            }
        }
    }

    /// Refund every entry in order, continuing past failures
    pub async fn refund_all(&self, entries: &[(Address, Amount)]) -> Vec<RefundOutcome> {
        let mut outcomes = Vec::with_capacity(entries.len());
        for (contributor, amount) in entries {
            outcomes.push(self.refund(contributor, *amount).await);
        }
        outcomes
    }
}

impl fmt::Debug for SettlementGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SettlementGateway").finish_non_exhaustive()
    }
}
