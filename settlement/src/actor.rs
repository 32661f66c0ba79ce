//! Actor-based concurrency for the crowdfund engine
//!
//! One task owns the [`CrowdfundStateMachine`]. Callers talk to it through a
//! cloneable [`CrowdfundHandle`]; every operation is a message and is applied
//! in mailbox order.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │             CrowdfundHandle (Clone)                   │
//! │         Sends messages to actor mailbox               │
//! └─────────────────────┬────────────────────────────────┘
//!                       │ mpsc::channel (bounded)
//!                       ▼
//! ┌──────────────────────────────────────────────────────┐
//! │            CrowdfundActor (Single Task)               │
//! │  stage transition ──▶ spawn gateway call ─┐           │
//! │  commit / revert  ◀── loopback message ◀──┘           │
//! └─────────────────────┬────────────────────────────────┘
//!                       │ broadcast::channel
//!                       ▼
//!                 Notification subscribers
//! ```
//!
//! The actor never awaits a collaborator. Deployments and refund transfers
//! run in spawned tasks that report back through the mailbox, so a
//! collaborator calling into the engine mid-transfer is queued and served
//! against the already-staged state instead of deadlocking. The gateway
//! isolates each collaborator call, so a panicking collaborator still
//! produces a completion message.

use crate::gateway::{GatewayError, SettlementGateway};
use crate::metrics::Metrics;
use crate::{Error, Result};
use crowdfund_core::{
    Address, Amount, CampaignId, CampaignParams, Clock, CrowdfundStateMachine, CrowdfundView,
    Notification, RefundBatch, RefundOutcome,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

/// Message sent to the crowdfund actor
#[derive(Debug)]
pub enum CrowdfundMessage {
    /// Open a campaign
    Initiate {
        caller: Address,
        params: CampaignParams,
        deposit: Amount,
        response: oneshot::Sender<Result<CampaignId>>,
    },

    /// Contribute to an open campaign
    Contribute {
        caller: Address,
        campaign_id: CampaignId,
        amount: Amount,
        response: oneshot::Sender<Result<Amount>>,
    },

    /// Cancel a campaign past its deadline and refund it
    Cancel {
        campaign_id: CampaignId,
        response: oneshot::Sender<Result<RefundReport>>,
    },

    /// Deploy the group for a campaign and forward its pool
    Process {
        campaign_id: CampaignId,
        response: oneshot::Sender<Result<Address>>,
    },

    /// Re-attempt a contributor's unclaimed refund
    RetryRefund {
        contributor: Address,
        response: oneshot::Sender<Result<RefundReport>>,
    },

    /// Read a campaign
    GetCrowdfund {
        campaign_id: CampaignId,
        response: oneshot::Sender<Result<CrowdfundView>>,
    },

    /// Whether an address has contributed
    HasContributed {
        campaign_id: CampaignId,
        contributor: Address,
        response: oneshot::Sender<Result<bool>>,
    },

    /// Value owed to a contributor after failed refunds
    UnclaimedRefund {
        contributor: Address,
        response: oneshot::Sender<Result<Amount>>,
    },

    /// Custody breakdown
    Custody {
        response: oneshot::Sender<Result<CustodySnapshot>>,
    },

    /// Verify custody conservation
    CheckInvariants {
        response: oneshot::Sender<Result<()>>,
    },

    /// Gateway finished a deployment (loopback)
    DeploymentFinished {
        campaign_id: CampaignId,
        outcome: std::result::Result<Address, GatewayError>,
        started: Instant,
        response: oneshot::Sender<Result<Address>>,
    },

    /// Gateway finished a refund batch (loopback)
    RefundsFinished {
        batch: RefundBatch,
        outcomes: Vec<RefundOutcome>,
        started: Instant,
        response: oneshot::Sender<Result<RefundReport>>,
    },

    /// Stop once in-flight settlements have reported back
    Shutdown,
}

impl CrowdfundMessage {
    fn is_completion(&self) -> bool {
        matches!(
            self,
            CrowdfundMessage::DeploymentFinished { .. } | CrowdfundMessage::RefundsFinished { .. }
        )
    }
}

/// Result of disbursing a refund batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefundReport {
    /// Cancelled campaign; `None` for an unclaimed-refund retry
    pub campaign_id: Option<CampaignId>,

    /// Cancelled campaign name; empty for a retry
    pub name: String,

    /// Transfers that went through, in ledger order
    pub refunded: Vec<(Address, Amount)>,

    /// Transfers that failed and were booked as unclaimed
    pub failed: Vec<RefundOutcome>,
}

impl RefundReport {
    fn from_outcomes(batch: &RefundBatch, outcomes: Vec<RefundOutcome>) -> Self {
        let (ok, failed): (Vec<_>, Vec<_>) = outcomes.into_iter().partition(|o| o.is_success());
        Self {
            campaign_id: batch.campaign_id,
            name: batch.name.clone(),
            refunded: ok.into_iter().map(|o| (o.contributor, o.amount)).collect(),
            failed,
        }
    }

    /// Value that reached contributors
    pub fn total_refunded(&self) -> Amount {
        self.refunded.iter().map(|(_, amount)| amount).sum()
    }

    /// Whether every transfer succeeded
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Where held value currently sits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CustodySnapshot {
    /// Total value held
    pub custody: Amount,

    /// Value committed to refunds not yet reported
    pub in_flight: Amount,

    /// Value owed after failed refunds
    pub unclaimed: Amount,

    /// Number of open campaigns
    pub open_campaigns: usize,
}

/// Actor that owns the state machine
pub struct CrowdfundActor {
    machine: CrowdfundStateMachine,
    gateway: SettlementGateway,
    clock: Arc<dyn Clock>,

    /// Mailbox for incoming messages
    mailbox: mpsc::Receiver<CrowdfundMessage>,

    /// Used by spawned settlement tasks to report back
    loopback: mpsc::WeakSender<CrowdfundMessage>,

    notifications: broadcast::Sender<Notification>,
    metrics: Metrics,

    /// Spawned settlement tasks that have not reported back
    pending: usize,
}

impl CrowdfundActor {
    /// Run the actor event loop
    pub async fn run(mut self) {
        let mut draining = false;

        while let Some(msg) = self.mailbox.recv().await {
            match msg {
                CrowdfundMessage::Shutdown => {
                    tracing::info!(pending = self.pending, "Shutdown requested");
                    draining = true;
                }
                msg if draining && !msg.is_completion() => {
                    // Dropping the message closes its response channel
                    tracing::debug!("Rejecting request during shutdown");
                    drop(msg);
                }
                msg => self.handle_message(msg),
            }

            self.publish_notifications();

            if draining && self.pending == 0 {
                break;
            }
        }

        tracing::info!(custody = self.machine.custody(), "Crowdfund actor stopped");
    }

    /// Handle a single message
    fn handle_message(&mut self, msg: CrowdfundMessage) {
        match msg {
            CrowdfundMessage::Initiate {
                caller,
                params,
                deposit,
                response,
            } => {
                let result = self
                    .machine
                    .initiate(&caller, params, deposit, self.clock.now());
                if result.is_ok() {
                    self.metrics.record_initiated();
                }
                let _ = response.send(result.map_err(Error::from));
            }

            CrowdfundMessage::Contribute {
                caller,
                campaign_id,
                amount,
                response,
            } => {
                let now = self.clock.now();
                let result = self.machine.contribute(&caller, &campaign_id, amount, now);
                if result.is_ok() {
                    self.metrics.record_contribution();
                }
                let _ = response.send(result.map_err(Error::from));
            }

            CrowdfundMessage::Cancel {
                campaign_id,
                response,
            } => {
                let Some(loopback) = self.loopback.upgrade() else {
                    let _ = response.send(Err(mailbox_closed()));
                    return;
                };
                match self.machine.cancel(&campaign_id, self.clock.now()) {
                    Ok(batch) => {
                        self.metrics.record_cancelled();
                        self.disburse(batch, loopback, response);
                    }
                    Err(e) => {
                        let _ = response.send(Err(e.into()));
                    }
                }
            }

            CrowdfundMessage::RetryRefund {
                contributor,
                response,
            } => {
                let Some(loopback) = self.loopback.upgrade() else {
                    let _ = response.send(Err(mailbox_closed()));
                    return;
                };
                match self.machine.begin_refund_retry(&contributor) {
                    Ok(batch) => self.disburse(batch, loopback, response),
                    Err(e) => {
                        let _ = response.send(Err(e.into()));
                    }
                }
            }

            CrowdfundMessage::Process {
                campaign_id,
                response,
            } => {
                let Some(loopback) = self.loopback.upgrade() else {
                    let _ = response.send(Err(mailbox_closed()));
                    return;
                };
                let plan = match self.machine.begin_process(&campaign_id) {
                    Ok(plan) => plan,
                    Err(e) => {
                        let _ = response.send(Err(e.into()));
                        return;
                    }
                };

                let gateway = self.gateway.clone();
                let started = Instant::now();
                self.pending += 1;
                tokio::spawn(async move {
                    let outcome = gateway.deploy(&plan).await;
                    let _ = loopback
                        .send(CrowdfundMessage::DeploymentFinished {
                            campaign_id,
                            outcome,
                            started,
                            response,
                        })
                        .await;
                });
            }

            CrowdfundMessage::DeploymentFinished {
                campaign_id,
                outcome,
                started,
                response,
            } => {
                self.pending -= 1;
                let elapsed = started.elapsed().as_secs_f64();

                let result = match outcome {
                    Ok(group) => match self.machine.complete_process(&campaign_id, group.clone()) {
                        Ok(()) => {
                            self.metrics.record_processed(elapsed);
                            Ok(group)
                        }
                        Err(e) => {
                            tracing::error!(campaign = %campaign_id, group = %group, error = %e, "Deployed group could not be committed");
                            Err(e.into())
                        }
                    },
                    Err(gateway_err) => {
                        if let Err(e) = self.machine.abort_process(&campaign_id) {
                            tracing::error!(campaign = %campaign_id, error = %e, "Failed to reopen campaign");
                        }
                        self.metrics.record_deployment_failure(elapsed);
                        Err(crowdfund_core::Error::DeploymentFailed(gateway_err.to_string()).into())
                    }
                };
                let _ = response.send(result);
            }

            CrowdfundMessage::RefundsFinished {
                batch,
                outcomes,
                started,
                response,
            } => {
                self.pending -= 1;
                let result = match self.machine.settle_refunds(batch.batch_id, &outcomes) {
                    Ok(()) => {
                        let report = RefundReport::from_outcomes(&batch, outcomes);
                        self.metrics
                            .record_refunds(report.failed.len(), started.elapsed().as_secs_f64());
                        tracing::info!(
                            batch = %batch.batch_id,
                            refunded = report.total_refunded(),
                            failed = report.failed.len(),
                            "Refund batch settled"
                        );
                        Ok(report)
                    }
                    Err(e) => {
                        tracing::error!(batch = %batch.batch_id, error = %e, "Refund batch could not be settled");
                        Err(e.into())
                    }
                };
                let _ = response.send(result);
            }

            CrowdfundMessage::GetCrowdfund {
                campaign_id,
                response,
            } => {
                let _ = response.send(self.machine.get_crowdfund(&campaign_id).map_err(Error::from));
            }

            CrowdfundMessage::HasContributed {
                campaign_id,
                contributor,
                response,
            } => {
                let _ = response.send(Ok(self.machine.has_contributed(&campaign_id, &contributor)));
            }

            CrowdfundMessage::UnclaimedRefund {
                contributor,
                response,
            } => {
                let _ = response.send(Ok(self.machine.unclaimed_refund(&contributor)));
            }

            CrowdfundMessage::Custody { response } => {
                let snapshot = CustodySnapshot {
                    custody: self.machine.custody(),
                    in_flight: self.machine.in_flight_total(),
                    unclaimed: self
                        .machine
                        .unclaimed_refunds()
                        .iter()
                        .map(|(_, amount)| amount)
                        .sum(),
                    open_campaigns: self.machine.open_campaigns().len(),
                };
                let _ = response.send(Ok(snapshot));
            }

            CrowdfundMessage::CheckInvariants { response } => {
                let _ = response.send(self.machine.check_invariants().map_err(Error::from));
            }

            CrowdfundMessage::Shutdown => {
                // Handled in run loop
            }
        }
    }

    /// Hand a committed refund batch to a transfer task
    fn disburse(
        &mut self,
        batch: RefundBatch,
        loopback: mpsc::Sender<CrowdfundMessage>,
        response: oneshot::Sender<Result<RefundReport>>,
    ) {
        let gateway = self.gateway.clone();
        let started = Instant::now();
        self.pending += 1;

        tokio::spawn(async move {
            let outcomes = gateway.refund_all(&batch.entries).await;
            let _ = loopback
                .send(CrowdfundMessage::RefundsFinished {
                    batch,
                    outcomes,
                    started,
                    response,
                })
                .await;
        });
    }

    fn publish_notifications(&mut self) {
        for notification in self.machine.drain_notifications() {
            tracing::debug!(subject = notification.subject(), name = notification.name(), "Publishing notification");
            // No subscribers is not an error
            let _ = self.notifications.send(notification);
        }
    }
}

fn mailbox_closed() -> Error {
    Error::Concurrency("Actor mailbox closed".to_string())
}

/// Handle for sending messages to the actor
#[derive(Clone, Debug)]
pub struct CrowdfundHandle {
    sender: mpsc::Sender<CrowdfundMessage>,
    notifications: broadcast::Sender<Notification>,
}

impl CrowdfundHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T>>) -> CrowdfundMessage,
    ) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|_| mailbox_closed())?;

        rx.await
            .map_err(|_| Error::Concurrency("Response channel closed".to_string()))?
    }

    /// Open a campaign with `caller`'s initial deposit
    pub async fn initiate(
        &self,
        caller: &Address,
        params: CampaignParams,
        deposit: Amount,
    ) -> Result<CampaignId> {
        self.request(|response| CrowdfundMessage::Initiate {
            caller: caller.clone(),
            params,
            deposit,
            response,
        })
        .await
    }

    /// Contribute `amount`; returns the caller's new total
    pub async fn contribute(
        &self,
        caller: &Address,
        campaign_id: &CampaignId,
        amount: Amount,
    ) -> Result<Amount> {
        self.request(|response| CrowdfundMessage::Contribute {
            caller: caller.clone(),
            campaign_id: *campaign_id,
            amount,
            response,
        })
        .await
    }

    /// Cancel a campaign past its deadline and refund every contributor
    pub async fn cancel(&self, campaign_id: &CampaignId) -> Result<RefundReport> {
        self.request(|response| CrowdfundMessage::Cancel {
            campaign_id: *campaign_id,
            response,
        })
        .await
    }

    /// Deploy the group and forward the pool; returns the group address
    pub async fn process(&self, campaign_id: &CampaignId) -> Result<Address> {
        self.request(|response| CrowdfundMessage::Process {
            campaign_id: *campaign_id,
            response,
        })
        .await
    }

    /// Re-attempt a failed refund
    pub async fn retry_refund(&self, contributor: &Address) -> Result<RefundReport> {
        self.request(|response| CrowdfundMessage::RetryRefund {
            contributor: contributor.clone(),
            response,
        })
        .await
    }

    /// Read a campaign
    pub async fn get_crowdfund(&self, campaign_id: &CampaignId) -> Result<CrowdfundView> {
        self.request(|response| CrowdfundMessage::GetCrowdfund {
            campaign_id: *campaign_id,
            response,
        })
        .await
    }

    /// Whether `contributor` has an entry in the campaign
    pub async fn has_contributed(
        &self,
        campaign_id: &CampaignId,
        contributor: &Address,
    ) -> Result<bool> {
        self.request(|response| CrowdfundMessage::HasContributed {
            campaign_id: *campaign_id,
            contributor: contributor.clone(),
            response,
        })
        .await
    }

    /// Value owed to `contributor` after failed refunds
    pub async fn unclaimed_refund(&self, contributor: &Address) -> Result<Amount> {
        self.request(|response| CrowdfundMessage::UnclaimedRefund {
            contributor: contributor.clone(),
            response,
        })
        .await
    }

    /// Custody breakdown
    pub async fn custody(&self) -> Result<CustodySnapshot> {
        self.request(|response| CrowdfundMessage::Custody { response })
            .await
    }

    /// Verify custody conservation
    pub async fn check_invariants(&self) -> Result<()> {
        self.request(|response| CrowdfundMessage::CheckInvariants { response })
            .await
    }

    /// Subscribe to notifications emitted from now on
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.notifications.subscribe()
    }

    /// Ask the actor to stop
    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(CrowdfundMessage::Shutdown)
            .await
            .map_err(|_| mailbox_closed())?;
        Ok(())
    }
}

/// Take every notification currently buffered for `receiver`
///
/// A lagging receiver skips the overwritten notifications with a warning and
/// keeps draining.
pub fn drain_notifications(receiver: &mut broadcast::Receiver<Notification>) -> Vec<Notification> {
    let mut drained = Vec::new();
    loop {
        match receiver.try_recv() {
            Ok(notification) => drained.push(notification),
            Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Notification receiver lagged");
            }
            Err(_) => break,
        }
    }
    drained
}

/// Spawn the crowdfund actor
pub fn spawn_crowdfund_actor(
    machine: CrowdfundStateMachine,
    gateway: SettlementGateway,
    clock: Arc<dyn Clock>,
    metrics: Metrics,
    mailbox_capacity: usize,
    notification_capacity: usize,
) -> (CrowdfundHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(mailbox_capacity);
    let (notifications, _) = broadcast::channel(notification_capacity);

    let actor = CrowdfundActor {
        machine,
        gateway,
        clock,
        mailbox: rx,
        loopback: tx.downgrade(),
        notifications: notifications.clone(),
        metrics,
        pending: 0,
    };

    let task = tokio::spawn(async move {
        actor.run().await;
    });

    (
        CrowdfundHandle {
            sender: tx,
            notifications,
        },
        task,
    )
}
