//! Crowdfund engine
//!
//! Wires configuration, metrics and the settlement gateway into a running
//! actor. Dereferences to [`CrowdfundHandle`] for every operation.

use crate::{
    actor::{spawn_crowdfund_actor, CrowdfundHandle},
    config::Config,
    gateway::SettlementGateway,
    metrics::Metrics,
    Error, Result,
};
use crowdfund_core::{campaign_id, Clock, CrowdfundStateMachine, CrowdfundView};
use std::ops::Deref;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Running crowdfund engine
#[derive(Debug)]
pub struct CrowdfundEngine {
    handle: CrowdfundHandle,
    task: JoinHandle<()>,
    metrics: Metrics,
    config: Config,
}

impl CrowdfundEngine {
    /// Validate `config` and spawn the actor on the current runtime
    pub fn start(
        config: Config,
        gateway: SettlementGateway,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        let metrics = Metrics::new()?;

        tracing::info!(
            service = %config.service_name,
            version = %config.service_version,
            member_limit = config.crowdfund.member_limit,
            "Starting crowdfund engine"
        );

        let machine = CrowdfundStateMachine::new(config.crowdfund.clone());
        let (handle, task) = spawn_crowdfund_actor(
            machine,
            gateway,
            clock,
            metrics.clone(),
            config.mailbox_capacity,
            config.notification_capacity,
        );

        Ok(Self {
            handle,
            task,
            metrics,
            config,
        })
    }

    /// Cloneable handle to the actor
    pub fn handle(&self) -> CrowdfundHandle {
        self.handle.clone()
    }

    /// Subscribe to notifications
    pub fn subscribe(&self) -> broadcast::Receiver<crowdfund_core::Notification> {
        self.handle.subscribe()
    }

    /// Engine metrics
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Active configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Read a campaign by its name
    pub async fn get_crowdfund_by_name(&self, name: &str) -> Result<CrowdfundView> {
        self.handle.get_crowdfund(&campaign_id(name)).await
    }

    /// Stop the actor after in-flight settlements report back
    pub async fn shutdown(self) -> Result<()> {
        self.handle.shutdown().await?;
        self.task
            .await
            .map_err(|e| Error::Concurrency(format!("Actor task failed: {}", e)))?;
        tracing::info!(service = %self.config.service_name, "Crowdfund engine stopped");
        Ok(())
    }
}

impl Deref for CrowdfundEngine {
    type Target = CrowdfundHandle;

    fn deref(&self) -> &Self::Target {
        &self.handle
    }
}
