//! In-memory network used by tests and the replay binary
//!
//! Implements both gateway collaborators over a shared balance sheet. Group
//! addresses are derived from the group name, so deploying a second group
//! with the same name collides and reverts, as a create2-style factory
//! would.

use crate::gateway::{GatewayError, GroupFactory, ValueTransfer};
use async_trait::async_trait;
use crowdfund_core::{crypto::domain_hash, Address, Amount, DeploymentPlan};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Group created by the mock factory
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeployedGroup {
    /// Group address
    pub address: Address,
    /// Group name
    pub name: String,
    /// Group symbol
    pub symbol: String,
    /// Members and their share balances
    pub members: Vec<(Address, u128)>,
    /// Value received at deployment
    pub treasury: Amount,
    /// Deployment payload as received
    pub payload: Vec<u8>,
}

impl DeployedGroup {
    /// Share balance of `member`
    pub fn shares_of(&self, member: &Address) -> u128 {
        self.members
            .iter()
            .find(|(addr, _)| addr == member)
            .map(|(_, shares)| *shares)
            .unwrap_or(0)
    }
}

#[derive(Debug, Default)]
struct NetworkState {
    balances: HashMap<Address, Amount>,
    groups: BTreeMap<Address, DeployedGroup>,
    rejecting: HashSet<Address>,
    failing_deployments: usize,
    deploy_calls: usize,
    transfers: Vec<(Address, Amount)>,
}

/// In-memory factory and value-transfer network
#[derive(Debug)]
pub struct MockNetwork {
    factory_address: Address,
    state: Mutex<NetworkState>,
}

impl MockNetwork {
    /// Create network whose factory lives at `factory_address`
    pub fn new(factory_address: impl Into<String>) -> Self {
        Self {
            factory_address: Address::new(factory_address),
            state: Mutex::new(NetworkState::default()),
        }
    }

    /// Address of the factory
    pub fn factory_address(&self) -> &Address {
        &self.factory_address
    }

    /// Deterministic group address for a name
    pub fn group_address_for(name: &str) -> Address {
        let digest = domain_hash("forum-group", name.as_bytes());
        Address::new(format!("0x{}", hex::encode(&digest[..20])))
    }

    /// Make every transfer to `to` fail until re-enabled
    pub fn reject_transfers_to(&self, to: &Address) {
        self.state.lock().rejecting.insert(to.clone());
    }

    /// Re-enable transfers to `to`
    pub fn accept_transfers_to(&self, to: &Address) {
        self.state.lock().rejecting.remove(to);
    }

    /// Make the next `count` deployments revert
    pub fn fail_next_deployments(&self, count: usize) {
        self.state.lock().failing_deployments = count;
    }

    /// Balance held by `addr`
    pub fn balance_of(&self, addr: &Address) -> Amount {
        self.state.lock().balances.get(addr).copied().unwrap_or(0)
    }

    /// Group deployed at `addr`
    pub fn group(&self, addr: &Address) -> Option<DeployedGroup> {
        self.state.lock().groups.get(addr).cloned()
    }

    /// All deployed groups
    pub fn groups(&self) -> Vec<DeployedGroup> {
        self.state.lock().groups.values().cloned().collect()
    }

    /// Number of deploy attempts seen
    pub fn deploy_calls(&self) -> usize {
        self.state.lock().deploy_calls
    }

    /// Successful transfers in the order they were made
    pub fn transfers(&self) -> Vec<(Address, Amount)> {
        self.state.lock().transfers.clone()
    }
}

#[async_trait]
impl GroupFactory for MockNetwork {
    async fn deploy_group(&self, plan: &DeploymentPlan) -> Result<Address, GatewayError> {
        let mut state = self.state.lock();
        state.deploy_calls += 1;

        if state.failing_deployments > 0 {
            state.failing_deployments -= 1;
            return Err(GatewayError::DeploymentReverted(
                "injected deployment failure".to_string(),
            ));
        }

        if plan.target != self.factory_address {
            return Err(GatewayError::Unavailable(format!(
                "no factory at {}",
                plan.target
            )));
        }

        let address = Self::group_address_for(&plan.name);
        if state.groups.contains_key(&address) {
            return Err(GatewayError::DeploymentReverted(format!(
                "group {} already deployed at {}",
                plan.name, address
            )));
        }

        let group = DeployedGroup {
            address: address.clone(),
            name: plan.name.clone(),
            symbol: plan.symbol.clone(),
            members: plan
                .members
                .iter()
                .cloned()
                .zip(plan.shares.iter().copied())
                .collect(),
            treasury: plan.treasury,
            payload: plan.payload.clone(),
        };
        state.groups.insert(address.clone(), group);
        *state.balances.entry(address.clone()).or_insert(0) += plan.treasury;

        Ok(address)
    }
}

#[async_trait]
impl ValueTransfer for MockNetwork {
    async fn transfer(&self, to: &Address, amount: Amount) -> Result<(), GatewayError> {
        let mut state = self.state.lock();

        if state.rejecting.contains(to) {
            return Err(GatewayError::TransferRejected(format!(
                "{} does not accept transfers",
                to
            )));
        }

        *state.balances.entry(to.clone()).or_insert(0) += amount;
        state.transfers.push((to.clone(), amount));
        Ok(())
    }
}
