//! Crowdfund state machine
//!
//! Owns the campaign registry and every unit of value held in custody.
//!
//! # Transitions
//!
//! ```text
//!   Absent ──initiate──▶ Open ──contribute──▶ Open
//!                          │
//!                          ├──begin_process──▶ Settling ──complete_process──▶ Absent (Processed)
//!                          │                      │
//!                          │                      └──abort_process──▶ Open
//!                          │
//!                          └──cancel (now ≥ deadline)──▶ Absent (Cancelled)
//! ```
//!
//! External value movement never happens inside this type. `cancel` retires
//! the campaign and hands back a committed [`RefundBatch`]; the caller
//! disburses it and reports outcomes through [`CrowdfundStateMachine::settle_refunds`].
//! `begin_process` stages a [`DeploymentPlan`] and locks the campaign until
//! the caller reports the deployment result. Any call arriving in between,
//! including one triggered by the collaborator itself, sees either the
//! `Settling` marker or an absent campaign.

use crate::{
    config::Config,
    crypto::campaign_id,
    events::Notification,
    ledger::ContributionLedger,
    registry::CampaignRegistry,
    types::{
        Address, Amount, Campaign, CampaignId, CampaignParams, CampaignStatus, CrowdfundView,
        DeploymentPlan, RefundBatch, RefundOutcome,
    },
    Error, Result,
};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

/// Crowdfund state machine
#[derive(Debug)]
pub struct CrowdfundStateMachine {
    /// Open campaigns and their ledgers
    registry: CampaignRegistry,

    /// Configuration
    config: Config,

    /// Total value held on behalf of every campaign and contributor
    custody: Amount,

    /// Refund batches committed but not yet disbursed
    in_flight: HashMap<Uuid, RefundBatch>,

    /// Refunds whose transfer failed, owed per contributor
    unclaimed: BTreeMap<Address, Amount>,

    /// Notifications not yet drained
    outbox: Vec<Notification>,
}

impl CrowdfundStateMachine {
    /// Create an empty state machine
    pub fn new(config: Config) -> Self {
        Self {
            registry: CampaignRegistry::new(),
            config,
            custody: 0,
            in_flight: HashMap::new(),
            unclaimed: BTreeMap::new(),
            outbox: Vec::new(),
        }
    }

    /// Open a campaign with the caller's initial deposit
    pub fn initiate(
        &mut self,
        caller: &Address,
        params: CampaignParams,
        deposit: Amount,
        now: DateTime<Utc>,
    ) -> Result<CampaignId> {
        if params.unit_price == 0 {
            return Err(Error::InvalidParameters(
                "unit price must be positive".to_string(),
            ));
        }
        if params.name.is_empty() {
            return Err(Error::InvalidParameters("name must not be empty".to_string()));
        }

        let id = campaign_id(&params.name);
        if self.registry.contains(&id) {
            return Err(Error::DuplicateCampaign(id));
        }

        let custody = self.custody.checked_add(deposit).ok_or(Error::AmountOverflow)?;

        let mut ledger = ContributionLedger::new();
        ledger.add_or_accumulate(caller, deposit)?;

        let name = params.name.clone();
        let campaign = Campaign {
            id,
            params,
            status: CampaignStatus::Open,
            initiator: caller.clone(),
            created_at: now,
        };
        self.registry.insert(campaign, ledger)?;
        self.custody = custody;

        tracing::info!(campaign = %id, name = %name, initiator = %caller, deposit, "Campaign initiated");
        self.outbox.push(Notification::CampaignCreated { name });

        Ok(id)
    }

    /// Add the caller's contribution to an open campaign
    ///
    /// Returns the caller's new total. Only a first contribution consumes a
    /// member slot. Once the deadline is reached only existing contributors
    /// may top up.
    pub fn contribute(
        &mut self,
        caller: &Address,
        id: &CampaignId,
        amount: Amount,
        now: DateTime<Utc>,
    ) -> Result<Amount> {
        let member_limit = self.config.member_limit;
        let (campaign, ledger) = self.registry.get_mut(id)?;

        if campaign.status == CampaignStatus::Settling {
            return Err(Error::TransitionInProgress(*id));
        }
        if amount == 0 {
            return Err(Error::ZeroContribution);
        }
        if !ledger.has(caller) {
            if campaign.deadline_reached(now) {
                return Err(Error::DeadlinePassed(*id));
            }
            if ledger.len() >= member_limit {
                return Err(Error::CapacityExceeded {
                    campaign: *id,
                    limit: member_limit,
                });
            }
        }
        let custody = self.custody.checked_add(amount).ok_or(Error::AmountOverflow)?;

        let new_total = ledger.add_or_accumulate(caller, amount)?;
        let name = campaign.params.name.clone();
        self.custody = custody;

        tracing::debug!(campaign = %id, contributor = %caller, amount, new_total, "Contribution recorded");
        self.outbox.push(Notification::FundsAdded {
            name,
            contributor: caller.clone(),
            amount,
        });

        Ok(new_total)
    }

    /// Cancel a campaign whose deadline has passed
    ///
    /// The campaign is retired and its id freed before this returns. The
    /// returned batch must be disbursed and reported back through
    /// [`Self::settle_refunds`]; until then its value counts as in flight.
    pub fn cancel(&mut self, id: &CampaignId, now: DateTime<Utc>) -> Result<RefundBatch> {
        let (campaign, _) = self.registry.get(id)?;

        if campaign.status == CampaignStatus::Settling {
            return Err(Error::TransitionInProgress(*id));
        }
        if !campaign.deadline_reached(now) {
            return Err(Error::OpenFund(*id));
        }

        let (campaign, ledger) = self.registry.remove(id)?;
        let batch = RefundBatch {
            batch_id: Uuid::now_v7(),
            campaign_id: Some(*id),
            name: campaign.params.name,
            entries: ledger.into_entries(),
        };
        self.in_flight.insert(batch.batch_id, batch.clone());

        tracing::info!(
            campaign = %id,
            name = %batch.name,
            refunds = batch.entries.len(),
            total = batch.total(),
            "Campaign cancelled"
        );
        self.outbox.push(Notification::Cancelled {
            name: batch.name.clone(),
        });

        Ok(batch)
    }

    /// Record the outcome of disbursing a committed refund batch
    ///
    /// `outcomes` must list the batch entries in order. Successful transfers
    /// leave custody; failed ones are booked as unclaimed for the contributor.
    pub fn settle_refunds(&mut self, batch_id: Uuid, outcomes: &[RefundOutcome]) -> Result<()> {
        let batch = self.in_flight.get(&batch_id).ok_or_else(|| {
            Error::InvariantViolation(format!("unknown refund batch {}", batch_id))
        })?;

        let aligned = batch.entries.len() == outcomes.len()
            && batch
                .entries
                .iter()
                .zip(outcomes)
                .all(|((addr, amount), o)| *addr == o.contributor && *amount == o.amount);
        if !aligned {
            return Err(Error::InvariantViolation(format!(
                "refund outcomes do not match batch {}",
                batch_id
            )));
        }

        let refunded: Amount = outcomes
            .iter()
            .filter(|o| o.is_success())
            .map(|o| o.amount)
            .sum();
        let custody = self.custody.checked_sub(refunded).ok_or_else(|| {
            Error::InvariantViolation(format!(
                "refunds of {} exceed custody {}",
                refunded, self.custody
            ))
        })?;

        self.in_flight.remove(&batch_id);
        self.custody = custody;

        for outcome in outcomes.iter().filter(|o| !o.is_success()) {
            tracing::warn!(
                batch = %batch_id,
                contributor = %outcome.contributor,
                amount = outcome.amount,
                reason = outcome.error.as_deref().unwrap_or_default(),
                "Refund failed, booked as unclaimed"
            );
            let owed = self.unclaimed.entry(outcome.contributor.clone()).or_insert(0);
            *owed = owed.checked_add(outcome.amount).ok_or(Error::AmountOverflow)?;
        }

        Ok(())
    }

    /// Move a contributor's unclaimed refund into a new in-flight batch
    pub fn begin_refund_retry(&mut self, contributor: &Address) -> Result<RefundBatch> {
        let amount = self
            .unclaimed
            .remove(contributor)
            .ok_or_else(|| Error::NothingToRefund(contributor.clone()))?;

        let batch = RefundBatch {
            batch_id: Uuid::now_v7(),
            campaign_id: None,
            name: String::new(),
            entries: vec![(contributor.clone(), amount)],
        };
        self.in_flight.insert(batch.batch_id, batch.clone());

        tracing::info!(contributor = %contributor, amount, "Retrying unclaimed refund");
        Ok(batch)
    }

    /// Stage a campaign for deployment and lock it
    ///
    /// Nothing is retired yet. The caller must follow up with exactly one of
    /// [`Self::complete_process`] or [`Self::abort_process`].
    pub fn begin_process(&mut self, id: &CampaignId) -> Result<DeploymentPlan> {
        let (campaign, ledger) = self.registry.get_mut(id)?;

        if campaign.status == CampaignStatus::Settling {
            return Err(Error::TransitionInProgress(*id));
        }

        let shares = ledger.share_counts(campaign.params.unit_price)?;
        let members = ledger.entries().iter().map(|(addr, _)| addr.clone()).collect();

        let plan = DeploymentPlan {
            campaign_id: *id,
            target: campaign.params.target.clone(),
            name: campaign.params.name.clone(),
            symbol: campaign.params.symbol.clone(),
            payload: campaign.params.payload.clone(),
            members,
            shares,
            treasury: ledger.total(),
        };
        campaign.status = CampaignStatus::Settling;

        tracing::info!(
            campaign = %id,
            members = plan.members.len(),
            shares = plan.total_shares(),
            treasury = plan.treasury,
            "Campaign staged for deployment"
        );

        Ok(plan)
    }

    /// Commit a staged campaign after its group was deployed and funded
    pub fn complete_process(&mut self, id: &CampaignId, group: Address) -> Result<()> {
        let (campaign, ledger) = self.registry.get(id)?;
        if campaign.status != CampaignStatus::Settling {
            return Err(Error::InvariantViolation(format!(
                "campaign {} completed without being staged",
                id
            )));
        }

        let custody = self.custody.checked_sub(ledger.total()).ok_or_else(|| {
            Error::InvariantViolation(format!(
                "treasury {} exceeds custody {}",
                ledger.total(),
                self.custody
            ))
        })?;

        let (campaign, ledger) = self.registry.remove(id)?;
        self.custody = custody;

        tracing::info!(
            campaign = %id,
            name = %campaign.params.name,
            group = %group,
            treasury = ledger.total(),
            "Campaign processed"
        );
        self.outbox.push(Notification::Processed {
            name: campaign.params.name,
            group,
        });

        Ok(())
    }

    /// Revert a staged campaign to `Open` after a failed deployment
    pub fn abort_process(&mut self, id: &CampaignId) -> Result<()> {
        let (campaign, _) = self.registry.get_mut(id)?;
        if campaign.status == CampaignStatus::Settling {
            campaign.status = CampaignStatus::Open;
            tracing::warn!(campaign = %id, "Deployment failed, campaign reopened");
        }
        Ok(())
    }

    /// Cancel and disburse synchronously through `transfer`
    ///
    /// Every entry is attempted even if earlier ones fail.
    pub fn cancel_with<F>(
        &mut self,
        id: &CampaignId,
        now: DateTime<Utc>,
        mut transfer: F,
    ) -> Result<Vec<RefundOutcome>>
    where
        F: FnMut(&Address, Amount) -> std::result::Result<(), String>,
    {
        let batch = self.cancel(id, now)?;
        let outcomes: Vec<RefundOutcome> = batch
            .entries
            .iter()
            .map(|(addr, amount)| match transfer(addr, *amount) {
                Ok(()) => RefundOutcome::succeeded(addr.clone(), *amount),
                Err(reason) => RefundOutcome::failed(addr.clone(), *amount, reason),
            })
            .collect();
        self.settle_refunds(batch.batch_id, &outcomes)?;
        Ok(outcomes)
    }

    /// Process synchronously through `deploy`
    ///
    /// A deployment error rolls the campaign back to `Open` and surfaces as
    /// `DeploymentFailed`.
    pub fn process_with<F>(&mut self, id: &CampaignId, deploy: F) -> Result<Address>
    where
        F: FnOnce(&DeploymentPlan) -> std::result::Result<Address, String>,
    {
        let plan = self.begin_process(id)?;
        match deploy(&plan) {
            Ok(group) => {
                self.complete_process(id, group.clone())?;
                Ok(group)
            }
            Err(reason) => {
                self.abort_process(id)?;
                Err(Error::DeploymentFailed(reason))
            }
        }
    }

    /// `getCrowdfund`: parameters plus ordered contributors and contributions
    pub fn get_crowdfund(&self, id: &CampaignId) -> Result<CrowdfundView> {
        self.registry.view(id)
    }

    /// Whether `contributor` has an entry in the campaign
    pub fn has_contributed(&self, id: &CampaignId, contributor: &Address) -> bool {
        self.registry
            .get(id)
            .map(|(_, ledger)| ledger.has(contributor))
            .unwrap_or(false)
    }

    /// Value owed to a contributor after failed refunds
    pub fn unclaimed_refund(&self, contributor: &Address) -> Amount {
        self.unclaimed.get(contributor).copied().unwrap_or(0)
    }

    /// All unclaimed refunds
    pub fn unclaimed_refunds(&self) -> Vec<(Address, Amount)> {
        self.unclaimed
            .iter()
            .map(|(addr, amount)| (addr.clone(), *amount))
            .collect()
    }

    /// Ids of open campaigns
    pub fn open_campaigns(&self) -> Vec<CampaignId> {
        self.registry.ids()
    }

    /// Total value held
    pub fn custody(&self) -> Amount {
        self.custody
    }

    /// Value committed to refunds not yet reported
    pub fn in_flight_total(&self) -> Amount {
        self.in_flight.values().map(RefundBatch::total).sum()
    }

    /// Configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Take pending notifications in emission order
    pub fn drain_notifications(&mut self) -> Vec<Notification> {
        std::mem::take(&mut self.outbox)
    }

    /// Verify custody conservation and ledger consistency
    pub fn check_invariants(&self) -> Result<()> {
        let mut accounted: Amount = 0;

        for (campaign, ledger) in self.registry.iter() {
            ledger.verify()?;
            if ledger.is_empty() {
                return Err(Error::InvariantViolation(format!(
                    "open campaign {} has an empty ledger",
                    campaign.id
                )));
            }
            if ledger.len() > self.config.member_limit {
                return Err(Error::InvariantViolation(format!(
                    "campaign {} has {} contributors, limit {}",
                    campaign.id,
                    ledger.len(),
                    self.config.member_limit
                )));
            }
            accounted = accounted
                .checked_add(ledger.total())
                .ok_or(Error::AmountOverflow)?;
        }

        for batch in self.in_flight.values() {
            accounted = accounted
                .checked_add(batch.total())
                .ok_or(Error::AmountOverflow)?;
        }

        for amount in self.unclaimed.values() {
            accounted = accounted.checked_add(*amount).ok_or(Error::AmountOverflow)?;
        }

        if accounted != self.custody {
            tracing::error!(custody = self.custody, accounted, "Custody conservation violated");
            return Err(Error::InvariantViolation(format!(
                "custody {} != accounted {}",
                self.custody, accounted
            )));
        }

        Ok(())
    }
}

impl Default for CrowdfundStateMachine {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn deadline() -> DateTime<Utc> {
        DateTime::from_timestamp(1_730_817_411, 0).unwrap()
    }

    fn before_deadline() -> DateTime<Utc> {
        deadline() - Duration::days(30)
    }

    fn params(name: &str, unit_price: Amount) -> CampaignParams {
        CampaignParams {
            target: Address::new("forum-factory"),
            unit_price,
            deadline: deadline(),
            name: name.to_string(),
            symbol: "T".to_string(),
            payload: b"deploy".to_vec(),
        }
    }

    fn addr(s: &str) -> Address {
        Address::new(s)
    }

    #[test]
    fn test_initiate_stores_params_and_initiator() {
        let mut machine = CrowdfundStateMachine::default();
        let id = machine
            .initiate(&addr("proposer"), params("TEST", 2), 1, before_deadline())
            .unwrap();

        assert_eq!(id, campaign_id("TEST"));
        let view = machine.get_crowdfund(&id).unwrap();
        assert_eq!(view.details, params("TEST", 2));
        assert_eq!(view.contributors, vec![addr("proposer")]);
        assert_eq!(view.contributions, vec![1]);
        assert_eq!(view.status, CampaignStatus::Open);
        assert_eq!(
            machine.drain_notifications(),
            vec![Notification::CampaignCreated {
                name: "TEST".to_string()
            }]
        );
        machine.check_invariants().unwrap();
    }

    #[test]
    fn test_initiate_rejects_invalid_params() {
        let mut machine = CrowdfundStateMachine::default();
        assert!(matches!(
            machine.initiate(&addr("p"), params("TEST", 0), 1, before_deadline()),
            Err(Error::InvalidParameters(_))
        ));
        assert!(matches!(
            machine.initiate(&addr("p"), params("", 1), 1, before_deadline()),
            Err(Error::InvalidParameters(_))
        ));
        assert_eq!(
            machine.initiate(&addr("p"), params("TEST", 1), 0, before_deadline()),
            Err(Error::ZeroContribution)
        );
        assert!(machine.open_campaigns().is_empty());
        assert_eq!(machine.custody(), 0);
    }

    #[test]
    fn test_duplicate_initiate_does_not_overwrite() {
        let mut machine = CrowdfundStateMachine::default();
        let id = machine
            .initiate(&addr("proposer"), params("TEST", 2), 1, before_deadline())
            .unwrap();

        let result = machine.initiate(&addr("alice"), params("TEST", 5), 9, before_deadline());
        assert_eq!(result, Err(Error::DuplicateCampaign(id)));

        let view = machine.get_crowdfund(&id).unwrap();
        assert_eq!(view.details.unit_price, 2);
        assert_eq!(view.contributors, vec![addr("proposer")]);
        assert_eq!(machine.custody(), 1);
    }

    #[test]
    fn test_repeat_contribution_accumulates() {
        let mut machine = CrowdfundStateMachine::default();
        let id = machine
            .initiate(&addr("proposer"), params("TEST", 2), 1, before_deadline())
            .unwrap();

        assert_eq!(
            machine
                .contribute(&addr("proposer"), &id, 1, before_deadline())
                .unwrap(),
            2
        );

        let view = machine.get_crowdfund(&id).unwrap();
        assert_eq!(view.contributors.len(), 1);
        assert_eq!(view.contributions, vec![2]);
        assert!(machine.has_contributed(&id, &addr("proposer")));
        assert!(!machine.has_contributed(&id, &addr("alice")));
    }

    #[test]
    fn test_contribute_errors() {
        let mut machine = CrowdfundStateMachine::default();
        let missing = campaign_id("WRONG");
        assert_eq!(
            machine.contribute(&addr("alice"), &missing, 1, before_deadline()),
            Err(Error::NoSuchCampaign(missing))
        );

        let id = machine
            .initiate(&addr("proposer"), params("TEST", 2), 1, before_deadline())
            .unwrap();
        assert_eq!(
            machine.contribute(&addr("alice"), &id, 0, before_deadline()),
            Err(Error::ZeroContribution)
        );
    }

    #[test]
    fn test_unknown_campaign_checked_before_overflow() {
        let mut machine = CrowdfundStateMachine::default();
        machine
            .initiate(&addr("proposer"), params("TEST", 2), 1, before_deadline())
            .unwrap();

        let missing = campaign_id("WRONG");
        assert_eq!(
            machine.contribute(&addr("alice"), &missing, Amount::MAX, before_deadline()),
            Err(Error::NoSuchCampaign(missing))
        );
    }

    #[test]
    fn test_new_contributor_rejected_after_deadline() {
        let mut machine = CrowdfundStateMachine::default();
        let id = machine
            .initiate(&addr("proposer"), params("TEST", 2), 1, before_deadline())
            .unwrap();
        machine
            .contribute(&addr("alice"), &id, 2, before_deadline())
            .unwrap();
        machine.drain_notifications();

        assert_eq!(
            machine.contribute(&addr("bob"), &id, 1, deadline()),
            Err(Error::DeadlinePassed(id))
        );
        assert!(!machine.has_contributed(&id, &addr("bob")));
        assert!(machine.drain_notifications().is_empty());

        // Existing contributors may still top up
        assert_eq!(
            machine.contribute(&addr("alice"), &id, 3, deadline()).unwrap(),
            5
        );
        assert_eq!(machine.custody(), 6);
        machine.check_invariants().unwrap();
    }

    #[test]
    fn test_capacity_counts_only_new_contributors() {
        let mut machine = CrowdfundStateMachine::new(Config { member_limit: 3 });
        let id = machine
            .initiate(&addr("proposer"), params("TEST", 1), 1, before_deadline())
            .unwrap();
        machine.contribute(&addr("a"), &id, 1, before_deadline()).unwrap();
        machine.contribute(&addr("b"), &id, 1, before_deadline()).unwrap();

        assert_eq!(
            machine.contribute(&addr("c"), &id, 1, before_deadline()),
            Err(Error::CapacityExceeded {
                campaign: id,
                limit: 3
            })
        );
        // Existing members may still top up
        assert_eq!(
            machine
                .contribute(&addr("a"), &id, 4, before_deadline())
                .unwrap(),
            5
        );
        assert_eq!(machine.custody(), 8);
        machine.check_invariants().unwrap();
    }

    #[test]
    fn test_cancel_before_deadline_is_open_fund() {
        let mut machine = CrowdfundStateMachine::default();
        let id = machine
            .initiate(&addr("proposer"), params("TEST", 2), 1, before_deadline())
            .unwrap();

        assert_eq!(
            machine.cancel(&id, deadline() - Duration::seconds(1)),
            Err(Error::OpenFund(id))
        );
        assert_eq!(machine.get_crowdfund(&id).unwrap().contributions, vec![1]);
    }

    #[test]
    fn test_cancel_refunds_each_contributor_once() {
        let mut machine = CrowdfundStateMachine::default();
        let id = machine
            .initiate(&addr("proposer"), params("TEST", 2), 3, before_deadline())
            .unwrap();
        machine.contribute(&addr("alice"), &id, 5, before_deadline()).unwrap();
        machine.contribute(&addr("proposer"), &id, 1, before_deadline()).unwrap();

        let mut paid = Vec::new();
        let outcomes = machine
            .cancel_with(&id, deadline(), |to, amount| {
                paid.push((to.clone(), amount));
                Ok(())
            })
            .unwrap();

        assert_eq!(paid, vec![(addr("proposer"), 4), (addr("alice"), 5)]);
        assert!(outcomes.iter().all(RefundOutcome::is_success));
        assert_eq!(machine.custody(), 0);
        assert_eq!(machine.get_crowdfund(&id), Err(Error::NoSuchCampaign(id)));
        assert_eq!(
            machine.cancel(&id, deadline()),
            Err(Error::NoSuchCampaign(id))
        );
        machine.check_invariants().unwrap();
    }

    #[test]
    fn test_failed_refund_is_booked_and_retryable() {
        let mut machine = CrowdfundStateMachine::default();
        let id = machine
            .initiate(&addr("proposer"), params("TEST", 2), 3, before_deadline())
            .unwrap();
        machine.contribute(&addr("alice"), &id, 5, before_deadline()).unwrap();
        machine.contribute(&addr("bob"), &id, 7, before_deadline()).unwrap();

        let outcomes = machine
            .cancel_with(&id, deadline(), |to, _| {
                if to.as_str() == "alice" {
                    Err("recipient rejected".to_string())
                } else {
                    Ok(())
                }
            })
            .unwrap();

        assert_eq!(outcomes.iter().filter(|o| o.is_success()).count(), 2);
        assert_eq!(machine.unclaimed_refund(&addr("alice")), 5);
        assert_eq!(machine.custody(), 5);
        machine.check_invariants().unwrap();

        let batch = machine.begin_refund_retry(&addr("alice")).unwrap();
        assert_eq!(machine.in_flight_total(), 5);
        machine.check_invariants().unwrap();

        machine
            .settle_refunds(
                batch.batch_id,
                &[RefundOutcome::succeeded(addr("alice"), 5)],
            )
            .unwrap();
        assert_eq!(machine.custody(), 0);
        assert_eq!(
            machine.begin_refund_retry(&addr("alice")),
            Err(Error::NothingToRefund(addr("alice")))
        );
        machine.check_invariants().unwrap();
    }

    #[test]
    fn test_settle_rejects_mismatched_outcomes() {
        let mut machine = CrowdfundStateMachine::default();
        let id = machine
            .initiate(&addr("proposer"), params("TEST", 2), 3, before_deadline())
            .unwrap();
        let batch = machine.cancel(&id, deadline()).unwrap();

        let result = machine.settle_refunds(
            batch.batch_id,
            &[RefundOutcome::succeeded(addr("proposer"), 30)],
        );
        assert!(matches!(result, Err(Error::InvariantViolation(_))));

        // Batch is still in flight and can be settled correctly
        assert_eq!(machine.in_flight_total(), 3);
        machine
            .settle_refunds(
                batch.batch_id,
                &[RefundOutcome::succeeded(addr("proposer"), 3)],
            )
            .unwrap();
        machine.check_invariants().unwrap();
    }

    #[test]
    fn test_process_share_counts() {
        let mut machine = CrowdfundStateMachine::default();
        let id = machine
            .initiate(&addr("a"), params("TEST", 2), 4, before_deadline())
            .unwrap();
        machine.contribute(&addr("b"), &id, 2, before_deadline()).unwrap();

        let mut seen = None;
        let group = machine
            .process_with(&id, |plan| {
                seen = Some(plan.clone());
                Ok(Address::new("group-1"))
            })
            .unwrap();

        let plan = seen.unwrap();
        assert_eq!(group, addr("group-1"));
        assert_eq!(plan.members, vec![addr("a"), addr("b")]);
        assert_eq!(plan.shares, vec![2, 1]);
        assert_eq!(plan.treasury, 6);
        assert_eq!(plan.payload, b"deploy".to_vec());
        assert_eq!(machine.custody(), 0);
        assert!(machine.open_campaigns().is_empty());
    }

    #[test]
    fn test_worked_example_two_by_two() {
        let mut machine = CrowdfundStateMachine::default();
        let id = machine
            .initiate(&addr("A"), params("TEST", 2), 2, before_deadline())
            .unwrap();
        machine.contribute(&addr("B"), &id, 2, before_deadline()).unwrap();

        let plan = machine.begin_process(&id).unwrap();
        assert_eq!(plan.shares, vec![1, 1]);
        assert_eq!(plan.total_shares(), 2);
        assert_eq!(plan.treasury, 4);
    }

    #[test]
    fn test_remainder_forfeited_to_treasury() {
        let mut machine = CrowdfundStateMachine::default();
        let id = machine
            .initiate(&addr("A"), params("TEST", 2), 1, before_deadline())
            .unwrap();
        machine.contribute(&addr("B"), &id, 1, before_deadline()).unwrap();

        let plan = machine.begin_process(&id).unwrap();
        assert_eq!(plan.shares, vec![0, 0]);
        assert_eq!(plan.treasury, 2);
    }

    #[test]
    fn test_failed_deployment_rolls_back() {
        let mut machine = CrowdfundStateMachine::default();
        let id = machine
            .initiate(&addr("proposer"), params("TEST", 2), 2, before_deadline())
            .unwrap();
        machine.drain_notifications();

        let result = machine.process_with(&id, |_| Err("factory reverted".to_string()));
        assert_eq!(
            result,
            Err(Error::DeploymentFailed("factory reverted".to_string()))
        );

        let view = machine.get_crowdfund(&id).unwrap();
        assert_eq!(view.status, CampaignStatus::Open);
        assert_eq!(view.contributions, vec![2]);
        assert!(machine.drain_notifications().is_empty());
        machine.check_invariants().unwrap();

        // Retry succeeds
        machine
            .process_with(&id, |_| Ok(Address::new("group-1")))
            .unwrap();
        assert_eq!(machine.custody(), 0);
    }

    #[test]
    fn test_settling_campaign_rejects_mutation() {
        let mut machine = CrowdfundStateMachine::default();
        let id = machine
            .initiate(&addr("proposer"), params("TEST", 2), 2, before_deadline())
            .unwrap();
        machine.begin_process(&id).unwrap();

        assert_eq!(
            machine.contribute(&addr("alice"), &id, 1, before_deadline()),
            Err(Error::TransitionInProgress(id))
        );
        assert_eq!(
            machine.cancel(&id, deadline()),
            Err(Error::TransitionInProgress(id))
        );
        assert_eq!(
            machine.begin_process(&id),
            Err(Error::TransitionInProgress(id))
        );

        machine.abort_process(&id).unwrap();
        machine.contribute(&addr("alice"), &id, 1, before_deadline()).unwrap();
    }

    #[test]
    fn test_complete_requires_staging() {
        let mut machine = CrowdfundStateMachine::default();
        let id = machine
            .initiate(&addr("proposer"), params("TEST", 2), 2, before_deadline())
            .unwrap();

        assert!(matches!(
            machine.complete_process(&id, addr("group")),
            Err(Error::InvariantViolation(_))
        ));
        assert!(machine.get_crowdfund(&id).is_ok());
    }

    #[test]
    fn test_name_reusable_after_terminal_transition() {
        let mut machine = CrowdfundStateMachine::default();
        let id = machine
            .initiate(&addr("proposer"), params("TEST", 2), 2, before_deadline())
            .unwrap();
        machine
            .process_with(&id, |_| Ok(Address::new("group-1")))
            .unwrap();

        let again = machine
            .initiate(&addr("alice"), params("TEST", 3), 3, before_deadline())
            .unwrap();
        assert_eq!(again, id);
        assert_eq!(
            machine.get_crowdfund(&id).unwrap().contributors,
            vec![addr("alice")]
        );
    }

    #[test]
    fn test_campaign_custody_is_partitioned() {
        let mut machine = CrowdfundStateMachine::default();
        let one = machine
            .initiate(&addr("a"), params("ONE", 1), 10, before_deadline())
            .unwrap();
        let two = machine
            .initiate(&addr("b"), params("TWO", 1), 20, before_deadline())
            .unwrap();

        let mut treasury = 0;
        machine
            .process_with(&one, |plan| {
                treasury = plan.treasury;
                Ok(Address::new("group-1"))
            })
            .unwrap();

        assert_eq!(treasury, 10);
        assert_eq!(machine.custody(), 20);
        assert_eq!(machine.get_crowdfund(&two).unwrap().total(), 20);
        machine.check_invariants().unwrap();
    }
}
