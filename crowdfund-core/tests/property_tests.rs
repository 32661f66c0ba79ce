//! Property-based tests for crowdfund invariants
//!
//! These tests use proptest to verify critical invariants:
//! - Custody conservation: held value == Σ(ledgers) + in-flight + unclaimed
//! - Accumulation: a contributor's entry equals the sum of their contributions
//! - Exactly-once refunds: cancel pays every recorded amount once
//! - Share allocation: floor(contribution / unit price), treasury == pool

use chrono::{DateTime, Duration, Utc};
use crowdfund_core::{
    campaign_id, Address, Amount, CampaignParams, Config, CrowdfundStateMachine, Error,
};
use proptest::prelude::*;
use std::collections::HashMap;

const NAMES: [&str; 3] = ["ALPHA", "BETA", "GAMMA"];

fn deadline() -> DateTime<Utc> {
    DateTime::from_timestamp(1_730_817_411, 0).unwrap()
}

fn params(name: &str, unit_price: Amount) -> CampaignParams {
    CampaignParams {
        target: Address::new("forum-factory"),
        unit_price,
        deadline: deadline(),
        name: name.to_string(),
        symbol: name[..1].to_string(),
        payload: vec![],
    }
}

/// Operation applied to the state machine
#[derive(Debug, Clone)]
enum Op {
    Initiate { name: usize, who: u8, price: Amount, deposit: Amount },
    Contribute { name: usize, who: u8, amount: Amount, after_deadline: bool },
    Cancel { name: usize, after_deadline: bool, failing: Option<u8> },
    Process { name: usize, deploy_ok: bool },
    Retry { who: u8 },
}

fn contributor(who: u8) -> Address {
    Address::new(format!("member-{}", who))
}

/// Strategy for generating valid amounts
fn amount_strategy() -> impl Strategy<Value = Amount> {
    (1u64..1_000_000u64).prop_map(Amount::from)
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        1 => (0..NAMES.len(), 0u8..8, 1u64..10, amount_strategy()).prop_map(
            |(name, who, price, deposit)| Op::Initiate {
                name,
                who,
                price: Amount::from(price),
                deposit
            }
        ),
        4 => (0..NAMES.len(), 0u8..8, amount_strategy(), any::<bool>()).prop_map(
            |(name, who, amount, after_deadline)| Op::Contribute {
                name,
                who,
                amount,
                after_deadline
            }
        ),
        1 => (0..NAMES.len(), any::<bool>(), proptest::option::of(0u8..8)).prop_map(
            |(name, after_deadline, failing)| Op::Cancel {
                name,
                after_deadline,
                failing
            }
        ),
        1 => (0..NAMES.len(), any::<bool>())
            .prop_map(|(name, deploy_ok)| Op::Process { name, deploy_ok }),
        1 => (0u8..8).prop_map(|who| Op::Retry { who }),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Property: custody is conserved under arbitrary interleavings
    #[test]
    fn prop_custody_conserved(ops in prop::collection::vec(op_strategy(), 1..60)) {
        let mut machine = CrowdfundStateMachine::new(Config { member_limit: 5 });
        let before = deadline() - Duration::days(1);

        // Value received from and returned to each party, tracked outside the machine
        let mut deposited: Amount = 0;
        let mut returned: Amount = 0;
        let mut forwarded: Amount = 0;

        for op in ops {
            match op {
                Op::Initiate { name, who, price, deposit } => {
                    if machine
                        .initiate(&contributor(who), params(NAMES[name], price), deposit, before)
                        .is_ok()
                    {
                        deposited += deposit;
                    }
                }
                Op::Contribute { name, who, amount, after_deadline } => {
                    let id = campaign_id(NAMES[name]);
                    let now = if after_deadline { deadline() } else { before };
                    let existing = machine.has_contributed(&id, &contributor(who));
                    if machine.contribute(&contributor(who), &id, amount, now).is_ok() {
                        // Late contributions only top up existing entries
                        prop_assert!(existing || !after_deadline);
                        deposited += amount;
                    }
                }
                Op::Cancel { name, after_deadline, failing } => {
                    let now = if after_deadline { deadline() } else { before };
                    let result = machine.cancel_with(&campaign_id(NAMES[name]), now, |to, _| {
                        if failing.map(contributor).as_ref() == Some(to) {
                            Err("rejected".to_string())
                        } else {
                            Ok(())
                        }
                    });
                    match result {
                        Ok(outcomes) => {
                            prop_assert!(after_deadline);
                            returned += outcomes
                                .iter()
                                .filter(|o| o.is_success())
                                .map(|o| o.amount)
                                .sum::<Amount>();
                        }
                        Err(Error::OpenFund(_)) => {
                            prop_assert!(!after_deadline);
                        }
                        Err(_) => {}
                    }
                }
                Op::Process { name, deploy_ok } => {
                    let mut treasury = 0;
                    let result = machine.process_with(&campaign_id(NAMES[name]), |plan| {
                        treasury = plan.treasury;
                        if deploy_ok {
                            Ok(Address::new(format!("group-{}", NAMES[name])))
                        } else {
                            Err("reverted".to_string())
                        }
                    });
                    if result.is_ok() {
                        forwarded += treasury;
                    }
                }
                Op::Retry { who } => {
                    if let Ok(batch) = machine.begin_refund_retry(&contributor(who)) {
                        let outcomes: Vec<_> = batch
                            .entries
                            .iter()
                            .map(|(addr, amount)| {
                                crowdfund_core::RefundOutcome::succeeded(addr.clone(), *amount)
                            })
                            .collect();
                        machine.settle_refunds(batch.batch_id, &outcomes).unwrap();
                        returned += batch.total();
                    }
                }
            }

            prop_assert!(machine.check_invariants().is_ok());
            prop_assert_eq!(machine.custody(), deposited - returned - forwarded);
        }
    }

    /// Property: repeat contributions accumulate onto one entry
    #[test]
    fn prop_contributions_accumulate(
        contributions in prop::collection::vec((0u8..4, amount_strategy()), 1..40)
    ) {
        let mut machine = CrowdfundStateMachine::default();
        let id = machine
            .initiate(&contributor(0), params("ALPHA", 3), 1, deadline() - Duration::days(1))
            .unwrap();

        let mut expected: HashMap<Address, Amount> = HashMap::new();
        expected.insert(contributor(0), 1);
        let mut order = vec![contributor(0)];

        for (who, amount) in contributions {
            let addr = contributor(who);
            machine.contribute(&addr, &id, amount, deadline() - Duration::days(1)).unwrap();
            if !expected.contains_key(&addr) {
                order.push(addr.clone());
            }
            *expected.entry(addr).or_insert(0) += amount;
        }

        let view = machine.get_crowdfund(&id).unwrap();
        prop_assert_eq!(&view.contributors, &order);
        for (addr, amount) in view.contributors.iter().zip(&view.contributions) {
            prop_assert_eq!(expected[addr], *amount);
        }
        prop_assert_eq!(view.total(), machine.custody());
    }

    /// Property: cancel disburses each recorded amount exactly once
    #[test]
    fn prop_cancel_refunds_exactly_once(
        contributions in prop::collection::vec((0u8..6, amount_strategy()), 0..30)
    ) {
        let mut machine = CrowdfundStateMachine::default();
        let id = machine
            .initiate(&contributor(0), params("BETA", 2), 10, deadline() - Duration::days(1))
            .unwrap();
        for (who, amount) in &contributions {
            machine
                .contribute(&contributor(*who), &id, *amount, deadline() - Duration::days(1))
                .unwrap();
        }
        let recorded = machine.get_crowdfund(&id).unwrap();

        let mut paid: HashMap<Address, (usize, Amount)> = HashMap::new();
        machine
            .cancel_with(&id, deadline(), |to, amount| {
                let entry = paid.entry(to.clone()).or_insert((0, 0));
                entry.0 += 1;
                entry.1 += amount;
                Ok(())
            })
            .unwrap();

        prop_assert_eq!(paid.len(), recorded.contributors.len());
        for (addr, amount) in recorded.contributors.iter().zip(&recorded.contributions) {
            prop_assert_eq!(paid[addr], (1, *amount));
        }
        prop_assert_eq!(machine.custody(), 0);
        prop_assert_eq!(machine.get_crowdfund(&id), Err(Error::NoSuchCampaign(id)));
    }

    /// Property: share counts are floor(contribution / unit price)
    #[test]
    fn prop_share_allocation(
        price in 1u64..1_000,
        contributions in prop::collection::vec((0u8..6, amount_strategy()), 0..20)
    ) {
        let price = Amount::from(price);
        let mut machine = CrowdfundStateMachine::default();
        let id = machine
            .initiate(&contributor(0), params("GAMMA", price), price, deadline() - Duration::days(1))
            .unwrap();
        for (who, amount) in &contributions {
            machine
                .contribute(&contributor(*who), &id, *amount, deadline() - Duration::days(1))
                .unwrap();
        }
        let view = machine.get_crowdfund(&id).unwrap();

        let plan = machine.begin_process(&id).unwrap();
        prop_assert_eq!(&plan.members, &view.contributors);
        for (shares, amount) in plan.shares.iter().zip(&view.contributions) {
            prop_assert_eq!(*shares, amount / price);
        }
        prop_assert_eq!(plan.treasury, view.total());
        prop_assert!(plan.total_shares() * price <= plan.treasury);
    }
}
