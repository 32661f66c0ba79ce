//! Crowdfund Replay Binary
//!
//! Runs a JSON script of crowdfund operations against an in-memory network
//! and a manual clock, then prints the emitted notifications and the final
//! custody and group state.
//!
//! ```text
//! crowdfund-replay scripts/lifecycle.json
//! ```

use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use crowdfund_core::{campaign_id, Address, Amount, CampaignParams, Clock, ManualClock};
use serde::{Deserialize, Serialize};
use settlement::{
    drain_notifications, Config, CrowdfundEngine, CustodySnapshot, DeployedGroup, MockNetwork,
    SettlementGateway,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
struct Script {
    start: DateTime<Utc>,
    #[serde(default = "default_factory")]
    factory: String,
    member_limit: Option<usize>,
    steps: Vec<Step>,
}

fn default_factory() -> String {
    "forum-factory".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Step {
    Initiate {
        caller: String,
        name: String,
        symbol: String,
        unit_price: Amount,
        deadline: DateTime<Utc>,
        deposit: Amount,
        /// Hex-encoded deployment payload
        #[serde(default)]
        payload: String,
        target: Option<String>,
    },
    Contribute {
        caller: String,
        name: String,
        amount: Amount,
    },
    Advance {
        seconds: i64,
    },
    Cancel {
        name: String,
    },
    Process {
        name: String,
    },
    RetryRefund {
        contributor: String,
    },
    FailNextDeploy {
        #[serde(default = "one")]
        count: usize,
    },
    RejectTransfersTo {
        address: String,
    },
    AcceptTransfersTo {
        address: String,
    },
}

fn one() -> usize {
    1
}

#[derive(Debug, Serialize)]
struct Summary {
    custody: CustodySnapshot,
    balances: Vec<(String, Amount)>,
    groups: Vec<DeployedGroup>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let path = std::env::args()
        .nth(1)
        .context("usage: crowdfund-replay <script.json>")?;
    let content =
        std::fs::read_to_string(&path).with_context(|| format!("reading script {}", path))?;
    let script: Script =
        serde_json::from_str(&content).with_context(|| format!("parsing script {}", path))?;

    let mut config = if let Ok(config_path) = std::env::var("CROWDFUND_CONFIG") {
        info!("Loading config from: {}", config_path);
        Config::from_file(&config_path)?
    } else {
        Config::from_env()?
    };
    if let Some(limit) = script.member_limit {
        config.crowdfund.member_limit = limit;
    }

    let network = Arc::new(MockNetwork::new(script.factory.clone()));
    let clock = Arc::new(ManualClock::new(script.start));
    let gateway = SettlementGateway::new(network.clone(), network.clone());
    let engine = CrowdfundEngine::start(config, gateway, clock.clone())?;
    let mut notifications = engine.subscribe();

    let mut addresses = BTreeSet::new();
    let mut emitted = Vec::new();

    for (index, step) in script.steps.into_iter().enumerate() {
        let outcome: settlement::Result<String> = match step {
            Step::Initiate {
                caller,
                name,
                symbol,
                unit_price,
                deadline,
                deposit,
                payload,
                target,
            } => {
                let payload = hex::decode(payload.trim_start_matches("0x"))
                    .with_context(|| format!("step {}: payload is not hex", index))?;
                let params = CampaignParams {
                    target: Address::new(target.unwrap_or_else(|| script.factory.clone())),
                    unit_price,
                    deadline,
                    name,
                    symbol,
                    payload,
                };
                addresses.insert(caller.clone());
                engine
                    .initiate(&Address::new(caller), params, deposit)
                    .await
                    .map(|id| format!("campaign {}", id))
            }
            Step::Contribute {
                caller,
                name,
                amount,
            } => {
                addresses.insert(caller.clone());
                engine
                    .contribute(&Address::new(caller), &campaign_id(&name), amount)
                    .await
                    .map(|total| format!("contributor total {}", total))
            }
            Step::Advance { seconds } => {
                clock.advance(Duration::seconds(seconds));
                Ok(format!("clock at {}", clock.now()))
            }
            Step::Cancel { name } => engine.cancel(&campaign_id(&name)).await.map(|report| {
                format!(
                    "refunded {} to {} contributors, {} failed",
                    report.total_refunded(),
                    report.refunded.len(),
                    report.failed.len()
                )
            }),
            Step::Process { name } => engine
                .process(&campaign_id(&name))
                .await
                .map(|group| format!("group {}", group)),
            Step::RetryRefund { contributor } => engine
                .retry_refund(&Address::new(contributor))
                .await
                .map(|report| format!("refunded {}", report.total_refunded())),
            Step::FailNextDeploy { count } => {
                network.fail_next_deployments(count);
                Ok(format!("next {} deployments will revert", count))
            }
            Step::RejectTransfersTo { address } => {
                network.reject_transfers_to(&Address::new(address.clone()));
                Ok(format!("{} rejects transfers", address))
            }
            Step::AcceptTransfersTo { address } => {
                network.accept_transfers_to(&Address::new(address.clone()));
                Ok(format!("{} accepts transfers", address))
            }
        };

        match outcome {
            Ok(detail) => info!(step = index, "{}", detail),
            Err(e) => warn!(step = index, error = %e, "Step rejected"),
        }
        emitted.extend(drain_notifications(&mut notifications));
    }

    engine.check_invariants().await?;
    let custody = engine.custody().await?;

    emitted.extend(drain_notifications(&mut notifications));
    for notification in &emitted {
        println!("{}", notification.to_json()?);
    }

    let summary = Summary {
        custody,
        balances: addresses
            .into_iter()
            .map(|addr| {
                let balance = network.balance_of(&Address::new(addr.clone()));
                (addr, balance)
            })
            .collect(),
        groups: network.groups(),
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);

    engine.shutdown().await?;
    Ok(())
}
