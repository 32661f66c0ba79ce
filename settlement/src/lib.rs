//! Crowdfund Settlement
//!
//! Runs the crowdfund state machine behind a single-writer actor and moves
//! value across the external boundary.
//!
//! # Architecture
//!
//! 1. **Mailbox**: Every operation is a message; the actor applies them in
//!    submission order
//! 2. **Staging**: `process` locks the campaign and hands a deployment plan
//!    to a spawned task; `cancel` retires the campaign and hands the refund
//!    batch to a spawned task
//! 3. **Gateway**: The task calls the group factory or value-transfer
//!    collaborator, which may fail or call back into the engine
//! 4. **Completion**: The outcome returns through the mailbox and is
//!    committed or reverted
//!
//! # Example
//!
//! ```no_run
//! use settlement::{Config, CrowdfundEngine, MockNetwork, SettlementGateway};
//! use crowdfund_core::SystemClock;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> settlement::Result<()> {
//!     let network = Arc::new(MockNetwork::new("forum-factory"));
//!     let gateway = SettlementGateway::new(network.clone(), network);
//!     let engine = CrowdfundEngine::start(Config::default(), gateway, Arc::new(SystemClock))?;
//!
//!     let mut notifications = engine.subscribe();
//!     // engine.initiate(...).await?;
//!
//!     engine.shutdown().await
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

pub mod actor;
pub mod config;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod metrics;
pub mod mock;

// Re-exports
pub use actor::{drain_notifications, CrowdfundHandle, CustodySnapshot, RefundReport};
pub use config::Config;
pub use engine::CrowdfundEngine;
pub use error::{Error, Result};
pub use gateway::{GatewayError, GroupFactory, SettlementGateway, ValueTransfer};
pub use metrics::Metrics;
pub use mock::{DeployedGroup, MockNetwork};
