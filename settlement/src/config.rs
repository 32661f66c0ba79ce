//! Configuration for the settlement engine

use serde::{Deserialize, Serialize};

/// Settlement engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Service name
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// Actor mailbox capacity (bounded for backpressure)
    pub mailbox_capacity: usize,

    /// Notification broadcast buffer; slow subscribers lag beyond this
    pub notification_capacity: usize,

    /// State machine configuration
    pub crowdfund: crowdfund_core::Config,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: "crowdfund-settlement".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            mailbox_capacity: 1000,
            notification_capacity: 256,
            crowdfund: crowdfund_core::Config::default(),
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config {
            crowdfund: crowdfund_core::Config::from_env()?,
            ..Config::default()
        };

        if let Ok(capacity) = std::env::var("CROWDFUND_MAILBOX_CAPACITY") {
            config.mailbox_capacity = capacity.parse().map_err(|e| {
                crate::Error::Config(format!("Invalid CROWDFUND_MAILBOX_CAPACITY: {}", e))
            })?;
        }

        if let Ok(capacity) = std::env::var("CROWDFUND_NOTIFICATION_CAPACITY") {
            config.notification_capacity = capacity.parse().map_err(|e| {
                crate::Error::Config(format!("Invalid CROWDFUND_NOTIFICATION_CAPACITY: {}", e))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject unusable settings
    pub fn validate(&self) -> crate::Result<()> {
        if self.mailbox_capacity == 0 {
            return Err(crate::Error::Config(
                "mailbox_capacity must be at least 1".to_string(),
            ));
        }
        if self.notification_capacity == 0 {
            return Err(crate::Error::Config(
                "notification_capacity must be at least 1".to_string(),
            ));
        }
        self.crowdfund
            .validate()
            .map_err(|e| crate::Error::Config(e.to_string()))
    }
}
