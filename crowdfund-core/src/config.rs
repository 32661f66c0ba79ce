//! Configuration for the crowdfund state machine

use serde::{Deserialize, Serialize};

/// Default ceiling on distinct contributors per campaign
pub const DEFAULT_MEMBER_LIMIT: usize = 100;

/// State machine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Maximum distinct contributors per campaign, initiator included
    pub member_limit: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            member_limit: DEFAULT_MEMBER_LIMIT,
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
        let mut config = Config::default();

        if let Ok(limit) = std::env::var("CROWDFUND_MEMBER_LIMIT") {
            config.member_limit = limit.parse().map_err(|e| {
                crate::Error::Config(format!("Invalid CROWDFUND_MEMBER_LIMIT: {}", e))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject unusable settings
    pub fn validate(&self) -> crate::Result<()> {
        if self.member_limit == 0 {
            return Err(crate::Error::Config(
                "member_limit must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
