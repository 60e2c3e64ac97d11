use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::cost::CostGovernorConfig;
use crate::error::{Error, ErrorDetails};
use crate::rate_limit::GlobalRateLimitConfig;
use crate::storage::StorageConfig;
use crate::usage_limit::{PlanLimits, PlanTier, UsageLimiterConfig};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    pub bind_address: Option<SocketAddr>,
    #[serde(default)]
    pub debug: bool,
}

/// The whole config file. Every section is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub rate_limits: GlobalRateLimitConfig,
    #[serde(default)]
    pub cost_governor: CostGovernorConfig,
    #[serde(default)]
    pub usage_limits: UsageLimiterConfig,
    /// Per-tier overrides of the built-in plan limits
    #[serde(default)]
    pub plans: HashMap<PlanTier, PlanLimits>,
    #[serde(default)]
    pub storage: StorageConfig,
}

impl Config {
    pub async fn load_and_verify_from_path(path: &Path) -> Result<Config, Error> {
        let contents = tokio::fs::read_to_string(path).await.map_err(|e| {
            Error::new(ErrorDetails::Config {
                message: format!("Failed to read config file `{}`: {e}", path.display()),
            })
        })?;
        let config = Self::load_from_toml(&contents)?;
        config.verify()?;
        Ok(config)
    }

    /// Parse a config without verifying it. Errors name the offending key path.
    pub fn load_from_toml(contents: &str) -> Result<Config, Error> {
        let deserializer = toml::Deserializer::new(contents);
        serde_path_to_error::deserialize(deserializer).map_err(|e| {
            Error::new(ErrorDetails::Config {
                message: format!("Failed to parse config: {e}"),
            })
        })
    }

    pub fn verify(&self) -> Result<(), Error> {
        self.rate_limits.verify()?;
        self.cost_governor.verify()?;

        if self.usage_limits.max_cache_size == 0 {
            return Err(Error::new(ErrorDetails::Config {
                message: "`usage_limits.max_cache_size` must be greater than 0".to_string(),
            }));
        }

        if let StorageConfig::Sqlite { url } = &self.storage {
            if url.trim().is_empty() {
                return Err(Error::new(ErrorDetails::Config {
                    message: "`storage.url` must not be empty".to_string(),
                }));
            }
        }
        Ok(())
    }
}
