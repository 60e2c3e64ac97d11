use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};

use crate::error::{Error, ErrorDetails};

const MINUTE_MS: u64 = 60 * 1000;
const HOUR_MS: u64 = 60 * MINUTE_MS;

/// A fixed-window policy: at most `max_requests` per `window_ms`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitConfig {
    pub window_ms: u64,
    pub max_requests: u32,
}

impl RateLimitConfig {
    pub const fn new(window_ms: u64, max_requests: u32) -> Self {
        Self {
            window_ms,
            max_requests,
        }
    }

    pub fn verify(&self, name: &str) -> Result<(), Error> {
        if self.window_ms == 0 {
            return Err(Error::new(ErrorDetails::Config {
                message: format!("`rate_limits.policies.{name}.window_ms` must be greater than 0"),
            }));
        }
        if self.max_requests == 0 {
            return Err(Error::new(ErrorDetails::Config {
                message: format!(
                    "`rate_limits.policies.{name}.max_requests` must be greater than 0"
                ),
            }));
        }
        Ok(())
    }
}

/// Named group of routes sharing one rate limit policy
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EndpointClass {
    AdminRead,
    AdminWrite,
    AdminDelete,
    AuthLogin,
    AuthRegister,
    AuthReset,
    ApiRead,
    ApiWrite,
    StrategyGeneration,
}

impl EndpointClass {
    pub fn default_policy(&self) -> RateLimitConfig {
        match self {
            EndpointClass::AdminRead => RateLimitConfig::new(MINUTE_MS, 100),
            EndpointClass::AdminWrite => RateLimitConfig::new(MINUTE_MS, 30),
            EndpointClass::AdminDelete => RateLimitConfig::new(MINUTE_MS, 10),
            EndpointClass::AuthLogin => RateLimitConfig::new(15 * MINUTE_MS, 5),
            EndpointClass::AuthRegister => RateLimitConfig::new(HOUR_MS, 3),
            EndpointClass::AuthReset => RateLimitConfig::new(HOUR_MS, 3),
            EndpointClass::ApiRead => RateLimitConfig::new(MINUTE_MS, 100),
            EndpointClass::ApiWrite => RateLimitConfig::new(MINUTE_MS, 30),
            EndpointClass::StrategyGeneration => RateLimitConfig::new(HOUR_MS, 10),
        }
    }
}

/// The `[rate_limits]` section of the config file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GlobalRateLimitConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// How often expired windows are evicted from memory
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,

    /// Per-class overrides of the built-in policies
    #[serde(default)]
    pub policies: HashMap<EndpointClass, RateLimitConfig>,
}

fn default_enabled() -> bool {
    true
}

fn default_sweep_interval_ms() -> u64 {
    5 * MINUTE_MS
}

impl Default for GlobalRateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            sweep_interval_ms: default_sweep_interval_ms(),
            policies: HashMap::new(),
        }
    }
}

impl GlobalRateLimitConfig {
    pub fn verify(&self) -> Result<(), Error> {
        if self.sweep_interval_ms == 0 {
            return Err(Error::new(ErrorDetails::Config {
                message: "`rate_limits.sweep_interval_ms` must be greater than 0".to_string(),
            }));
        }
        for (class, policy) in &self.policies {
            policy.verify(class.as_ref())?;
        }
        Ok(())
    }

    /// The effective policy for `class`: the configured override or the built-in default
    pub fn policy(&self, class: EndpointClass) -> RateLimitConfig {
        self.policies
            .get(&class)
            .copied()
            .unwrap_or_else(|| class.default_policy())
    }
}
