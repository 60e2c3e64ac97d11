use crate::rate_limit::config::{EndpointClass, GlobalRateLimitConfig, RateLimitConfig};
use arc_swap::ArcSwap;
use dashmap::DashMap;
use std::sync::Arc;
use strum::IntoEnumIterator;

/// Store for the rate limit policy of every endpoint class
#[derive(Clone)]
pub struct RateLimiterStore {
    /// Map of endpoint class to its effective policy
    policies: Arc<DashMap<EndpointClass, Arc<RateLimitConfig>>>,

    /// Global rate limit configuration
    global_config: Arc<ArcSwap<GlobalRateLimitConfig>>,
}

impl RateLimiterStore {
    pub fn new(global_config: GlobalRateLimitConfig) -> Self {
        let store = Self {
            policies: Arc::new(DashMap::new()),
            global_config: Arc::new(ArcSwap::from_pointee(global_config)),
        };
        store.reload_policies();
        store
    }

    fn reload_policies(&self) {
        let global_config = self.global_config.load();
        for class in EndpointClass::iter() {
            self.policies
                .insert(class, Arc::new(global_config.policy(class)));
        }
    }

    /// Override the policy of one class at runtime
    pub fn update_policy(&self, class: EndpointClass, config: RateLimitConfig) {
        self.policies.insert(class, Arc::new(config));
    }

    /// Get the policy for an endpoint class
    pub fn get_policy(&self, class: EndpointClass) -> Arc<RateLimitConfig> {
        self.policies
            .get(&class)
            .map(|entry| Arc::clone(entry.value()))
            .unwrap_or_else(|| Arc::new(class.default_policy()))
    }

    /// Check if rate limiting is enabled globally
    pub fn is_enabled(&self) -> bool {
        self.global_config.load().enabled
    }

    pub fn sweep_interval_ms(&self) -> u64 {
        self.global_config.load().sweep_interval_ms
    }

    /// All effective policies, ordered by class
    pub fn list_policies(&self) -> Vec<(EndpointClass, RateLimitConfig)> {
        EndpointClass::iter()
            .map(|class| (class, *self.get_policy(class)))
            .collect()
    }
}
