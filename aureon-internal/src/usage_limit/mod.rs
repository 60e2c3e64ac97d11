pub mod limiter;
pub mod plans;

pub use limiter::{UsageCheck, UsageLimiter, UsageLimiterConfig, UsageSnapshot};
pub use plans::{
    parse_feature, parse_plan_tier, Capability, Feature, Limit, PlanLimits, PlanLimitsTable,
    PlanTier,
};

/// Usage limit decision
#[derive(Debug, PartialEq)]
pub enum UsageLimitDecision {
    Allow,
    Deny { reason: String },
}

