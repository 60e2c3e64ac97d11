use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use strum::{AsRefStr, Display, EnumIter, EnumString, IntoEnumIterator};

use crate::calendar::{start_of_day, start_of_month};
use crate::error::{Error, ErrorDetails};

/// Subscription tier, ordered from least to most privileged
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Default,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum PlanTier {
    #[default]
    #[serde(alias = "free")]
    Free,
    #[serde(alias = "pro")]
    Pro,
    #[serde(alias = "agency", alias = "TEAM", alias = "team")]
    #[strum(to_string = "AGENCY", serialize = "TEAM")]
    Agency,
    #[serde(alias = "enterprise")]
    Enterprise,
}

impl PlanTier {
    pub fn can_access(&self, capability: Capability) -> bool {
        *self >= capability.required_tier()
    }
}

/// Plan-gated capabilities that are not counted usage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display, EnumIter, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Capability {
    WhiteLabel,
    ApiAccess,
    TeamSeats,
    UnlimitedStrategies,
}

impl Capability {
    pub fn required_tier(&self) -> PlanTier {
        match self {
            Capability::WhiteLabel | Capability::ApiAccess | Capability::TeamSeats => {
                PlanTier::Agency
            }
            Capability::UnlimitedStrategies => PlanTier::Pro,
        }
    }
}

/// A counted, plan-limited action
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
pub enum Feature {
    /// Strategies generated this calendar month
    Strategies,
    /// PDF exports this calendar month
    Exports,
    /// Saved results, all time
    SavedItems,
    /// AI insights generated today
    AiInsights,
}

impl Feature {
    /// Start of the period usage is counted over, or `None` for all-time counts
    pub fn counted_since(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Feature::Strategies | Feature::Exports => Some(start_of_month(now)),
            Feature::SavedItems => None,
            Feature::AiInsights => Some(start_of_day(now)),
        }
    }
}

/// A numeric ceiling; `-1` on the wire means unlimited
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limit {
    Unlimited,
    Capped(u64),
}

impl Limit {
    pub fn as_i64(&self) -> i64 {
        match self {
            Limit::Unlimited => -1,
            Limit::Capped(n) => i64::try_from(*n).unwrap_or(i64::MAX),
        }
    }

    /// What is left after `used`, never below zero
    pub fn remaining(&self, used: u64) -> Limit {
        match self {
            Limit::Unlimited => Limit::Unlimited,
            Limit::Capped(n) => Limit::Capped(n.saturating_sub(used)),
        }
    }

    /// Whether `additional` more uses fit on top of `used`
    pub fn allows(&self, used: u64, additional: u64) -> bool {
        match self {
            Limit::Unlimited => true,
            Limit::Capped(n) => used.saturating_add(additional) <= *n,
        }
    }

    /// A zero ceiling means the feature is not part of the plan
    pub fn is_available(&self) -> bool {
        *self != Limit::Capped(0)
    }
}

impl Serialize for Limit {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.as_i64())
    }
}

impl<'de> Deserialize<'de> for Limit {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = i64::deserialize(deserializer)?;
        match value {
            -1 => Ok(Limit::Unlimited),
            n if n >= 0 => Ok(Limit::Capped(n as u64)),
            n => Err(serde::de::Error::custom(format!(
                "invalid limit {n}: expected -1 (unlimited) or a non-negative number"
            ))),
        }
    }
}

/// Ceilings for one plan tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlanLimits {
    pub strategies_per_month: Limit,
    pub exports_per_month: Limit,
    pub saved_items: Limit,
    pub daily_ai_insights: Limit,
    pub team_members: Limit,
    pub api_calls: Limit,
    pub white_label: bool,
}

impl PlanLimits {
    pub fn limit_for(&self, feature: Feature) -> Limit {
        match feature {
            Feature::Strategies => self.strategies_per_month,
            Feature::Exports => self.exports_per_month,
            Feature::SavedItems => self.saved_items,
            Feature::AiInsights => self.daily_ai_insights,
        }
    }

    pub fn default_for(tier: PlanTier) -> Self {
        match tier {
            PlanTier::Free => Self {
                strategies_per_month: Limit::Capped(5),
                exports_per_month: Limit::Capped(5),
                saved_items: Limit::Capped(3),
                daily_ai_insights: Limit::Capped(10),
                team_members: Limit::Capped(1),
                api_calls: Limit::Capped(0),
                white_label: false,
            },
            PlanTier::Pro => Self {
                strategies_per_month: Limit::Unlimited,
                exports_per_month: Limit::Unlimited,
                saved_items: Limit::Unlimited,
                daily_ai_insights: Limit::Unlimited,
                team_members: Limit::Capped(1),
                api_calls: Limit::Capped(0),
                white_label: false,
            },
            PlanTier::Agency => Self {
                strategies_per_month: Limit::Unlimited,
                exports_per_month: Limit::Unlimited,
                saved_items: Limit::Unlimited,
                daily_ai_insights: Limit::Unlimited,
                team_members: Limit::Capped(10),
                api_calls: Limit::Capped(10_000),
                white_label: true,
            },
            PlanTier::Enterprise => Self {
                strategies_per_month: Limit::Unlimited,
                exports_per_month: Limit::Unlimited,
                saved_items: Limit::Unlimited,
                daily_ai_insights: Limit::Unlimited,
                team_members: Limit::Unlimited,
                api_calls: Limit::Unlimited,
                white_label: true,
            },
        }
    }
}

/// Limits of every tier: built-in defaults with configured overrides
#[derive(Debug, Clone)]
pub struct PlanLimitsTable {
    limits: HashMap<PlanTier, PlanLimits>,
}

impl Default for PlanLimitsTable {
    fn default() -> Self {
        Self::new(&HashMap::new())
    }
}

impl PlanLimitsTable {
    pub fn new(overrides: &HashMap<PlanTier, PlanLimits>) -> Self {
        let limits = PlanTier::iter()
            .map(|tier| {
                let limits = overrides
                    .get(&tier)
                    .copied()
                    .unwrap_or_else(|| PlanLimits::default_for(tier));
                (tier, limits)
            })
            .collect();
        Self { limits }
    }

    pub fn get(&self, tier: PlanTier) -> PlanLimits {
        self.limits
            .get(&tier)
            .copied()
            .unwrap_or_else(|| PlanLimits::default_for(tier))
    }
}

pub fn parse_feature(feature: &str) -> Result<Feature, Error> {
    feature.parse().map_err(|_| {
        Error::new(ErrorDetails::UnknownFeature {
            feature: feature.to_string(),
        })
    })
}

pub fn parse_plan_tier(tier: &str) -> Result<PlanTier, Error> {
    tier.parse().map_err(|_| {
        Error::new(ErrorDetails::UnknownPlanTier {
            tier: tier.to_string(),
        })
    })
}
