//! AI spend accounting: model pricing and the monthly budget governor.

pub mod governor;
pub mod pricing;

pub use governor::{BudgetCheck, BudgetStats, BudgetStatus, CostGovernor, CostGovernorConfig};
pub use pricing::{default_model_prices, ModelPricing, PriceTable};
