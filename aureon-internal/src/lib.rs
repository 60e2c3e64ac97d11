pub mod calendar; // UTC month and day boundaries
pub mod config; // Aureon config file
pub mod cost; // AI pricing and the monthly budget governor
pub mod endpoints; // API endpoints
pub mod error; // error handling
pub mod gateway_util; // app state, router and extractors
pub mod observability; // utilities for observability (logs, metrics, etc.)
pub mod rate_limit; // fixed-window rate limiting
pub mod storage; // usage ledger and plan persistence
mod testing;
pub mod usage_limit; // plan tiers and feature quotas

pub mod built_info {
    #![expect(clippy::allow_attributes)]
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}
