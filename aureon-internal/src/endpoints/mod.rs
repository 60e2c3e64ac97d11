pub mod budget;
pub mod fallback;
pub mod plans;
pub mod rate_limit;
pub mod status;
pub mod usage;
