mod common;
mod governance_endpoints;
mod rate_limiting;
