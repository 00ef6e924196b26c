// =============================================================================
// HTTP/JSON surface — router aggregation point
// =============================================================================

pub mod auth;
pub mod export;
pub mod metrics;
pub mod rest;
pub mod ws;

pub use rest::router;
