//! Resilient multi-account request plane for a proprietary lyrics API:
//! account pool rotation, a circuit breaker scaled to pool size, a
//! shared scraped bearer token, health checks, token-expiry monitoring,
//! and the request pipeline tying them together.

pub mod alerts;
pub mod bearer;
pub mod breaker;
pub mod config;
pub mod error;
pub mod events;
pub mod health;
pub mod jwt;
pub mod notifier;
pub mod pipeline;
pub mod pool;
pub mod scoring;
pub mod stats;
pub mod storefront;
pub mod token_monitor;

pub use error::CoreError;
