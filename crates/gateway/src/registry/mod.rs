//! Provider registry module.
//!
//! This module provides:
//! - Provider registration and activation state
//! - Fixed-window rate limiting per provider

mod rate_limiter;
#[allow(clippy::module_inception)]
mod registry;

pub use rate_limiter::{RateLimiter, RateUsage};
pub use registry::{ProviderRegistry, RegisteredProvider};
