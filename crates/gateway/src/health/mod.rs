//! Provider health.
//!
//! This module provides:
//! - [`HealthTracker`]: current status per provider, updated by every call
//! - [`HealthMonitor`]: background probing of active providers

mod monitor;
mod tracker;

pub use monitor::HealthMonitor;
pub use tracker::{status_for_failure, HealthTracker};
