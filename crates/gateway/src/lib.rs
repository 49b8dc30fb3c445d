//! Advisor Gateway Crate
//!
//! External integration gateway for the advisory platform: one choke point
//! between the application and the third-party providers it depends on
//! (banking aggregators, market-data feeds, fiscal and regulatory APIs, CRM
//! and communication tools).
//!
//! # Overview
//!
//! The gateway provides:
//! - Declarative provider configuration with explicit activation
//! - Per-provider credential lifecycle with single-flight OAuth2 refresh
//! - Fixed-window rate limiting (per minute and per UTC day)
//! - Short-TTL response caching for idempotent operations
//! - Timeouts with hard cancellation and capped exponential retries
//! - Partial-failure-tolerant parallel sync across providers
//! - Webhook intake feeding delayed, coalesced resyncs
//! - An append-only, bounded audit trail and per-provider health
//!
//! # Architecture
//!
//! ```text
//!   application            webhooks
//!        |                     |
//!        v                     v
//! +--------------+    +------------------+
//! |   Gateway    |    | WebhookProcessor |  (single consumer, fixed cadence)
//! +--------------+    +------------------+
//!        |                     |
//!        v                     v
//! +----------------------------------------+
//! |            SyncOrchestrator            |  (fan-out, wait for all, consolidate)
//! +----------------------------------------+
//!        |
//!        v
//! +----------------------------------------+     +---------------+
//! |            RequestExecutor             | --> | HealthMonitor |
//! +----------------------------------------+     +---------------+
//!   |        |          |          |       |
//!   v        v          v          v       v
//! Registry  Cache  RateLimiter Credentials AuditLog
//!                                |
//!                                v
//!                          HttpTransport  (reqwest)
//! ```
//!
//! # Example
//!
//! ```ignore
//! let gateway = Gateway::builder(GatewayConfig::from_file(path)?).build()?;
//! gateway.start();
//! gateway.activate("demo-bank", Credentials::new(client_id, secret)).await?;
//! let result = gateway.sync_all("client-42", None, false).await?;
//! gateway.stop().await;
//! ```

pub mod audit;
pub mod cache;
pub mod clock;
pub mod config;
pub mod credentials;
pub mod errors;
pub mod executor;
pub mod gateway;
pub mod health;
pub mod models;
pub mod registry;
pub mod store;
pub mod sync;
pub mod transport;
pub mod webhook;

pub use audit::{AuditLog, AuditQuery};
pub use cache::{cache_key, ResponseCache};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::GatewayConfig;
pub use credentials::{CredentialManager, OAuth2TokenClient, TokenGrant, TokenRefresher};
pub use errors::{GatewayError, Result, RetryClass};
pub use executor::{ExecuteOptions, RequestExecutor};
pub use gateway::{Gateway, GatewayBuilder, ProviderStatus};
pub use health::{HealthMonitor, HealthTracker};
pub use models::*;
pub use registry::{ProviderRegistry, RateLimiter, RateUsage};
pub use store::{FileStore, KeyValueStore, MemoryStore};
pub use sync::{ConsolidatedView, NoOpSyncReporter, SyncOrchestrator, SyncReporter};
pub use transport::{HttpTransport, ProviderRequest, ProviderResponse, ReqwestTransport, RequestBody};
pub use webhook::{Resync, WebhookConfig, WebhookProcessor};
