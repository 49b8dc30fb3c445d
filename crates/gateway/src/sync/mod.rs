//! Orchestrated multi-provider sync.

mod mapping;
mod orchestrator;
mod reporter;

pub use mapping::{default_shape, map_entities, qualified_id};
pub use orchestrator::{compute_totals, ConsolidatedView, SyncConfig, SyncOrchestrator};
pub use reporter::{NoOpSyncReporter, SyncReporter};
