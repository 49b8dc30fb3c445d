//! Progress reporting for orchestrated syncs.
//!
//! The server forwards these to its SSE stream; library users that do not
//! care pass [`NoOpSyncReporter`].

use crate::models::{ProviderSyncOutcome, SyncResult};

pub trait SyncReporter: Send + Sync {
    /// A sync for `subject_id` is starting against `providers`.
    fn report_sync_start(&self, subject_id: &str, providers: &[String]);

    /// One provider settled (successfully or not).
    fn report_provider(&self, subject_id: &str, outcome: &ProviderSyncOutcome);

    /// The sync finished; every provider has settled.
    fn report_sync_complete(&self, result: &SyncResult);
}

#[derive(Debug, Clone, Default)]
pub struct NoOpSyncReporter;

impl SyncReporter for NoOpSyncReporter {
    fn report_sync_start(&self, _subject_id: &str, _providers: &[String]) {}

    fn report_provider(&self, _subject_id: &str, _outcome: &ProviderSyncOutcome) {}

    fn report_sync_complete(&self, _result: &SyncResult) {}
}
