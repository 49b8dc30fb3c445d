mod credentials;
mod event;
mod provider;
mod record;
mod sync;

use std::collections::BTreeMap;

pub use credentials::{AuthHeaders, Credentials, TokenState};
pub use event::{DeadLetter, WebhookEvent, WebhookEventType};
pub use provider::{
    AuthScheme, EndpointTemplate, HttpMethod, ProviderCategory, ProviderConfig, Quota,
    ResponseShape,
};
pub use record::{ConnectionTest, HealthStatus, ProviderHealth, RequestRecord, RequestStatus};
pub use sync::{
    Account, EntityKind, EntitySet, Position, ProviderSyncOutcome, SyncError, SyncResult,
    SyncTotals, Transaction,
};

/// Type alias for provider identifier (e.g., "demo-bank").
pub type ProviderId = String;

/// Operation parameters. Ordered, so logically identical requests normalize
/// to the same representation.
pub type Params = BTreeMap<String, serde_json::Value>;
