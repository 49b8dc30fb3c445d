//! Error types and retry classification for the gateway.
//!
//! This module provides:
//! - [`GatewayError`]: The main error enum for every gateway operation
//! - [`RetryClass`]: Classification for determining retry behavior

mod retry;

pub use retry::RetryClass;

use thiserror::Error;

/// Type alias for Result using the gateway error type.
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Errors that can occur while talking to external providers.
///
/// Each variant is classified into a [`RetryClass`] via the
/// [`retry_class`](Self::retry_class) method, which the request executor uses
/// to decide whether a failed attempt is retried locally.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// No provider is registered under this id.
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    /// The provider does not declare the requested operation.
    #[error("Unknown operation '{operation}' for provider {provider}")]
    UnknownOperation { provider: String, operation: String },

    /// The provider exists but has not been activated (or was deactivated).
    #[error("Provider inactive: {0}")]
    ProviderInactive(String),

    /// The provider's quota window is exhausted. Refused before any network call.
    #[error("Rate limited: {provider}")]
    RateLimited { provider: String },

    /// Credentials are missing or the token refresh failed.
    #[error("Authentication failed for {provider}: {message}")]
    Auth { provider: String, message: String },

    /// The provider answered with a non-success status code.
    #[error("Upstream error from {provider}: HTTP {status}")]
    Upstream {
        provider: String,
        status: u16,
        message: Option<String>,
    },

    /// The call did not complete within its timeout and was cancelled.
    #[error("Timeout: {provider}")]
    Timeout { provider: String },

    /// A sync for the same subject is already running.
    #[error("Sync already in progress for subject {0}")]
    SyncInProgress(String),

    /// The connectivity probe run during activation failed.
    #[error("Activation failed for {provider}: {message}")]
    Activation { provider: String, message: String },

    /// The request never produced an HTTP response (DNS, TLS, connection reset).
    #[error("Transport error from {provider}: {message}")]
    Transport { provider: String, message: String },

    /// The persisted key-value store failed.
    #[error("Store error: {0}")]
    Store(String),

    /// Configuration could not be loaded or is invalid.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// A payload could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl GatewayError {
    /// Returns the retry classification for this error.
    ///
    /// - [`RetryClass::WithBackoff`]: timeouts, 5xx responses and transport
    ///   failures, retried inside the executor up to `max_retries`
    /// - [`RetryClass::Never`]: everything else, surfaced to the caller at once
    ///
    /// # Examples
    ///
    /// ```
    /// use advisor_gateway::errors::{GatewayError, RetryClass};
    ///
    /// let error = GatewayError::Timeout { provider: "demo-bank".to_string() };
    /// assert_eq!(error.retry_class(), RetryClass::WithBackoff);
    ///
    /// let error = GatewayError::RateLimited { provider: "demo-bank".to_string() };
    /// assert_eq!(error.retry_class(), RetryClass::Never);
    /// ```
    pub fn retry_class(&self) -> RetryClass {
        match self {
            Self::Timeout { .. } | Self::Transport { .. } => RetryClass::WithBackoff,
            Self::Upstream { status, .. } if *status >= 500 => RetryClass::WithBackoff,

            // Caller errors, pre-flight refusals and 4xx are surfaced immediately
            Self::UnknownProvider(_)
            | Self::UnknownOperation { .. }
            | Self::ProviderInactive(_)
            | Self::RateLimited { .. }
            | Self::Auth { .. }
            | Self::Upstream { .. }
            | Self::SyncInProgress(_)
            | Self::Activation { .. }
            | Self::Store(_)
            | Self::Config(_)
            | Self::Serialization(_) => RetryClass::Never,
        }
    }

    /// Stable, machine-readable kind used in sync errors and audit records.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnknownProvider(_) => "unknown_provider",
            Self::UnknownOperation { .. } => "unknown_operation",
            Self::ProviderInactive(_) => "provider_inactive",
            Self::RateLimited { .. } => "rate_limited",
            Self::Auth { .. } => "auth_error",
            Self::Upstream { .. } => "upstream_error",
            Self::Timeout { .. } => "timeout",
            Self::SyncInProgress(_) => "sync_in_progress",
            Self::Activation { .. } => "activation_error",
            Self::Transport { .. } => "transport_error",
            Self::Store(_) => "store_error",
            Self::Config(_) => "config_error",
            Self::Serialization(_) => "serialization_error",
        }
    }

    /// HTTP status carried by an upstream error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Upstream { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        Self::Store(err.to_string())
    }
}
