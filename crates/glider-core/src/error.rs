//! Error types for the sync engine.
//!
//! Every failure a cycle can hit maps to one [`SyncError`] variant. The
//! engine only needs to know the broad [`ErrorClass`] to decide whether an
//! error aborts the cycle, is absorbed locally, or just skips one item.

use std::time::Duration;

use thiserror::Error;

/// Result alias used throughout `glider-core`.
pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Error, Debug)]
pub enum SyncError {
    /// The auth provider has no usable refresh token; a human must re-consent.
    #[error("re-authentication required for source '{0}'")]
    AuthReauthRequired(String),

    /// The source API throttled the request.
    #[error("source rate limited (retry after {retry_after:?})")]
    SourceRateLimited { retry_after: Option<Duration> },

    /// The source API rejected the access token.
    #[error("source rejected access token")]
    SourceAuthExpired,

    /// Timeout, 5xx, or connection failure talking to the source API.
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    /// A stored continuation token was rejected by the source.
    #[error("invalid cursor: {0}")]
    InvalidCursor(String),

    /// A fetched item could not be normalized.
    #[error("malformed item: {0}")]
    MalformedItem(String),

    /// The record or cursor store could not complete an operation.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("unknown source: {0}")]
    UnknownSource(String),

    #[error("no client registered for source '{0}'")]
    MissingClient(String),
}

/// How a [`SyncError`] is handled by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Abort the cycle; the next scheduled cycle retries naturally.
    Transient,
    /// Abort the cycle; later cycles keep failing until re-consent.
    AuthExpired,
    /// Absorbed by the single full-resync fallback.
    InvalidCursor,
    /// Skip the item, count it, keep going.
    MalformedItem,
    /// Abort the cycle without advancing the watermark.
    StoreUnavailable,
    /// Wiring problem (unknown source, missing client).
    Configuration,
}

impl SyncError {
    pub fn class(&self) -> ErrorClass {
        match self {
            SyncError::SourceRateLimited { .. } | SyncError::SourceUnavailable(_) => {
                ErrorClass::Transient
            }
            SyncError::AuthReauthRequired(_) | SyncError::SourceAuthExpired => {
                ErrorClass::AuthExpired
            }
            SyncError::InvalidCursor(_) => ErrorClass::InvalidCursor,
            SyncError::MalformedItem(_) => ErrorClass::MalformedItem,
            SyncError::StoreUnavailable(_) => ErrorClass::StoreUnavailable,
            SyncError::UnknownSource(_) | SyncError::MissingClient(_) => {
                ErrorClass::Configuration
            }
        }
    }

    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }

    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        SyncError::MalformedItem(reason.into())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::StoreUnavailable(format!("state serialization failed: {}", e))
    }
}
