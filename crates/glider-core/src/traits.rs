//! Seams to the outside world: credentials and third-party APIs.
//!
//! The engine never talks HTTP itself. Callers implement these traits for
//! each provider and hand them to the engine through a [`ClientRegistry`]:
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │              ClientRegistry              │
//! │  ┌────────────┐ ┌──────────┐ ┌─────────┐ │
//! │  │AuthProvider│ │  Paged   │ │Snapshot │ │
//! │  │ (tokens)   │ │ clients  │ │ clients │ │
//! │  └────────────┘ └──────────┘ └─────────┘ │
//! └──────────────┬───────────────────────────┘
//!                ▼
//!          SyncEngine::run_cycle()
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::playback::PlaybackSnapshot;
use crate::window::RequestWindow;

/// A bearer token. `Debug` never prints the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(pub String);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn secret(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(***)")
    }
}

/// Supplies access tokens per source.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// A token believed to be valid; may refresh proactively.
    async fn get_valid_access_token(&self, source_id: &str) -> Result<AccessToken>;

    /// Force a refresh after the source rejected the current token.
    ///
    /// Returns [`SyncError::AuthReauthRequired`](crate::error::SyncError::AuthReauthRequired)
    /// when no refresh is possible.
    async fn refresh_access_token(&self, source_id: &str) -> Result<AccessToken>;
}

/// One page request against a paginated source.
#[derive(Debug, Clone)]
pub struct PageRequest<'a> {
    pub source_id: &'a str,
    pub window: &'a RequestWindow,
    pub page_token: Option<&'a str>,
    pub access_token: &'a AccessToken,
}

/// One page of raw items.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub items: Vec<Value>,
    /// Present while more pages remain.
    pub next_page_token: Option<String>,
    /// Continuation token for the next cycle, usually only on the last page.
    pub next_cursor_hint: Option<String>,
}

/// A source fetched page by page over a window.
///
/// Implementations map provider errors onto [`SyncError`](crate::error::SyncError):
/// 401 to `SourceAuthExpired`, 410 / rejected sync token to `InvalidCursor`,
/// 429 to `SourceRateLimited`, timeouts and 5xx to `SourceUnavailable`.
#[async_trait]
pub trait SourceClient: Send + Sync {
    async fn fetch_page(&self, request: &PageRequest<'_>) -> Result<Page>;
}

/// A source that only reports its current state.
#[async_trait]
pub trait SnapshotClient: Send + Sync {
    /// `Ok(None)` when nothing is playing.
    async fn poll_snapshot(
        &self,
        source_id: &str,
        access_token: &AccessToken,
    ) -> Result<Option<PlaybackSnapshot>>;
}

/// The client bound to one source.
#[derive(Clone)]
pub enum SourceHandle {
    Paged(Arc<dyn SourceClient>),
    Snapshot(Arc<dyn SnapshotClient>),
}

/// Registry of the auth provider and per-source clients.
///
/// # Example
///
/// ```rust
/// use glider_core::traits::ClientRegistry;
///
/// let registry = ClientRegistry::new();
/// // registry.with_auth(Arc::new(MyTokens)).register_paged("oura:heartrate", Arc::new(MyOura));
/// assert!(registry.is_empty());
/// ```
#[derive(Clone, Default)]
pub struct ClientRegistry {
    auth: Option<Arc<dyn AuthProvider>>,
    clients: HashMap<String, SourceHandle>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_auth(mut self, auth: Arc<dyn AuthProvider>) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn register_paged(mut self, source_id: &str, client: Arc<dyn SourceClient>) -> Self {
        self.clients
            .insert(source_id.to_string(), SourceHandle::Paged(client));
        self
    }

    pub fn register_snapshot(mut self, source_id: &str, client: Arc<dyn SnapshotClient>) -> Self {
        self.clients
            .insert(source_id.to_string(), SourceHandle::Snapshot(client));
        self
    }

    pub fn auth(&self) -> Option<Arc<dyn AuthProvider>> {
        self.auth.clone()
    }

    pub fn find(&self, source_id: &str) -> Option<&SourceHandle> {
        self.clients.get(source_id)
    }

    /// Registered source ids, sorted.
    pub fn source_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.clients.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }
}
