//! Paginated fetching over a resolved window.
//!
//! ```text
//!   page loop ──► fetch_page ──ok──► collect items, follow next_page_token
//!                    │
//!                    ├─ SourceAuthExpired ─► refresh once, retry same page
//!                    ├─ InvalidCursor (cursor window) ─► drop items, restart
//!                    │                                   from fallback window once
//!                    └─ anything else ─► propagate
//! ```
//!
//! Each recovery path spends from its own [`RetryBudget`] of one, so a cycle
//! makes at most one fallback fetch and at most one token refresh.

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{Result, SyncError};
use crate::models::CursorPosition;
use crate::traits::{AccessToken, AuthProvider, PageRequest, SourceClient};
use crate::window::{fallback_window, CursorShape, RequestWindow, Resolution, WindowPolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryBudget {
    remaining: u32,
}

impl RetryBudget {
    pub fn new(attempts: u32) -> Self {
        Self {
            remaining: attempts,
        }
    }

    /// Consume one attempt; false once exhausted.
    pub fn try_spend(&mut self) -> bool {
        if self.remaining == 0 {
            return false;
        }
        self.remaining -= 1;
        true
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FetchOutcome {
    pub items: Vec<Value>,
    /// Cursor to persist on success. `None` leaves the stored cursor alone.
    pub next_cursor: Option<CursorPosition>,
    pub used_fallback: bool,
    pub pages: u64,
    /// Window actually fetched (the fallback window if one was used).
    pub window: RequestWindow,
}

pub struct IncrementalFetcher<'a> {
    auth: &'a dyn AuthProvider,
    client: &'a dyn SourceClient,
}

impl<'a> IncrementalFetcher<'a> {
    pub fn new(auth: &'a dyn AuthProvider, client: &'a dyn SourceClient) -> Self {
        Self { auth, client }
    }

    /// Fetch every page of `resolution.window`.
    ///
    /// `cycle_start` is the watermark persisted for time-based sources; it
    /// must be captured before the first request.
    pub async fn fetch(
        &self,
        source_id: &str,
        policy: &WindowPolicy,
        resolution: &Resolution,
        cycle_start: DateTime<Utc>,
    ) -> Result<FetchOutcome> {
        let mut token: AccessToken = self.auth.get_valid_access_token(source_id).await?;
        let mut auth_budget = RetryBudget::new(1);
        let mut fallback_budget = RetryBudget::new(1);

        let mut window = resolution.window.clone();
        let mut items: Vec<Value> = Vec::new();
        let mut page_token: Option<String> = None;
        let mut cursor_hint: Option<String> = None;
        let mut used_fallback = false;
        let mut pages: u64 = 0;

        loop {
            let request = PageRequest {
                source_id,
                window: &window,
                page_token: page_token.as_deref(),
                access_token: &token,
            };

            let result = self.client.fetch_page(&request).await;
            let page = match result {
                Ok(page) => page,
                Err(SyncError::SourceAuthExpired) if auth_budget.try_spend() => {
                    warn!(source_id, "access token rejected, refreshing");
                    token = self.auth.refresh_access_token(source_id).await?;
                    continue;
                }
                Err(SyncError::InvalidCursor(reason))
                    if window.is_cursor() && fallback_budget.try_spend() =>
                {
                    warn!(source_id, %reason, "cursor rejected, falling back to full window");
                    window = fallback_window(cycle_start, policy);
                    items.clear();
                    page_token = None;
                    cursor_hint = None;
                    used_fallback = true;
                    continue;
                }
                Err(e) => return Err(e),
            };

            pages += 1;
            debug!(source_id, page = pages, items = page.items.len(), "fetched page");
            items.extend(page.items);
            if page.next_cursor_hint.is_some() {
                cursor_hint = page.next_cursor_hint;
            }

            match page.next_page_token {
                Some(next) => page_token = Some(next),
                None => break,
            }
        }

        let next_cursor = match policy.shape {
            CursorShape::Token => cursor_hint.map(|token| CursorPosition::Token { token }),
            CursorShape::Watermark => Some(CursorPosition::Watermark { time: cycle_start }),
        };

        Ok(FetchOutcome {
            items,
            next_cursor,
            used_fallback,
            pages,
            window,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::Page;
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};
    use serde_json::json;
    use std::sync::Mutex;

    use crate::window::{resolve, Granularity};

    struct StaticAuth {
        refreshes: Mutex<u32>,
        refresh_fails: bool,
    }

    impl StaticAuth {
        fn new() -> Self {
            Self {
                refreshes: Mutex::new(0),
                refresh_fails: false,
            }
        }
    }

    #[async_trait]
    impl AuthProvider for StaticAuth {
        async fn get_valid_access_token(&self, _source_id: &str) -> Result<AccessToken> {
            Ok(AccessToken::new("stale"))
        }

        async fn refresh_access_token(&self, source_id: &str) -> Result<AccessToken> {
            *self.refreshes.lock().unwrap() += 1;
            if self.refresh_fails {
                return Err(SyncError::AuthReauthRequired(source_id.to_string()));
            }
            Ok(AccessToken::new("fresh"))
        }
    }

    /// Serves two pages; rejects cursors and stale tokens as configured.
    struct Calendar {
        reject_cursor: bool,
        reject_stale: bool,
        requests: Mutex<Vec<RequestWindow>>,
    }

    impl Calendar {
        fn new(reject_cursor: bool, reject_stale: bool) -> Self {
            Self {
                reject_cursor,
                reject_stale,
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl SourceClient for Calendar {
        async fn fetch_page(&self, request: &PageRequest<'_>) -> Result<Page> {
            self.requests.lock().unwrap().push(request.window.clone());
            if self.reject_stale && request.access_token.secret() == "stale" {
                return Err(SyncError::SourceAuthExpired);
            }
            if self.reject_cursor && request.window.is_cursor() {
                return Err(SyncError::InvalidCursor("410 Gone".into()));
            }
            Ok(match request.page_token {
                None => Page {
                    items: vec![json!({"id": "e1"})],
                    next_page_token: Some("p2".into()),
                    next_cursor_hint: None,
                },
                Some(_) => Page {
                    items: vec![json!({"id": "e2"})],
                    next_page_token: None,
                    next_cursor_hint: Some("sync-2".into()),
                },
            })
        }
    }

    fn policy() -> WindowPolicy {
        WindowPolicy {
            shape: CursorShape::Token,
            granularity: Granularity::Instant,
            lookback: Duration::days(30),
            overlap: Duration::zero(),
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap()
    }

    fn from_token() -> Resolution {
        resolve(
            Some(&CursorPosition::Token {
                token: "sync-1".into(),
            }),
            now(),
            &policy(),
            false,
        )
    }

    #[test]
    fn budget_spends_once() {
        let mut budget = RetryBudget::new(1);
        assert!(budget.try_spend());
        assert!(!budget.try_spend());
        assert_eq!(budget.remaining(), 0);
    }

    #[tokio::test]
    async fn follows_pages_and_returns_hint() {
        let auth = StaticAuth::new();
        let client = Calendar::new(false, false);
        let out = IncrementalFetcher::new(&auth, &client)
            .fetch("google_calendar:primary", &policy(), &from_token(), now())
            .await
            .unwrap();
        assert_eq!(out.items.len(), 2);
        assert_eq!(out.pages, 2);
        assert!(!out.used_fallback);
        assert_eq!(
            out.next_cursor,
            Some(CursorPosition::Token {
                token: "sync-2".into()
            })
        );
    }

    #[tokio::test]
    async fn invalid_cursor_falls_back_once() {
        let auth = StaticAuth::new();
        let client = Calendar::new(true, false);
        let out = IncrementalFetcher::new(&auth, &client)
            .fetch("google_calendar:primary", &policy(), &from_token(), now())
            .await
            .unwrap();
        assert!(out.used_fallback);
        assert_eq!(out.items.len(), 2);
        assert_eq!(out.window.start(), Some(now() - Duration::days(30)));

        let requests = client.requests.lock().unwrap();
        assert_eq!(requests.iter().filter(|w| w.is_cursor()).count(), 1);
        assert_eq!(requests.len(), 3);
    }

    /// Rejects every request with InvalidCursor, even range requests.
    struct AlwaysInvalid {
        calls: Mutex<u32>,
    }

    #[async_trait]
    impl SourceClient for AlwaysInvalid {
        async fn fetch_page(&self, _request: &PageRequest<'_>) -> Result<Page> {
            *self.calls.lock().unwrap() += 1;
            Err(SyncError::InvalidCursor("still invalid".into()))
        }
    }

    #[tokio::test]
    async fn fallback_terminates() {
        let auth = StaticAuth::new();
        let client = AlwaysInvalid {
            calls: Mutex::new(0),
        };
        let err = IncrementalFetcher::new(&auth, &client)
            .fetch("google_calendar:primary", &policy(), &from_token(), now())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidCursor(_)));
        assert_eq!(*client.calls.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn refreshes_token_once() {
        let auth = StaticAuth::new();
        let client = Calendar::new(false, true);
        let out = IncrementalFetcher::new(&auth, &client)
            .fetch("google_calendar:primary", &policy(), &from_token(), now())
            .await
            .unwrap();
        assert_eq!(out.items.len(), 2);
        assert_eq!(*auth.refreshes.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn failed_refresh_propagates() {
        let auth = StaticAuth {
            refreshes: Mutex::new(0),
            refresh_fails: true,
        };
        let client = Calendar::new(false, true);
        let err = IncrementalFetcher::new(&auth, &client)
            .fetch("google_calendar:primary", &policy(), &from_token(), now())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::AuthReauthRequired(_)));
    }

    #[tokio::test]
    async fn watermark_source_returns_cycle_start() {
        let auth = StaticAuth::new();
        let client = Calendar::new(false, false);
        let policy = WindowPolicy {
            shape: CursorShape::Watermark,
            granularity: Granularity::Instant,
            lookback: Duration::hours(24),
            overlap: Duration::minutes(5),
        };
        let resolution = resolve(None, now(), &policy, false);
        let out = IncrementalFetcher::new(&auth, &client)
            .fetch("oura:heartrate", &policy, &resolution, now())
            .await
            .unwrap();
        assert_eq!(
            out.next_cursor,
            Some(CursorPosition::Watermark { time: now() })
        );
    }
}
