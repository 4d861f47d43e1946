//! # Glider Core
//!
//! Incremental, idempotent synchronization of personal data from
//! third-party APIs into a document store.
//!
//! This crate holds the storage-agnostic logic. It has no HTTP client and
//! no database driver; callers supply both through [`traits`] and
//! [`store`].
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`source`] | Source kinds and their fetch/ingest/window strategy |
//! | [`window`] | Request window resolution from the stored cursor |
//! | [`fetcher`] | Paginated fetching with auth retry and cursor fallback |
//! | [`normalize`] | Raw source JSON to keyed items |
//! | [`sink`] | Idempotent upsert / tombstone delete |
//! | [`dedup`] | Near-duplicate suppression across writers |
//! | [`playback`] | Snapshot-to-event detector |
//! | [`engine`] | One sync cycle per call |
//! | [`store`] | Record and cursor store traits, in-memory backend |

pub mod dedup;
pub mod engine;
pub mod error;
pub mod fetcher;
pub mod models;
pub mod normalize;
pub mod playback;
pub mod sink;
pub mod source;
pub mod store;
pub mod traits;
pub mod window;

pub use engine::{CycleOptions, SyncEngine};
pub use error::{ErrorClass, Result, SyncError};
