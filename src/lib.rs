//! # Glider
//!
//! Incremental, idempotent sync of personal data (calendar events,
//! listening history, health metrics) from third-party APIs into a local
//! SQLite document store.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────────────┐   ┌──────────┐
//! │ Source APIs  │──▶│      SyncEngine       │──▶│  SQLite   │
//! │ (your client │   │ window ─ fetch ─ sink │   │ records + │
//! │  impls)      │   │ dedup ─ playback      │   │ cursors   │
//! └──────────────┘   └──────────┬───────────┘   └──────────┘
//!                               │
//!                     ┌─────────┴─────────┐
//!                     ▼                   ▼
//!               ┌──────────┐        ┌───────────┐
//!               │   CLI    │        │ Scheduler │
//!               │ (glider) │        │ (tokio)   │
//!               └──────────┘        └───────────┘
//! ```
//!
//! The engine and its algorithms live in `glider-core`. This crate adds the
//! configuration file, the SQLite store, the scheduler, and the CLI.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite record and cursor store |
//! | [`ingest`] | One-shot sync of selected sources |
//! | [`scheduler`] | Per-source periodic loops |
//! | [`sources`] | `glider sources` listing |
//! | [`status`] | `glider status` / `glider reset` |

pub mod config;
pub mod db;
pub mod ingest;
pub mod migrate;
pub mod scheduler;
pub mod sources;
pub mod sqlite_store;
pub mod status;

pub use glider_core;
