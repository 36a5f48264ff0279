//! # HomeCase Digest
//!
//! Retrieves utility-consumption notices from the HomeCase tenant portal,
//! stores every notice once, and emails a formatted summary of each new one.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐   ┌──────────────┐   ┌──────────┐
//! │   Portal    │──▶│   Parser    │──▶│    Store     │──▶│ Notifier │
//! │ BFF / HTML  │   │ regex, pure │   │ SQLite / PG  │   │  (SMTP)  │
//! └─────────────┘   └─────────────┘   └──────────────┘   └──────────┘
//!        └────────────── ingest::run_pipeline ──────────────────┘
//! ```
//!
//! Messages are deduplicated by the SHA-256 of their text, so re-running
//! against the same portal content writes nothing and sends nothing.
//!
//! ## Quick Start
//!
//! ```bash
//! hcdigest init                      # create the messages table
//! hcdigest run                       # fetch, store and notify
//! hcdigest parse notice.txt          # show what the parser extracts
//! hcdigest history --limit 12        # list stored notices
//! ```
//!
//! `hcdigest run` exits with `0` when new data was stored, `2` when there
//! was nothing new, and `1` on failure.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and validation |
//! | [`error`] | Per-stage error types |
//! | [`models`] | Core data types |
//! | [`portal`] | Portal login and message retrieval |
//! | [`scrape`] | HTML and text extraction helpers |
//! | [`parse`] | Consumption value extraction |
//! | [`store`] | Idempotent storage backends |
//! | [`db`] | Store selection by URL |
//! | [`notify`] | Email composition |
//! | [`mail`] | SMTP transport |
//! | [`ingest`] | Pipeline orchestration |
//! | [`history`] | Stored message overview |
//! | [`logging`] | Tracing subscriber setup |

pub mod config;
pub mod db;
pub mod error;
pub mod history;
pub mod ingest;
pub mod logging;
pub mod mail;
pub mod models;
pub mod notify;
pub mod parse;
pub mod portal;
pub mod scrape;
pub mod store;
pub mod traits;
