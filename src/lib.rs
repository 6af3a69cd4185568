//! # Atlas
//!
//! A local-first knowledge ingestion queue.
//!
//! Podcasts, newsletters, articles and bookmarks are enqueued as jobs,
//! claimed in batches by a continuous runner, processed into content
//! records, and stored in a single SQLite file.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌──────────────┐   ┌──────────┐
//! │ enqueue  │──▶│  queue_jobs  │──▶│   Pipeline   │──▶│ content  │
//! │ (CLI)    │   │ status enum  │   │ claim+process│   │ records  │
//! └──────────┘   └──────┬───────┘   └──────┬───────┘   └──────────┘
//!                       │                  │
//!                ┌──────┴──────┐     ┌─────┴──────┐
//!                │ fallback    │     │  Runner    │
//!                │ sweep       │     │ (loop)     │
//!                └─────────────┘     └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! atlas init
//! atlas enqueue --type article --source hn --url https://example.com/post
//! atlas run --once
//! atlas stats
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Jobs, statuses, content records |
//! | [`queue`] | Queue store: enqueue, atomic claim, transitions |
//! | [`content`] | Content store |
//! | [`processor`] | Item processor trait and registry |
//! | [`pipeline`] | Batch processing with bounded concurrency |
//! | [`runner`] | Continuous runner |
//! | [`sweep`] | Fallback sweep over local assets |
//! | [`cleanup`] | Delete content by id |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod cleanup;
pub mod config;
pub mod content;
pub mod db;
pub mod error;
pub mod get;
pub mod migrate;
pub mod models;
pub mod pipeline;
pub mod processor;
pub mod queue;
pub mod queue_cmd;
pub mod runner;
pub mod stats;
pub mod sweep;
