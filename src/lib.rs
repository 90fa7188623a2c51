//! # Bookflow
//!
//! An asynchronous batch ingestion pipeline for documents.
//!
//! Bookflow takes locators (URLs or file paths) to PDF, EPUB, and raster
//! image documents, extracts their text, derives an embedding, records the
//! per-document lifecycle in SQLite, and exposes availability through a
//! TTL cache with durable popularity counters.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌────────────────┐   ┌───────────────────────┐
//! │ Locators │──▶│ IngestionQueue │──▶│ Worker pool           │
//! │ URL/file │   │ validate+admit │   │ fetch→extract→embed   │
//! └──────────┘   │ retry/backoff  │   │ →lifecycle→cache      │
//!                └────────────────┘   └──────────┬────────────┘
//!                                                │
//!                               ┌────────────────┤
//!                               ▼                ▼
//!                         ┌──────────┐     ┌───────────┐
//!                         │  SQLite  │     │ CacheStore │
//!                         │ docs/jobs│     │ TTL + hits │
//!                         └──────────┘     └───────────┘
//! ```
//!
//! ## Quick start
//!
//! ```bash
//! bkf init                                  # create database
//! bkf submit ./books/moby.pdf --principal me
//! bkf work --drain                          # process the queue
//! bkf status                                # queue counters
//! bkf get <document-id>                     # cached availability snapshot
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Retryable/non-retryable failure taxonomy |
//! | [`fetch`] | Locator validation and retrieval |
//! | [`queue`] | Durable job queue with retry and backoff |
//! | [`worker`] | Worker pool and per-document pipeline |
//! | [`extract`] | PDF / EPUB / OCR text extraction |
//! | [`ocr`] | Shared OCR engine with scoped shutdown |
//! | [`lifecycle`] | Document state machine (conditional writes) |
//! | [`cache`] | TTL cache with durable hit counters |
//! | [`embedding`] | Embedding backends and vector codecs |
//! | [`audit`] | Fire-and-forget audit trail |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod audit;
pub mod cache;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod lifecycle;
pub mod migrate;
pub mod models;
pub mod ocr;
pub mod queue;
pub mod worker;
