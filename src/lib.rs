//! # Channel Harness
//!
//! Message ingestion from messaging-platform channels, incrementally or in
//! bulk, with lightweight enrichment and content-addressed document storage.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────────┐   ┌────────────────────┐
//! │  Platform   │──▶│  Channel Scanner │──▶│  Document Store    │
//! │  Client     │   │  cursor | naive  │   │  sha256-named files│
//! └─────────────┘   └────────┬─────────┘   └────────────────────┘
//!        ▲                   │
//!        │                   ▼
//!        │            ┌─────────────┐      ┌────────────────────┐
//!        └────────────│  Enricher   │─────▶│  Message Records   │
//!         resolve @tag│  @mentions  │      │  JSON / journal    │
//!                     └─────────────┘      └────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! chx resolve durov                          # print an entity handle
//! chx scan durov --download                  # full history, keep documents
//! chx scan durov --max-id 100                # ids <= 100, newest first
//! chx scan durov --newer-than 2024-01-01T00:00:00Z
//! chx scan-naive -1001857526185              # bot session fallback
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML / legacy JSON configuration |
//! | [`models`] | Messages, handles, bounds, records |
//! | [`error`] | Typed platform failures |
//! | [`platform`] | Platform capability trait and session setup |
//! | [`platform_gateway`] | HTTP gateway session |
//! | [`platform_memory`] | In-memory session |
//! | [`documents`] | Content-addressed document store |
//! | [`enrich`] | Mention-tag enrichment |
//! | [`scan`] | Cursor and naive scan strategies |
//! | [`journal`] | Append-only crash journal |
//! | [`sink`] | Live record output |
//! | [`ingest`] | Pipeline orchestration |
//! | [`export`] | Collection serialization |
//! | [`sources`] | Configuration health |

pub mod config;
pub mod documents;
pub mod enrich;
pub mod error;
pub mod export;
pub mod ingest;
pub mod journal;
pub mod models;
pub mod platform;
pub mod platform_gateway;
pub mod platform_memory;
pub mod scan;
pub mod sink;
pub mod sources;
