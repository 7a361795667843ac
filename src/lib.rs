//! # Repo Explainer
//!
//! A map/reduce repository analysis engine. A repository (local path or git
//! URL) is crawled, every source file is summarized by an LLM, summaries are
//! reduced per folder and per project, and the result is enriched with a
//! project-type classification, monorepo service discovery, a canonical
//! database schema folded from SQL migrations, and a secrets inventory.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌────────────┐   ┌──────────────┐
//! │ Crawler  │──▶│ Chunker  │──▶│ LLMAdapter │──▶│ folder/proj  │
//! │ +redact  │   │          │   │ +RateLimit │   │   reduce     │
//! └──────────┘   └──────────┘   └─────┬──────┘   └──────┬───────┘
//!                                     │ Cache           │
//!                   ┌─────────────────┴─────────────────┤
//!                   ▼                                   ▼
//!            ┌─────────────┐                   ┌────────────────┐
//!            │ DDL reducer │                   │ services/secrets│
//!            └──────┬──────┘                   └───────┬────────┘
//!                   └──────────────┬───────────────────┘
//!                                  ▼
//!                        ProgressBus (NDJSON)
//!                         │              │
//!                    ┌────▼───┐     ┌────▼────┐
//!                    │  CLI   │     │  HTTP   │
//!                    │ (rex)  │     │ (axum)  │
//!                    └────────┘     └─────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! rex analyze ./my-service             # human progress, JSON result on stdout
//! rex analyze https://github.com/o/r --json
//! rex schema ./db/migrations --format erd
//! rex cache clear --kind file
//! rex serve                            # POST /analyze streams NDJSON
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`crawler`] | Gitignore-aware repository walk |
//! | [`chunk`] | Token-bounded text chunking |
//! | [`llm`] | Provider seam and typed analysis prompts |
//! | [`rate_limit`] | Per-minute / per-day request limiter |
//! | [`cache`] | Content-hashed summary cache |
//! | [`ddl`] | Migration fold into a canonical schema |
//! | [`orchestrator`] | The staged pipeline |
//! | [`progress`] | Progress events and reporters |
//! | [`traits`] | Pluggable detection / discovery strategies |
//! | [`detect`], [`services`], [`secrets`] | Built-in strategies |
//! | [`connector_git`] | Remote repository checkout |
//! | [`server`] | HTTP streaming endpoint |

pub mod cache;
pub mod chunk;
pub mod config;
pub mod connector_git;
pub mod context;
pub mod crawler;
pub mod ddl;
pub mod detect;
pub mod error;
pub mod llm;
pub mod models;
pub mod orchestrator;
pub mod progress;
pub mod rate_limit;
pub mod redact;
pub mod secrets;
pub mod server;
pub mod services;
pub mod traits;
