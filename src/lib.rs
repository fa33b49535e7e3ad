//! # Tablegate
//!
//! An HTTP gateway over owner-scoped document tables.
//!
//! Users register named tables, upload files into them, and then list or
//! semantically search the documents those files produced. Every request is
//! scoped to the caller's identity (the bearer token) and to one table; the
//! gateway itself is stateless and delegates to three collaborators.
//!
//! ## Architecture
//!
//! ```text
//!                ┌──────────────┐
//!   request ───▶ │  Identity    │ 401
//!                └──────┬───────┘
//!                       ▼
//!   ┌──────────┐   ┌──────────┐   ┌──────────────┐
//!   │ Registry │◀──│ Handlers │──▶│  Embedding   │
//!   │ (SQLite) │   └────┬─────┘   │  (OpenAI)    │
//!   └──────────┘        ▼         └──────────────┘
//!                 ┌────────────┐   ┌──────────────┐
//!                 │   Query    │──▶│    Index     │
//!                 │  Builder   │   │ (Elastic)    │
//!                 └────────────┘   └──────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Table records, request/response bodies, hits |
//! | [`auth`] | Bearer identity and visibility rules |
//! | [`registry`] | Table registry over SQLite |
//! | [`embedding`] | Query embedding client |
//! | [`query`] | Listing and hybrid index queries |
//! | [`index`] | Document index client |
//! | [`ingest`] | Background document ingestion |
//! | [`upload`] | Upload storage |
//! | [`handlers`] | HTTP request handlers |
//! | [`server`] | Router, health check, composition root |
//! | [`error`] | HTTP error taxonomy |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod auth;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod handlers;
pub mod index;
pub mod ingest;
pub mod migrate;
pub mod models;
pub mod query;
pub mod registry;
pub mod server;
pub mod upload;
