//! # Brainstormer
//!
//! A streaming keyword-suggestion service for brainstorming projects.
//!
//! Callers send one or more seed phrases; a language model proposes related
//! keywords, which are framed into lines, filtered, deduplicated against a
//! per-session history, and streamed back as server-sent events while the
//! model is still generating.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌────────────┐
//! │   HTTP   │──▶│ Orchestrator │──▶│  Language  │
//! │   SSE    │◀──│  passes/emit │◀──│   model    │
//! └──────────┘   └──────┬───────┘   └────────────┘
//!                       │
//!            ┌──────────┼───────────┐
//!            ▼          ▼           ▼
//!      ┌──────────┐ ┌────────┐ ┌──────────┐
//!      │ Projects │ │Sessions│ │  Framer  │
//!      │ (SQLite) │ │ (LRU)  │ │ + Filter │
//!      └──────────┘ └────────┘ └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! brainstormer init
//! brainstormer project create "Coffee shop" --owner alice
//! brainstormer suggest "espresso+pastry" --project <id> --owner alice
//! brainstormer serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`projects`] | Project ownership lookup |
//! | [`llm`] | Language model providers |
//! | [`session`] | Per-session dedupe registry |
//! | [`rate_limit`] | Per-caller request throttle |
//! | [`orchestrator`] | One request, end to end |
//! | [`server`] | HTTP/SSE server |
//!
//! Phrase parsing, instruction text, framing, filtering and the event
//! protocol live in the `brainstormer-core` crate.

pub mod config;
pub mod db;
pub mod llm;
pub mod migrate;
pub mod orchestrator;
pub mod projects;
pub mod rate_limit;
pub mod server;
pub mod session;
