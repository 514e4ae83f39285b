//! # Brainstormer Core
//!
//! Shared, I/O-free logic for Brainstormer's streaming keyword suggestions:
//! phrase parsing, prompt composition, token framing, suggestion filtering,
//! wire events, and the language-model capability trait.
//!
//! This crate contains no tokio, sqlx, HTTP, or filesystem dependencies.
//! Concrete model providers, the session store, and the HTTP surface live
//! in the `brainstormer` app crate.
//!
//! ## Pipeline
//!
//! ```text
//! query ──▶ phrase ──▶ prompt ──▶ model deltas ──▶ framer ──▶ filter ──▶ event
//! ```

pub mod event;
pub mod filter;
pub mod framer;
pub mod model;
pub mod phrase;
pub mod prompt;
