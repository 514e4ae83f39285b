//! Language-model capability trait.
//!
//! The suggestion engine only needs one thing from a model: open a stream
//! of text deltas for a set of instructions. Any provider implementing
//! [`LanguageModel`] is substitutable, including test doubles that replay
//! canned deltas.
//!
//! Concrete providers (OpenAI-compatible HTTP, disabled, scripted) live in
//! the `brainstormer` app crate.

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;

/// Lazily produced text deltas. Ends when the model finishes its response;
/// an `Err` item is an upstream failure mid-stream.
pub type DeltaStream = BoxStream<'static, Result<String>>;

/// A source of streamed model output.
///
/// Dropping the returned [`DeltaStream`] must release the upstream
/// request, so a consumer stops generation simply by dropping it.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Returns the model identifier (e.g. `"gpt-4o-mini"`).
    fn model_name(&self) -> &str;

    /// Start one generation for `instructions`.
    ///
    /// Errors here mean the stream could not be opened at all
    /// (bad credentials, unreachable endpoint, rejected request).
    async fn open_stream(&self, instructions: &str) -> Result<DeltaStream>;
}
