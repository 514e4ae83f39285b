//! Language-model providers.
//!
//! Concrete implementations of [`LanguageModel`]:
//! - **[`OpenAiChatModel`]**: streams `POST {base_url}/chat/completions`
//!   from any OpenAI-compatible endpoint.
//! - **[`DisabledModel`]**: fails every request; used when `llm.provider = "disabled"`.
//! - **[`ScriptedModel`]**: replays canned deltas; used by tests and offline runs.
//!
//! Use [`create_model`] to pick the provider from configuration.
//!
//! # Streaming format
//!
//! The chat completions endpoint answers with server-sent events:
//!
//! ```text
//! data: {"choices":[{"delta":{"content":"Sol"}}]}
//! data: {"choices":[{"delta":{"content":"ar\n"}}]}
//! data: [DONE]
//! ```
//!
//! Network chunks do not respect those lines, so the body is buffered as
//! raw bytes and split on `\n` before decoding; a multi-byte character
//! split across two chunks is decoded intact.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use axum::body::Bytes;
use brainstormer_core::model::{DeltaStream, LanguageModel};
use futures::stream::{self, BoxStream, Stream, StreamExt};
use serde::Deserialize;

use crate::config::LlmConfig;

/// Instantiate the provider selected by `llm.provider`.
pub fn create_model(config: &LlmConfig) -> Result<Arc<dyn LanguageModel>> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAiChatModel::new(config)?)),
        "disabled" => Ok(Arc::new(DisabledModel)),
        other => bail!("Unknown llm provider: {}", other),
    }
}

// ============ Disabled ============

/// A provider that refuses every request.
pub struct DisabledModel;

#[async_trait]
impl LanguageModel for DisabledModel {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn open_stream(&self, _instructions: &str) -> Result<DeltaStream> {
        bail!("Language model provider is disabled (set llm.provider in the config)")
    }
}

// ============ OpenAI-compatible ============

/// Streaming chat-completions client.
///
/// Requires the `OPENAI_API_KEY` environment variable. The instructions are
/// sent as the only (system) message.
pub struct OpenAiChatModel {
    client: reqwest::Client,
    api_key: String,
    model: String,
    temperature: f32,
    base_url: String,
}

impl OpenAiChatModel {
    /// # Errors
    ///
    /// Returns an error if `OPENAI_API_KEY` is not set or the HTTP client
    /// cannot be built.
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow!("OPENAI_API_KEY environment variable not set"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_key,
            model: config.model.clone(),
            temperature: config.temperature,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl LanguageModel for OpenAiChatModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn open_stream(&self, instructions: &str) -> Result<DeltaStream> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [{ "role": "system", "content": instructions }],
            "temperature": self.temperature,
            "stream": true,
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("OpenAI API error {}: {}", status, body_text);
        }

        Ok(sse_deltas(response.bytes_stream()))
    }
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    error: Option<StreamErrorBody>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamErrorBody {
    message: String,
}

/// One decoded SSE line.
#[derive(Debug, PartialEq)]
enum SseLine {
    Delta(String),
    Done,
    Skip,
}

/// Parse one line of the chat-completions event stream.
fn parse_sse_line(line: &str) -> Result<SseLine> {
    let line = line.trim();
    if line.is_empty() || line.starts_with(':') {
        return Ok(SseLine::Skip);
    }

    let Some(data) = line.strip_prefix("data:") else {
        return Ok(SseLine::Skip);
    };
    let data = data.trim();
    if data == "[DONE]" {
        return Ok(SseLine::Done);
    }

    let chunk: StreamChunk = serde_json::from_str(data)
        .map_err(|e| anyhow!("malformed stream chunk: {}", e))?;
    if let Some(err) = chunk.error {
        bail!("OpenAI stream error: {}", err.message);
    }

    match chunk.choices.into_iter().next().and_then(|c| c.delta.content) {
        Some(content) if !content.is_empty() => Ok(SseLine::Delta(content)),
        _ => Ok(SseLine::Skip),
    }
}

struct SseState {
    body: BoxStream<'static, Result<Bytes>>,
    bytes: Vec<u8>,
    pending: VecDeque<Result<String>>,
    done: bool,
}

impl SseState {
    /// Decode every complete line in the byte buffer.
    fn drain_lines(&mut self) {
        while let Some(pos) = self.bytes.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.bytes.drain(..=pos).collect();
            self.decode(&line);
            if self.done {
                return;
            }
        }
    }

    fn decode(&mut self, line: &[u8]) {
        match parse_sse_line(&String::from_utf8_lossy(line)) {
            Ok(SseLine::Delta(d)) => self.pending.push_back(Ok(d)),
            Ok(SseLine::Done) => self.done = true,
            Ok(SseLine::Skip) => {}
            Err(e) => {
                self.pending.push_back(Err(e));
                self.done = true;
            }
        }
    }
}

/// Turn a raw SSE body into text deltas.
///
/// Nothing is spawned: dropping the returned stream drops the body and
/// with it the upstream connection.
pub fn sse_deltas<S, E>(body: S) -> DeltaStream
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    let state = SseState {
        body: body.map(|r| r.map_err(anyhow::Error::new)).boxed(),
        bytes: Vec::new(),
        pending: VecDeque::new(),
        done: false,
    };

    stream::unfold(state, |mut st| async move {
        loop {
            if let Some(item) = st.pending.pop_front() {
                return Some((item, st));
            }
            if st.done {
                return None;
            }
            match st.body.next().await {
                Some(Ok(bytes)) => {
                    st.bytes.extend_from_slice(&bytes);
                    st.drain_lines();
                }
                Some(Err(e)) => {
                    st.pending.push_back(Err(e.context("model stream interrupted")));
                    st.done = true;
                }
                None => {
                    // Body ended without [DONE]; decode an unterminated last line.
                    let tail = std::mem::take(&mut st.bytes);
                    if !tail.is_empty() {
                        st.decode(&tail);
                    }
                    st.done = true;
                }
            }
        }
    })
    .boxed()
}

// ============ Scripted ============

/// How a scripted pass ends.
#[derive(Debug, Clone)]
enum PassEnd {
    Finish,
    Fail(String),
    Stall,
}

#[derive(Debug, Clone)]
enum ScriptedPass {
    Stream { deltas: Vec<String>, end: PassEnd },
    OpenError(String),
}

/// Replays canned delta sequences, one per `open_stream` call.
///
/// Calls beyond the scripted passes get an empty stream. Every set of
/// instructions received is recorded for inspection.
///
/// ```rust
/// use brainstormer::llm::ScriptedModel;
///
/// let model = ScriptedModel::new()
///     .with_pass(["alpha\n", "beta\n"])
///     .with_failing_pass(["gamma\n"], "connection reset");
/// ```
#[derive(Default)]
pub struct ScriptedModel {
    passes: Mutex<VecDeque<ScriptedPass>>,
    received: Mutex<Vec<String>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(self, pass: ScriptedPass) -> Self {
        self.passes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(pass);
        self
    }

    /// A pass that yields `deltas` and ends normally.
    pub fn with_pass<I, T>(self, deltas: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.push(ScriptedPass::Stream {
            deltas: deltas.into_iter().map(Into::into).collect(),
            end: PassEnd::Finish,
        })
    }

    /// A pass that yields `deltas` then fails with `message`.
    pub fn with_failing_pass<I, T>(self, deltas: I, message: &str) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.push(ScriptedPass::Stream {
            deltas: deltas.into_iter().map(Into::into).collect(),
            end: PassEnd::Fail(message.to_string()),
        })
    }

    /// A pass that yields `deltas` then never produces another item.
    pub fn with_stalling_pass<I, T>(self, deltas: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.push(ScriptedPass::Stream {
            deltas: deltas.into_iter().map(Into::into).collect(),
            end: PassEnd::Stall,
        })
    }

    /// A pass whose `open_stream` call itself fails.
    pub fn with_open_error(self, message: &str) -> Self {
        self.push(ScriptedPass::OpenError(message.to_string()))
    }

    /// Instructions received so far, in call order.
    pub fn received(&self) -> Vec<String> {
        self.received
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn open_stream(&self, instructions: &str) -> Result<DeltaStream> {
        self.received
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(instructions.to_string());

        let next = self
            .passes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();

        let (deltas, end) = match next {
            None => return Ok(stream::empty().boxed()),
            Some(ScriptedPass::OpenError(message)) => bail!(message),
            Some(ScriptedPass::Stream { deltas, end }) => (deltas, end),
        };

        let head = stream::iter(deltas.into_iter().map(Ok));
        Ok(match end {
            PassEnd::Finish => head.boxed(),
            PassEnd::Fail(message) => head
                .chain(stream::once(async move { Err(anyhow!(message)) }))
                .boxed(),
            PassEnd::Stall => head.chain(stream::pending()).boxed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(chunks: &[&[u8]]) -> Vec<std::result::Result<Bytes, std::io::Error>> {
        chunks.iter().map(|c| Ok(Bytes::copy_from_slice(c))).collect()
    }

    async fn collect(stream: DeltaStream) -> Vec<std::result::Result<String, String>> {
        stream
            .map(|r| r.map_err(|e| format!("{:#}", e)))
            .collect()
            .await
    }

    #[test]
    fn test_parse_sse_line() {
        assert_eq!(
            parse_sse_line(r#"data: {"choices":[{"delta":{"content":"Sun"}}]}"#).unwrap(),
            SseLine::Delta("Sun".into())
        );
        assert_eq!(parse_sse_line("data: [DONE]").unwrap(), SseLine::Done);
        assert_eq!(parse_sse_line(": ping").unwrap(), SseLine::Skip);
        assert_eq!(parse_sse_line("").unwrap(), SseLine::Skip);
        assert_eq!(
            parse_sse_line(r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#).unwrap(),
            SseLine::Skip
        );
        assert!(parse_sse_line("data: {not json").is_err());
        assert!(parse_sse_line(r#"data: {"error":{"message":"quota"}}"#).is_err());
    }

    #[tokio::test]
    async fn test_sse_lines_split_across_chunks() {
        let raw = "data: {\"choices\":[{\"delta\":{\"content\":\"Sol\"}}]}\n\ndata: {\"choices\":[{\"delta\":{\"content\":\"ar\\n\"}}]}\n\ndata: [DONE]\n\n";
        let bytes = raw.as_bytes();
        let (a, b) = bytes.split_at(17);
        let (b, c) = b.split_at(40);
        let deltas = collect(sse_deltas(stream::iter(body(&[a, b, c])))).await;
        assert_eq!(deltas, vec![Ok("Sol".to_string()), Ok("ar\n".to_string())]);
    }

    #[tokio::test]
    async fn test_multibyte_character_split_across_chunks() {
        let raw = "data: {\"choices\":[{\"delta\":{\"content\":\"• café\"}}]}\n";
        let bytes = raw.as_bytes();
        // Split inside the three-byte bullet.
        let cut = raw.find('•').unwrap() + 1;
        let (a, b) = bytes.split_at(cut);
        let deltas = collect(sse_deltas(stream::iter(body(&[a, b])))).await;
        assert_eq!(deltas, vec![Ok("• café".to_string())]);
    }

    #[tokio::test]
    async fn test_nothing_after_done() {
        let raw = "data: [DONE]\ndata: {\"choices\":[{\"delta\":{\"content\":\"late\"}}]}\n";
        let deltas = collect(sse_deltas(stream::iter(body(&[raw.as_bytes()])))).await;
        assert!(deltas.is_empty());
    }

    #[tokio::test]
    async fn test_unterminated_last_line_is_decoded() {
        let raw = "data: {\"choices\":[{\"delta\":{\"content\":\"tail\"}}]}";
        let deltas = collect(sse_deltas(stream::iter(body(&[raw.as_bytes()])))).await;
        assert_eq!(deltas, vec![Ok("tail".to_string())]);
    }

    #[tokio::test]
    async fn test_transport_error_surfaces_after_earlier_deltas() {
        let items: Vec<std::result::Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from_static(
                b"data: {\"choices\":[{\"delta\":{\"content\":\"one\"}}]}\n",
            )),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset")),
        ];
        let deltas = collect(sse_deltas(stream::iter(items))).await;
        assert_eq!(deltas.len(), 2);
        assert_eq!(deltas[0], Ok("one".to_string()));
        let err = deltas[1].clone().unwrap_err();
        assert!(err.contains("model stream interrupted"));
        assert!(err.contains("reset"));
    }

    #[tokio::test]
    async fn test_disabled_model_fails() {
        let err = DisabledModel.open_stream("x").await.err().unwrap();
        assert!(err.to_string().contains("disabled"));
    }

    #[tokio::test]
    async fn test_scripted_model_replays_passes_in_order() {
        let model = ScriptedModel::new()
            .with_pass(["a\n", "b"])
            .with_failing_pass(["c\n"], "boom")
            .with_open_error("unauthorized");

        let first = collect(model.open_stream("one").await.unwrap()).await;
        assert_eq!(first, vec![Ok("a\n".to_string()), Ok("b".to_string())]);

        let second = collect(model.open_stream("two").await.unwrap()).await;
        assert_eq!(second, vec![Ok("c\n".to_string()), Err("boom".to_string())]);

        assert!(model.open_stream("three").await.is_err());
        assert!(collect(model.open_stream("four").await.unwrap()).await.is_empty());
        assert_eq!(model.received(), vec!["one", "two", "three", "four"]);
    }

    #[test]
    fn test_create_model() {
        let cfg = LlmConfig::default();
        assert_eq!(create_model(&cfg).unwrap().model_name(), "disabled");
    }
}
