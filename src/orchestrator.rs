//! Streaming suggestion orchestration.
//!
//! Drives one request end to end and reports progress as [`StreamEvent`]s
//! on a channel:
//!
//! ```text
//! validating ──▶ status ──▶ pass "or" ──▶ [pass "and"] ──▶ complete
//!      │                        │              │
//!      └────────────────────────┴──────────────┴──▶ error (terminal)
//! ```
//!
//! Each pass composes instructions, opens a model stream, frames deltas
//! into candidate lines, and filters them against the session. Accepted
//! words are emitted in framing order; pass one always finishes before
//! pass two starts.
//!
//! # Cancellation
//!
//! The run stops as soon as the [`CancellationToken`] fires or the event
//! receiver goes away (client disconnected). The upstream stream is
//! dropped at that point and no `complete` event is sent.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use brainstormer_core::event::{StreamEvent, Suggestion};
use brainstormer_core::filter::SuggestionFilter;
use brainstormer_core::framer::TokenFramer;
use brainstormer_core::model::LanguageModel;
use brainstormer_core::phrase::{parse_phrases, pass_plan, MatchMode};
use brainstormer_core::prompt::compose_instructions;
use futures::StreamExt;
use serde::{Deserialize, Deserializer, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::projects::ProjectStore;
use crate::session::{SessionHandle, SessionStore};

pub const STATUS_MESSAGE: &str = "Generating keywords...";

/// Body of `POST /search/stream` and `POST /search`.
#[derive(Debug, Clone, Deserialize)]
pub struct SuggestRequest {
    /// One or more phrases, `+`-separated.
    pub query: String,
    pub project_id: String,
    /// Informational; multi-phrase requests always run both modes.
    #[serde(default, deserialize_with = "mode_hint")]
    pub search_mode: MatchMode,
    /// Continue an existing session ("load more").
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub is_load_more: bool,
}

/// Accepts any string (or null) for `search_mode`; see [`MatchMode::from_hint`].
fn mode_hint<'de, D>(deserializer: D) -> Result<MatchMode, D::Error>
where
    D: Deserializer<'de>,
{
    let hint = Option::<String>::deserialize(deserializer)?;
    Ok(hint.as_deref().map(MatchMode::from_hint).unwrap_or_default())
}

impl SuggestRequest {
    pub fn new(query: &str, project_id: &str) -> Self {
        Self {
            query: query.to_string(),
            project_id: project_id.to_string(),
            search_mode: MatchMode::Or,
            session_id: None,
            is_load_more: false,
        }
    }

    pub fn continuing(mut self, session_id: &str) -> Self {
        self.session_id = Some(session_id.to_string());
        self.is_load_more = true;
        self
    }
}

/// Why a request was refused before any model call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// Blank query or project id, or a query with no phrases.
    InvalidRequest,
    /// The project does not exist or belongs to someone else.
    ProjectNotFound,
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    Completed {
        total: usize,
        session_words: usize,
    },
    /// Refused up front; one `error` event was sent and no session touched.
    Rejected(Rejection),
    /// The model or storage failed; one `error` event was sent.
    Failed,
    /// Client went away or the token fired; nothing further was sent.
    Cancelled,
}

/// Why a pass stopped early.
enum Halt {
    Rejected(Rejection, String),
    Upstream(anyhow::Error),
    Cancelled,
}

impl From<anyhow::Error> for Halt {
    fn from(e: anyhow::Error) -> Self {
        Halt::Upstream(e)
    }
}

fn invalid(message: &str) -> Halt {
    Halt::Rejected(Rejection::InvalidRequest, message.to_string())
}

/// Event sink for one run; tracks the per-request accepted count.
struct Emitter<'a> {
    events: &'a mpsc::Sender<StreamEvent>,
    cancel: &'a CancellationToken,
    progress_every: usize,
    accepted: usize,
}

impl Emitter<'_> {
    async fn send(&self, event: StreamEvent) -> Result<(), Halt> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Halt::Cancelled),
            sent = self.events.send(event) => sent.map_err(|_| Halt::Cancelled),
        }
    }

    async fn suggestion(&mut self, data: Suggestion) -> Result<(), Halt> {
        tracing::trace!(word = %data.word, match_type = %data.match_type, "suggestion");
        self.send(StreamEvent::Suggestion { data }).await?;
        self.accepted += 1;
        if self.accepted % self.progress_every == 0 {
            self.send(StreamEvent::Progress {
                count: self.accepted,
            })
            .await?;
        }
        Ok(())
    }
}

/// Events held in flight while [`Orchestrator::collect`] drains a run.
const EVENT_BATCH: usize = 64;

/// One accepted suggestion in a non-streaming reply.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredSuggestion {
    pub word: String,
    /// Always 1.0; the model gives no ranking.
    pub score: f32,
    pub match_type: MatchMode,
}

/// Every suggestion from one run, in emission order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SuggestionBatch {
    pub session_id: String,
    pub suggestions: Vec<ScoredSuggestion>,
    pub total_session_words: usize,
}

impl SuggestionBatch {
    fn from_events(events: &[StreamEvent], total_session_words: usize) -> Self {
        let mut batch = SuggestionBatch {
            session_id: String::new(),
            suggestions: Vec::new(),
            total_session_words,
        };
        for event in events {
            match event {
                StreamEvent::Status { session_id, .. } => batch.session_id = session_id.clone(),
                StreamEvent::Suggestion { data } => batch.suggestions.push(ScoredSuggestion {
                    word: data.word.clone(),
                    score: 1.0,
                    match_type: data.match_type,
                }),
                _ => {}
            }
        }
        batch
    }
}

/// Why [`Orchestrator::collect`] produced no batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectError {
    Rejected(Rejection, String),
    Upstream(String),
}

impl std::fmt::Display for CollectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CollectError::Rejected(_, message) | CollectError::Upstream(message) => {
                f.write_str(message)
            }
        }
    }
}

impl std::error::Error for CollectError {}

/// Runs suggestion streams against shared collaborators.
pub struct Orchestrator {
    projects: Arc<dyn ProjectStore>,
    model: Arc<dyn LanguageModel>,
    sessions: Arc<SessionStore>,
    filter: SuggestionFilter,
    progress_every: usize,
    chunk_timeout: Duration,
}

impl Orchestrator {
    pub fn new(
        projects: Arc<dyn ProjectStore>,
        model: Arc<dyn LanguageModel>,
        sessions: Arc<SessionStore>,
    ) -> Self {
        Self {
            projects,
            model,
            sessions,
            filter: SuggestionFilter::default(),
            progress_every: 10,
            chunk_timeout: Duration::from_secs(30),
        }
    }

    /// Apply `[suggestions]` and `[llm]` tuning from the config.
    pub fn with_config(mut self, config: &Config) -> Self {
        self.filter = SuggestionFilter::new(config.suggestions.max_chars);
        self.progress_every = config.suggestions.progress_every.max(1);
        self.chunk_timeout = config.llm.chunk_timeout();
        self
    }

    /// Longest wait for the model to open or send its next delta.
    pub fn with_chunk_timeout(mut self, timeout: Duration) -> Self {
        self.chunk_timeout = timeout;
        self
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// Run one request to completion, error, or cancellation.
    ///
    /// Events go to `events` in protocol order. The channel is the only
    /// output; failures never escape as `Err`.
    pub async fn run(
        &self,
        caller_id: &str,
        request: SuggestRequest,
        events: mpsc::Sender<StreamEvent>,
        cancel: CancellationToken,
    ) -> StreamOutcome {
        let mut emitter = Emitter {
            events: &events,
            cancel: &cancel,
            progress_every: self.progress_every,
            accepted: 0,
        };

        let (message, outcome) = match self.drive(caller_id, &request, &mut emitter).await {
            Ok(outcome) => return outcome,
            Err(Halt::Cancelled) => {
                tracing::info!(project_id = %request.project_id, "client disconnected, stream cancelled");
                return StreamOutcome::Cancelled;
            }
            Err(Halt::Rejected(reason, message)) => {
                tracing::info!(project_id = %request.project_id, caller_id, ?reason, "request rejected");
                (message, StreamOutcome::Rejected(reason))
            }
            Err(Halt::Upstream(e)) => {
                let message = format!("{:#}", e);
                tracing::warn!(project_id = %request.project_id, error = %message, "suggestion stream failed");
                (message, StreamOutcome::Failed)
            }
        };

        match emitter.send(StreamEvent::error(message)).await {
            Ok(()) => outcome,
            Err(_) => StreamOutcome::Cancelled,
        }
    }

    /// Run one request to the end and gather it for a non-streaming reply.
    ///
    /// Dropping the returned future drops the run and the model stream.
    pub async fn collect(
        &self,
        caller_id: &str,
        request: SuggestRequest,
    ) -> Result<SuggestionBatch, CollectError> {
        let (tx, mut rx) = mpsc::channel::<StreamEvent>(EVENT_BATCH);
        let drain = async move {
            let mut events = Vec::new();
            while let Some(event) = rx.recv().await {
                events.push(event);
            }
            events
        };

        let (outcome, events) = tokio::join!(
            self.run(caller_id, request, tx, CancellationToken::new()),
            drain
        );

        let error_message = || {
            events
                .iter()
                .rev()
                .find_map(|e| match e {
                    StreamEvent::Error { message } => Some(message.clone()),
                    _ => None,
                })
                .unwrap_or_default()
        };

        match outcome {
            StreamOutcome::Completed { session_words, .. } => {
                Ok(SuggestionBatch::from_events(&events, session_words))
            }
            StreamOutcome::Rejected(reason) => Err(CollectError::Rejected(reason, error_message())),
            StreamOutcome::Failed => Err(CollectError::Upstream(error_message())),
            StreamOutcome::Cancelled => Err(CollectError::Upstream("request cancelled".to_string())),
        }
    }

    async fn drive(
        &self,
        caller_id: &str,
        request: &SuggestRequest,
        emitter: &mut Emitter<'_>,
    ) -> Result<StreamOutcome, Halt> {
        if request.query.trim().is_empty() {
            return Err(invalid("Query must not be empty"));
        }
        if request.project_id.trim().is_empty() {
            return Err(invalid("project_id must not be empty"));
        }

        let project = tokio::select! {
            biased;
            _ = emitter.cancel.cancelled() => return Err(Halt::Cancelled),
            found = self.projects.find_project(&request.project_id, caller_id) => found?,
        };
        let Some(project) = project else {
            return Err(Halt::Rejected(
                Rejection::ProjectNotFound,
                "Project not found".to_string(),
            ));
        };

        let phrases = parse_phrases(&request.query);
        if phrases.is_empty() {
            return Err(invalid("Query must contain at least one phrase"));
        }

        let session = self.sessions.get_or_create(request.session_id.as_deref());
        tracing::info!(
            session_id = session.id(),
            project = %project.name,
            phrases = phrases.len(),
            requested_mode = %request.search_mode,
            is_load_more = request.is_load_more,
            continued = session.is_continuation(),
            "starting suggestion stream"
        );

        emitter
            .send(StreamEvent::Status {
                message: STATUS_MESSAGE.to_string(),
                session_id: session.id().to_string(),
                is_load_more: request.is_load_more,
            })
            .await?;

        for mode in pass_plan(&phrases) {
            let before = emitter.accepted;
            let result = self.run_pass(&phrases, mode, &session, emitter).await;
            self.sessions.touch(session.id());
            result?;
            tracing::debug!(
                session_id = session.id(),
                mode = %mode,
                accepted = emitter.accepted - before,
                "pass finished"
            );
        }

        let total = emitter.accepted;
        let session_words = session.word_count();
        emitter
            .send(StreamEvent::Complete {
                total,
                session_id: session.id().to_string(),
                total_session_words: session_words,
            })
            .await?;

        tracing::info!(session_id = session.id(), total, session_words, "suggestion stream complete");
        Ok(StreamOutcome::Completed {
            total,
            session_words,
        })
    }

    async fn run_pass(
        &self,
        phrases: &[String],
        mode: MatchMode,
        session: &SessionHandle,
        emitter: &mut Emitter<'_>,
    ) -> Result<(), Halt> {
        let instructions = compose_instructions(phrases, mode);
        tracing::debug!(session_id = session.id(), mode = %mode, "pass started");

        let mut deltas = tokio::select! {
            biased;
            _ = emitter.cancel.cancelled() => return Err(Halt::Cancelled),
            opened = tokio::time::timeout(self.chunk_timeout, self.model.open_stream(&instructions)) => {
                opened.map_err(|_| self.stall_error())??
            }
        };

        let mut framer = TokenFramer::new();
        loop {
            let next = tokio::select! {
                biased;
                _ = emitter.cancel.cancelled() => return Err(Halt::Cancelled),
                _ = emitter.events.closed() => return Err(Halt::Cancelled),
                next = tokio::time::timeout(self.chunk_timeout, deltas.next()) => {
                    next.map_err(|_| self.stall_error())?
                }
            };

            let Some(delta) = next else { break };
            for candidate in framer.push(&delta?) {
                if let Some(s) = session.accept(&self.filter, &candidate, mode) {
                    emitter.suggestion(s).await?;
                }
            }
        }

        if let Some(candidate) = framer.finish() {
            if let Some(s) = session.accept(&self.filter, &candidate, mode) {
                emitter.suggestion(s).await?;
            }
        }
        Ok(())
    }

    fn stall_error(&self) -> anyhow::Error {
        anyhow!(
            "Language model stream stalled for {}s",
            self.chunk_timeout.as_secs_f32()
        )
    }
}

/// CLI entry point: run one stream in-process and print each SSE frame.
pub async fn run_suggest(
    config: &Config,
    query: &str,
    project_id: &str,
    owner: &str,
) -> Result<()> {
    let projects = crate::projects::SqliteProjectStore::connect(config).await?;
    let model = crate::llm::create_model(&config.llm)?;
    let sessions = Arc::new(SessionStore::from_config(&config.sessions));
    let orchestrator = Orchestrator::new(Arc::new(projects), model, sessions).with_config(config);

    let (tx, mut rx) = mpsc::channel::<StreamEvent>(EVENT_BATCH);
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            print!("{}", event.to_sse_frame());
        }
    });

    let request = SuggestRequest::new(query, project_id);
    let outcome = orchestrator
        .run(owner, request, tx, CancellationToken::new())
        .await;
    printer.await?;

    match outcome {
        StreamOutcome::Completed { .. } => Ok(()),
        _ => anyhow::bail!("suggestion stream ended with an error event"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(body: serde_json::Value) -> SuggestRequest {
        serde_json::from_value(body).unwrap()
    }

    #[test]
    fn test_search_mode_is_advisory() {
        for (hint, expected) in [
            (json!("or"), MatchMode::Or),
            (json!("OR"), MatchMode::Or),
            (json!("And"), MatchMode::And),
            (json!("xor"), MatchMode::Or),
            (json!(""), MatchMode::Or),
            (json!(null), MatchMode::Or),
        ] {
            let request = parse(json!({ "query": "q", "project_id": "p", "search_mode": hint }));
            assert_eq!(request.search_mode, expected, "{}", hint);
        }
    }

    #[test]
    fn test_request_defaults() {
        let request = parse(json!({ "query": "q", "project_id": "p" }));
        assert_eq!(request.search_mode, MatchMode::Or);
        assert_eq!(request.session_id, None);
        assert!(!request.is_load_more);
    }

    #[test]
    fn test_batch_from_events() {
        let events = vec![
            StreamEvent::Status {
                message: STATUS_MESSAGE.to_string(),
                session_id: "s1".to_string(),
                is_load_more: false,
            },
            StreamEvent::Suggestion {
                data: Suggestion {
                    word: "alpha".to_string(),
                    match_type: MatchMode::Or,
                },
            },
            StreamEvent::Progress { count: 1 },
            StreamEvent::Complete {
                total: 1,
                session_id: "s1".to_string(),
                total_session_words: 4,
            },
        ];
        let batch = SuggestionBatch::from_events(&events, 4);
        assert_eq!(batch.session_id, "s1");
        assert_eq!(batch.total_session_words, 4);
        assert_eq!(
            batch.suggestions,
            vec![ScoredSuggestion {
                word: "alpha".to_string(),
                score: 1.0,
                match_type: MatchMode::Or,
            }]
        );
    }
}
