//! Stream session controller.
//!
//! Owns one in-flight generation request: posts the prompt, decodes the
//! response body into events, accumulates content and reports how the turn
//! ended. The same event sequence can be consumed push-style
//! ([`TurnStream::drive`]) or pull-style ([`TurnStream::next_delta`] followed
//! by [`TurnStream::finish`]).

use futures::stream::{self, BoxStream};
use futures::{Stream, StreamExt};
use reqwest::Method;
use reqwest::header::ACCEPT;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::client::ApiClient;
use crate::engine_config::BackendSection;
use crate::errors::{ApiError, GenerationError};
use crate::ledger::{HistoryEntry, Message, Role};
use crate::stream::{StreamEvent, decode_stream};

/// One prior turn sent alongside the prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryTurn {
    pub content: String,
    #[serde(rename = "isUser")]
    pub is_user: bool,
}

impl From<&Message> for HistoryTurn {
    fn from(msg: &Message) -> Self {
        Self {
            content: msg.content.clone(),
            is_user: msg.role == Role::User,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub prompt: String,
    pub conversation_history: Vec<HistoryTurn>,
    pub stream: bool,
}

/// Body of a non-streaming generation response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedResponse {
    pub content: String,
    #[serde(default)]
    pub service_used: Option<String>,
    #[serde(default)]
    pub has_diagram: bool,
}

/// How a turn that did not fail ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    Completed {
        content: String,
        service_used: Option<String>,
    },
    /// The caller cancelled; `partial` is everything received before that.
    Cancelled { partial: String },
}

impl TurnOutcome {
    pub fn content(&self) -> &str {
        match self {
            TurnOutcome::Completed { content, .. } => content,
            TurnOutcome::Cancelled { partial } => partial,
        }
    }
}

/// A generation response being read.
pub struct TurnStream {
    events: BoxStream<'static, Result<StreamEvent, ApiError>>,
    cancel: CancellationToken,
    content: String,
    result: Option<Result<TurnOutcome, GenerationError>>,
}

impl TurnStream {
    /// Wrap a raw response body.
    pub fn from_body<S, B, E>(body: S, cancel: CancellationToken) -> Self
    where
        S: Stream<Item = Result<B, E>> + Unpin + Send + 'static,
        B: AsRef<[u8]> + Send + 'static,
        E: Into<ApiError> + Send + 'static,
    {
        let events = decode_stream(body, cancel.clone())
            .map(|item| item.map_err(Into::into))
            .boxed();
        Self::from_events(events, cancel)
    }

    fn from_events(
        events: BoxStream<'static, Result<StreamEvent, ApiError>>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            events,
            cancel,
            content: String::new(),
            result: None,
        }
    }

    /// Content received so far.
    pub fn partial(&self) -> &str {
        &self.content
    }

    /// The next content delta, or `None` once the turn has ended.
    pub async fn next_delta(&mut self) -> Option<String> {
        if self.result.is_some() {
            return None;
        }

        let outcome = match self.events.next().await {
            Some(Ok(StreamEvent::Content(delta))) => {
                self.content.push_str(&delta);
                return Some(delta);
            }
            Some(Ok(StreamEvent::Done(service_used))) => Ok(TurnOutcome::Completed {
                content: self.content.clone(),
                service_used,
            }),
            Some(Ok(StreamEvent::Error(message))) => Err(GenerationError::Protocol {
                message,
                partial: self.content.clone(),
            }),
            Some(Err(_)) | None if self.cancel.is_cancelled() => Ok(TurnOutcome::Cancelled {
                partial: self.content.clone(),
            }),
            Some(Err(e)) => Err(GenerationError::Api(e)),
            None => Err(GenerationError::Api(ApiError::transport(
                "stream closed before completion",
            ))),
        };

        match &outcome {
            Ok(TurnOutcome::Completed { service_used, .. }) => {
                info!(chars = self.content.len(), service_used = ?service_used, "generation completed")
            }
            Ok(TurnOutcome::Cancelled { .. }) => {
                info!(chars = self.content.len(), "generation cancelled")
            }
            Err(e) => debug!("generation ended with error: {}", e),
        }
        self.result = Some(outcome);
        None
    }

    /// Read to the end and report how the turn ended.
    pub async fn finish(mut self) -> Result<TurnOutcome, GenerationError> {
        while self.next_delta().await.is_some() {}
        match self.result.take() {
            Some(result) => result,
            None => Err(GenerationError::Api(ApiError::transport(
                "stream closed before completion",
            ))),
        }
    }

    /// Push-style consumption: `on_delta` sees every delta in order.
    pub async fn drive(
        mut self,
        mut on_delta: impl FnMut(&str),
    ) -> Result<TurnOutcome, GenerationError> {
        while let Some(delta) = self.next_delta().await {
            on_delta(&delta);
        }
        self.finish().await
    }
}

/// Client for the generation and history endpoints.
#[derive(Debug, Clone)]
pub struct GenerationClient {
    api: ApiClient,
    generate_path: String,
    history_path: String,
}

impl GenerationClient {
    pub fn new(api: ApiClient, backend: &BackendSection) -> Self {
        Self {
            api,
            generate_path: backend.generate_path.clone(),
            history_path: backend.history_path.clone(),
        }
    }

    pub fn from_config(backend: &BackendSection) -> Result<Self, ApiError> {
        Ok(Self::new(ApiClient::new(backend)?, backend))
    }

    /// Open a streaming generation. A non-success status fails here, before
    /// any body is read. Cancelling while the request is in flight yields a
    /// stream that ends immediately as cancelled.
    pub async fn open_stream(
        &self,
        mut request: GenerationRequest,
        cancel: CancellationToken,
    ) -> Result<TurnStream, ApiError> {
        request.stream = true;
        let builder = self
            .api
            .request(Method::POST, &self.generate_path)
            .header(ACCEPT, "text/event-stream")
            .json(&request);

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("generation cancelled before response");
                return Ok(TurnStream::from_events(stream::empty().boxed(), cancel));
            }
            response = self.api.send(builder) => response?,
        };

        Ok(TurnStream::from_body(
            Box::pin(response.bytes_stream()),
            cancel,
        ))
    }

    /// Single-shot generation for callers with streaming turned off.
    pub async fn generate(&self, mut request: GenerationRequest) -> Result<GeneratedResponse, ApiError> {
        request.stream = false;
        self.api.post_json(&self.generate_path, &request).await
    }

    /// The backend's authoritative record of past turns.
    pub async fn fetch_history(&self) -> Result<Vec<HistoryEntry>, ApiError> {
        self.api.get_json(&self.history_path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Body = stream::Iter<std::vec::IntoIter<Result<Vec<u8>, ApiError>>>;

    fn body(chunks: &[&str]) -> Body {
        let owned: Vec<Result<Vec<u8>, ApiError>> =
            chunks.iter().map(|c| Ok(c.as_bytes().to_vec())).collect();
        stream::iter(owned)
    }

    #[tokio::test]
    async fn test_hello_svc_turn() {
        let turn = TurnStream::from_body(
            body(&[
                "data: {\"content\":\"Hel",
                "lo\"}\n",
                "data: {\"done\":true,\"service_used\":\"svc\"}\n",
            ]),
            CancellationToken::new(),
        );
        let mut deltas = Vec::new();
        let outcome = turn.drive(|d| deltas.push(d.to_string())).await.unwrap();
        assert_eq!(deltas, vec!["Hello"]);
        assert_eq!(
            outcome,
            TurnOutcome::Completed {
                content: "Hello".to_string(),
                service_used: Some("svc".to_string()),
            }
        );
    }

    #[tokio::test]
    async fn test_pull_style_matches_push_style() {
        let chunks = [
            "data: {\"content\":\"a\"}\ndata: {\"content\":\"b\"}\n",
            "data: {\"content\":\"c\"}\ndata: {\"done\":true}\n",
        ];
        let mut turn = TurnStream::from_body(body(&chunks), CancellationToken::new());
        let mut pulled = String::new();
        while let Some(delta) = turn.next_delta().await {
            pulled.push_str(&delta);
        }
        assert_eq!(pulled, "abc");
        assert_eq!(turn.partial(), "abc");
        let outcome = turn.finish().await.unwrap();
        assert_eq!(outcome.content(), "abc");
    }

    #[tokio::test]
    async fn test_error_frame_keeps_partial() {
        let turn = TurnStream::from_body(
            body(&["data: {\"content\":\"half\"}\ndata: {\"error\":\"overloaded\"}\n"]),
            CancellationToken::new(),
        );
        let err = turn.finish().await.unwrap_err();
        assert_eq!(err.partial(), Some("half"));
        assert!(err.to_string().contains("overloaded"));
    }

    #[tokio::test]
    async fn test_close_without_done_is_transport_failure() {
        let turn = TurnStream::from_body(
            body(&["data: {\"content\":\"half\"}\n"]),
            CancellationToken::new(),
        );
        let err = turn.finish().await.unwrap_err();
        assert!(matches!(err, GenerationError::Api(ApiError::Transport { .. })));
        assert!(err.to_string().contains("stream closed before completion"));
    }

    #[tokio::test]
    async fn test_cancel_mid_stream_reports_partial() {
        let cancel = CancellationToken::new();
        let (tx, rx) = futures::channel::mpsc::unbounded::<Result<Vec<u8>, ApiError>>();
        let mut turn = TurnStream::from_body(rx, cancel.clone());

        tx.unbounded_send(Ok(b"data: {\"content\":\"par\"}\n".to_vec()))
            .unwrap();
        assert_eq!(turn.next_delta().await.as_deref(), Some("par"));

        cancel.cancel();
        let outcome = turn.finish().await.unwrap();
        assert_eq!(
            outcome,
            TurnOutcome::Cancelled {
                partial: "par".to_string()
            }
        );
        drop(tx);
    }

    #[test]
    fn test_request_serializes_is_user() {
        let request = GenerationRequest {
            prompt: "hi".to_string(),
            conversation_history: vec![HistoryTurn {
                content: "earlier".to_string(),
                is_user: true,
            }],
            stream: true,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["conversation_history"][0]["isUser"], true);
        assert_eq!(json["stream"], true);
    }

    #[test]
    fn test_generated_response_defaults() {
        let parsed: GeneratedResponse = serde_json::from_str(r#"{"content":"x"}"#).unwrap();
        assert!(!parsed.has_diagram);
        assert!(parsed.service_used.is_none());
    }
}
