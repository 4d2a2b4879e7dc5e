use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::FileCompletionSession;
use crate::client::ApiClient;
use crate::errors::ApiError;

/// A revision suggested alongside a chat reply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposedChanges {
    #[serde(default)]
    pub preview_available: bool,
    #[serde(default)]
    pub new_content: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionReply {
    pub response: String,
    #[serde(default)]
    pub proposed_changes: Option<ProposedChanges>,
    #[serde(default)]
    pub tokens_used: Option<u64>,
}

impl SessionReply {
    /// The proposed file content, if the reply carries one.
    pub fn proposed_content(&self) -> Option<&str> {
        self.proposed_changes
            .as_ref()
            .and_then(|c| c.new_content.as_deref())
    }
}

/// Server side of a file completion session.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn create_session(&self, file_id: &str) -> Result<FileCompletionSession, ApiError>;

    async fn send_message(&self, session_id: &str, message: &str) -> Result<SessionReply, ApiError>;

    async fn get_session(&self, session_id: &str) -> Result<FileCompletionSession, ApiError>;

    /// Persist `content` as the file's current content.
    async fn apply_changes(&self, session_id: &str, content: &str) -> Result<(), ApiError>;
}

/// [`CompletionBackend`] over the REST endpoints.
#[derive(Debug, Clone)]
pub struct HttpCompletionBackend {
    api: ApiClient,
    base_path: String,
}

impl HttpCompletionBackend {
    pub fn new(api: ApiClient, base_path: &str) -> Self {
        Self {
            api,
            base_path: base_path.trim_end_matches('/').to_string(),
        }
    }

    fn sessions(&self) -> String {
        format!("{}/sessions", self.base_path)
    }

    fn session(&self, session_id: &str, tail: &str) -> String {
        format!("{}/sessions/{}{}", self.base_path, session_id, tail)
    }
}

#[async_trait]
impl CompletionBackend for HttpCompletionBackend {
    async fn create_session(&self, file_id: &str) -> Result<FileCompletionSession, ApiError> {
        self.api
            .post_json(&self.sessions(), &json!({ "file_id": file_id }))
            .await
    }

    async fn send_message(&self, session_id: &str, message: &str) -> Result<SessionReply, ApiError> {
        self.api
            .post_json(
                &self.session(session_id, "/messages"),
                &json!({ "message": message }),
            )
            .await
    }

    async fn get_session(&self, session_id: &str) -> Result<FileCompletionSession, ApiError> {
        self.api.get_json(&self.session(session_id, "")).await
    }

    async fn apply_changes(&self, session_id: &str, content: &str) -> Result<(), ApiError> {
        self.api
            .post_unit(
                &self.session(session_id, "/apply"),
                &json!({ "content": content }),
            )
            .await
    }
}
