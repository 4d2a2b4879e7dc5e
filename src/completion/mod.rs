//! File completion sessions.
//!
//! A session is a chat scoped to one file. Replies may propose a new
//! revision of the file; a proposal only becomes the file's content when it
//! is applied.
//!
//! ```text
//! Uninitialized ──start──► Active ──send (proposal)──► ProposalPending
//!                            ▲                              │
//!                            └──── apply / discard / revert ┘
//! ```
//!
//! The version history is append-only: apply and revert both add an entry.

pub mod client;
pub mod controller;
pub mod diff;

pub use client::{CompletionBackend, HttpCompletionBackend, ProposedChanges, SessionReply};
pub use controller::{CompletionController, SessionState, TurnReply};
pub use diff::{ContentDiff, DiffLine, diff_lines};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::CompletionError;
use crate::ledger::Role;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionTurn {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileVersion {
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileCompletionSession {
    pub id: String,
    pub file_id: String,
    pub current_content: String,
    /// Never equal to `current_content` when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proposed_content: Option<String>,
    #[serde(default)]
    pub conversation_history: Vec<CompletionTurn>,
    #[serde(default)]
    pub version_history: Vec<FileVersion>,
    #[serde(default)]
    pub total_tokens_used: u64,
}

impl FileCompletionSession {
    pub fn has_proposal(&self) -> bool {
        self.proposed_content.is_some()
    }

    pub fn record_turn(&mut self, role: Role, content: &str, timestamp: DateTime<Utc>) {
        self.conversation_history.push(CompletionTurn {
            role,
            content: content.to_string(),
            timestamp,
        });
    }

    /// Store `content` as the pending proposal unless it matches the current
    /// file. Returns whether a proposal is now pending from this call.
    pub fn propose(&mut self, content: String) -> bool {
        if content == self.current_content {
            debug!(session = %self.id, "proposal identical to current content, ignored");
            return false;
        }
        self.proposed_content = Some(content);
        true
    }

    /// Commit the pending proposal as the new current content.
    pub fn apply_proposal(&mut self, now: DateTime<Utc>) -> Result<&FileVersion, CompletionError> {
        let content = self
            .proposed_content
            .take()
            .ok_or(CompletionError::NoProposal)?;
        Ok(self.commit(content, now))
    }

    /// Drop the pending proposal, returning it.
    pub fn discard_proposal(&mut self) -> Result<String, CompletionError> {
        self.proposed_content.take().ok_or(CompletionError::NoProposal)
    }

    pub fn version(&self, index: usize) -> Result<&FileVersion, CompletionError> {
        self.version_history
            .get(index)
            .ok_or(CompletionError::VersionOutOfRange {
                index,
                len: self.version_history.len(),
            })
    }

    /// Make a previous version current again. The revert itself is recorded
    /// as a new version, and any pending proposal is dropped.
    pub fn revert_to(&mut self, index: usize, now: DateTime<Utc>) -> Result<&FileVersion, CompletionError> {
        let content = self.version(index)?.content.clone();
        self.proposed_content = None;
        Ok(self.commit(content, now))
    }

    /// Token usage only ever grows.
    pub fn add_tokens(&mut self, tokens: u64) {
        self.total_tokens_used = self.total_tokens_used.saturating_add(tokens);
    }

    /// Preview of the pending proposal against the current content.
    pub fn diff(&self) -> Option<ContentDiff> {
        self.proposed_content
            .as_deref()
            .map(|proposed| diff_lines(&self.current_content, proposed))
    }

    fn commit(&mut self, content: String, now: DateTime<Utc>) -> &FileVersion {
        self.current_content = content.clone();
        self.version_history.push(FileVersion {
            content,
            created_at: now,
        });
        &self.version_history[self.version_history.len() - 1]
    }
}
