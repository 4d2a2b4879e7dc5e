use chrono::Utc;
use tracing::{debug, info};

use super::{CompletionBackend, ContentDiff, FileCompletionSession, FileVersion};
use crate::errors::CompletionError;
use crate::ledger::Role;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Active,
    ProposalPending,
}

/// What a chat turn produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnReply {
    Chat(String),
    /// The reply came with a new revision of the file, now pending.
    Proposal { response: String, diff: ContentDiff },
}

/// Drives one file completion session against a backend.
pub struct CompletionController<B> {
    backend: B,
    session: Option<FileCompletionSession>,
}

impl<B: CompletionBackend> CompletionController<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            session: None,
        }
    }

    pub fn state(&self) -> SessionState {
        match &self.session {
            None => SessionState::Uninitialized,
            Some(s) if s.has_proposal() => SessionState::ProposalPending,
            Some(_) => SessionState::Active,
        }
    }

    pub fn session(&self) -> Option<&FileCompletionSession> {
        self.session.as_ref()
    }

    pub fn total_tokens(&self) -> u64 {
        self.session.as_ref().map_or(0, |s| s.total_tokens_used)
    }

    /// Open a session for `file_id`, replacing any current one.
    pub async fn start(&mut self, file_id: &str) -> Result<&FileCompletionSession, CompletionError> {
        let session = self.backend.create_session(file_id).await?;
        info!(session = %session.id, file_id, "file completion session started");
        Ok(self.session.insert(session))
    }

    /// Send a chat message. The user turn is recorded before the backend is
    /// called and stays recorded if the call fails.
    pub async fn send(&mut self, text: &str) -> Result<TurnReply, CompletionError> {
        let session = self.session.as_mut().ok_or(CompletionError::NoSession)?;
        session.record_turn(Role::User, text, Utc::now());

        let reply = self.backend.send_message(&session.id, text).await?;
        session.record_turn(Role::Assistant, &reply.response, Utc::now());
        if let Some(tokens) = reply.tokens_used {
            session.add_tokens(tokens);
        }

        let proposed = reply.proposed_content().map(str::to_string);
        if let Some(content) = proposed
            && session.propose(content)
        {
            let diff = session.diff().unwrap_or_default();
            debug!(session = %session.id, changes = %diff.summary(), "proposal received");
            return Ok(TurnReply::Proposal {
                response: reply.response,
                diff,
            });
        }
        Ok(TurnReply::Chat(reply.response))
    }

    /// Persist the pending proposal server-side, then commit it locally.
    /// If the server call fails the proposal stays pending.
    pub async fn apply(&mut self) -> Result<&FileVersion, CompletionError> {
        let session = self.session.as_mut().ok_or(CompletionError::NoSession)?;
        let proposal = session
            .proposed_content
            .clone()
            .ok_or(CompletionError::NoProposal)?;

        self.backend.apply_changes(&session.id, &proposal).await?;
        info!(session = %session.id, "proposal applied");
        session.apply_proposal(Utc::now())
    }

    pub fn discard(&mut self) -> Result<String, CompletionError> {
        let session = self.session.as_mut().ok_or(CompletionError::NoSession)?;
        session.discard_proposal()
    }

    /// Restore version `index` as the file's content, server-side first.
    pub async fn revert(&mut self, index: usize) -> Result<&FileVersion, CompletionError> {
        let session = self.session.as_mut().ok_or(CompletionError::NoSession)?;
        let content = session.version(index)?.content.clone();

        self.backend.apply_changes(&session.id, &content).await?;
        info!(session = %session.id, index, "reverted to earlier version");
        session.revert_to(index, Utc::now())
    }

    /// Reload the session from the server. A local proposal survives if it
    /// still differs from the reloaded content; the token count never drops.
    pub async fn refresh(&mut self) -> Result<&FileCompletionSession, CompletionError> {
        let current = self.session.as_ref().ok_or(CompletionError::NoSession)?;
        let mut fresh = self.backend.get_session(&current.id).await?;

        fresh.total_tokens_used = fresh.total_tokens_used.max(current.total_tokens_used);
        if let Some(proposal) = current.proposed_content.clone() {
            fresh.propose(proposal);
        }
        Ok(self.session.insert(fresh))
    }

    pub fn close(&mut self) -> Option<FileCompletionSession> {
        self.session.take()
    }
}
