//! The conversation ledger.
//!
//! An ordered log of user and assistant messages that is updated
//! optimistically while a response is still streaming. At most one assistant
//! message is *provisional* (still receiving content) at any time.
//!
//! ```text
//! append_user ─► open_provisional_assistant ─► apply_delta* ─┬─► finalize
//!                                                            ├─► fail
//!                                                            └─► discard_provisional
//! ```

pub mod reconcile;

pub use reconcile::{HistoryEntry, ReconcileReport};

use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::LedgerError;

/// Number of messages sent as conversation memory when nothing is configured.
pub const DEFAULT_CONTEXT_WINDOW: usize = 10;

/// Format version written into every snapshot.
pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    /// Label used in the textual context window.
    pub fn label(self) -> &'static str {
        match self {
            Role::User => "User",
            Role::Assistant => "Assistant",
        }
    }

    fn id_prefix(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id_prefix())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reactions {
    pub up: u32,
    pub down: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReactionKind {
    Up,
    Down,
}

impl std::str::FromStr for ReactionKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "up" | "like" | "+1" => Ok(ReactionKind::Up),
            "down" | "dislike" | "-1" => Ok(ReactionKind::Down),
            _ => anyhow::bail!("Invalid reaction '{}'. Valid values: up, down", s),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum MessageStatus {
    /// Still receiving content deltas.
    Provisional,
    #[default]
    Final,
    /// The turn failed; whatever content arrived is kept.
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// `role-timestamp` for local messages, server-derived once reconciled.
    pub id: String,
    pub role: Role,
    /// The user prompt this message belongs to (its own text for user
    /// messages). Used as the reconciliation key.
    pub prompt: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub edited: bool,
    #[serde(default)]
    pub reactions: Reactions,
    #[serde(default)]
    pub status: MessageStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_used: Option<String>,
    #[serde(default)]
    pub has_diagram: bool,
    /// Identity of the authoritative history record this message was
    /// confirmed against.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_key: Option<String>,
}

impl Message {
    fn new(role: Role, prompt: &str, content: &str, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: local_id(role, timestamp),
            role,
            prompt: prompt.to_string(),
            content: content.to_string(),
            timestamp,
            edited: false,
            reactions: Reactions::default(),
            status: MessageStatus::Final,
            service_used: None,
            has_diagram: false,
            server_key: None,
        }
    }

    pub fn is_provisional(&self) -> bool {
        self.status == MessageStatus::Provisional
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, MessageStatus::Failed { .. })
    }
}

fn local_id(role: Role, timestamp: DateTime<Utc>) -> String {
    format!("{}-{}", role.id_prefix(), timestamp.timestamp_millis())
}

/// Serialized form of the ledger, as written to the durable store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub version: u32,
    pub messages: Vec<Message>,
}

#[derive(Debug, Default, Clone)]
pub struct ConversationLedger {
    messages: Vec<Message>,
    /// Id of the open provisional assistant message.
    open: Option<String>,
}

impl ConversationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a ledger from a stored snapshot. A provisional message left
    /// over from an interrupted session is finalized with what it has.
    pub fn from_snapshot(snapshot: LedgerSnapshot) -> Self {
        let mut messages = snapshot.messages;
        for msg in messages.iter_mut().filter(|m| m.is_provisional()) {
            debug!(id = %msg.id, "finalizing provisional message restored from snapshot");
            msg.status = MessageStatus::Final;
        }
        messages.sort_by_key(|m| m.timestamp);
        Self {
            messages,
            open: None,
        }
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            version: SNAPSHOT_VERSION,
            messages: self.messages.clone(),
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    /// The open provisional assistant message, if any.
    pub fn provisional(&self) -> Option<&Message> {
        self.open.as_deref().and_then(|id| self.get(id))
    }

    pub fn has_open_provisional(&self) -> bool {
        self.open.is_some()
    }

    /// Append a user message. An open provisional slot is finalized first
    /// with whatever content it has accumulated.
    pub fn append_user(&mut self, text: &str) -> &Message {
        self.append_user_at(text, Utc::now())
    }

    pub(crate) fn append_user_at(&mut self, text: &str, now: DateTime<Utc>) -> &Message {
        self.resolve_open();
        let timestamp = self.next_timestamp(now);
        let mut msg = Message::new(Role::User, text, text, timestamp);
        msg.id = self.unique_id(msg.id);
        self.messages.push(msg);
        &self.messages[self.messages.len() - 1]
    }

    /// Open the provisional assistant slot for `prompt` and return its id.
    pub fn open_provisional_assistant(&mut self, prompt: &str) -> String {
        self.open_provisional_assistant_at(prompt, Utc::now())
    }

    pub(crate) fn open_provisional_assistant_at(&mut self, prompt: &str, now: DateTime<Utc>) -> String {
        self.resolve_open();
        let timestamp = self.next_timestamp(now);
        let mut msg = Message::new(Role::Assistant, prompt, "", timestamp);
        msg.status = MessageStatus::Provisional;
        msg.id = self.unique_id(msg.id);
        let id = msg.id.clone();
        self.messages.push(msg);
        self.open = Some(id.clone());
        id
    }

    /// Append streamed text to the provisional message.
    pub fn apply_delta(&mut self, delta: &str) -> Result<(), LedgerError> {
        let msg = self.open_mut()?;
        msg.content.push_str(delta);
        Ok(())
    }

    /// Replace the provisional message's content wholesale, for responses
    /// that arrive in one piece.
    pub fn set_provisional_content(&mut self, content: &str) -> Result<(), LedgerError> {
        let msg = self.open_mut()?;
        msg.content = content.to_string();
        Ok(())
    }

    pub fn mark_diagram(&mut self, has_diagram: bool) -> Result<(), LedgerError> {
        self.open_mut()?.has_diagram = has_diagram;
        Ok(())
    }

    /// Close the provisional slot successfully.
    pub fn finalize(&mut self, service_used: Option<String>) -> Result<&Message, LedgerError> {
        let idx = self.open_index()?;
        self.open = None;
        let msg = &mut self.messages[idx];
        msg.status = MessageStatus::Final;
        msg.service_used = service_used;
        info!(id = %msg.id, chars = msg.content.len(), "assistant message finalized");
        Ok(&self.messages[idx])
    }

    /// Close the provisional slot as failed. Partial content stays on the
    /// message so callers can inspect or remove it.
    pub fn fail(&mut self, reason: &str) -> Result<&Message, LedgerError> {
        let idx = self.open_index()?;
        self.open = None;
        let msg = &mut self.messages[idx];
        msg.status = MessageStatus::Failed {
            reason: reason.to_string(),
        };
        info!(id = %msg.id, reason, "assistant message failed");
        Ok(&self.messages[idx])
    }

    /// Drop the provisional message entirely.
    pub fn discard_provisional(&mut self) -> Result<Message, LedgerError> {
        let idx = self.open_index()?;
        self.open = None;
        Ok(self.messages.remove(idx))
    }

    pub fn edit(&mut self, id: &str, text: &str) -> Result<(), LedgerError> {
        if self.open.as_deref() == Some(id) {
            return Err(LedgerError::MessageInFlight { id: id.to_string() });
        }
        let msg = self.find_mut(id)?;
        msg.content = text.to_string();
        msg.edited = true;
        Ok(())
    }

    pub fn remove(&mut self, id: &str) -> Result<Message, LedgerError> {
        let idx = self.index_of(id)?;
        if self.open.as_deref() == Some(id) {
            self.open = None;
        }
        Ok(self.messages.remove(idx))
    }

    /// Increment a reaction counter. Counters only ever grow.
    pub fn react(&mut self, id: &str, kind: ReactionKind) -> Result<Reactions, LedgerError> {
        let msg = self.find_mut(id)?;
        match kind {
            ReactionKind::Up => msg.reactions.up = msg.reactions.up.saturating_add(1),
            ReactionKind::Down => msg.reactions.down = msg.reactions.down.saturating_add(1),
        }
        Ok(msg.reactions)
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.open = None;
    }

    /// The last `n` settled messages, oldest first. The open provisional
    /// message and failed messages without content are left out.
    pub fn recent(&self, n: usize) -> Vec<&Message> {
        let settled: Vec<&Message> = self
            .messages
            .iter()
            .filter(|m| !m.is_provisional())
            .filter(|m| !(m.is_failed() && m.content.is_empty()))
            .collect();
        let skip = settled.len().saturating_sub(n);
        settled.into_iter().skip(skip).collect()
    }

    /// Render the last `n` messages as `Role: content` turns separated by
    /// blank lines.
    pub fn context_window(&self, n: usize) -> String {
        self.recent(n)
            .iter()
            .map(|m| format!("{}: {}", m.role.label(), m.content))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    fn resolve_open(&mut self) {
        if let Some(id) = self.open.take()
            && let Some(msg) = self.messages.iter_mut().find(|m| m.id == id)
        {
            info!(id = %id, "finalizing open provisional message before starting a new turn");
            msg.status = MessageStatus::Final;
        }
    }

    /// A whole-millisecond timestamp in a later millisecond than the last
    /// message's. Local ids are built from it.
    fn next_timestamp(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let now = now.trunc_subsecs(3);
        match self.messages.last() {
            Some(last) => now.max(last.timestamp.trunc_subsecs(3) + Duration::milliseconds(1)),
            None => now,
        }
    }

    /// `base`, or `base-N` for the smallest N that no message uses yet.
    fn unique_id(&self, base: String) -> String {
        let mut id = base.clone();
        let mut n = 2;
        while self.get(&id).is_some() {
            id = format!("{}-{}", base, n);
            n += 1;
        }
        id
    }

    /// Insert at the position its timestamp dictates, nudging the timestamp
    /// forward until it is unique. Returns the index.
    fn insert_sorted(&mut self, mut msg: Message) -> usize {
        while self.messages.iter().any(|m| m.timestamp == msg.timestamp) {
            msg.timestamp += Duration::milliseconds(1);
        }
        msg.id = self.unique_id(msg.id);
        let idx = self.messages.partition_point(|m| m.timestamp < msg.timestamp);
        self.messages.insert(idx, msg);
        idx
    }

    fn index_of(&self, id: &str) -> Result<usize, LedgerError> {
        self.messages
            .iter()
            .position(|m| m.id == id)
            .ok_or_else(|| LedgerError::MessageNotFound { id: id.to_string() })
    }

    fn find_mut(&mut self, id: &str) -> Result<&mut Message, LedgerError> {
        let idx = self.index_of(id)?;
        Ok(&mut self.messages[idx])
    }

    fn open_index(&self) -> Result<usize, LedgerError> {
        let id = self.open.as_deref().ok_or(LedgerError::NoProvisional)?;
        self.index_of(id)
    }

    fn open_mut(&mut self) -> Result<&mut Message, LedgerError> {
        let idx = self.open_index()?;
        Ok(&mut self.messages[idx])
    }
}

/// Build the outgoing prompt: the context window, a blank line, then the
/// new user turn. The backend keeps no state between calls, so this is the
/// only memory it gets.
pub fn compose_prompt(context_window: &str, prompt: &str) -> String {
    if context_window.is_empty() {
        prompt.to_string()
    } else {
        format!("{}\n\nUser: {}", context_window, prompt)
    }
}
