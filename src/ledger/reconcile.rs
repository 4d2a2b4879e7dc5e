//! Merging authoritative history into the live ledger.
//!
//! The backend keeps its own record of prompt/response pairs. Each fetch of
//! that record is merged so that optimistic local entries are confirmed in
//! place instead of being duplicated. Merging the same snapshot twice is a
//! no-op.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{ConversationLedger, Message, MessageStatus, Role};

/// One authoritative prompt/response pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(default)]
    pub id: Option<String>,
    pub prompt: String,
    pub response: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub service_used: Option<String>,
}

impl HistoryEntry {
    /// Stable identity: the server id when present, else prompt and time.
    pub fn key(&self) -> String {
        match &self.id {
            Some(id) => id.clone(),
            None => format!("{}@{}", self.prompt, self.timestamp.to_rfc3339()),
        }
    }

    fn user_id(&self) -> Option<String> {
        self.id.as_ref().map(|id| format!("{}-prompt", id))
    }

    fn assistant_id(&self) -> Option<String> {
        self.id.as_ref().map(|id| format!("{}-response", id))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Pairs that were not in the ledger and got inserted.
    pub appended: usize,
    /// Local messages that were matched and adopted the server identity.
    pub confirmed: usize,
    /// Entries already represented.
    pub skipped: usize,
}

impl ConversationLedger {
    /// Merge an authoritative history snapshot, keyed on prompt text.
    pub fn reconcile(&mut self, entries: &[HistoryEntry]) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        let mut ordered: Vec<&HistoryEntry> = entries.iter().collect();
        ordered.sort_by_key(|e| e.timestamp);

        for entry in ordered {
            let key = entry.key();
            if self.is_represented(entry, &key) {
                report.skipped += 1;
            } else if self.confirm_local(entry, &key) {
                report.confirmed += 1;
            } else {
                self.insert_pair(entry, &key);
                report.appended += 1;
            }
        }

        debug!(
            appended = report.appended,
            confirmed = report.confirmed,
            skipped = report.skipped,
            "history reconciled"
        );
        report
    }

    fn is_represented(&self, entry: &HistoryEntry, key: &str) -> bool {
        self.messages.iter().any(|m| {
            m.role == Role::User
                && (m.server_key.as_deref() == Some(key)
                    || (m.prompt == entry.prompt && m.timestamp == entry.timestamp))
        })
    }

    /// The earliest optimistic turn with this prompt adopts the entry. Its
    /// answer takes the authoritative content in place, whether it is
    /// settled or still the open provisional slot.
    fn confirm_local(&mut self, entry: &HistoryEntry, key: &str) -> bool {
        let Some(user_idx) = self.messages.iter().position(|m| {
            m.role == Role::User && m.server_key.is_none() && m.prompt == entry.prompt
        }) else {
            return false;
        };

        adopt_prompt(&mut self.messages[user_idx], entry, key);
        match self.answer_of(user_idx) {
            Some(idx) => {
                if self.open.as_deref() == Some(self.messages[idx].id.as_str()) {
                    debug!(id = %self.messages[idx].id, "provisional answer confirmed by history");
                    self.open = None;
                }
                adopt_response(&mut self.messages[idx], entry, key);
            }
            None => self.insert_answer(user_idx, entry, key),
        }
        true
    }

    /// The unconfirmed answer to the user message at `user_idx`, looked up
    /// before the next local user turn.
    fn answer_of(&self, user_idx: usize) -> Option<usize> {
        let prompt = &self.messages[user_idx].prompt;
        self.messages[user_idx + 1..]
            .iter()
            .take_while(|m| !(m.role == Role::User && m.server_key.is_none()))
            .position(|m| {
                m.role == Role::Assistant && m.server_key.is_none() && &m.prompt == prompt
            })
            .map(|offset| user_idx + 1 + offset)
    }

    fn insert_pair(&mut self, entry: &HistoryEntry, key: &str) {
        let mut user = Message::new(Role::User, &entry.prompt, &entry.prompt, entry.timestamp);
        adopt_prompt(&mut user, entry, key);
        let user_idx = self.insert_sorted(user);
        self.insert_answer(user_idx, entry, key);
    }

    /// Put the answer directly after the user message at `user_idx`, timed
    /// between it and whatever follows.
    fn insert_answer(&mut self, user_idx: usize, entry: &HistoryEntry, key: &str) {
        let after = self.messages[user_idx].timestamp;
        let timestamp = match self.messages.get(user_idx + 1) {
            Some(next) => after + (next.timestamp - after) / 2,
            None => after + Duration::milliseconds(1),
        };
        let mut msg = response_message(entry, key, timestamp);
        msg.id = self.unique_id(msg.id);
        self.messages.insert(user_idx + 1, msg);
    }
}

fn response_message(entry: &HistoryEntry, key: &str, timestamp: DateTime<Utc>) -> Message {
    let mut msg = Message::new(Role::Assistant, &entry.prompt, "", timestamp);
    adopt_response(&mut msg, entry, key);
    msg
}

fn adopt_prompt(msg: &mut Message, entry: &HistoryEntry, key: &str) {
    if let Some(id) = entry.user_id() {
        msg.id = id;
    }
    msg.server_key = Some(key.to_string());
}

fn adopt_response(msg: &mut Message, entry: &HistoryEntry, key: &str) {
    if let Some(id) = entry.assistant_id() {
        msg.id = id;
    }
    msg.content = entry.response.clone();
    msg.status = MessageStatus::Final;
    if entry.service_used.is_some() {
        msg.service_used = entry.service_used.clone();
    }
    msg.server_key = Some(key.to_string());
}
