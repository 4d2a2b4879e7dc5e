//! The conversation handle.
//!
//! Ties the ledger, the durable store and the generation client together.
//! One `Conversation` is owned by one task; every settled mutation is
//! persisted before the call returns.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::engine_config::ConversationSection;
use crate::errors::{ApiError, GenerationError, LedgerError};
use crate::ledger::{
    ConversationLedger, Message, ReactionKind, Reactions, ReconcileReport, compose_prompt,
};
use crate::session::{GenerationClient, GenerationRequest, HistoryTurn, TurnOutcome};
use crate::store::LedgerStore;

pub struct Conversation {
    ledger: ConversationLedger,
    store: LedgerStore,
    client: GenerationClient,
    context_window: usize,
    streaming: bool,
}

impl Conversation {
    pub fn new(
        ledger: ConversationLedger,
        store: LedgerStore,
        client: GenerationClient,
        settings: &ConversationSection,
    ) -> Self {
        Self {
            ledger,
            store,
            client,
            context_window: settings.context_window,
            streaming: settings.streaming,
        }
    }

    /// Restore the persisted conversation, or start empty.
    pub async fn open(
        store: LedgerStore,
        client: GenerationClient,
        settings: &ConversationSection,
    ) -> Self {
        let ledger = match store.load().await {
            Some(snapshot) => {
                debug!(messages = snapshot.messages.len(), "restored conversation");
                ConversationLedger::from_snapshot(snapshot)
            }
            None => ConversationLedger::new(),
        };
        Self::new(ledger, store, client, settings)
    }

    pub fn ledger(&self) -> &ConversationLedger {
        &self.ledger
    }

    /// The request that would be sent for `prompt` right now.
    pub fn build_request(&self, prompt: &str) -> GenerationRequest {
        let window = self.ledger.context_window(self.context_window);
        let conversation_history = self
            .ledger
            .recent(self.context_window)
            .into_iter()
            .map(HistoryTurn::from)
            .collect();

        GenerationRequest {
            prompt: compose_prompt(&window, prompt),
            conversation_history,
            stream: self.streaming,
        }
    }

    /// Run one generation turn.
    ///
    /// On success the assistant message is final and persisted. On failure
    /// it is marked failed with whatever content arrived. On cancellation the
    /// provisional message stays open; settle it with
    /// [`Conversation::resolve_cancelled`] or by starting the next turn, which
    /// keeps the partial answer and includes it in the outgoing context.
    pub async fn send(
        &mut self,
        prompt: &str,
        mut on_delta: impl FnMut(&str),
        cancel: CancellationToken,
    ) -> Result<TurnOutcome, GenerationError> {
        if self.ledger.has_open_provisional() {
            self.ledger.finalize(None)?;
        }
        let request = self.build_request(prompt);
        self.ledger.append_user(prompt);
        self.persist().await;
        self.ledger.open_provisional_assistant(prompt);

        let result = if self.streaming {
            self.stream_turn(request, &mut on_delta, cancel).await
        } else {
            self.single_turn(request, &mut on_delta, cancel).await
        };

        match result {
            Ok(TurnOutcome::Completed {
                content,
                service_used,
            }) => {
                self.ledger.finalize(service_used.clone())?;
                self.persist().await;
                Ok(TurnOutcome::Completed {
                    content,
                    service_used,
                })
            }
            Ok(cancelled) => {
                info!("turn cancelled, provisional message left open");
                Ok(cancelled)
            }
            Err(e) => {
                if let Err(ledger_err) = self.ledger.fail(&e.to_string()) {
                    warn!("Could not mark turn as failed: {}", ledger_err);
                }
                self.persist().await;
                Err(e)
            }
        }
    }

    async fn stream_turn(
        &mut self,
        request: GenerationRequest,
        on_delta: &mut impl FnMut(&str),
        cancel: CancellationToken,
    ) -> Result<TurnOutcome, GenerationError> {
        let mut turn = self.client.open_stream(request, cancel).await?;
        while let Some(delta) = turn.next_delta().await {
            self.ledger.apply_delta(&delta)?;
            on_delta(&delta);
        }
        turn.finish().await
    }

    async fn single_turn(
        &mut self,
        request: GenerationRequest,
        on_delta: &mut impl FnMut(&str),
        cancel: CancellationToken,
    ) -> Result<TurnOutcome, GenerationError> {
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Ok(TurnOutcome::Cancelled { partial: String::new() });
            }
            response = self.client.generate(request) => response?,
        };

        self.ledger.set_provisional_content(&response.content)?;
        self.ledger.mark_diagram(response.has_diagram)?;
        on_delta(&response.content);
        Ok(TurnOutcome::Completed {
            content: response.content,
            service_used: response.service_used,
        })
    }

    /// Settle a cancelled turn: keep the partial answer as final, or drop it.
    pub async fn resolve_cancelled(&mut self, keep: bool) -> Result<(), LedgerError> {
        if keep {
            self.ledger.finalize(None)?;
        } else {
            self.ledger.discard_provisional()?;
        }
        self.persist().await;
        Ok(())
    }

    pub async fn edit(&mut self, id: &str, text: &str) -> Result<(), LedgerError> {
        self.ledger.edit(id, text)?;
        self.persist().await;
        Ok(())
    }

    pub async fn remove(&mut self, id: &str) -> Result<Message, LedgerError> {
        let removed = self.ledger.remove(id)?;
        self.persist().await;
        Ok(removed)
    }

    pub async fn react(&mut self, id: &str, kind: ReactionKind) -> Result<Reactions, LedgerError> {
        let reactions = self.ledger.react(id, kind)?;
        self.persist().await;
        Ok(reactions)
    }

    /// Empty the ledger and drop the stored snapshot.
    pub async fn clear(&mut self) {
        self.ledger.clear();
        self.store.clear().await;
    }

    /// Fetch the authoritative history once and merge it.
    pub async fn sync_history(&mut self) -> Result<ReconcileReport, ApiError> {
        let entries = self.client.fetch_history().await?;
        let report = self.ledger.reconcile(&entries);
        if report.appended + report.confirmed > 0 {
            self.persist().await;
        }
        Ok(report)
    }

    /// Sync on a fixed interval until `cancel` fires. Failed fetches are
    /// logged and retried on the next tick.
    pub async fn poll_history(
        &mut self,
        every: Duration,
        cancel: CancellationToken,
        mut on_report: impl FnMut(&ReconcileReport),
    ) {
        let mut ticker = tokio::time::interval(every);
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("history polling stopped");
                    return;
                }
                _ = ticker.tick() => {}
            }

            match self.sync_history().await {
                Ok(report) => on_report(&report),
                Err(e) => warn!("History sync failed: {}", e),
            }
        }
    }

    async fn persist(&self) {
        if !self.store.save(&self.ledger.snapshot()).await {
            warn!("Conversation changes were not saved");
        }
    }
}
