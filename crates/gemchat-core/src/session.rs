//! The chat session: in-memory history, its store and the turn processor.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::ai::ReplyService;
use crate::error::{ChatError, StorageError};
use crate::state::ChatTurn;
use crate::store::ConversationStore;
use crate::turn::TurnProcessor;

/// What to persist when the completion service fails mid-turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailedTurnPolicy {
    /// Keep the user's turn without a reply and persist it.
    #[default]
    KeepUserTurn,
    /// Drop the unanswered user turn before persisting.
    Rollback,
}

impl FromStr for FailedTurnPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "keep_user_turn" | "keep" => Ok(FailedTurnPolicy::KeepUserTurn),
            "rollback" => Ok(FailedTurnPolicy::Rollback),
            _ => Err(format!("unknown policy '{}', expected keep or rollback", s)),
        }
    }
}

/// Session context owning the conversation for one running process.
///
/// Created once at start-up by loading the stored history. One turn is fully
/// processed and persisted before the next can start, since `submit` takes
/// `&mut self`.
pub struct ChatSession<S> {
    history: Vec<ChatTurn>,
    store: ConversationStore,
    processor: TurnProcessor<S>,
    policy: FailedTurnPolicy,
}

impl<S: ReplyService> ChatSession<S> {
    pub fn open(
        store: ConversationStore,
        processor: TurnProcessor<S>,
        policy: FailedTurnPolicy,
    ) -> Result<Self, StorageError> {
        let history = store.load()?;
        Ok(Self::from_parts(store, history, processor, policy))
    }

    /// Build a session around history the caller already loaded from `store`.
    pub fn from_parts(
        store: ConversationStore,
        history: Vec<ChatTurn>,
        processor: TurnProcessor<S>,
        policy: FailedTurnPolicy,
    ) -> Self {
        info!(path = ?store.path(), turns = history.len(), "chat session opened");
        Self {
            history,
            store,
            processor,
            policy,
        }
    }

    pub fn history(&self) -> &[ChatTurn] {
        &self.history
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    pub fn processor(&self) -> &TurnProcessor<S> {
        &self.processor
    }

    /// Run one chat turn and persist the result.
    ///
    /// On success the history grows by exactly the user turn and the reply.
    /// On a service failure the history is persisted according to the
    /// session's [`FailedTurnPolicy`] and the service error is returned.
    pub async fn submit(&mut self, utterance: &str) -> Result<String, ChatError> {
        self.history.push(ChatTurn::user(utterance));

        match self.processor.process(utterance).await {
            Ok(reply) => {
                self.history.push(ChatTurn::assistant(reply.clone()));
                self.store.save(&self.history)?;
                Ok(reply)
            }
            Err(err) => {
                if self.policy == FailedTurnPolicy::Rollback {
                    self.history.pop();
                }
                if let Err(save_err) = self.store.save(&self.history) {
                    warn!(error = %save_err, "failed to persist history after failed turn");
                }
                Err(err.into())
            }
        }
    }

    /// Delete the whole conversation, on disk and in the service context.
    pub fn clear(&mut self) -> Result<(), StorageError> {
        self.history.clear();
        self.processor.reset();
        self.store.clear()?;
        info!("chat history deleted");
        Ok(())
    }
}
