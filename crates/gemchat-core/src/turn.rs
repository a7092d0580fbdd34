use futures_util::StreamExt;
use tracing::{debug, warn};

use crate::ai::ReplyService;
use crate::error::ServiceError;

/// Where a single turn is in its request/response cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    Sending,
    Streaming,
    Complete,
    Failed,
}

/// Sends user utterances to the completion service and accumulates the
/// streamed reply into one string.
pub struct TurnProcessor<S> {
    service: S,
    state: TurnState,
}

impl<S: ReplyService> TurnProcessor<S> {
    pub fn new(service: S) -> Self {
        Self {
            service,
            state: TurnState::Idle,
        }
    }

    /// State of the most recent turn
    pub fn state(&self) -> TurnState {
        self.state
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    /// Forget the service's conversation context.
    pub fn reset(&mut self) {
        self.service.reset();
        self.state = TurnState::Idle;
    }

    /// Send `utterance` and wait for the whole reply.
    ///
    /// Fragments are concatenated in delivery order. A fragment without a text
    /// payload contributes its textual representation instead. Any fragment
    /// error fails the turn and nothing of the partial reply is returned.
    pub async fn process(&mut self, utterance: &str) -> Result<String, ServiceError> {
        self.transition(TurnState::Sending);

        let mut reply = String::new();
        let mut fragments = 0usize;
        let result = {
            let mut stream = self.service.send_message(utterance);
            let mut result = Ok(());
            while let Some(fragment) = stream.next().await {
                match fragment {
                    Ok(fragment) => {
                        if fragments == 0 {
                            self.state = TurnState::Streaming;
                            debug!(state = ?self.state, "turn state");
                        }
                        fragments += 1;
                        if fragment.payload().is_none() {
                            debug!(%fragment, "fragment without text payload, using its representation");
                        }
                        fragment.append_to(&mut reply);
                    }
                    Err(err) => {
                        result = Err(err);
                        break;
                    }
                }
            }
            result
        };

        match result {
            Ok(()) => {
                self.transition(TurnState::Complete);
                debug!(fragments, chars = reply.len(), "reply complete");
                Ok(reply)
            }
            Err(err) => {
                self.transition(TurnState::Failed);
                warn!(error = %err, fragments, "turn failed");
                Err(err)
            }
        }
    }

    fn transition(&mut self, next: TurnState) {
        debug!(from = ?self.state, to = ?next, "turn state");
        self.state = next;
    }
}
