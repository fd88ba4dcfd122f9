use crate::conversation::SharedConversation;
use crate::error::{ChatError, SessionOutcome};
use crate::events::{MessageId, Status};
use crate::llm::{extract_event, ByteStream, ChatClient, ChatRequest, StreamEvent};
use crate::streaming::FrameDecoder;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Lifecycle of one exchange with the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    /// Request sent, waiting for the first body chunk
    Requesting,
    Streaming,
    Completed,
    Failed,
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Completed | SessionState::Failed | SessionState::Cancelled
        )
    }
}

/// Owns one in-flight exchange and the assistant placeholder it fills.
///
/// The session is the only writer to its placeholder. Each applied delta
/// replaces the placeholder's content with the full accumulated text, so the
/// store never has to be read back to continue accumulating.
pub struct StreamSession {
    store: SharedConversation,
    placeholder_id: MessageId,
    cancel: CancellationToken,
    /// Content-so-far of the placeholder
    buffer: String,
    state: SessionState,
}

impl StreamSession {
    pub fn new(
        store: SharedConversation,
        placeholder_id: MessageId,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            placeholder_id,
            cancel,
            buffer: String::new(),
            state: SessionState::Idle,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn placeholder_id(&self) -> MessageId {
        self.placeholder_id
    }

    /// Issue the request and stream the reply into the placeholder.
    pub async fn run(&mut self, client: &ChatClient, request: &ChatRequest) -> SessionOutcome {
        self.state = SessionState::Requesting;
        info!(
            session = %self.placeholder_id,
            history = request.conversation_history.len(),
            "sending chat request"
        );

        let opened = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return self.finish(SessionOutcome::Cancelled),
            opened = client.open(request) => opened,
        };

        match opened {
            Ok(body) => self.drive(body).await,
            Err(err) => self.finish(SessionOutcome::Failed(err)),
        }
    }

    /// Consume a response body until a terminal event, end of stream,
    /// transport error, or cancellation.
    pub async fn drive(&mut self, mut body: ByteStream) -> SessionOutcome {
        if self.state == SessionState::Idle {
            self.state = SessionState::Requesting;
        }
        let mut decoder = FrameDecoder::new();

        let outcome = loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break SessionOutcome::Cancelled,
                next = body.next() => next,
            };

            match next {
                Some(Ok(chunk)) => {
                    if self.state == SessionState::Requesting && !self.enter_streaming() {
                        break SessionOutcome::Cancelled;
                    }
                    decoder.push(&chunk);
                    if let Some(outcome) = self.apply_frames(&mut decoder) {
                        break outcome;
                    }
                }
                Some(Err(err)) => break SessionOutcome::Failed(err),
                None => {
                    decoder.finish();
                    debug!(session = %self.placeholder_id, "stream ended without completion frame");
                    break SessionOutcome::Completed;
                }
            }
        };

        drop(body);
        self.finish(outcome)
    }

    /// Apply every complete frame in order. Returns the outcome once a
    /// terminal event is seen.
    fn apply_frames(&mut self, decoder: &mut FrameDecoder) -> Option<SessionOutcome> {
        while let Some(payload) = decoder.next_payload() {
            match extract_event(&payload) {
                Some(StreamEvent::ContentDelta(text)) => {
                    self.buffer.push_str(&text);
                    if !self.commit() {
                        return Some(SessionOutcome::Cancelled);
                    }
                }
                Some(StreamEvent::Completion) => return Some(SessionOutcome::Completed),
                Some(StreamEvent::Failure(message)) => {
                    return Some(SessionOutcome::Failed(ChatError::Backend(message)));
                }
                None => {}
            }
        }
        None
    }

    fn enter_streaming(&mut self) -> bool {
        let mut store = self.store.lock();
        if self.cancel.is_cancelled() {
            return false;
        }
        store.set_status(Status::Streaming);
        self.state = SessionState::Streaming;
        true
    }

    /// Flush the accumulated text into the store. False once cancelled.
    fn commit(&mut self) -> bool {
        let mut store = self.store.lock();
        if self.cancel.is_cancelled() {
            return false;
        }
        store.replace_content(self.placeholder_id, &self.buffer);
        true
    }

    fn finish(&mut self, outcome: SessionOutcome) -> SessionOutcome {
        let outcome = {
            let mut store = self.store.lock();
            if self.cancel.is_cancelled() {
                // `stop` already settled the status; partial content stays.
                SessionOutcome::Cancelled
            } else {
                match &outcome {
                    SessionOutcome::Completed => store.set_status(Status::Ready),
                    SessionOutcome::Failed(err) => {
                        store.set_error(Some(err.clone()));
                        store.set_status(Status::Error);
                        store.remove_message(self.placeholder_id);
                    }
                    SessionOutcome::Cancelled => {}
                }
                outcome
            }
        };

        self.state = match &outcome {
            SessionOutcome::Completed => SessionState::Completed,
            SessionOutcome::Failed(_) => SessionState::Failed,
            SessionOutcome::Cancelled => SessionState::Cancelled,
        };

        match &outcome {
            SessionOutcome::Failed(err) => {
                warn!(session = %self.placeholder_id, error = %err, "chat session failed");
            }
            _ => info!(
                session = %self.placeholder_id,
                state = ?self.state,
                chars = self.buffer.len(),
                "chat session finished"
            ),
        }
        self.buffer.clear();
        outcome
    }
}

/// A session dropped mid-flight (its future was abandoned, e.g. by a caller
/// deadline) settles the store the way `stop` would: partial content stays
/// and the status returns to `ready`.
impl Drop for StreamSession {
    fn drop(&mut self) {
        if self.state == SessionState::Idle || self.state.is_terminal() {
            return;
        }
        let mut store = self.store.lock();
        if self.cancel.is_cancelled() {
            return;
        }
        self.cancel.cancel();
        store.set_status(Status::Ready);
        self.state = SessionState::Cancelled;
        info!(
            session = %self.placeholder_id,
            chars = self.buffer.len(),
            "chat session abandoned"
        );
    }
}
