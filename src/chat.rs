use crate::conversation::{Conversation, SharedConversation};
use crate::error::{ChatError, SessionOutcome};
use crate::events::{ConversationEvent, Message, MessageId, Role, Status};
use crate::llm::{ChatClient, ChatRequest, HistoryMessage};
use crate::session::StreamSession;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub type ErrorCallback = Arc<dyn Fn(&ChatError) + Send + Sync>;
pub type FinishCallback = Arc<dyn Fn() + Send + Sync>;

/// Inputs provided by whoever embeds the chat
#[derive(Clone)]
pub struct ChatOptions {
    /// Conversation id, a fresh UUID when unset
    pub id: Option<String>,
    pub initial_messages: Vec<Message>,
    pub endpoint: String,
    pub connect_timeout: Duration,
    pub on_error: Option<ErrorCallback>,
    pub on_finish: Option<FinishCallback>,
}

impl ChatOptions {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            id: None,
            initial_messages: Vec::new(),
            endpoint: endpoint.into(),
            connect_timeout: Duration::from_secs(10),
            on_error: None,
            on_finish: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_initial_messages(mut self, messages: Vec<Message>) -> Self {
        self.initial_messages = messages;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn on_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(&ChatError) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(callback));
        self
    }

    pub fn on_finish<F>(mut self, callback: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_finish = Some(Arc::new(callback));
        self
    }
}

/// Cancellation handle of the session currently holding the conversation
struct ActiveSession {
    placeholder_id: MessageId,
    cancel: CancellationToken,
}

struct ChatInner {
    id: String,
    client: ChatClient,
    store: SharedConversation,
    active: Mutex<Option<ActiveSession>>,
    on_error: Option<ErrorCallback>,
    on_finish: Option<FinishCallback>,
}

impl Drop for ChatInner {
    fn drop(&mut self) {
        let active = self.active.get_mut().map(Option::take).unwrap_or_default();
        if let Some(active) = active {
            active.cancel.cancel();
        }
    }
}

/// Turn orchestrator: the entry point renderers and input surfaces call.
///
/// Cheap to clone; clones share the conversation. At most one session runs
/// at a time, enforced by `send_message` refusing while a session is active.
#[derive(Clone)]
pub struct Chat {
    inner: Arc<ChatInner>,
}

impl Chat {
    pub fn new(options: ChatOptions) -> Result<Self, ChatError> {
        let client = ChatClient::new(options.endpoint.clone(), options.connect_timeout)?;
        Ok(Self::with_client(client, options))
    }

    /// Use a prebuilt client; `options.endpoint` and `options.connect_timeout`
    /// are not consulted.
    pub fn with_client(client: ChatClient, options: ChatOptions) -> Self {
        let id = options.id.unwrap_or_else(|| Uuid::new_v4().to_string());
        Self {
            inner: Arc::new(ChatInner {
                id,
                client,
                store: SharedConversation::new(Conversation::new(options.initial_messages)),
                active: Mutex::new(None),
                on_error: options.on_error,
                on_finish: options.on_finish,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Snapshot of the ordered transcript.
    pub fn messages(&self) -> Vec<Message> {
        self.inner.store.messages()
    }

    pub fn status(&self) -> Status {
        self.inner.store.status()
    }

    /// Last session failure, cleared by the next send.
    pub fn error(&self) -> Option<ChatError> {
        self.inner.store.error()
    }

    /// Observe every store mutation in order.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ConversationEvent> {
        self.inner.store.lock().subscribe()
    }

    /// Escape hatch for external mutation, e.g. seeding history.
    pub fn set_messages<F>(&self, updater: F)
    where
        F: FnOnce(Vec<Message>) -> Vec<Message>,
    {
        self.inner.store.lock().update_messages(updater);
    }

    /// Send a user turn and stream the reply.
    ///
    /// Returns `None` without touching the conversation when `text` is blank
    /// or a session is already active. Otherwise resolves once the session
    /// reaches a terminal state. Dropping the future before then settles the
    /// session as if `stop` had been called.
    pub async fn send_message(&self, text: &str) -> Option<SessionOutcome> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }

        let (session, request) = {
            let mut store = self.inner.store.lock();
            if store.status().is_busy() {
                tracing::debug!(
                    chat = %self.inner.id,
                    status = %store.status(),
                    "send ignored while busy"
                );
                return None;
            }
            self.start_turn(&mut store, text)
        };

        Some(self.run_turn(session, request).await)
    }

    /// Cancel the active session, if any, and force the status to `ready`.
    pub fn stop(&self) {
        let mut store = self.inner.store.lock();
        if let Some(active) = self.lock_active().take() {
            tracing::info!(
                chat = %self.inner.id,
                session = %active.placeholder_id,
                "stopping session"
            );
            active.cancel.cancel();
        }
        store.set_status(Status::Ready);
    }

    /// Drop the latest user turn and everything after it, then send that
    /// turn's text again. No-op without a user message or while a session is
    /// active.
    pub async fn regenerate(&self) -> Option<SessionOutcome> {
        let (session, request) = {
            let mut store = self.inner.store.lock();
            if store.status().is_busy() {
                return None;
            }
            let index = store.messages().iter().rposition(|m| m.role == Role::User)?;
            let text = store.messages()[index].content.trim().to_string();
            if text.is_empty() {
                return None;
            }
            store.update_messages(|mut messages| {
                messages.truncate(index);
                messages
            });
            // Same critical section as the truncation, so no other send can
            // claim the conversation in between.
            self.start_turn(&mut store, &text)
        };

        Some(self.run_turn(session, request).await)
    }

    /// Whether the backend's health route answers.
    pub async fn health_check(&self) -> bool {
        self.inner.client.health_check().await
    }

    fn lock_active(&self) -> std::sync::MutexGuard<'_, Option<ActiveSession>> {
        self.inner
            .active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append the user turn and placeholder and claim the active slot.
    /// Called with the store lock held and the status not busy.
    fn start_turn(&self, store: &mut Conversation, text: &str) -> (StreamSession, ChatRequest) {
        // History is built from the store as it was plus the new turn, so
        // the request never depends on the append below being visible.
        let mut conversation_history: Vec<HistoryMessage> =
            store.messages().iter().map(HistoryMessage::from).collect();
        conversation_history.push(HistoryMessage {
            role: Role::User,
            content: text.to_string(),
        });

        let placeholder = Message::placeholder();
        let placeholder_id = placeholder.id;
        store.append_message(Message::user(text));
        store.append_message(placeholder);
        store.set_error(None);
        store.set_status(Status::Submitted);

        let cancel = CancellationToken::new();
        *self.lock_active() = Some(ActiveSession {
            placeholder_id,
            cancel: cancel.clone(),
        });

        let session = StreamSession::new(self.inner.store.clone(), placeholder_id, cancel);
        let request = ChatRequest {
            message: text.to_string(),
            conversation_history,
        };
        (session, request)
    }

    async fn run_turn(&self, mut session: StreamSession, request: ChatRequest) -> SessionOutcome {
        let claim = ActiveClaim {
            chat: self,
            placeholder_id: session.placeholder_id(),
        };
        let outcome = session.run(&self.inner.client, &request).await;
        drop(claim);

        match &outcome {
            SessionOutcome::Completed => {
                if let Some(on_finish) = &self.inner.on_finish {
                    on_finish();
                }
            }
            SessionOutcome::Failed(err) => {
                if let Some(on_error) = &self.inner.on_error {
                    on_error(err);
                }
            }
            SessionOutcome::Cancelled => {}
        }
        outcome
    }

    fn release(&self, placeholder_id: MessageId) {
        let mut active = self.lock_active();
        if active.as_ref().map(|a| a.placeholder_id) == Some(placeholder_id) {
            *active = None;
        }
    }
}

/// Frees the active slot when a turn ends, including when its future is
/// dropped before the session finishes.
struct ActiveClaim<'a> {
    chat: &'a Chat,
    placeholder_id: MessageId,
}

impl Drop for ActiveClaim<'_> {
    fn drop(&mut self) {
        self.chat.release(self.placeholder_id);
    }
}

impl std::fmt::Debug for Chat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chat")
            .field("id", &self.inner.id)
            .field("endpoint", &self.inner.client.endpoint())
            .field("status", &self.status())
            .finish()
    }
}
