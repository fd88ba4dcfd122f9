use crate::error::ChatError;
use crate::events::{ConversationEvent, Message, MessageId, Status};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

/// Ordered transcript plus transport status.
///
/// Every operation completes without yielding, so a reader never observes a
/// half-applied mutation. Each mutation is published to subscribers.
#[derive(Debug, Default)]
pub struct Conversation {
    messages: Vec<Message>,
    status: Status,
    error: Option<ChatError>,
    subscribers: Vec<mpsc::UnboundedSender<ConversationEvent>>,
}

impl Conversation {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Self::default()
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn error(&self) -> Option<&ChatError> {
        self.error.as_ref()
    }

    pub fn get(&self, id: MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn append_message(&mut self, message: Message) {
        self.messages.push(message.clone());
        self.publish(ConversationEvent::MessageAppended(message));
    }

    /// Replace a message's content. A missing id is not an error: the
    /// message may already have been rolled back.
    pub fn replace_content(&mut self, id: MessageId, content: &str) {
        let Some(message) = self.messages.iter_mut().find(|m| m.id == id) else {
            tracing::trace!(%id, "replace_content on absent message");
            return;
        };
        message.content.clear();
        message.content.push_str(content);
        self.publish(ConversationEvent::ContentReplaced {
            id,
            content: content.to_string(),
        });
    }

    pub fn remove_message(&mut self, id: MessageId) -> Option<Message> {
        let index = self.messages.iter().position(|m| m.id == id)?;
        let removed = self.messages.remove(index);
        self.publish(ConversationEvent::MessageRemoved(id));
        Some(removed)
    }

    pub fn set_status(&mut self, status: Status) {
        if self.status != status {
            self.status = status;
            self.publish(ConversationEvent::StatusChanged(status));
        }
    }

    pub fn set_error(&mut self, error: Option<ChatError>) {
        self.error = error;
    }

    /// Replace the whole transcript through an updater.
    pub fn update_messages<F>(&mut self, updater: F)
    where
        F: FnOnce(Vec<Message>) -> Vec<Message>,
    {
        let current = std::mem::take(&mut self.messages);
        self.messages = updater(current);
        self.publish(ConversationEvent::MessagesReset(self.messages.clone()));
    }

    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<ConversationEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    fn publish(&mut self, event: ConversationEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

/// Handle shared between the orchestrator and its active session.
///
/// The lock is only ever held for one synchronous store operation, never
/// across an await.
#[derive(Debug, Clone, Default)]
pub struct SharedConversation(Arc<Mutex<Conversation>>);

impl SharedConversation {
    pub fn new(conversation: Conversation) -> Self {
        Self(Arc::new(Mutex::new(conversation)))
    }

    pub fn lock(&self) -> MutexGuard<'_, Conversation> {
        // Operations are single in-place steps; a poisoned value is still consistent.
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn messages(&self) -> Vec<Message> {
        self.lock().messages().to_vec()
    }

    pub fn status(&self) -> Status {
        self.lock().status()
    }

    pub fn error(&self) -> Option<ChatError> {
        self.lock().error().cloned()
    }
}
