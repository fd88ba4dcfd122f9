//! Streaming chat client for backends that answer with server-sent-event
//! style bodies.
//!
//! [`Chat`] is the entry point: it appends the user turn and an empty
//! assistant placeholder, then runs a [`StreamSession`] that decodes frames
//! ([`FrameDecoder`]), normalizes them ([`extract_event`]) and fills the
//! placeholder in the [`Conversation`] store as deltas arrive.

pub mod chat;
pub mod commands;
pub mod config;
pub mod conversation;
pub mod error;
pub mod events;
pub mod llm;
pub mod session;
pub mod streaming;

pub use chat::{Chat, ChatOptions};
pub use config::Config;
pub use conversation::{Conversation, SharedConversation};
pub use error::{ChatError, SessionOutcome};
pub use events::{ConversationEvent, Message, MessageId, Role, Status};
pub use llm::{extract_event, ByteStream, ChatClient, ChatRequest, HistoryMessage, StreamEvent};
pub use session::{SessionState, StreamSession};
pub use streaming::FrameDecoder;
