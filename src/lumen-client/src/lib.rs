//! Lumen client - chat sessions over the Lumen relay.
//!
//! [`ChatSession`] owns a conversation and drives one generation at a time:
//! it posts the conversation to the relay, folds the streamed frames into a
//! live view, and finalizes an assistant turn when the stream completes,
//! fails, or is cancelled. Conversations are persisted through
//! [`ChatStore`].

#![deny(clippy::print_stdout, clippy::print_stderr)]

pub mod cancel;
pub mod client;
pub mod consumer;
pub mod error;
pub mod notify;
pub mod session;
pub mod storage;
pub mod watchdog;

pub use cancel::{CancelHandle, CancellationController};
pub use client::{ByteStream, DEFAULT_RELAY_URL, RelayClient};
pub use consumer::{LiveView, Phase, StreamConsumer, StreamOutcome};
pub use error::{ClientError, Result};
pub use notify::{CollectingNotifier, Notice, Notifier, TracingNotifier};
pub use session::{ChatSession, ChatSessionBuilder, SessionOptions};
pub use storage::{
    ChatStore, FileStore, HISTORY_KEY, KeyValueStore, MemoryStore, STORAGE_VERSION, StoreError,
    StoredChat,
};
pub use watchdog::IdleWatchdog;
