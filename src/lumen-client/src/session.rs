//! Chat session: conversation state plus the generation lifecycle.

use std::sync::Arc;
use std::time::Duration;

use lumen_protocol::{
    ChatRelayRequest, ConversationTurn, DEFAULT_MAX_LINE_BYTES, GenerationStats, ModelSummary,
};
use tokio::sync::{RwLock, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cancel::{CancelHandle, CancellationController};
use crate::client::RelayClient;
use crate::consumer::{LiveView, Phase, StreamConsumer, StreamOutcome};
use crate::error::{ClientError, Result};
use crate::notify::{Notice, Notifier, TracingNotifier};
use crate::storage::ChatStore;
use crate::watchdog::IdleWatchdog;

/// Session settings.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub model: Option<String>,
    pub system_prompt: Option<String>,
    /// Warn when no chunk arrives for this long.
    pub slow_response_after: Option<Duration>,
    pub max_line_bytes: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            model: None,
            system_prompt: None,
            slow_response_after: None,
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
        }
    }
}

#[derive(Debug, Default)]
struct Conversation {
    turns: Vec<ConversationTurn>,
    model: Option<String>,
    system_prompt: Option<String>,
}

struct Inner {
    client: RelayClient,
    conversation: RwLock<Conversation>,
    phase: watch::Sender<Phase>,
    live: watch::Sender<LiveView>,
    cancel: CancellationController,
    notifier: Arc<dyn Notifier>,
    store: Option<ChatStore>,
    slow_response_after: Option<Duration>,
    max_line_bytes: usize,
}

/// A conversation with one model behind the relay.
///
/// Cloning is cheap and every clone shares the same conversation. At most
/// one generation runs at a time.
#[derive(Clone)]
pub struct ChatSession {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ChatSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatSession")
            .field("relay", &self.inner.client.base_url())
            .field("phase", &*self.inner.phase.borrow())
            .finish_non_exhaustive()
    }
}

/// Builder for [`ChatSession`].
pub struct ChatSessionBuilder {
    client: RelayClient,
    options: SessionOptions,
    notifier: Arc<dyn Notifier>,
    store: Option<ChatStore>,
}

impl ChatSessionBuilder {
    pub fn options(mut self, options: SessionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn store(mut self, store: ChatStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn build(self) -> ChatSession {
        let SessionOptions {
            model,
            system_prompt,
            slow_response_after,
            max_line_bytes,
        } = self.options;

        ChatSession {
            inner: Arc::new(Inner {
                client: self.client,
                conversation: RwLock::new(Conversation {
                    turns: Vec::new(),
                    model,
                    system_prompt,
                }),
                phase: watch::Sender::new(Phase::Idle),
                live: watch::Sender::new(LiveView::default()),
                cancel: CancellationController::new(),
                notifier: self.notifier,
                store: self.store,
                slow_response_after,
                max_line_bytes,
            }),
        }
    }
}

impl ChatSession {
    pub fn builder(client: RelayClient) -> ChatSessionBuilder {
        ChatSessionBuilder {
            client,
            options: SessionOptions::default(),
            notifier: Arc::new(TracingNotifier),
            store: None,
        }
    }

    pub fn phase(&self) -> Phase {
        *self.inner.phase.borrow()
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<Phase> {
        self.inner.phase.subscribe()
    }

    /// Live content of the generation in flight.
    pub fn subscribe_live(&self) -> watch::Receiver<LiveView> {
        self.inner.live.subscribe()
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.inner.cancel.handle()
    }

    /// Stop the generation in flight. Returns false when there is none.
    pub fn cancel(&self) -> bool {
        let cancelled = self.inner.cancel.cancel();
        if cancelled {
            info!("Generation cancelled by user");
        }
        cancelled
    }

    /// Restore the saved conversation, if any. Returns whether one was found.
    pub async fn restore(&self) -> bool {
        let Some(store) = &self.inner.store else {
            return false;
        };

        match store.load() {
            Ok(Some(chat)) => {
                let mut conversation = self.inner.conversation.write().await;
                conversation.turns = chat.messages;
                if chat.model.is_some() {
                    conversation.model = chat.model;
                }
                true
            }
            Ok(None) => false,
            Err(e) => {
                self.inner
                    .notifier
                    .notify(Notice::Warning(format!("Could not load chat history: {e}")));
                false
            }
        }
    }

    /// Send a user message and stream the reply.
    ///
    /// Returns the finalized assistant turn for completed and cancelled
    /// generations. A generation that breaks mid-stream still leaves an
    /// annotated turn in the conversation and returns
    /// [`ClientError::MidStream`].
    pub async fn send(&self, text: impl Into<String>) -> Result<ConversationTurn> {
        // The token is bound before `Sending` becomes visible, so a cancel
        // issued while the request is being prepared is never lost.
        let mut token = None;
        self.inner.phase.send_if_modified(|phase| {
            if *phase == Phase::Idle {
                *phase = Phase::Sending;
                token = Some(self.inner.cancel.begin());
                true
            } else {
                false
            }
        });
        let Some(token) = token else {
            return Err(ClientError::Busy);
        };

        let _reset = GenerationReset { inner: &self.inner };
        self.generate(text.into(), token).await
    }

    async fn generate(&self, text: String, token: CancellationToken) -> Result<ConversationTurn> {
        let request = {
            let mut conversation = self.inner.conversation.write().await;
            let Some(model) = conversation.model.clone() else {
                self.inner.phase.send_replace(Phase::Failed);
                return Err(ClientError::NoModelSelected);
            };
            conversation.turns.push(ConversationTurn::user(text));
            ChatRelayRequest::new(model, conversation.turns.clone())
                .with_system_prompt(conversation.system_prompt.clone())
        };
        self.persist().await;

        debug!(model = %request.model, turns = request.messages.len(), "Sending chat request");

        let opened = if token.is_cancelled() {
            Err(ClientError::Cancelled)
        } else {
            self.inner.client.open_chat(&request, &token).await
        };
        let outcome = match opened {
            Ok(stream) => {
                let consumer = StreamConsumer::new(
                    &self.inner.phase,
                    &self.inner.live,
                    self.inner.notifier.as_ref(),
                    IdleWatchdog::new(self.inner.slow_response_after),
                    self.inner.max_line_bytes,
                );
                consumer.run(stream, &token).await
            }
            Err(ClientError::Cancelled) => StreamOutcome::Cancelled {
                content: String::new(),
                stats: None,
            },
            Err(e) => {
                warn!(error = %e, "Chat request failed");
                self.inner.phase.send_replace(Phase::Failed);
                self.inner.notifier.notify(Notice::Error(e.user_message()));
                return Err(e);
            }
        };

        self.finalize(&request.model, outcome).await
    }

    async fn finalize(&self, model: &str, outcome: StreamOutcome) -> Result<ConversationTurn> {
        let (phase, turn, error) = match outcome {
            StreamOutcome::Completed { content, stats } => {
                if content.is_empty() {
                    let error = ClientError::EmptyCompletion;
                    self.inner.phase.send_replace(Phase::Failed);
                    self.inner.notifier.notify(Notice::Error(error.user_message()));
                    return Err(error);
                }
                let turn = assistant_turn(content, model, stats);
                (Phase::Completed, turn, None)
            }
            StreamOutcome::Cancelled { content, stats } => {
                info!(received = content.len(), "Keeping partial response");
                let turn = assistant_turn(content, model, stats).interrupted();
                (Phase::Cancelled, turn, None)
            }
            StreamOutcome::Failed {
                content,
                stats,
                message,
            } => {
                let error = ClientError::MidStream {
                    partial_len: content.len(),
                    message: message.clone(),
                };
                let annotated = if content.is_empty() {
                    format!("Error: {message}")
                } else {
                    format!("{content}\n\n[Error: {message}]")
                };
                let turn = assistant_turn(annotated, model, stats);
                (Phase::Failed, turn, Some(error))
            }
        };

        self.inner
            .conversation
            .write()
            .await
            .turns
            .push(turn.clone());
        self.inner.phase.send_replace(phase);
        self.persist().await;

        match error {
            Some(error) => {
                self.inner.notifier.notify(Notice::Error(error.user_message()));
                Err(error)
            }
            None => Ok(turn),
        }
    }

    /// Snapshot of the conversation.
    pub async fn conversation(&self) -> Vec<ConversationTurn> {
        self.inner.conversation.read().await.turns.clone()
    }

    pub async fn model(&self) -> Option<String> {
        self.inner.conversation.read().await.model.clone()
    }

    pub async fn set_model(&self, model: Option<String>) {
        self.inner.conversation.write().await.model = model.filter(|m| !m.trim().is_empty());
        self.persist().await;
    }

    pub async fn system_prompt(&self) -> Option<String> {
        self.inner.conversation.read().await.system_prompt.clone()
    }

    pub async fn set_system_prompt(&self, prompt: Option<String>) {
        self.inner.conversation.write().await.system_prompt = prompt;
    }

    /// Replace the content of one turn.
    pub async fn edit_turn(&self, index: usize, content: impl Into<String>) -> Result<()> {
        {
            let mut conversation = self.inner.conversation.write().await;
            let len = conversation.turns.len();
            let turn = conversation
                .turns
                .get_mut(index)
                .ok_or(ClientError::InvalidTurn { index, len })?;
            turn.content = content.into();
        }
        self.persist().await;
        Ok(())
    }

    /// Remove one turn and return it.
    pub async fn delete_turn(&self, index: usize) -> Result<ConversationTurn> {
        let removed = {
            let mut conversation = self.inner.conversation.write().await;
            let len = conversation.turns.len();
            if index >= len {
                return Err(ClientError::InvalidTurn { index, len });
            }
            conversation.turns.remove(index)
        };
        self.persist().await;
        Ok(removed)
    }

    /// Drop every turn and the saved history.
    pub async fn clear(&self) {
        self.inner.conversation.write().await.turns.clear();
        if let Some(store) = &self.inner.store {
            if let Err(e) = store.clear() {
                self.inner
                    .notifier
                    .notify(Notice::Warning(format!("Could not clear chat history: {e}")));
            }
        }
    }

    pub async fn list_models(&self) -> Result<Vec<ModelSummary>> {
        self.inner.client.list_models().await
    }

    async fn persist(&self) {
        let Some(store) = &self.inner.store else {
            return;
        };

        let conversation = self.inner.conversation.read().await;
        if let Err(e) = store.save(&conversation.turns, conversation.model.as_deref()) {
            warn!(error = %e, "Failed to save chat history");
            self.inner
                .notifier
                .notify(Notice::Warning(format!("Chat history not saved: {e}")));
        }
    }
}

/// Returns the session to `Idle` when a generation ends, including when the
/// `send` future is dropped part way through.
struct GenerationReset<'a> {
    inner: &'a Inner,
}

impl Drop for GenerationReset<'_> {
    fn drop(&mut self) {
        self.inner.cancel.finish();
        self.inner.live.send_replace(LiveView::default());
        self.inner.phase.send_replace(Phase::Idle);
    }
}

fn assistant_turn(
    content: String,
    model: &str,
    stats: Option<GenerationStats>,
) -> ConversationTurn {
    ConversationTurn::assistant(content)
        .with_model(model)
        .with_stats(stats)
}
