//! One-at-a-time generation supervisor.
//!
//! The coordinator owns at most one generation task. Starting a new one
//! cancels and awaits the previous task first. Observers follow progress
//! through a `watch` snapshot and a `broadcast` event stream; the coordinator
//! itself knows nothing about how either is rendered.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use chat_core::message::context_before;
use chat_core::{
    ContextTrimmer, GenerationEvent, GenerationSettings, Message, MessageStore, ModelConfig, Role,
    SharedTokenCounter, TokenBudgetUsage,
};
use chat_llm::LLMProvider;

use crate::config::GenerationConfig;
use crate::error::GenerationError;
use crate::session::GenerationSession;
use crate::stream::{consume_fragments, StreamEnd};

/// A new assistant reply for a conversation.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub conversation_id: String,
    /// Full history, ending with the user message being answered.
    pub history: Vec<Message>,
    pub model: ModelConfig,
    pub settings: GenerationSettings,
}

/// Another answer for an existing assistant message.
#[derive(Debug, Clone)]
pub struct RegenerationRequest {
    pub target: Message,
    /// Full conversation; only messages before `target` are sent.
    pub history: Vec<Message>,
    pub model: ModelConfig,
    pub settings: GenerationSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationPhase {
    #[default]
    Idle,
    Streaming,
}

/// Observable coordinator state.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GenerationSnapshot {
    pub phase: GenerationPhase,
    /// Live placeholder while streaming.
    pub message: Option<Message>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "error", rename_all = "snake_case")]
pub enum GenerationStatus {
    Completed,
    Cancelled,
    Failed(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerationOutcome {
    pub message_id: String,
    pub status: GenerationStatus,
    /// Terminal message as persisted, if anything was persisted.
    pub message: Option<Message>,
}

/// Returned by `start`/`regenerate`.
#[derive(Debug, Clone)]
pub struct GenerationHandle {
    pub message_id: String,
    pub conversation_id: String,
    /// Placeholder as it looked when streaming began.
    pub placeholder: Message,
    cancel_token: CancellationToken,
}

impl GenerationHandle {
    /// Request cancellation. Finalization still runs once, inside the task.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// Collaborators shared with the spawned task.
#[derive(Clone)]
struct TaskContext {
    transport: Arc<dyn LLMProvider>,
    counter: SharedTokenCounter,
    store: Arc<dyn MessageStore>,
    state_tx: Arc<watch::Sender<GenerationSnapshot>>,
    event_tx: broadcast::Sender<GenerationEvent>,
}

impl TaskContext {
    fn emit(&self, event: GenerationEvent) {
        // No subscribers is fine.
        let _ = self.event_tx.send(event);
    }
}

pub struct GenerationCoordinator {
    ctx: TaskContext,
    active: Mutex<Option<JoinHandle<GenerationOutcome>>>,
    current_cancel: Mutex<Option<CancellationToken>>,
}

impl GenerationCoordinator {
    pub fn new(
        transport: Arc<dyn LLMProvider>,
        counter: SharedTokenCounter,
        store: Arc<dyn MessageStore>,
        config: GenerationConfig,
    ) -> Self {
        let (state_tx, _) = watch::channel(GenerationSnapshot::default());
        let (event_tx, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            ctx: TaskContext {
                transport,
                counter,
                store,
                state_tx: Arc::new(state_tx),
                event_tx,
            },
            active: Mutex::new(None),
            current_cancel: Mutex::new(None),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GenerationEvent> {
        self.ctx.event_tx.subscribe()
    }

    pub fn watch(&self) -> watch::Receiver<GenerationSnapshot> {
        self.ctx.state_tx.subscribe()
    }

    pub fn snapshot(&self) -> GenerationSnapshot {
        self.ctx.state_tx.borrow().clone()
    }

    pub fn is_streaming(&self) -> bool {
        self.ctx.state_tx.borrow().phase == GenerationPhase::Streaming
    }

    /// Stream a new assistant reply to the end of `request.history`.
    pub async fn start(&self, request: GenerationRequest) -> GenerationHandle {
        let implicit = request.settings.implicit_thinking(&request.model);
        let session = GenerationSession::fresh(&request.conversation_id, implicit);
        self.launch(session, request.history, request.model, request.settings)
            .await
    }

    /// Stream another answer for an assistant message.
    pub async fn regenerate(
        &self,
        request: RegenerationRequest,
    ) -> Result<GenerationHandle, GenerationError> {
        if request.target.role != Role::Assistant {
            return Err(GenerationError::InvalidTarget(request.target.id.clone()));
        }
        let context = context_before(&request.history, &request.target.id)
            .ok_or_else(|| GenerationError::InvalidTarget(request.target.id.clone()))?
            .to_vec();

        let implicit = request.settings.implicit_thinking(&request.model);
        let session = GenerationSession::regenerate(&request.target, implicit);
        Ok(self
            .launch(session, context, request.model, request.settings)
            .await)
    }

    /// Cancel the active generation and wait for its finalization.
    ///
    /// Returns `None` when nothing was running; calling twice is a no-op.
    pub async fn cancel(&self) -> Option<GenerationOutcome> {
        if let Some(token) = self.current_cancel.lock().await.take() {
            token.cancel();
        }
        self.wait().await
    }

    /// Wait for the active generation, if any, to reach a terminal state.
    pub async fn wait(&self) -> Option<GenerationOutcome> {
        let mut active = self.active.lock().await;
        let handle = active.take()?;
        Some(join_outcome(handle).await)
    }

    async fn launch(
        &self,
        session: GenerationSession,
        history: Vec<Message>,
        model: ModelConfig,
        settings: GenerationSettings,
    ) -> GenerationHandle {
        let cancel_token = CancellationToken::new();
        {
            let mut current = self.current_cancel.lock().await;
            if let Some(previous) = current.take() {
                previous.cancel();
            }
            *current = Some(cancel_token.clone());
        }

        let mut active = self.active.lock().await;
        if let Some(previous) = active.take() {
            let outcome = join_outcome(previous).await;
            log::debug!(
                "[{}] Previous generation ended as {:?} before a new start",
                outcome.message_id,
                outcome.status
            );
        }

        let placeholder = session.placeholder().clone();
        log::info!(
            "[{}] Starting {} in conversation {}",
            session.message_id(),
            if session.is_regeneration() { "regeneration" } else { "generation" },
            session.conversation_id()
        );

        self.ctx.state_tx.send_replace(GenerationSnapshot {
            phase: GenerationPhase::Streaming,
            message: Some(placeholder.clone()),
            last_error: None,
        });
        self.ctx.emit(GenerationEvent::Started {
            message: placeholder.clone(),
        });

        let ctx = self.ctx.clone();
        let task_token = cancel_token.clone();
        *active = Some(tokio::spawn(async move {
            run_generation(ctx, session, history, model, settings, task_token).await
        }));

        GenerationHandle {
            message_id: placeholder.id.clone(),
            conversation_id: placeholder.conversation_id.clone(),
            placeholder,
            cancel_token,
        }
    }
}

async fn join_outcome(handle: JoinHandle<GenerationOutcome>) -> GenerationOutcome {
    match handle.await {
        Ok(outcome) => outcome,
        Err(e) => GenerationOutcome {
            message_id: String::new(),
            status: GenerationStatus::Failed(GenerationError::Task(e.to_string()).to_string()),
            message: None,
        },
    }
}

async fn run_generation(
    ctx: TaskContext,
    mut session: GenerationSession,
    history: Vec<Message>,
    model: ModelConfig,
    settings: GenerationSettings,
    cancel_token: CancellationToken,
) -> GenerationOutcome {
    let session_id = session.message_id().to_string();

    tokio::select! {
        biased;
        _ = cancel_token.cancelled() => {
            return finish(&ctx, session, StreamEnd::Cancelled).await;
        }
        _ = ctx.counter.ensure_initialized() => {}
    }

    let trimmed = ContextTrimmer::new(ctx.counter.as_ref())
        .with_reserve(settings.response_reserve)
        .trim(&history, &settings.system_prompt, model.context_length);
    log::debug!(
        "[{}] Context prepared: {} of {} messages, {} tokens ({:?})",
        session_id,
        trimmed.messages.len(),
        history.len(),
        trimmed.token_usage.total_tokens,
        trimmed.outcome
    );
    ctx.emit(GenerationEvent::ContextPrepared {
        usage: TokenBudgetUsage::from(&trimmed),
    });

    let stream = tokio::select! {
        biased;
        _ = cancel_token.cancelled() => {
            return finish(&ctx, session, StreamEnd::Cancelled).await;
        }
        result = ctx.transport.chat_stream(&model, &trimmed.messages, &settings) => result,
    };

    let end = match stream {
        Ok(stream) => {
            let update_ctx = ctx.clone();
            consume_fragments(stream, &mut session, &cancel_token, move |message| {
                update_ctx.emit(GenerationEvent::Updated {
                    message_id: message.id.clone(),
                    content: message.content.clone(),
                    thinking_content: message.thinking_content.clone(),
                    is_thinking: message.is_thinking,
                });
                update_ctx.state_tx.send_modify(|snapshot| {
                    snapshot.message = Some(message.clone());
                });
            })
            .await
        }
        Err(error) => {
            log::warn!("[{}] Transport refused the request: {}", session_id, error);
            StreamEnd::Failed(error)
        }
    };

    finish(&ctx, session, end).await
}

/// Single terminal path for every session.
///
/// Output of any kind is persisted as a terminal message. Without output a
/// fresh placeholder is removed and a regenerated message is left as stored.
async fn finish(ctx: &TaskContext, session: GenerationSession, end: StreamEnd) -> GenerationOutcome {
    let session_id = session.message_id().to_string();
    let is_regeneration = session.is_regeneration();
    let final_message = session.finalize();

    let persisted: Result<Option<Message>, GenerationError> = match final_message {
        Some(message) => ctx
            .store
            .insert_or_replace(&message)
            .await
            .map(|_| Some(message))
            .map_err(GenerationError::from),
        None if is_regeneration => Ok(None),
        None => ctx
            .store
            .delete(&session_id)
            .await
            .map(|_| None)
            .map_err(GenerationError::from),
    };

    let (status, message, event) = match (end, persisted) {
        (_, Err(store_error)) => {
            log::error!("[{}] Failed to persist generation: {}", session_id, store_error);
            let text = store_error.to_string();
            (
                GenerationStatus::Failed(text.clone()),
                None,
                GenerationEvent::Error {
                    message: text,
                    persisted: None,
                },
            )
        }
        (StreamEnd::Completed, Ok(message)) => {
            if message.is_none() {
                log::info!("[{}] Model returned an empty response", session_id);
            }
            (
                GenerationStatus::Completed,
                message.clone(),
                GenerationEvent::Completed { message },
            )
        }
        (StreamEnd::Cancelled, Ok(message)) => {
            log::info!(
                "[{}] Generation cancelled ({})",
                session_id,
                if message.is_some() { "partial answer kept" } else { "nothing to keep" }
            );
            (
                GenerationStatus::Cancelled,
                message.clone(),
                GenerationEvent::Cancelled { message },
            )
        }
        (StreamEnd::Failed(error), Ok(message)) => {
            let text = GenerationError::Transport(error).to_string();
            log::warn!("[{}] Generation failed: {}", session_id, text);
            (
                GenerationStatus::Failed(text.clone()),
                message.clone(),
                GenerationEvent::Error {
                    message: text,
                    persisted: message,
                },
            )
        }
    };

    let last_error = match &status {
        GenerationStatus::Failed(text) => Some(text.clone()),
        _ => None,
    };
    ctx.state_tx.send_replace(GenerationSnapshot {
        phase: GenerationPhase::Idle,
        message: None,
        last_error,
    });
    ctx.emit(event);

    GenerationOutcome {
        message_id: session_id,
        status,
        message,
    }
}
