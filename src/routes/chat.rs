use axum::{
    extract::{Path, State},
    http::header,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    routing::{delete, get, post, put},
    Json, Router,
};
use futures::{channel::mpsc, StreamExt};
use tracing::{error, info, warn};
use uuid::Uuid;
use validator::Validate;

use crate::agents::AgentEvent;
use crate::db::DatabaseOperations;
use crate::llm::{ChatModel, ProviderOverrides, ProviderSelector};
use crate::middleware::{AuthUser, ANONYMOUS_KEY};
use crate::models::{
    ActionResponse, AppState, Chat, ChatMessage, ChatRename, ChatResponse, ChatWithMessages,
    MessageCreate, MessageResponse, PromptResponse, User,
};
use crate::types::{AppError, AppResult, LLMMessage};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/chat", get(list_chats))
        .route("/api/chat/prompt", post(send_prompt))
        .route("/api/chat/prompt/stream", post(send_prompt_stream))
        .route("/api/chat/message", post(send_public_message))
        .route("/api/chat/prompt_public", post(send_public_message))
        .route("/api/chat/messages/{chat_id}", get(get_chat_messages))
        .route("/api/chat/rename/{chat_id}", put(rename_chat))
        .route("/api/chat/archive/{chat_id}", delete(archive_chat))
}

/// Validation, deny words and rate limit, in that order
async fn admit_message(state: &AppState, request: &MessageCreate, limiter_key: &str) -> AppResult<()> {
    request.validate()?;

    let settings = state.settings.snapshot().await;
    if let Some(word) = settings.denied_word(&request.message) {
        info!(word = %word, "Rejected message containing a blocked word");
        return Err(AppError::InvalidRequest(
            "Your message contains blocked content".to_string(),
        ));
    }

    state.chat_limiter.check(limiter_key)
}

async fn select_model(state: &AppState, overrides: &ProviderOverrides) -> AppResult<ChatModel> {
    let snapshot = state.provider_snapshot(overrides).await;
    ProviderSelector::select(&snapshot)
}

fn parse_chat_id(raw: &str) -> AppResult<Uuid> {
    Uuid::parse_str(raw.trim()).map_err(|_| AppError::NotFound("Chat not found".to_string()))
}

async fn owned_chat(state: &AppState, user: &User, raw_id: &str, include_archived: bool) -> AppResult<Chat> {
    let chat_id = parse_chat_id(raw_id)?;
    DatabaseOperations::find_chat(&state.pool, chat_id, user.id, include_archived)
        .await?
        .ok_or_else(|| AppError::NotFound("Chat not found".to_string()))
}

/// The requested chat, or a fresh one when no id was sent
async fn resolve_chat(state: &AppState, user: &User, chat_id: Option<&str>) -> AppResult<Chat> {
    match chat_id.map(str::trim).filter(|id| !id.is_empty()) {
        Some(id) => owned_chat(state, user, id, false).await,
        None => {
            let chat = DatabaseOperations::create_chat(&state.pool, user.id).await?;
            info!(chat_id = %chat.id, user_id = %user.id, "Created chat");
            Ok(chat)
        }
    }
}

/// Store a finished turn. If the write fails the checkpoint is dropped, so the
/// next request rebuilds history from what the database actually holds.
async fn persist_turn(state: &AppState, chat_id: Uuid, human: &str, bot: &str) -> AppResult<()> {
    let stored = DatabaseOperations::append_message(&state.pool, chat_id, human, bot).await;
    if stored.is_err() {
        if let Some(memory) = state.agent.memory() {
            memory.forget(&chat_id.to_string()).await;
        }
    }
    stored.map(|_| ())
}

/// Memory key for an unauthenticated thread. Kept apart from owned chats,
/// whose keys are bare chat ids.
fn public_thread_key(chat_id: &str) -> String {
    format!("public:{}", chat_id)
}

/// Persisted turns as alternating user/assistant messages
pub fn history_from_turns(turns: &[ChatMessage]) -> Vec<LLMMessage> {
    turns
        .iter()
        .flat_map(|turn| [LLMMessage::user(turn.human.clone()), LLMMessage::assistant(turn.bot.clone())])
        .collect()
}

/// Stored turns for a thread the agent has no checkpoint of
async fn seed_history(state: &AppState, chat_id: Uuid) -> AppResult<Vec<LLMMessage>> {
    if state.agent.has_checkpoint(&chat_id.to_string()).await {
        return Ok(Vec::new());
    }
    let turns = DatabaseOperations::list_messages(&state.pool, chat_id).await?;
    Ok(history_from_turns(&turns))
}

async fn list_chats(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> AppResult<Json<Vec<ChatResponse>>> {
    let chats = DatabaseOperations::list_chats(&state.pool, user.id).await?;
    Ok(Json(chats.iter().map(ChatResponse::from).collect()))
}

async fn send_prompt(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    overrides: ProviderOverrides,
    Json(request): Json<MessageCreate>,
) -> AppResult<Json<PromptResponse>> {
    admit_message(&state, &request, &user.id.to_string()).await?;
    let model = select_model(&state, &overrides).await?;
    let chat = resolve_chat(&state, &user, request.chat_id.as_deref()).await?;
    let prior = seed_history(&state, chat.id).await?;

    let thread_id = chat.id.to_string();
    let result = state
        .agent
        .invoke(&model, &thread_id, &request.message, prior)
        .await?;

    persist_turn(&state, chat.id, &request.message, &result.answer).await?;

    Ok(Json(PromptResponse {
        success: true,
        chat_id: thread_id,
        message: result.answer,
    }))
}

/// Server-sent events of `content`, `status`, `complete` and `error` frames.
///
/// The turn runs on its own task, so it finishes and is stored even if the
/// client goes away mid-stream.
async fn send_prompt_stream(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    overrides: ProviderOverrides,
    Json(request): Json<MessageCreate>,
) -> AppResult<impl IntoResponse> {
    admit_message(&state, &request, &user.id.to_string()).await?;
    let model = select_model(&state, &overrides).await?;
    let chat = resolve_chat(&state, &user, request.chat_id.as_deref()).await?;
    let prior = seed_history(&state, chat.id).await?;

    let (tx, rx) = mpsc::unbounded::<AgentEvent>();
    let task_state = state.clone();
    let message = request.message;

    tokio::spawn(async move {
        let thread_id = chat.id.to_string();
        let outcome = task_state
            .agent
            .run_streaming(&model, &thread_id, &message, prior, tx.clone())
            .await;

        match outcome {
            Ok(result) => {
                if let Err(e) = persist_turn(&task_state, chat.id, &message, &result.answer).await {
                    error!(chat_id = %chat.id, error = %e, "Failed to store streamed turn");
                }
            }
            Err(e) => {
                warn!(chat_id = %chat.id, error = %e, "Streaming turn failed");
                let _ = tx.unbounded_send(AgentEvent::Error(format!("Error: {}", e)));
            }
        }
    });

    let stream = rx.map(|event| Event::default().json_data(event.frame()));

    Ok((
        [
            (header::CACHE_CONTROL, "no-cache"),
            (header::HeaderName::from_static("x-accel-buffering"), "no"),
        ],
        Sse::new(stream).keep_alive(KeepAlive::default()),
    ))
}

/// Unauthenticated chat; nothing is stored in the database
async fn send_public_message(
    State(state): State<AppState>,
    overrides: ProviderOverrides,
    Json(request): Json<MessageCreate>,
) -> AppResult<Json<PromptResponse>> {
    admit_message(&state, &request, ANONYMOUS_KEY).await?;
    let model = select_model(&state, &overrides).await?;

    let chat_id = request
        .chat_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let result = state
        .agent
        .invoke(&model, &public_thread_key(&chat_id), &request.message, Vec::new())
        .await?;

    Ok(Json(PromptResponse {
        success: true,
        chat_id,
        message: result.answer,
    }))
}

async fn get_chat_messages(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(chat_id): Path<String>,
) -> AppResult<Json<ChatWithMessages>> {
    let chat = owned_chat(&state, &user, &chat_id, false).await?;
    let messages = DatabaseOperations::list_messages(&state.pool, chat.id).await?;

    Ok(Json(ChatWithMessages {
        id: chat.id.to_string(),
        title: chat.title,
        updated_at: chat.updated_at,
        messages: messages.iter().map(MessageResponse::from).collect(),
    }))
}

async fn rename_chat(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(chat_id): Path<String>,
    Json(request): Json<ChatRename>,
) -> AppResult<Json<ActionResponse>> {
    request.validate()?;
    let chat = owned_chat(&state, &user, &chat_id, true).await?;
    DatabaseOperations::rename_chat(&state.pool, chat.id, request.title.trim()).await?;
    Ok(Json(ActionResponse::ok("Chat renamed successfully")))
}

async fn archive_chat(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(chat_id): Path<String>,
) -> AppResult<Json<ActionResponse>> {
    let chat = owned_chat(&state, &user, &chat_id, true).await?;
    DatabaseOperations::archive_chat(&state.pool, chat.id).await?;

    // the thread is gone from the user's view, so its checkpoint can go too
    if let Some(memory) = state.agent.memory() {
        memory.forget(&chat.id.to_string()).await;
    }
    info!(chat_id = %chat.id, "Archived chat");
    Ok(Json(ActionResponse::ok("Chat archived successfully")))
}
