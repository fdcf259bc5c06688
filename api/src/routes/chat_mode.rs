use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use hearth_core::chat_mode::{ChatMode, ChatModeContext, ChatModeSession, select_chat_mode};
use hearth_core::error::ApiError;

use crate::auth::{AuthenticatedUser, SCOPE_HOMES_READ, require_scopes};
use crate::error::AppError;
use crate::extract::{AppJson, AppPath};
use crate::snapshot::load_snapshot;
use crate::state::AppState;

pub fn read_router() -> Router<AppState> {
    Router::new().route("/v1/homes/{home_id}/chat-mode", get(get_chat_mode))
}

pub fn write_router() -> Router<AppState> {
    Router::new().route(
        "/v1/homes/{home_id}/chat-mode/message",
        post(post_message),
    )
}

#[derive(Serialize, ToSchema)]
pub struct ChatModeResponse {
    pub home_id: Uuid,
    pub mode: ChatMode,
    pub context: ChatModeContext,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct ChatMessageRequest {
    pub message: String,
    /// Session state from the previous response; omit on the first message
    #[serde(default)]
    pub session: ChatModeSession,
    /// Leave interpretive mode before handling this message
    #[serde(default)]
    pub exit_interpretive: bool,
}

#[derive(Serialize, ToSchema)]
pub struct ChatMessageResponse {
    pub home_id: Uuid,
    /// Mode to answer this message in
    pub mode: ChatMode,
    /// Mode derived from the home alone, ignoring the session
    pub derived_mode: ChatMode,
    /// Send back with the next message
    pub session: ChatModeSession,
}

/// Derive the mode for a turn. Exiting first restores the remembered mode
/// for this turn unless the new message asks another why/how question.
fn handle_message(
    req: &ChatMessageRequest,
    derived: ChatMode,
) -> (ChatMode, ChatModeSession) {
    let mut session = req.session;
    let base = if req.exit_interpretive {
        session.exit_interpretive(derived)
    } else {
        derived
    };
    let mode = session.observe_message(&req.message, base);
    (mode, session)
}

/// Current chat mode
#[utoipa::path(
    get,
    path = "/v1/homes/{home_id}/chat-mode",
    params(("home_id" = Uuid, Path, description = "Home id")),
    responses(
        (status = 200, description = "Mode derived from the home's current state", body = ChatModeResponse),
        (status = 404, description = "Home not found", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "chat"
)]
pub async fn get_chat_mode(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
    AppPath(home_id): AppPath<Uuid>,
) -> Result<Json<ChatModeResponse>, AppError> {
    require_scopes(&auth, &[SCOPE_HOMES_READ], "read chat mode")?;
    let now = Utc::now();
    let snapshot = load_snapshot(&state.db, auth.user_id, home_id).await?;
    let context = snapshot.chat_context(now);
    Ok(Json(ChatModeResponse {
        home_id,
        mode: select_chat_mode(&context),
        context,
    }))
}

/// Route a user message
///
/// A why/how question switches the session to `interpretive` until the
/// client exits it. Session state is not stored server-side.
#[utoipa::path(
    post,
    path = "/v1/homes/{home_id}/chat-mode/message",
    params(("home_id" = Uuid, Path, description = "Home id")),
    request_body = ChatMessageRequest,
    responses(
        (status = 200, description = "Mode for this message", body = ChatMessageResponse),
        (status = 400, description = "Validation error", body = ApiError),
        (status = 404, description = "Home not found", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "chat"
)]
pub async fn post_message(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
    AppPath(home_id): AppPath<Uuid>,
    AppJson(req): AppJson<ChatMessageRequest>,
) -> Result<Json<ChatMessageResponse>, AppError> {
    require_scopes(&auth, &[SCOPE_HOMES_READ], "route chat message")?;
    if req.message.trim().is_empty() {
        return Err(AppError::Validation {
            message: "message must not be empty".to_string(),
            field: Some("message".to_string()),
            received: None,
            docs_hint: None,
        });
    }
    let now = Utc::now();
    let snapshot = load_snapshot(&state.db, auth.user_id, home_id).await?;
    let derived_mode = select_chat_mode(&snapshot.chat_context(now));
    let (mode, session) = handle_message(&req, derived_mode);

    tracing::debug!(
        home_id = %home_id,
        mode = mode.as_str(),
        derived_mode = derived_mode.as_str(),
        "chat message routed"
    );

    Ok(Json(ChatMessageResponse {
        home_id,
        mode,
        derived_mode,
        session,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(text: &str, session: ChatModeSession, exit: bool) -> ChatMessageRequest {
        ChatMessageRequest {
            message: text.to_string(),
            session,
            exit_interpretive: exit,
        }
    }

    #[test]
    fn question_enters_interpretive() {
        let (mode, session) = handle_message(
            &message("Why is my roof flagged?", ChatModeSession::default(), false),
            ChatMode::PlanningWindowAdvisory,
        );
        assert_eq!(mode, ChatMode::Interpretive);
        assert_eq!(session.previous_mode, Some(ChatMode::PlanningWindowAdvisory));
    }

    #[test]
    fn exit_restores_remembered_mode() {
        let (_, session) = handle_message(
            &message("How does this work?", ChatModeSession::default(), false),
            ChatMode::ElevatedAttention,
        );
        let (mode, session) = handle_message(
            &message("Ok thanks", session, true),
            ChatMode::SilentSteward,
        );
        assert_eq!(mode, ChatMode::ElevatedAttention);
        assert_eq!(session, ChatModeSession::default());
    }

    #[test]
    fn statements_keep_derived_mode() {
        let (mode, session) = handle_message(
            &message("Sounds good.", ChatModeSession::default(), false),
            ChatMode::Observational,
        );
        assert_eq!(mode, ChatMode::Observational);
        assert!(!session.interpretive);
    }
}
