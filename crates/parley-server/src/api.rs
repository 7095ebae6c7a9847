//! HTTP query API.
//!
//! Read-side endpoints used by the marketplace front end next to the
//! WebSocket: room history, room lookup and a user's chat list.

use crate::handlers::AppState;
use crate::metrics;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use parley_core::{ChatSummary, DirectoryError};
use parley_protocol::{MessageFrame, RoomId, UserId};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tracing::error;

/// API error, rendered as `{"error": "..."}`.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(serde_json::json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

impl ApiError {
    /// Log the underlying failure and hide it behind `message`.
    fn internal(message: &str, err: &DirectoryError) -> Self {
        error!(error = %err, "{}", message);
        metrics::record_error("query");
        ApiError::Internal(message.to_string())
    }
}

/// Parse a required id parameter.
fn parse_id<T: FromStr>(raw: Option<&str>, invalid: &str) -> Result<T, ApiError> {
    raw.and_then(|value| value.parse().ok())
        .ok_or_else(|| ApiError::BadRequest(invalid.to_string()))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(rename = "chatRoomID")]
    chat_room_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub messages: Vec<MessageFrame>,
}

/// `GET /getChatMessages?chatRoomID=<uuid>`
pub async fn get_chat_messages(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let room: RoomId = parse_id(query.chat_room_id.as_deref(), "Invalid chat ID")?;

    let history = state
        .directory
        .history(room)
        .await
        .map_err(|e| ApiError::internal("Failed to retrieve messages", &e))?;

    Ok(Json(HistoryResponse {
        messages: history.iter().map(|message| message.to_frame()).collect(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct RoomQuery {
    #[serde(rename = "currentUserID")]
    current_user_id: Option<String>,
    #[serde(rename = "targetUserID")]
    target_user_id: Option<String>,
}

/// `GET /getChatRoomID?currentUserID=<uuid>&targetUserID=<uuid>`
///
/// Answers the existing room, or creates one.
pub async fn get_chat_room_id(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RoomQuery>,
) -> Result<Json<RoomId>, ApiError> {
    let current: UserId = parse_id(query.current_user_id.as_deref(), "Invalid CurrentUserID")?;
    let target: UserId = parse_id(query.target_user_id.as_deref(), "Invalid TargetUserID")?;

    let room = state
        .directory
        .resolve_room(current, target)
        .await
        .map_err(|e| ApiError::internal("Failed to retrieve chat room", &e))?;

    Ok(Json(room))
}

#[derive(Debug, Deserialize)]
pub struct UserChatsQuery {
    #[serde(rename = "userID")]
    user_id: Option<String>,
}

/// `GET /getUserChats?userID=<uuid>`
pub async fn get_user_chats(
    State(state): State<Arc<AppState>>,
    Query(query): Query<UserChatsQuery>,
) -> Result<Json<Vec<ChatSummary>>, ApiError> {
    let user: UserId = parse_id(query.user_id.as_deref(), "Invalid user ID")?;

    let chats = state.directory.user_chats(user).await.map_err(|e| match e {
        DirectoryError::Profile { .. } => ApiError::internal("Failed to retrieve user profile", &e),
        _ => ApiError::internal("Failed to retrieve chat rooms", &e),
    })?;

    Ok(Json(chats))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_id() {
        let user = UserId::new_v4();
        let parsed: UserId = parse_id(Some(&user.to_string()), "bad").unwrap();
        assert_eq!(parsed, user);

        assert!(matches!(
            parse_id::<UserId>(None, "Invalid user ID"),
            Err(ApiError::BadRequest(msg)) if msg == "Invalid user ID"
        ));
        assert!(matches!(
            parse_id::<RoomId>(Some("not-a-uuid"), "Invalid chat ID"),
            Err(ApiError::BadRequest(_))
        ));
    }

    #[test]
    fn test_error_status() {
        let response = ApiError::BadRequest("Invalid chat ID".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = ApiError::Internal("Failed".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
