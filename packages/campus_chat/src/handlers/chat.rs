use axum::{
    Json,
    extract::{Path, Query, State, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;

use crate::AppState;
use crate::chat::{self, ChatContext};
use crate::models::{HistoryPage, MessageId};

/// Open a chat channel for the user named in the path.
///
/// The id is trusted as-is; authentication happens before this layer.
pub async fn chat_websocket_handler(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    let ctx = ChatContext {
        repository: state.repository.clone(),
        registry: state.registry.clone(),
        metrics: state.metrics.clone(),
        send_queue_capacity: state.server_config.chat.send_queue_capacity,
    };

    ws.on_upgrade(move |socket| chat::handle_chat_socket(socket, user_id, ctx))
}

#[derive(Deserialize)]
pub struct HistoryParams {
    user1: Option<String>,
    user2: Option<String>,
    /// Only messages after this id
    after: Option<i64>,
    limit: Option<i64>,
}

/// Conversation between `user1` and `user2`, oldest first.
/// Missing identifiers give an empty list rather than an error.
pub async fn chat_history_handler(
    State(state): State<AppState>,
    Query(params): Query<HistoryParams>,
) -> Result<impl IntoResponse, StatusCode> {
    state.metrics.history_query();

    let (Some(user1), Some(user2)) = (params.user1, params.user2) else {
        return Ok(Json(Vec::new()));
    };
    let page = HistoryPage {
        after: params.after.map(MessageId),
        limit: params.limit,
    };

    match state.repository.history(&user1, &user2, page).await {
        Ok(messages) => Ok(Json(messages)),
        Err(e) => {
            tracing::error!("Failed to load chat history: {:#}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// A single stored message.
pub async fn get_chat_message_handler(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, StatusCode> {
    match state.repository.get_chat_message_by_id(MessageId(id)).await {
        Ok(Some(message)) => Ok(Json(message)),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            tracing::error!("Failed to load chat message {}: {:#}", id, e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// Users with an open channel right now.
pub async fn online_users_handler(State(state): State<AppState>) -> impl IntoResponse {
    let users = state.registry.connected_users().await;
    Json(serde_json::json!({ "users": users }))
}

/// Whether one user has an open channel.
pub async fn user_presence_handler(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> impl IntoResponse {
    let online = state.registry.is_connected(&user_id).await;
    Json(serde_json::json!({ "user_id": user_id, "online": online }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Router, body::Body, http::Request, routing::get};
    use chrono::Utc;
    use tower::ServiceExt;

    async fn test_router() -> (Router, AppState) {
        let state = crate::test_helpers::test_app_state().await;
        let router = Router::new()
            .route("/history", get(chat_history_handler))
            .route("/messages/{id}", get(get_chat_message_handler))
            .route("/online", get(online_users_handler))
            .route("/online/{user_id}", get(user_presence_handler))
            .with_state(state.clone());
        (router, state)
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let resp = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn history_missing_params_is_empty() {
        let (app, _state) = test_router().await;

        for uri in ["/history", "/history?user1=A", "/history?user2=B"] {
            let (status, json) = get_json(app.clone(), uri).await;
            assert_eq!(status, StatusCode::OK);
            assert!(json.as_array().unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn history_returns_both_directions_in_order() {
        let (app, state) = test_router().await;
        let now = Utc::now();
        state
            .repository
            .insert_chat_message("A", "B", "hi", now)
            .await
            .unwrap();
        state
            .repository
            .insert_chat_message("B", "A", "hello", now)
            .await
            .unwrap();
        state
            .repository
            .insert_chat_message("A", "C", "elsewhere", now)
            .await
            .unwrap();

        let (status, ab) = get_json(app.clone(), "/history?user1=A&user2=B").await;
        assert_eq!(status, StatusCode::OK);
        let (_, ba) = get_json(app, "/history?user1=B&user2=A").await;
        assert_eq!(ab, ba);

        let entries = ab.as_array().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0]["message"], "hi");
        assert_eq!(entries[1]["message"], "hello");
        assert!(entries[0]["id"].is_string());
        let ts = entries[0]["timestamp"].as_str().unwrap();
        chrono::DateTime::parse_from_rfc3339(ts).unwrap();

        assert_eq!(state.metrics.snapshot().history_queries, 2);
    }

    #[tokio::test]
    async fn history_pagination_params() {
        let (app, state) = test_router().await;
        let now = Utc::now();
        let mut ids = Vec::new();
        for i in 0..4 {
            let m = state
                .repository
                .insert_chat_message("A", "B", &format!("m{}", i), now)
                .await
                .unwrap();
            ids.push(m.id);
        }

        let uri = format!("/history?user1=A&user2=B&after={}&limit=2", ids[0]);
        let (_, json) = get_json(app, &uri).await;
        let texts: Vec<&str> = json
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["message"].as_str().unwrap())
            .collect();
        assert_eq!(texts, vec!["m1", "m2"]);
    }

    #[tokio::test]
    async fn online_lists_registered_users() {
        let (app, state) = test_router().await;
        let (tx, _rx) = tokio::sync::mpsc::channel(1);
        state
            .registry
            .connect(
                "zoe",
                crate::chat::ChannelHandle {
                    connection_id: uuid::Uuid::new_v4(),
                    outbound: tx,
                    cancel: tokio_util::sync::CancellationToken::new(),
                },
            )
            .await;

        let (status, json) = get_json(app.clone(), "/online").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["users"], serde_json::json!(["zoe"]));

        let (_, zoe) = get_json(app.clone(), "/online/zoe").await;
        assert_eq!(zoe["online"], true);
        let (_, max) = get_json(app, "/online/max").await;
        assert_eq!(max["online"], false);
    }

    #[tokio::test]
    async fn message_by_id() {
        let (app, state) = test_router().await;
        let stored = state
            .repository
            .insert_chat_message("A", "B", "still for sale?", Utc::now())
            .await
            .unwrap();

        let (status, json) = get_json(app.clone(), &format!("/messages/{}", stored.id)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["id"], stored.id.to_string());
        assert_eq!(json["message"], "still for sale?");

        let resp = app
            .oneshot(Request::builder().uri("/messages/999").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
