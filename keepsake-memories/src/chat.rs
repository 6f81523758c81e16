use async_trait::async_trait;
use log::warn;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Opening line of every conversation.
pub const GREETING: &str = "Hello! How can I assist you today?";
/// Appended to the transcript when the backend fails.
pub const FALLBACK_REPLY: &str = "Something went wrong. Please try again.";

/// Author of a [`ChatMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Instructions for the model.
    System,
    /// The signed-in user.
    User,
    /// The model's replies.
    Assistant,
}

/// One entry of a transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Who wrote it.
    pub role: Role,
    /// The text.
    pub content: String,
}

impl ChatMessage {
    /// A message from the user.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// A message from the assistant.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Why a chat turn failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatError {
    /// The message was blank; nothing was sent.
    #[error("Message is empty")]
    EmptyMessage,
    /// The backend could not be reached.
    #[error("Chat backend unreachable: {0}")]
    Network(String),
    /// The backend answered with an error.
    #[error("Chat backend error: {0}")]
    Backend(String),
    /// The backend answered with something other than a reply.
    #[error("Unexpected chat backend response: {0}")]
    InvalidResponse(String),
}

/// Produces the assistant's next message for a transcript.
#[async_trait]
pub trait ChatBackend: Send + Sync + 'static {
    /// The reply to the last message of `messages`, given the whole transcript.
    async fn reply(&self, messages: &[ChatMessage]) -> Result<String, ChatError>;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    messages: &'a [ChatMessage],
}

#[derive(Deserialize)]
struct ChatResponse {
    reply: Option<String>,
    error: Option<String>,
}

/// Talks to a chat completion relay: `POST {base}/api/chat` with `{"messages": [...]}`,
/// answered by `{"reply": "..."}` or, on failure, `{"error": "..."}`.
#[derive(Debug, Clone)]
pub struct HttpChatBackend {
    endpoint: String,
    http_client: reqwest::Client,
}

impl HttpChatBackend {
    /// A backend for the relay at `base_url`.
    pub fn new(base_url: &str) -> Self {
        Self::with_client(base_url, reqwest::Client::new())
    }

    /// Like [`HttpChatBackend::new`], with a preconfigured client.
    pub fn with_client(base_url: &str, http_client: reqwest::Client) -> Self {
        Self {
            endpoint: format!("{}/api/chat", base_url.trim_end_matches('/')),
            http_client,
        }
    }

    /// The full chat URL.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ChatBackend for HttpChatBackend {
    async fn reply(&self, messages: &[ChatMessage]) -> Result<String, ChatError> {
        let response = self
            .http_client
            .post(&self.endpoint)
            .json(&ChatRequest { messages })
            .send()
            .await
            .map_err(|e| ChatError::Network(e.to_string()))?;

        let status = response.status();
        let body = response
            .json::<ChatResponse>()
            .await
            .map_err(|e| ChatError::InvalidResponse(e.to_string()));

        match (status.is_success(), body) {
            (true, Ok(ChatResponse { reply: Some(reply), .. })) => Ok(reply),
            (true, Ok(_)) => Err(ChatError::InvalidResponse("missing reply".to_string())),
            (true, Err(e)) => Err(e),
            (false, Ok(ChatResponse { error: Some(error), .. })) => Err(ChatError::Backend(error)),
            (false, _) => Err(ChatError::Backend(format!("status {status}"))),
        }
    }
}

/// A chat transcript that always opens with [`GREETING`].
pub struct Conversation {
    backend: Arc<dyn ChatBackend>,
    history: Vec<ChatMessage>,
}

impl Conversation {
    /// A fresh transcript holding only the greeting.
    pub fn new<B: ChatBackend>(backend: B) -> Self {
        Self::with_shared(Arc::new(backend))
    }

    /// Like [`Conversation::new`], for a backend that is already shared.
    pub fn with_shared(backend: Arc<dyn ChatBackend>) -> Self {
        Self {
            backend,
            history: vec![ChatMessage::assistant(GREETING)],
        }
    }

    /// Every message so far, oldest first.
    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    /// Send a user message and wait for the reply.
    ///
    /// On backend failure the transcript gets [`FALLBACK_REPLY`] and the error is returned.
    pub async fn send(&mut self, text: &str) -> Result<&ChatMessage, ChatError> {
        if text.trim().is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        self.history.push(ChatMessage::user(text));

        let outcome = self.backend.reply(&self.history).await;
        let reply = match &outcome {
            Ok(reply) => reply.clone(),
            Err(error) => {
                warn!("chat backend failed: {error}");
                FALLBACK_REPLY.to_string()
            }
        };
        self.history.push(ChatMessage::assistant(reply));
        outcome?;
        Ok(&self.history[self.history.len() - 1])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{json, Value};

    async fn relay(Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
        let Some(messages) = body.get("messages").and_then(Value::as_array) else {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "Invalid request format" })),
            );
        };
        let last = messages
            .last()
            .and_then(|m| m.get("content"))
            .and_then(Value::as_str)
            .unwrap_or_default();
        if last == "fail" {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Error fetching chatbot response" })),
            );
        }
        (
            StatusCode::OK,
            Json(json!({ "reply": format!("{} messages, last: {last}", messages.len()) })),
        )
    }

    async fn spawn_relay() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let app = Router::new().route("/api/chat", post(relay));
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        base
    }

    #[tokio::test]
    async fn conversation_sends_the_whole_transcript() {
        let base = spawn_relay().await;
        let mut conversation = Conversation::new(HttpChatBackend::new(&base));

        let reply = conversation.send("hi").await.unwrap().clone();

        assert_eq!(reply, ChatMessage::assistant("2 messages, last: hi"));
        assert_eq!(conversation.history().len(), 3);
        assert_eq!(conversation.history()[0], ChatMessage::assistant(GREETING));
    }

    #[tokio::test]
    async fn backend_failure_appends_fallback() {
        let base = spawn_relay().await;
        let mut conversation = Conversation::new(HttpChatBackend::new(&(base + "/")));

        let err = conversation.send("fail").await.unwrap_err();

        assert_eq!(err, ChatError::Backend("Error fetching chatbot response".into()));
        assert_eq!(
            conversation.history().last(),
            Some(&ChatMessage::assistant(FALLBACK_REPLY))
        );
    }

    #[tokio::test]
    async fn blank_message_is_not_sent() {
        let mut conversation = Conversation::new(HttpChatBackend::new("http://127.0.0.1:9"));
        assert_eq!(
            conversation.send("  ").await.unwrap_err(),
            ChatError::EmptyMessage
        );
        assert_eq!(conversation.history().len(), 1);
    }

    #[tokio::test]
    async fn unreachable_backend_is_a_network_error() {
        let mut conversation = Conversation::new(HttpChatBackend::new("http://127.0.0.1:9"));
        assert!(matches!(
            conversation.send("hello").await,
            Err(ChatError::Network(_))
        ));
        assert_eq!(conversation.history().len(), 3);
    }

    #[test]
    fn roles_serialize_lowercase() {
        let json = serde_json::to_string(&ChatMessage::user("x")).unwrap();
        assert_eq!(json, r#"{"role":"user","content":"x"}"#);
    }
}
