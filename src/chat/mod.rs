//! Retrieval-augmented chat.
//!
//! A turn embeds the last user message, retrieves matching blocks, renders
//! them into a system prompt and streams the completion back token by token.

mod openai;
mod prompt;
mod service;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::{semantic::SemanticSearchError, store::StoreError};

pub use openai::{token_stream, OpenAiChat, SseDecoder, SseEvent};
pub use prompt::build_prompt;
pub use service::{ChatReply, ChatService, ChatStage};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("no messages provided")]
    NoMessages,

    #[error("message is empty")]
    EmptyMessage,

    #[error("retrieval failed: {0}")]
    Search(#[from] SemanticSearchError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("completion request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("completion service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed completion stream: {0}")]
    Format(String),
}

/// Completion fragments in arrival order.
pub type TokenStream = BoxStream<'static, Result<String, ChatError>>;

#[derive(Clone, Debug, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: Option<f32>,
}

#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Starts a streamed completion. Fails before any token if the request
    /// is rejected.
    async fn stream(&self, request: CompletionRequest) -> Result<TokenStream, ChatError>;
}
