use crate::{
    chat::ChatError,
    semantic::{EmbeddingError, SemanticSearchError},
    store::StoreError,
};

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Auth(String),

    #[error("upstream provider failed: {0}")]
    Provider(String),

    #[error("{0}")]
    NotFound(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("unexpected error: {0:?}")]
    Other(#[from] anyhow::Error),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => AppError::NotFound(format!("{what} not found")),
            StoreError::Invalid(msg) => AppError::Validation(msg),
            other => AppError::Database(other.to_string()),
        }
    }
}

impl From<EmbeddingError> for AppError {
    fn from(err: EmbeddingError) -> Self {
        match err {
            EmbeddingError::EmptyInput => AppError::Validation(err.to_string()),
            other => AppError::Provider(other.to_string()),
        }
    }
}

impl From<SemanticSearchError> for AppError {
    fn from(err: SemanticSearchError) -> Self {
        match err {
            SemanticSearchError::EmptyQuery => AppError::Validation(err.to_string()),
            SemanticSearchError::Embedding(err) => err.into(),
            SemanticSearchError::Store(err) => err.into(),
        }
    }
}

impl From<ChatError> for AppError {
    fn from(err: ChatError) -> Self {
        match err {
            ChatError::NoMessages | ChatError::EmptyMessage => {
                AppError::Validation(err.to_string())
            }
            ChatError::Search(err) => err.into(),
            ChatError::Store(err) => err.into(),
            other => AppError::Provider(other.to_string()),
        }
    }
}
