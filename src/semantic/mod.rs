//! Semantic retrieval over block embeddings.
//!
//! # Architecture
//!
//! - `embeddings`: embedding provider trait and the local fastembed provider
//! - `huggingface`: hosted feature-extraction provider
//! - `similarity`: cosine ranking over candidate blocks
//! - `lexical`: keyword fallback
//! - `preprocess`: text preparation and change detection
//! - `service`: similarity search with keyword fallback
//! - `context`: neighbor expansion and context rendering

mod context;
pub mod embeddings;
mod huggingface;
mod lexical;
mod preprocess;
mod service;
mod similarity;

pub use context::ContextAssembler;
pub use embeddings::{check_dimensions, EmbeddingError, EmbeddingProvider};
#[cfg(feature = "local-embeddings")]
pub use embeddings::LocalEmbedder;
pub use huggingface::HuggingFaceEmbedder;
pub use lexical::{contains_any, split_keywords};
pub use preprocess::{content_hash, embedding_input};
pub use service::{Match, MatchSource, SemanticSearchError, SimilaritySearch};
pub use similarity::{cosine_similarity, rank, Scored};
