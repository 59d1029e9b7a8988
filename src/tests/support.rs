use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::json;

use crate::app::App;
use crate::chat::{ChatError, ChatProvider, CompletionRequest, TokenStream};
use crate::config::{Config, UserConfig};
use crate::semantic::{EmbeddingError, EmbeddingProvider};
use crate::storage;
use crate::store::BackendJson;

pub const DIMENSIONS: usize = 384;

/// Unit vector along axis `i`.
pub fn axis(i: usize) -> Vec<f32> {
    let mut v = vec![0.0; DIMENSIONS];
    v[i] = 1.0;
    v
}

/// `a * axis(i) + b * axis(j)`
pub fn blend(a: f32, i: usize, b: f32, j: usize) -> Vec<f32> {
    let mut v = vec![0.0; DIMENSIONS];
    v[i] = a;
    v[j] = b;
    v
}

/// Returns preset vectors per text, `fallback` for anything else.
pub struct StubEmbedder {
    vectors: Mutex<HashMap<String, Vec<f32>>>,
    fallback: Vec<f32>,
    pub calls: AtomicUsize,
    pub failing: AtomicBool,
    pub yielding: AtomicBool,
}

impl StubEmbedder {
    pub fn new() -> Self {
        Self {
            vectors: Mutex::new(HashMap::new()),
            fallback: axis(DIMENSIONS - 1),
            calls: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
            yielding: AtomicBool::new(false),
        }
    }

    pub fn set(&self, text: &str, vector: Vec<f32>) {
        self.vectors.lock().unwrap().insert(text.to_string(), vector);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn fail(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Yield to the runtime before every embedding, letting concurrent
    /// saves interleave.
    pub fn yield_on_embed(&self, yielding: bool) {
        self.yielding.store(yielding, Ordering::SeqCst);
    }
}

#[async_trait]
impl EmbeddingProvider for StubEmbedder {
    fn name(&self) -> &str {
        "stub"
    }

    fn dimensions(&self) -> usize {
        DIMENSIONS
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::EmptyInput);
        }
        if self.yielding.load(Ordering::SeqCst) {
            tokio::task::yield_now().await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(EmbeddingError::Status {
                status: 503,
                body: "model loading".to_string(),
            });
        }

        self.calls.fetch_add(1, Ordering::SeqCst);
        let vectors = self.vectors.lock().unwrap();
        Ok(vectors.get(text).cloned().unwrap_or_else(|| self.fallback.clone()))
    }
}

/// Records requests and streams scripted tokens, optionally followed by an
/// error.
pub struct StubChat {
    pub requests: Mutex<Vec<CompletionRequest>>,
    tokens: Vec<String>,
    fail_after: AtomicBool,
}

impl StubChat {
    pub fn new(tokens: &[&str]) -> Self {
        Self {
            requests: Mutex::new(vec![]),
            tokens: tokens.iter().map(|t| t.to_string()).collect(),
            fail_after: AtomicBool::new(false),
        }
    }

    pub fn fail_after_tokens(&self, fail: bool) {
        self.fail_after.store(fail, Ordering::SeqCst);
    }

    pub fn last_request(&self) -> CompletionRequest {
        self.requests.lock().unwrap().last().cloned().unwrap()
    }
}

#[async_trait]
impl ChatProvider for StubChat {
    async fn stream(&self, request: CompletionRequest) -> Result<TokenStream, ChatError> {
        self.requests.lock().unwrap().push(request);

        let mut items: Vec<Result<String, ChatError>> =
            self.tokens.iter().cloned().map(Ok).collect();
        if self.fail_after.load(Ordering::SeqCst) {
            items.push(Err(ChatError::Format("connection reset".to_string())));
        }
        Ok(futures::stream::iter(items).boxed())
    }
}

pub struct TestApp {
    pub app: Arc<App>,
    pub embedder: Arc<StubEmbedder>,
    pub chat: Arc<StubChat>,
    _tmp: tempfile::TempDir,
}

impl std::ops::Deref for TestApp {
    type Target = App;

    fn deref(&self) -> &Self::Target {
        &self.app
    }
}

pub fn test_config() -> Config {
    Config {
        users: vec![
            UserConfig {
                id: "alice".to_string(),
                token: "alice-token".to_string(),
            },
            UserConfig {
                id: "bob".to_string(),
                token: "bob-token".to_string(),
            },
        ],
        ..Default::default()
    }
}

/// An App over an isolated temp directory with stub providers.
pub fn create_app() -> TestApp {
    let tmp = tempfile::tempdir().expect("failed to create temp dir");
    let storage_mgr =
        storage::BackendLocal::new(tmp.path()).expect("failed to create storage");
    let store = BackendJson::load(Arc::new(storage_mgr)).expect("failed to load store");

    let embedder = Arc::new(StubEmbedder::new());
    let chat = Arc::new(StubChat::new(&["こん", "にちは"]));

    let app = App::new(test_config(), Arc::new(store), embedder.clone(), chat.clone());
    TestApp {
        app: Arc::new(app),
        embedder,
        chat,
        _tmp: tmp,
    }
}

/// Editor document with one paragraph per entry.
pub fn doc(paragraphs: &[&str]) -> String {
    let content: Vec<_> = paragraphs
        .iter()
        .map(|text| {
            json!({
                "type": "paragraph",
                "content": [{"type": "text", "text": text}],
            })
        })
        .collect();

    json!({"type": "doc", "content": content}).to_string()
}
