//! OpenAI-compatible streamed chat completions.

use std::{collections::VecDeque, time::Duration};

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{ChatError, ChatMessage, ChatProvider, CompletionRequest, TokenStream};

pub struct OpenAiChat {
    client: Client,
    endpoint: String,
}

impl OpenAiChat {
    /// `base_url` is the API root, e.g. `https://api.openai.com/v1`.
    ///
    /// Only connecting is bounded by `timeout`; a streamed answer may take
    /// longer than that to finish.
    pub fn new(
        base_url: &str,
        api_key: Option<&str>,
        timeout: Duration,
    ) -> Result<Self, ChatError> {
        let mut headers = HeaderMap::new();
        if let Some(key) = api_key.map(str::trim).filter(|key| !key.is_empty()) {
            let value = HeaderValue::from_str(&format!("Bearer {}", key))
                .map_err(|_| ChatError::Format("invalid OpenAI API key".to_string()))?;
            headers.insert(AUTHORIZATION, value);
        }

        let client = Client::builder()
            .connect_timeout(timeout)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
        })
    }
}

#[derive(Serialize)]
struct CompletionBody<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[async_trait]
impl ChatProvider for OpenAiChat {
    async fn stream(&self, request: CompletionRequest) -> Result<TokenStream, ChatError> {
        let body = CompletionBody {
            model: &request.model,
            messages: &request.messages,
            stream: true,
            temperature: request.temperature,
        };

        let response = self.client.post(&self.endpoint).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(ChatError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(token_stream(response.bytes_stream()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    Token(String),
    Done,
}

#[derive(Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Deserialize, Default)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Incremental server-sent-events parser.
///
/// Bytes are buffered until a full line is available, so multi-byte
/// characters split across network chunks decode correctly.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    /// Events from every complete line in order. A malformed line is
    /// returned as the last item, after the events that preceded it.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Result<SseEvent, ChatError>> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            match parse_line(&line) {
                Ok(Some(event)) => events.push(Ok(event)),
                Ok(None) => {}
                Err(err) => {
                    events.push(Err(err));
                    break;
                }
            }
        }
        events
    }

    /// Flushes a trailing line that had no newline.
    pub fn finish(&mut self) -> Option<Result<SseEvent, ChatError>> {
        let line = std::mem::take(&mut self.buffer);
        parse_line(&line).transpose()
    }
}

fn parse_line(line: &[u8]) -> Result<Option<SseEvent>, ChatError> {
    let line = String::from_utf8_lossy(line);
    let Some(data) = line.trim().strip_prefix("data:") else {
        return Ok(None);
    };

    let data = data.trim();
    if data.is_empty() {
        return Ok(None);
    }
    if data == "[DONE]" {
        return Ok(Some(SseEvent::Done));
    }

    let chunk: CompletionChunk =
        serde_json::from_str(data).map_err(|e| ChatError::Format(format!("{e}: {data}")))?;

    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta.content)
        .filter(|content| !content.is_empty())
        .map(SseEvent::Token))
}

struct Decoding<S> {
    body: std::pin::Pin<Box<S>>,
    decoder: SseDecoder,
    pending: VecDeque<Result<String, ChatError>>,
    finished: bool,
}

impl<S> Decoding<S> {
    fn absorb(&mut self, events: impl IntoIterator<Item = Result<SseEvent, ChatError>>) {
        for event in events {
            match event {
                Ok(SseEvent::Token(token)) => self.pending.push_back(Ok(token)),
                Ok(SseEvent::Done) => {
                    self.finished = true;
                    break;
                }
                Err(err) => {
                    self.fail(err);
                    break;
                }
            }
        }
    }

    fn fail(&mut self, err: ChatError) {
        self.pending.push_back(Err(err));
        self.finished = true;
    }
}

/// Turns a raw SSE byte stream into completion fragments. Ends at
/// `data: [DONE]` or when the body ends; a decode or transport error is
/// yielded once and ends the stream.
pub fn token_stream<S, B, E>(body: S) -> TokenStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Into<ChatError> + Send + 'static,
{
    let state = Decoding {
        body: Box::pin(body),
        decoder: SseDecoder::default(),
        pending: VecDeque::new(),
        finished: false,
    };

    futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }
            if state.finished {
                return None;
            }

            match state.body.next().await {
                Some(Ok(chunk)) => {
                    let events = state.decoder.feed(chunk.as_ref());
                    state.absorb(events);
                }
                Some(Err(err)) => state.fail(err.into()),
                None => {
                    let tail = state.decoder.finish();
                    state.absorb(tail);
                    state.finished = true;
                }
            }
        }
    })
    .boxed()
}
