use crate::engines::TranslationRequest;
use crate::errors::TranslationError;
use crate::languages::{self, AUTO_DETECT};
use crate::translation_service::{DeltaSender, DeltaStream, TranslationBackend};
use crate::word_explanation::is_word_like;
use futures_util::StreamExt;
use log::{debug, info, warn};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Connection timeout. The stream itself has no deadline.
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
/// Upper bound on how much of an error body is kept for the error excerpt.
pub const ERROR_BODY_LIMIT: usize = 64 * 1024;

const DATA_PREFIX: &str = "data:";
const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, Clone, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    stream: bool,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Default, Deserialize)]
struct ChatCompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

/// One meaningful frame of a chat-completions event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Delta(String),
    Done,
}

/// Splits an event-stream body into lines and decodes the `data:` frames.
///
/// Bytes are buffered until a newline so multi-byte characters split across
/// network chunks are reassembled before decoding.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(event) = parse_frame(&String::from_utf8_lossy(&line)) {
                events.push(event);
            }
        }
        events
    }

    /// Decodes whatever is left once the body ends without a trailing newline.
    pub fn finish(&mut self) -> Option<StreamEvent> {
        if self.buffer.is_empty() {
            return None;
        }
        let line = std::mem::take(&mut self.buffer);
        parse_frame(&String::from_utf8_lossy(&line))
    }
}

/// Decodes one line. Non-data lines, empty deltas and malformed payloads yield `None`.
pub fn parse_frame(line: &str) -> Option<StreamEvent> {
    let payload = line.trim().strip_prefix(DATA_PREFIX)?.trim();
    if payload == DONE_SENTINEL {
        return Some(StreamEvent::Done);
    }

    match serde_json::from_str::<ChatCompletionChunk>(payload) {
        Ok(chunk) => chunk
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.delta.content)
            .filter(|content| !content.is_empty())
            .map(StreamEvent::Delta),
        Err(e) => {
            debug!("Skipping malformed stream frame: {}", e);
            None
        }
    }
}

/// Accepts a bare host, a versioned root or a full endpoint and returns the
/// chat-completions URL.
pub fn chat_completions_url(base_url: &str) -> Result<Url, TranslationError> {
    let trimmed = base_url.trim().trim_end_matches('/');
    let mut url = Url::parse(trimmed)
        .map_err(|e| TranslationError::Unknown(format!("Invalid base URL '{}': {}", trimmed, e)))?;

    let invalid = || TranslationError::Unknown(format!("Invalid base URL '{}'", trimmed));

    url.path_segments_mut().map_err(|_| invalid())?.pop_if_empty();
    if url.path().trim_matches('/').is_empty() {
        url.path_segments_mut().map_err(|_| invalid())?.push("v1");
    }

    let path = url.path().trim_matches('/').to_string();
    if !(path.ends_with("chat/completions") || path.ends_with("completions")) {
        url.path_segments_mut()
            .map_err(|_| invalid())?
            .push("chat")
            .push("completions");
    }

    Ok(url)
}

const TRANSLATE_INSTRUCTION: &str = "You are a translation assistant. Translate the user's text {source}into {target}. Preserve markdown formatting. Reply with the translation only.";

const WORD_INSTRUCTION: &str = "You are a bilingual dictionary. The user sends a single English word. Reply with exactly one JSON object and nothing else: no prose, no markdown, no code fences. Use this shape: {\"word\": string, \"phoneticUS\": string, \"web\": string, \"senses\": [{\"pos\": string, \"meaning\": string}]}. \"phoneticUS\" is the US IPA transcription between slashes, \"web\" is a short everyday gloss, and \"senses\" holds at most 4 part-of-speech and meaning pairs. Write \"web\" and every \"meaning\" in {target}.";

/// System instruction for a request. Single-word queries ask for a JSON
/// dictionary entry instead of a translation.
pub fn system_instruction(request: &TranslationRequest) -> String {
    let target = languages::display_name(&request.target_language);
    if is_word_like(&request.source_text) {
        return WORD_INSTRUCTION.replace("{target}", target);
    }

    let source = if request.source_language.is_empty() || request.source_language == AUTO_DETECT
    {
        String::new()
    } else {
        format!("from {} ", languages::display_name(&request.source_language))
    };
    TRANSLATE_INSTRUCTION
        .replace("{source}", &source)
        .replace("{target}", target)
}

/// Build headers for a chat request
fn build_headers(api_key: &str) -> Result<HeaderMap, TranslationError> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(
        USER_AGENT,
        HeaderValue::from_static(concat!("seltrans/", env!("CARGO_PKG_VERSION"))),
    );
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", api_key))
            .map_err(|e| TranslationError::Unknown(format!("Invalid API key header: {}", e)))?,
    );
    Ok(headers)
}

/// Reads at most [`ERROR_BODY_LIMIT`] bytes of an error response.
pub(crate) async fn read_body_excerpt(response: reqwest::Response) -> String {
    let mut body = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(bytes) => {
                body.extend_from_slice(&bytes);
                if body.len() >= ERROR_BODY_LIMIT {
                    body.truncate(ERROR_BODY_LIMIT);
                    break;
                }
            }
            Err(e) => {
                debug!("Stopped reading error body: {}", e);
                break;
            }
        }
    }
    String::from_utf8_lossy(&body).into_owned()
}

/// Streaming client for OpenAI-compatible chat-completions endpoints.
#[derive(Clone)]
pub struct StreamingTranslationClient {
    client: reqwest::Client,
}

impl StreamingTranslationClient {
    pub fn new() -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build HTTP client: {}", e))?;
        Ok(Self { client })
    }
}

impl TranslationBackend for StreamingTranslationClient {
    fn stream(&self, request: TranslationRequest, cancel: CancellationToken) -> DeltaStream {
        let (tx, stream) = DeltaStream::channel(&cancel);
        let client = self.client.clone();

        tokio::spawn(async move {
            let result = tokio::select! {
                biased;
                _ = tx.cancelled() => {
                    debug!("Chat stream for '{}' cancelled", request.effective_model);
                    Ok(())
                }
                result = run_chat_stream(&client, &request, &tx) => result,
            };
            if let Err(e) = result {
                warn!("Chat stream for '{}' failed: {}", request.effective_model, e);
                tx.fail(e).await;
            }
        });

        stream
    }
}

async fn run_chat_stream(
    client: &reqwest::Client,
    request: &TranslationRequest,
    tx: &DeltaSender,
) -> Result<(), TranslationError> {
    let api_key = request.effective_api_key.trim();
    if api_key.is_empty() {
        return Err(TranslationError::MissingCredential);
    }

    let url = chat_completions_url(&request.effective_base_url)?;
    let body = ChatCompletionRequest {
        model: request.effective_model.clone(),
        stream: true,
        messages: vec![
            ChatMessage {
                role: "system".to_string(),
                content: system_instruction(request),
            },
            ChatMessage {
                role: "user".to_string(),
                content: request.source_text.clone(),
            },
        ],
    };

    info!(
        "Sending streaming chat request to {} (model: {}, {} chars)",
        url,
        request.effective_model,
        request.source_text.chars().count()
    );

    let response = client
        .post(url)
        .headers(build_headers(api_key)?)
        .json(&body)
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let excerpt = read_body_excerpt(response).await;
        return Err(TranslationError::http_status(status.as_u16(), excerpt));
    }

    let mut decoder = SseDecoder::new();
    let mut bytes = response.bytes_stream();
    while let Some(chunk) = bytes.next().await {
        let chunk = chunk?;
        for event in decoder.push(&chunk) {
            match event {
                StreamEvent::Delta(delta) => {
                    if !tx.send(delta).await {
                        return Ok(());
                    }
                }
                StreamEvent::Done => return Ok(()),
            }
        }
    }

    if let Some(StreamEvent::Delta(delta)) = decoder.finish() {
        tx.send(delta).await;
    }
    Ok(())
}
