use crate::engines::{EngineKind, EngineResolver, GlobalDefaults, DEFAULT_BASE_URL};
use crate::errors::TranslationError;
use crate::languages::AUTO_DETECT;
use crate::secure_keys::CredentialStore;
use crate::translation_service::{DeltaStream, TranslationBackend};
use crate::word_explanation::{self, is_word_like, WordExplanation};
use log::{debug, info, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionStatus {
    #[default]
    Idle,
    Loading,
    Done,
    Failed,
}

/// What presentation code observes about the current translation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TranslationSession {
    pub source_text: String,
    pub accumulated_text: String,
    pub word_explanation: Option<WordExplanation>,
    pub status: SessionStatus,
    pub error: Option<TranslationError>,
}

impl TranslationSession {
    pub fn is_terminal(&self) -> bool {
        matches!(self.status, SessionStatus::Done | SessionStatus::Failed)
    }
}

/// Global values the resolver falls back to. The API key is read from the
/// credential store on every start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationPreferences {
    pub base_url: String,
    pub source_language: String,
    pub target_language: String,
}

impl Default for TranslationPreferences {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            source_language: AUTO_DETECT.to_string(),
            target_language: "zh-Hans".to_string(),
        }
    }
}

struct ActiveOperation {
    generation: u64,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owns the one live translation. Starting a new one cancels the previous
/// operation and waits for its task to exit before touching the session again,
/// so a superseded stream can never write into its successor's state.
pub struct TranslationOrchestrator {
    resolver: EngineResolver,
    backend: Arc<dyn TranslationBackend>,
    credentials: Arc<dyn CredentialStore>,
    preferences: TranslationPreferences,
    session: Arc<watch::Sender<TranslationSession>>,
    /// Generation allowed to write the session. Bumped on every start and clear.
    generation: Arc<AtomicU64>,
    active: Mutex<Option<ActiveOperation>>,
}

impl TranslationOrchestrator {
    pub fn new(
        resolver: EngineResolver,
        backend: Arc<dyn TranslationBackend>,
        credentials: Arc<dyn CredentialStore>,
        preferences: TranslationPreferences,
    ) -> Self {
        let (session, _) = watch::channel(TranslationSession::default());
        Self {
            resolver,
            backend,
            credentials,
            preferences,
            session: Arc::new(session),
            generation: Arc::new(AtomicU64::new(0)),
            active: Mutex::new(None),
        }
    }

    pub fn snapshot(&self) -> TranslationSession {
        self.session.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<TranslationSession> {
        self.session.subscribe()
    }

    /// Starts translating `text` with `engine_id`. Blank text is ignored.
    pub async fn start(&self, text: &str, engine_id: &str) {
        let text = text.trim();
        if text.is_empty() {
            debug!("Ignoring translation request for blank text");
            return;
        }

        let mut active = self.active.lock().await;
        Self::relinquish(active.take()).await;

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.session.send_replace(TranslationSession {
            source_text: text.to_string(),
            status: SessionStatus::Loading,
            ..Default::default()
        });

        let request = match self.resolver.resolve(engine_id, &self.global_defaults(), text) {
            Ok(request) => request,
            Err(e) => {
                warn!("Cannot resolve engine '{}': {}", engine_id, e);
                self.session.send_modify(|session| {
                    session.status = SessionStatus::Failed;
                    session.error = Some(e);
                });
                return;
            }
        };

        info!(
            "Starting translation #{} with '{}' ({} chars)",
            generation,
            request.engine.id,
            text.chars().count()
        );

        let word_query = request.engine.kind == EngineKind::ChatCompatible && is_word_like(text);
        let cancel = CancellationToken::new();
        let stream = self.backend.stream(request, cancel.clone());
        let writer = SessionWriter {
            session: self.session.clone(),
            current: self.generation.clone(),
            generation,
            cancel: cancel.clone(),
        };
        let handle = tokio::spawn(consume(stream, writer, word_query));

        *active = Some(ActiveOperation {
            generation,
            cancel,
            handle,
        });
    }

    /// Cancels any in-flight translation and resets the session to `Idle`.
    pub async fn clear(&self) {
        let mut active = self.active.lock().await;
        Self::relinquish(active.take()).await;
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.session.send_replace(TranslationSession::default());
    }

    /// Resolves once the session reaches `Done` or `Failed`, or is reset to `Idle`.
    pub async fn wait_until_settled(&self) -> TranslationSession {
        let mut rx = self.subscribe();
        let settled = rx
            .wait_for(|s| s.status != SessionStatus::Loading)
            .await
            .map(|s| s.clone());
        // The sender lives as long as `self`.
        settled.unwrap_or_else(|_| self.snapshot())
    }

    async fn relinquish(operation: Option<ActiveOperation>) {
        let Some(operation) = operation else {
            return;
        };
        debug!("Cancelling translation #{}", operation.generation);
        operation.cancel.cancel();
        if let Err(e) = operation.handle.await {
            warn!("Translation #{} task ended abnormally: {}", operation.generation, e);
        }
    }

    fn global_defaults(&self) -> GlobalDefaults {
        let preferences = self.preferences.clone();
        let api_key = self.credentials.get().unwrap_or_else(|e| {
            warn!("Failed to read API key: {}", e);
            String::new()
        });
        GlobalDefaults {
            base_url: preferences.base_url,
            api_key,
            source_language: preferences.source_language,
            target_language: preferences.target_language,
        }
    }
}

impl Drop for TranslationOrchestrator {
    fn drop(&mut self) {
        if let Ok(mut active) = self.active.try_lock() {
            if let Some(operation) = active.take() {
                operation.cancel.cancel();
            }
        }
    }
}

/// Write access to the session for one operation.
struct SessionWriter {
    session: Arc<watch::Sender<TranslationSession>>,
    current: Arc<AtomicU64>,
    generation: u64,
    cancel: CancellationToken,
}

impl SessionWriter {
    fn is_current(&self) -> bool {
        !self.cancel.is_cancelled() && self.current.load(Ordering::SeqCst) == self.generation
    }

    /// Applies `f` only while this operation still owns the session.
    fn write<F: FnOnce(&mut TranslationSession)>(&self, f: F) -> bool {
        self.session.send_if_modified(|session| {
            if !self.is_current() {
                return false;
            }
            f(session);
            true
        })
    }
}

async fn consume(mut stream: DeltaStream, writer: SessionWriter, word_query: bool) {
    while let Some(item) = stream.next().await {
        match item {
            Ok(delta) => {
                if !writer.write(|s| s.accumulated_text.push_str(&delta)) {
                    return;
                }
            }
            Err(e) => {
                warn!("Translation #{} failed: {}", writer.generation, e);
                writer.write(|s| {
                    s.status = SessionStatus::Failed;
                    s.error = Some(e);
                });
                return;
            }
        }
    }

    if stream.is_cancelled() {
        debug!("Translation #{} stopped by cancellation", writer.generation);
        return;
    }

    writer.write(|s| {
        if word_query {
            match word_explanation::extract(&s.accumulated_text) {
                Some(explanation) => {
                    s.accumulated_text = explanation.copy_text();
                    s.word_explanation = Some(explanation);
                }
                None => debug!("Reply to word query is not a dictionary entry"),
            }
        }
        s.status = SessionStatus::Done;
    });
    info!("Translation #{} done", writer.generation);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::{MemoryEngineStore, TranslationRequest};
    use crate::errors::Severity;
    use crate::free_translate::FreeTranslator;
    use crate::llm_client::StreamingTranslationClient;
    use crate::secure_keys::MemoryCredentialStore;
    use crate::test_support::serve;
    use crate::translation_service::TranslationService;
    use axum::http::header;
    use axum::routing::post;
    use axum::Router;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    #[derive(Clone)]
    enum Step {
        Delta(&'static str),
        Sleep(u64),
        Fail(TranslationError),
    }

    /// Plays a fixed script per source text.
    #[derive(Default)]
    struct ScriptedBackend {
        scripts: StdMutex<HashMap<String, Vec<Step>>>,
        requests: StdMutex<Vec<TranslationRequest>>,
    }

    impl ScriptedBackend {
        fn with(scripts: Vec<(&str, Vec<Step>)>) -> Arc<Self> {
            let backend = Self::default();
            *backend.scripts.lock().unwrap() = scripts
                .into_iter()
                .map(|(text, steps)| (text.to_string(), steps))
                .collect();
            Arc::new(backend)
        }
    }

    impl TranslationBackend for ScriptedBackend {
        fn stream(&self, request: TranslationRequest, cancel: CancellationToken) -> DeltaStream {
            let steps = self
                .scripts
                .lock()
                .unwrap()
                .get(&request.source_text)
                .cloned()
                .unwrap_or_default();
            self.requests.lock().unwrap().push(request);

            let (tx, stream) = DeltaStream::channel(&cancel);
            tokio::spawn(async move {
                for step in steps {
                    match step {
                        Step::Delta(d) => {
                            if !tx.send(d.to_string()).await {
                                return;
                            }
                        }
                        Step::Sleep(ms) => tokio::time::sleep(Duration::from_millis(ms)).await,
                        Step::Fail(e) => {
                            tx.fail(e).await;
                            return;
                        }
                    }
                }
            });
            stream
        }
    }

    fn orchestrator(backend: Arc<dyn TranslationBackend>, key: &str) -> TranslationOrchestrator {
        orchestrator_with(backend, key, TranslationPreferences::default())
    }

    fn orchestrator_with(
        backend: Arc<dyn TranslationBackend>,
        key: &str,
        preferences: TranslationPreferences,
    ) -> TranslationOrchestrator {
        TranslationOrchestrator::new(
            EngineResolver::new(Arc::new(MemoryEngineStore::default())),
            backend,
            Arc::new(MemoryCredentialStore::new(key)),
            preferences,
        )
    }

    #[tokio::test]
    async fn test_deltas_accumulate_to_done() {
        let backend = ScriptedBackend::with(vec![(
            "Hello there",
            vec![Step::Delta("你"), Step::Delta("好")],
        )]);
        let orchestrator = orchestrator(backend.clone(), "sk-test");

        orchestrator.start("  Hello there \n", "gpt-4o-mini").await;
        let session = orchestrator.wait_until_settled().await;
        assert_eq!(session.status, SessionStatus::Done);
        assert_eq!(session.accumulated_text, "你好");
        assert_eq!(session.source_text, "Hello there");
        assert!(session.word_explanation.is_none());
        assert!(session.error.is_none());

        let requests = backend.requests.lock().unwrap();
        assert_eq!(requests[0].effective_api_key, "sk-test");
        assert_eq!(requests[0].target_language, "zh-Hans");
    }

    #[tokio::test]
    async fn test_blank_text_is_ignored() {
        let backend = ScriptedBackend::with(vec![]);
        let orchestrator = orchestrator(backend.clone(), "k");
        orchestrator.start(" \n\t", "gpt-4o").await;
        assert_eq!(orchestrator.snapshot(), TranslationSession::default());
        assert!(backend.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_superseded_session_never_writes() {
        let backend = ScriptedBackend::with(vec![
            (
                "first text",
                vec![
                    Step::Delta("A1"),
                    Step::Sleep(150),
                    Step::Delta("A2"),
                    Step::Fail(TranslationError::NoNetwork),
                ],
            ),
            ("second text", vec![Step::Delta("B")]),
        ]);
        let orchestrator = orchestrator(backend, "k");

        orchestrator.start("first text", "gpt-4o").await;
        let mut rx = orchestrator.subscribe();
        rx.wait_for(|s| s.accumulated_text == "A1").await.unwrap();

        orchestrator.start("second text", "gpt-4o").await;
        let settled = orchestrator.wait_until_settled().await;
        assert_eq!(settled.accumulated_text, "B");

        // Outlive the first script.
        tokio::time::sleep(Duration::from_millis(300)).await;
        let session = orchestrator.snapshot();
        assert_eq!(session.source_text, "second text");
        assert_eq!(session.accumulated_text, "B");
        assert_eq!(session.status, SessionStatus::Done);
        assert!(session.error.is_none());
    }

    #[tokio::test]
    async fn test_word_query_surfaces_explanation_without_fences() {
        let backend = ScriptedBackend::with(vec![(
            "cat",
            vec![
                Step::Delta("```json\n{\"word\":\"cat\",\"phoneticUS\":\"/kæt/\","),
                Step::Delta("\"web\":\"猫\",\"senses\":[{\"pos\":\"n.\",\"meaning\":\"猫\"}]}\n"),
                Step::Delta("```"),
            ],
        )]);
        let orchestrator = orchestrator(backend, "k");

        orchestrator.start("cat", "gpt-4o-mini").await;
        let session = orchestrator.wait_until_settled().await;
        assert_eq!(session.status, SessionStatus::Done);
        let explanation = session.word_explanation.unwrap();
        assert_eq!(explanation.word, "cat");
        assert_eq!(explanation.phonetic_us.as_deref(), Some("/kæt/"));
        assert_eq!(explanation.senses.len(), 1);
        assert_eq!(explanation.senses[0].pos, "n.");
        assert_eq!(explanation.senses[0].meaning, "猫");
        assert!(!session.accumulated_text.contains("```"));
        assert!(session.accumulated_text.starts_with("cat /kæt/"));
    }

    #[tokio::test]
    async fn test_word_query_with_plain_reply_keeps_text() {
        let backend = ScriptedBackend::with(vec![("run", vec![Step::Delta("跑")])]);
        let orchestrator = orchestrator(backend, "k");
        orchestrator.start("run", "deepseek-chat").await;
        let session = orchestrator.wait_until_settled().await;
        assert_eq!(session.status, SessionStatus::Done);
        assert_eq!(session.accumulated_text, "跑");
        assert!(session.word_explanation.is_none());
    }

    #[tokio::test]
    async fn test_failure_is_classified() {
        let backend = ScriptedBackend::with(vec![(
            "hello world",
            vec![
                Step::Delta("partial"),
                Step::Fail(TranslationError::http_status(401, "bad key")),
            ],
        )]);
        let orchestrator = orchestrator(backend, "k");
        orchestrator.start("hello world", "gpt-4o").await;
        let session = orchestrator.wait_until_settled().await;
        assert_eq!(session.status, SessionStatus::Failed);
        let error = session.error.unwrap();
        assert!(matches!(error, TranslationError::HttpStatus { code: 401, .. }));
        assert_eq!(error.severity(), Severity::Error);
    }

    #[tokio::test]
    async fn test_unsupported_engine_fails_without_streaming() {
        let backend = ScriptedBackend::with(vec![]);
        let orchestrator = orchestrator(backend.clone(), "k");
        orchestrator.start("hello world", "deepl").await;
        let session = orchestrator.snapshot();
        assert_eq!(session.status, SessionStatus::Failed);
        assert_eq!(session.error, Some(TranslationError::UnsupportedEngine));
        assert!(backend.requests.lock().unwrap().is_empty());

        // A failed session never blocks the next start.
        orchestrator.start("hello world", "gpt-4o").await;
        assert_eq!(orchestrator.wait_until_settled().await.status, SessionStatus::Done);
    }

    #[tokio::test]
    async fn test_clear_cancels_without_failing() {
        let backend = ScriptedBackend::with(vec![(
            "slow text",
            vec![
                Step::Delta("x"),
                Step::Sleep(100),
                Step::Fail(TranslationError::NoNetwork),
            ],
        )]);
        let orchestrator = orchestrator(backend, "k");
        orchestrator.start("slow text", "gpt-4o").await;
        let mut rx = orchestrator.subscribe();
        rx.wait_for(|s| s.accumulated_text == "x").await.unwrap();

        orchestrator.clear().await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(orchestrator.snapshot(), TranslationSession::default());
    }

    #[tokio::test]
    async fn test_preferences_and_missing_key() {
        let client = StreamingTranslationClient::new().unwrap();
        let orchestrator = orchestrator_with(
            Arc::new(client),
            "",
            TranslationPreferences {
                base_url: "http://127.0.0.1:9".to_string(),
                source_language: "en".to_string(),
                target_language: "ja".to_string(),
            },
        );
        orchestrator.start("good morning", "gpt-4o").await;
        let session = orchestrator.wait_until_settled().await;
        assert_eq!(session.status, SessionStatus::Failed);
        assert_eq!(session.error, Some(TranslationError::MissingCredential));
    }

    #[tokio::test]
    async fn test_end_to_end_over_http() {
        let router = Router::new().route(
            "/v1/chat/completions",
            post(|| async {
                (
                    [(header::CONTENT_TYPE, "text/event-stream")],
                    "data: {\"choices\":[{\"delta\":{\"content\":\"He\"}}]}\n\
                     data: {\"choices\":[{\"delta\":{\"content\":\"llo\"}}]}\n\
                     data: [DONE]\n",
                )
            }),
        );
        let base = serve(router).await;
        let service = TranslationService::new(
            StreamingTranslationClient::new().unwrap(),
            FreeTranslator::new().unwrap(),
        );
        let orchestrator = orchestrator_with(
            Arc::new(service),
            "sk-e2e",
            TranslationPreferences {
                base_url: base,
                ..Default::default()
            },
        );

        orchestrator.start("Bonjour tout le monde", "gpt-4o-mini").await;
        let session = orchestrator.wait_until_settled().await;
        assert_eq!(session.status, SessionStatus::Done);
        assert_eq!(session.accumulated_text, "Hello");
    }
}
