//! Uniform streaming surface over all translation backends.
//!
//! Backends push deltas into a bounded channel; the consumer pulls them through a
//! [`DeltaStream`] which checks a cancellation token on every pull. Channel closure
//! after cancellation is a clean end of stream, never an error.

use crate::engines::{EngineKind, TranslationRequest};
use crate::errors::TranslationError;
use crate::free_translate::FreeTranslator;
use crate::llm_client::StreamingTranslationClient;
use log::debug;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const DELTA_CHANNEL_CAPACITY: usize = 64;

pub type DeltaResult = Result<String, TranslationError>;

/// Anything that can turn a request into a stream of text deltas.
pub trait TranslationBackend: Send + Sync {
    fn stream(&self, request: TranslationRequest, cancel: CancellationToken) -> DeltaStream;
}

/// Consumer half. Finite, not restartable, cancellable.
pub struct DeltaStream {
    rx: mpsc::Receiver<DeltaResult>,
    cancel: CancellationToken,
}

/// Producer half handed to the task that talks to the backend.
#[derive(Clone)]
pub struct DeltaSender {
    tx: mpsc::Sender<DeltaResult>,
    cancel: CancellationToken,
}

impl DeltaStream {
    /// Creates a linked pair. The pair shares a child of `cancel`, so cancelling the
    /// parent or dropping the stream both stop the producer.
    pub fn channel(cancel: &CancellationToken) -> (DeltaSender, DeltaStream) {
        let (tx, rx) = mpsc::channel(DELTA_CHANNEL_CAPACITY);
        let token = cancel.child_token();
        (
            DeltaSender {
                tx,
                cancel: token.clone(),
            },
            DeltaStream { rx, cancel: token },
        )
    }

    /// Next delta, `None` at the end of the stream or once cancelled.
    pub async fn next(&mut self) -> Option<DeltaResult> {
        if self.cancel.is_cancelled() {
            return None;
        }
        let item = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            item = self.rx.recv() => item,
        };
        if self.cancel.is_cancelled() {
            return None;
        }
        item
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Drains the stream into one string.
    pub async fn collect_text(mut self) -> Result<String, TranslationError> {
        let mut text = String::new();
        while let Some(delta) = self.next().await {
            text.push_str(&delta?);
        }
        Ok(text)
    }
}

impl Drop for DeltaStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl DeltaSender {
    /// Pushes a delta. Returns `false` when the consumer is gone or the operation was
    /// cancelled; the producer should stop.
    pub async fn send(&self, delta: String) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            sent = self.tx.send(Ok(delta)) => sent.is_ok(),
        }
    }

    /// Reports a terminal failure unless the operation was cancelled.
    pub async fn fail(&self, err: TranslationError) {
        if self.cancel.is_cancelled() {
            debug!("Dropping error after cancellation: {}", err);
            return;
        }
        let _ = self.tx.send(Err(err)).await;
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }
}

/// Routes free engines to the single-shot translator and everything else to the
/// streaming chat client.
pub struct TranslationService {
    chat: StreamingTranslationClient,
    free: FreeTranslator,
}

impl TranslationService {
    pub fn new(chat: StreamingTranslationClient, free: FreeTranslator) -> Self {
        Self { chat, free }
    }
}

impl TranslationBackend for TranslationService {
    fn stream(&self, request: TranslationRequest, cancel: CancellationToken) -> DeltaStream {
        match request.engine.kind {
            EngineKind::Free => self.free.stream(request, cancel),
            EngineKind::ChatCompatible => self.chat.stream(request, cancel),
        }
    }
}
