use crate::engines::TranslationRequest;
use crate::errors::TranslationError;
use crate::languages::{self, AUTO_DETECT};
use crate::llm_client::read_body_excerpt;
use crate::translation_service::{DeltaStream, TranslationBackend};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const GOOGLE_ENDPOINT: &str = "https://translate.googleapis.com/translate_a/single";
pub const MICROSOFT_ENDPOINT: &str = "https://api-edge.cognitive.microsofttranslator.com/translate";

const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

#[derive(Serialize)]
struct MicrosoftInput<'a> {
    #[serde(rename = "Text")]
    text: &'a str,
}

#[derive(Deserialize)]
struct MicrosoftResult {
    #[serde(default)]
    translations: Vec<MicrosoftTranslation>,
}

#[derive(Deserialize)]
struct MicrosoftTranslation {
    text: String,
}

/// Single-shot client for the keyless Google and Microsoft endpoints. The whole
/// result arrives as one delta.
#[derive(Clone)]
pub struct FreeTranslator {
    client: reqwest::Client,
    google_endpoint: String,
    microsoft_endpoint: String,
}

impl FreeTranslator {
    pub fn new() -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build HTTP client: {}", e))?;
        Ok(Self::with_endpoints(client, GOOGLE_ENDPOINT, MICROSOFT_ENDPOINT))
    }

    pub fn with_endpoints(client: reqwest::Client, google: &str, microsoft: &str) -> Self {
        Self {
            client,
            google_endpoint: google.to_string(),
            microsoft_endpoint: microsoft.to_string(),
        }
    }

    pub async fn translate(&self, request: &TranslationRequest) -> Result<String, TranslationError> {
        match request.engine.id.as_str() {
            "google" => self.translate_with_google(request).await,
            "microsoft" => self.translate_with_microsoft(request).await,
            other => {
                warn!("No free translator for engine '{}'", other);
                Err(TranslationError::UnsupportedEngine)
            }
        }
    }

    async fn translate_with_google(
        &self,
        request: &TranslationRequest,
    ) -> Result<String, TranslationError> {
        info!(
            "Google translate request ({} chars, {} -> {})",
            request.source_text.chars().count(),
            request.source_language,
            request.target_language
        );
        let response = self
            .client
            .get(&self.google_endpoint)
            .query(&[
                ("client", "gtx"),
                ("sl", languages::google_code(&request.source_language)),
                ("tl", languages::google_code(&request.target_language)),
                ("dt", "t"),
                ("q", request.source_text.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let excerpt = read_body_excerpt(response).await;
            return Err(TranslationError::http_status(status.as_u16(), excerpt));
        }

        let json: Value = response.json().await?;
        parse_google_response(&json).ok_or(TranslationError::InvalidResponse)
    }

    async fn translate_with_microsoft(
        &self,
        request: &TranslationRequest,
    ) -> Result<String, TranslationError> {
        let mut query = vec![
            ("api-version", "3.0"),
            ("to", languages::microsoft_code(&request.target_language)),
        ];
        let from = languages::microsoft_code(&request.source_language);
        if from != AUTO_DETECT && !from.is_empty() {
            query.push(("from", from));
        }

        info!(
            "Microsoft translate request ({} chars, {} -> {})",
            request.source_text.chars().count(),
            request.source_language,
            request.target_language
        );
        let response = self
            .client
            .post(&self.microsoft_endpoint)
            .query(&query)
            .json(&[MicrosoftInput {
                text: &request.source_text,
            }])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let excerpt = read_body_excerpt(response).await;
            return Err(TranslationError::http_status(status.as_u16(), excerpt));
        }

        let results: Vec<MicrosoftResult> = response.json().await?;
        Ok(results
            .into_iter()
            .next()
            .and_then(|r| r.translations.into_iter().next())
            .map(|t| t.text)
            .unwrap_or_default())
    }
}

/// Concatenates the translated segment of every sentence in Google's nested array.
fn parse_google_response(json: &Value) -> Option<String> {
    let sentences = json.as_array()?.first()?.as_array()?;
    let mut text = String::new();
    for sentence in sentences {
        if let Some(segment) = sentence.as_array().and_then(|s| s.first()).and_then(Value::as_str)
        {
            text.push_str(segment);
        }
    }
    Some(text)
}

impl TranslationBackend for FreeTranslator {
    fn stream(&self, request: TranslationRequest, cancel: CancellationToken) -> DeltaStream {
        let (tx, stream) = DeltaStream::channel(&cancel);
        let translator = self.clone();

        tokio::spawn(async move {
            let result = tokio::select! {
                biased;
                _ = tx.cancelled() => {
                    debug!("Free translation via '{}' cancelled", request.engine.id);
                    return;
                }
                result = translator.translate(&request) => result,
            };
            match result {
                Ok(text) => {
                    tx.send(text).await;
                }
                Err(e) => {
                    warn!("Free translation via '{}' failed: {}", request.engine.id, e);
                    tx.fail(e).await;
                }
            }
        });

        stream
    }
}
