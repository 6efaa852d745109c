//! Translation engines and the resolver that turns an engine id plus stored
//! credentials into a concrete [`TranslationRequest`].

use crate::errors::TranslationError;
use log::{debug, warn};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Free engines with a working single-shot implementation.
pub const FREE_ENGINE_IDS: &[&str] = &["google", "microsoft"];

/// Free translators we recognise by name but do not implement. Requests for
/// these fail instead of being sent to a chat endpoint as a model name.
pub const UNSUPPORTED_FREE_ENGINE_IDS: &[&str] = &["deepl", "yandex", "baidu", "youdao"];

pub const OPENAI_MODELS: &[&str] = &["gpt-4o-mini", "gpt-4o"];
pub const DEEPSEEK_MODELS: &[&str] = &["deepseek-chat", "deepseek-reasoner"];

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    Free,
    #[serde(alias = "openAICompatible")]
    ChatCompatible,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Engine {
    pub id: String,
    pub kind: EngineKind,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default)]
    pub is_custom: bool,
}

impl Engine {
    pub fn free(id: &str, display_name: &str) -> Self {
        Self {
            id: id.to_string(),
            kind: EngineKind::Free,
            display_name: display_name.to_string(),
            base_url: None,
            api_key: None,
            model: None,
            is_custom: false,
        }
    }

    pub fn chat_model(id: &str) -> Self {
        Self {
            id: id.to_string(),
            kind: EngineKind::ChatCompatible,
            display_name: id.to_string(),
            base_url: None,
            api_key: None,
            model: None,
            is_custom: false,
        }
    }

    pub fn custom(
        id: &str,
        display_name: &str,
        base_url: Option<String>,
        api_key: Option<String>,
        model: Option<String>,
    ) -> Self {
        Self {
            id: id.to_string(),
            kind: EngineKind::ChatCompatible,
            display_name: display_name.to_string(),
            base_url,
            api_key,
            model,
            is_custom: true,
        }
    }

    /// Configured model, or the engine id when none is set.
    pub fn resolved_model(&self) -> String {
        non_empty(self.model.as_deref()).unwrap_or(self.id.as_str()).to_string()
    }
}

static BUILT_IN_ENGINES: Lazy<Vec<Engine>> = Lazy::new(|| {
    let mut engines = vec![
        Engine::free("google", "Google"),
        Engine::free("microsoft", "Microsoft"),
    ];
    engines.extend(OPENAI_MODELS.iter().map(|m| Engine::chat_model(m)));
    engines.extend(DEEPSEEK_MODELS.iter().map(|m| Engine::chat_model(m)));
    engines
});

pub fn built_in_engines() -> &'static [Engine] {
    &BUILT_IN_ENGINES
}

pub fn is_built_in(id: &str) -> bool {
    BUILT_IN_ENGINES.iter().any(|e| e.id == id)
}

/// Persistence boundary for user-created engines. The list is ordered and is
/// replaced wholesale on every save.
pub trait CustomEngineStore: Send + Sync {
    fn load(&self) -> Vec<Engine>;
    fn save(&self, engines: &[Engine]) -> anyhow::Result<()>;
}

#[derive(Default)]
pub struct MemoryEngineStore {
    engines: Mutex<Vec<Engine>>,
}

impl MemoryEngineStore {
    pub fn new(engines: Vec<Engine>) -> Self {
        Self {
            engines: Mutex::new(engines),
        }
    }
}

impl CustomEngineStore for MemoryEngineStore {
    fn load(&self) -> Vec<Engine> {
        self.engines
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn save(&self, engines: &[Engine]) -> anyhow::Result<()> {
        *self.engines.lock().unwrap_or_else(|e| e.into_inner()) = engines.to_vec();
        Ok(())
    }
}

/// Global fallbacks applied when an engine leaves a field empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalDefaults {
    pub base_url: String,
    pub api_key: String,
    pub source_language: String,
    pub target_language: String,
}

impl Default for GlobalDefaults {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: String::new(),
            source_language: crate::languages::AUTO_DETECT.to_string(),
            target_language: "zh-Hans".to_string(),
        }
    }
}

/// Everything one translation needs. Built per invocation and never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationRequest {
    pub engine: Engine,
    pub effective_base_url: String,
    pub effective_api_key: String,
    pub effective_model: String,
    pub source_language: String,
    pub target_language: String,
    pub source_text: String,
}

pub struct EngineResolver {
    custom: Arc<dyn CustomEngineStore>,
}

impl EngineResolver {
    pub fn new(custom: Arc<dyn CustomEngineStore>) -> Self {
        Self { custom }
    }

    /// Built-in engines followed by custom ones, in presentation order.
    pub fn all_engines(&self) -> Vec<Engine> {
        let mut engines = BUILT_IN_ENGINES.clone();
        engines.extend(self.custom.load());
        engines
    }

    pub fn find(&self, engine_id: &str) -> Option<Engine> {
        BUILT_IN_ENGINES
            .iter()
            .find(|e| e.id == engine_id)
            .cloned()
            .or_else(|| self.custom.load().into_iter().find(|e| e.id == engine_id))
    }

    pub fn resolve(
        &self,
        engine_id: &str,
        defaults: &GlobalDefaults,
        source_text: &str,
    ) -> Result<TranslationRequest, TranslationError> {
        let engine = match self.find(engine_id) {
            Some(engine) => engine,
            None if UNSUPPORTED_FREE_ENGINE_IDS.contains(&engine_id) => {
                warn!("Engine '{}' is a free engine without an implementation", engine_id);
                return Err(TranslationError::UnsupportedEngine);
            }
            None => {
                debug!(
                    "Engine '{}' is not known, treating it as a chat-compatible model",
                    engine_id
                );
                Engine::chat_model(engine_id)
            }
        };

        match engine.kind {
            EngineKind::Free => {
                if !FREE_ENGINE_IDS.contains(&engine.id.as_str()) {
                    warn!("Free engine '{}' is not supported", engine.id);
                    return Err(TranslationError::UnsupportedEngine);
                }
                Ok(TranslationRequest {
                    engine,
                    effective_base_url: String::new(),
                    effective_api_key: String::new(),
                    effective_model: String::new(),
                    source_language: defaults.source_language.clone(),
                    target_language: defaults.target_language.clone(),
                    source_text: source_text.to_string(),
                })
            }
            EngineKind::ChatCompatible => {
                let effective_base_url = non_empty(engine.base_url.as_deref())
                    .or_else(|| non_empty(Some(defaults.base_url.as_str())))
                    .unwrap_or(DEFAULT_BASE_URL)
                    .to_string();
                let effective_api_key = non_empty(engine.api_key.as_deref())
                    .or_else(|| non_empty(Some(defaults.api_key.as_str())))
                    .unwrap_or_default()
                    .to_string();
                let effective_model = engine.resolved_model();

                Ok(TranslationRequest {
                    engine,
                    effective_base_url,
                    effective_api_key,
                    effective_model,
                    source_language: defaults.source_language.clone(),
                    target_language: defaults.target_language.clone(),
                    source_text: source_text.to_string(),
                })
            }
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
