use crate::engines::{is_built_in, CustomEngineStore, Engine, DEFAULT_BASE_URL};
use crate::secure_keys::{migrate_legacy_key, CredentialStore};
use crate::selection::DEFAULT_SETTLE_DELAY_MS;
use anyhow::{anyhow, Context, Result};
use log::{debug, info, warn};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

pub const SETTINGS_STORE_PATH: &str = "settings_store.json";
const APP_DIR_NAME: &str = "seltrans";
const SETTINGS_KEY: &str = "settings";

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

// Accepts both the numeric format (1-5) and names ("trace", "debug", etc.)
impl<'de> Deserialize<'de> for LogLevel {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct LogLevelVisitor;

        impl<'de> Visitor<'de> for LogLevelVisitor {
            type Value = LogLevel;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter.write_str("a string or integer representing log level")
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<LogLevel, E> {
                value.parse().map_err(|_| {
                    E::unknown_variant(value, &["trace", "debug", "info", "warn", "error"])
                })
            }

            fn visit_u64<E: de::Error>(self, value: u64) -> Result<LogLevel, E> {
                match value {
                    1 => Ok(LogLevel::Trace),
                    2 => Ok(LogLevel::Debug),
                    3 => Ok(LogLevel::Info),
                    4 => Ok(LogLevel::Warn),
                    5 => Ok(LogLevel::Error),
                    _ => Err(E::invalid_value(de::Unexpected::Unsigned(value), &"1-5")),
                }
            }
        }

        deserializer.deserialize_any(LogLevelVisitor)
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(format!("Unknown log level '{}'", other)),
        }
    }
}

impl From<LogLevel> for log::LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => log::LevelFilter::Trace,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Error => log::LevelFilter::Error,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct AppSettings {
    #[serde(default = "default_selected_engine")]
    pub selected_engine: String,
    #[serde(default = "default_source_language")]
    pub source_language: String,
    #[serde(default = "default_target_language")]
    pub target_language: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_hotkey")]
    pub hotkey: String,
    #[serde(default = "default_clipboard_settle_delay_ms")]
    pub clipboard_settle_delay_ms: u64,
    #[serde(default = "default_log_level")]
    pub log_level: LogLevel,
    #[serde(default)]
    pub custom_engines: Vec<Engine>,
    /// Plaintext key from older versions. Emptied once moved to secure storage.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_key: String,
}

fn default_selected_engine() -> String {
    "gpt-4o-mini".to_string()
}

fn default_source_language() -> String {
    crate::languages::AUTO_DETECT.to_string()
}

fn default_target_language() -> String {
    "zh-Hans".to_string()
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_hotkey() -> String {
    "ctrl+alt+t".to_string()
}

fn default_clipboard_settle_delay_ms() -> u64 {
    DEFAULT_SETTLE_DELAY_MS
}

fn default_log_level() -> LogLevel {
    LogLevel::Info
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            selected_engine: default_selected_engine(),
            source_language: default_source_language(),
            target_language: default_target_language(),
            base_url: default_base_url(),
            hotkey: default_hotkey(),
            clipboard_settle_delay_ms: default_clipboard_settle_delay_ms(),
            log_level: default_log_level(),
            custom_engines: Vec::new(),
            api_key: String::new(),
        }
    }
}

/// `settings_store.json` in the per-user config directory.
pub fn default_settings_path() -> Result<PathBuf> {
    let dir = dirs::config_dir().ok_or_else(|| anyhow!("No config directory on this system"))?;
    Ok(dir.join(APP_DIR_NAME).join(SETTINGS_STORE_PATH))
}

/// Settings persisted as `{"settings": {...}}` JSON, cached in memory.
pub struct SettingsStore {
    path: PathBuf,
    settings: RwLock<AppSettings>,
}

impl SettingsStore {
    /// Loads settings from `path`, writing defaults when the file is missing or
    /// unreadable, and moves a legacy plaintext key into `credentials`.
    pub fn load_or_create(path: &Path, credentials: &dyn CredentialStore) -> Result<Self> {
        let (mut settings, mut updated) = match read_settings_file(path) {
            Ok(Some(settings)) => {
                debug!("Found existing settings at {}", path.display());
                (settings, false)
            }
            Ok(None) => {
                info!("No settings at {}, creating defaults", path.display());
                (AppSettings::default(), true)
            }
            Err(e) => {
                warn!("Failed to parse settings: {}", e);
                (AppSettings::default(), true)
            }
        };

        if migrate_legacy_key(credentials, &settings.api_key) {
            settings.api_key.clear();
            updated = true;
        }

        if updated {
            write_settings_file(path, &settings)?;
        }

        Ok(Self {
            path: path.to_path_buf(),
            settings: RwLock::new(settings),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self) -> AppSettings {
        self.settings
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Applies `f` and persists the result. The cache is only replaced when the
    /// write succeeds.
    pub fn update<F>(&self, f: F) -> Result<AppSettings>
    where
        F: FnOnce(&mut AppSettings) -> Result<()>,
    {
        let mut guard = self.settings.write().unwrap_or_else(|e| e.into_inner());
        let mut next = guard.clone();
        f(&mut next)?;
        write_settings_file(&self.path, &next)?;
        *guard = next.clone();
        Ok(next)
    }

    /// Appends a user engine. Ids must be non-empty and unique across built-in
    /// and custom engines.
    pub fn add_custom_engine(&self, mut engine: Engine) -> Result<()> {
        engine.id = engine.id.trim().to_string();
        if engine.id.is_empty() {
            return Err(anyhow!("Engine id must not be empty"));
        }
        if is_built_in(&engine.id) {
            return Err(anyhow!("'{}' is a built-in engine", engine.id));
        }
        if engine.display_name.trim().is_empty() {
            engine.display_name = engine.id.clone();
        }
        engine.is_custom = true;

        self.update(|settings| {
            if settings.custom_engines.iter().any(|e| e.id == engine.id) {
                return Err(anyhow!("Engine '{}' already exists", engine.id));
            }
            info!("Adding custom engine '{}'", engine.id);
            settings.custom_engines.push(engine);
            Ok(())
        })
        .map(|_| ())
    }

    /// Returns false when no engine with `id` existed.
    pub fn remove_custom_engine(&self, id: &str) -> Result<bool> {
        let mut removed = false;
        self.update(|settings| {
            let before = settings.custom_engines.len();
            settings.custom_engines.retain(|e| e.id != id);
            removed = settings.custom_engines.len() != before;
            Ok(())
        })?;
        if removed {
            info!("Removed custom engine '{}'", id);
        }
        Ok(removed)
    }
}

impl CustomEngineStore for SettingsStore {
    fn load(&self) -> Vec<Engine> {
        self.get().custom_engines
    }

    fn save(&self, engines: &[Engine]) -> Result<()> {
        self.update(|settings| {
            settings.custom_engines = engines.to_vec();
            Ok(())
        })
        .map(|_| ())
    }
}

/// Keeps the API key in the settings file. Only used while the OS credential
/// vault is unreachable and the file still holds a key from an older version.
pub struct PlaintextCredentialStore {
    settings: Arc<SettingsStore>,
}

impl PlaintextCredentialStore {
    pub fn new(settings: Arc<SettingsStore>) -> Self {
        Self { settings }
    }
}

impl CredentialStore for PlaintextCredentialStore {
    fn get(&self) -> Result<String> {
        Ok(self.settings.get().api_key)
    }

    fn set(&self, key: &str) -> Result<()> {
        let key = key.trim().to_string();
        self.settings
            .update(|settings| {
                settings.api_key = key;
                Ok(())
            })
            .map(|_| ())
    }
}

/// Picks where the API key lives: the vault, unless it is unreachable while the
/// settings file still carries a plaintext key that migration could not move.
pub fn select_credential_store(
    settings: &Arc<SettingsStore>,
    vault: Arc<dyn CredentialStore>,
) -> Arc<dyn CredentialStore> {
    if settings.get().api_key.is_empty() {
        return vault;
    }
    match vault.get() {
        Ok(_) => vault,
        Err(e) => {
            warn!(
                "Credential vault unavailable ({}), keeping the API key in {}",
                e,
                settings.path().display()
            );
            Arc::new(PlaintextCredentialStore::new(settings.clone()))
        }
    }
}

fn read_settings_file(path: &Path) -> Result<Option<AppSettings>> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).with_context(|| format!("Failed to read {}", path.display())),
    };

    let mut root: serde_json::Value = serde_json::from_str(&raw)?;
    let value = root
        .get_mut(SETTINGS_KEY)
        .map(serde_json::Value::take)
        .ok_or_else(|| anyhow!("Missing '{}' object", SETTINGS_KEY))?;
    Ok(Some(serde_json::from_value(value)?))
}

fn write_settings_file(path: &Path, settings: &AppSettings) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let mut root = serde_json::Map::new();
    root.insert(SETTINGS_KEY.to_string(), serde_json::to_value(settings)?);
    let raw = serde_json::to_string_pretty(&root)?;
    fs::write(path, raw).with_context(|| format!("Failed to write {}", path.display()))
}
