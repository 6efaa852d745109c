//! Command-line front end: argument parsing, service wiring and terminal output.

use crate::clipboard::SystemClipboard;
use crate::engines::{Engine, EngineKind, EngineResolver};
use crate::errors::{Severity, TranslationError};
use crate::free_translate::FreeTranslator;
use crate::input::SystemCopyShortcut;
use crate::llm_client::StreamingTranslationClient;
use crate::logging;
use crate::managers::translation::{
    SessionStatus, TranslationOrchestrator, TranslationPreferences, TranslationSession,
};
use crate::languages::{self, LANGUAGES};
use crate::secure_keys::{CredentialStore, KeyringCredentialStore};
use crate::selection::{system_reader, SystemAccessibilityGate, TextAcquisition};
use crate::settings::{
    default_settings_path, select_credential_store, AppSettings, LogLevel, SettingsStore,
};
use crate::shortcut::{parse_binding, HotkeyListener};
use crate::translation_service::TranslationService;
use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand};
use log::{error, info, warn};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Upper bound on waiting for the hotkey's modifiers to be released.
const MODIFIER_RELEASE_TIMEOUT: Duration = Duration::from_millis(1500);

#[derive(Parser)]
#[command(name = "seltrans")]
#[command(about = "Select text anywhere, press a hotkey, read the translation", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Settings file (defaults to the per-user config directory)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level override: trace, debug, info, warn, error
    #[arg(long, global = true)]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Command,
}

/// Per-invocation language overrides.
#[derive(Args, Debug, Clone, Default)]
pub struct LanguageArgs {
    /// Source language code, or "auto"
    #[arg(long)]
    pub from: Option<String>,
    /// Target language code
    #[arg(long)]
    pub to: Option<String>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Wait for the hotkey, then translate the current selection
    Listen {
        #[arg(long)]
        engine: Option<String>,
        /// Hotkey binding, e.g. "ctrl+alt+t"
        #[arg(long)]
        hotkey: Option<String>,
        #[command(flatten)]
        languages: LanguageArgs,
    },

    /// Capture the current selection once and translate it
    Capture {
        #[arg(long)]
        engine: Option<String>,
        /// Seconds to wait first, to switch to the target window
        #[arg(long, default_value_t = 0)]
        delay: u64,
        #[command(flatten)]
        languages: LanguageArgs,
    },

    /// Translate the given text
    Translate {
        text: String,
        #[arg(long)]
        engine: Option<String>,
        #[command(flatten)]
        languages: LanguageArgs,
    },

    /// List supported language codes
    Languages,

    /// Manage translation engines
    Engines {
        #[command(subcommand)]
        action: EnginesCommand,
    },

    /// Manage the global API key
    Key {
        #[command(subcommand)]
        action: KeyCommand,
    },
}

#[derive(Subcommand)]
pub enum EnginesCommand {
    /// List built-in and custom engines
    List,
    /// Add a custom OpenAI-compatible engine
    Add {
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        base_url: Option<String>,
        #[arg(long)]
        api_key: Option<String>,
        #[arg(long)]
        model: Option<String>,
    },
    /// Remove a custom engine
    Remove { id: String },
    /// Make an engine the default
    Select { id: String },
}

#[derive(Subcommand)]
pub enum KeyCommand {
    /// Store the global API key (OS credential vault when reachable)
    Set { value: String },
    /// Delete the stored key
    Clear,
    /// Show whether a key is stored
    Status,
}

/// Long-lived services shared by every command.
struct App {
    settings: Arc<SettingsStore>,
    credentials: Arc<dyn CredentialStore>,
}

impl App {
    fn load(config: Option<PathBuf>, log_level: Option<LogLevel>) -> Result<Self> {
        let path = match config {
            Some(path) => path,
            None => default_settings_path()?,
        };
        let keyring = Arc::new(KeyringCredentialStore::default());
        let settings = Arc::new(SettingsStore::load_or_create(&path, keyring.as_ref())?);
        logging::init(log_level.unwrap_or(settings.get().log_level));
        info!("Settings loaded from {}", settings.path().display());

        let credentials = select_credential_store(&settings, keyring);

        Ok(Self {
            settings,
            credentials,
        })
    }

    fn orchestrator(&self, languages: &LanguageArgs) -> Result<TranslationOrchestrator> {
        let preferences = preferences_for(&self.settings.get(), languages)?;
        let service = TranslationService::new(
            StreamingTranslationClient::new()?,
            FreeTranslator::new()?,
        );
        Ok(TranslationOrchestrator::new(
            EngineResolver::new(self.settings.clone()),
            Arc::new(service),
            self.credentials.clone(),
            preferences,
        ))
    }

    fn acquisition(&self) -> TextAcquisition {
        TextAcquisition::new(
            Arc::new(SystemAccessibilityGate),
            system_reader(),
            Arc::new(SystemClipboard::new()),
            Arc::new(SystemCopyShortcut::new()),
            Duration::from_millis(self.settings.get().clipboard_settle_delay_ms),
        )
    }

    fn engine_or_default(&self, engine: Option<String>) -> String {
        engine.unwrap_or_else(|| self.settings.get().selected_engine)
    }
}

/// Settings languages with command-line overrides applied. `auto` is only
/// accepted as a source.
fn preferences_for(
    settings: &AppSettings,
    overrides: &LanguageArgs,
) -> Result<TranslationPreferences> {
    let source_language = overrides
        .from
        .clone()
        .unwrap_or_else(|| settings.source_language.clone());
    let target_language = overrides
        .to
        .clone()
        .unwrap_or_else(|| settings.target_language.clone());

    if !LANGUAGES.iter().any(|l| l.code == source_language) {
        return Err(anyhow!("Unknown source language '{}'", source_language));
    }
    if !languages::targets().any(|l| l.code == target_language) {
        return Err(anyhow!("'{}' is not a valid target language", target_language));
    }

    Ok(TranslationPreferences {
        base_url: settings.base_url.clone(),
        source_language,
        target_language,
    })
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    let app = App::load(cli.config, cli.log_level)?;

    match cli.command {
        Command::Engines { action } => run_engines(&app, action),
        Command::Key { action } => run_key(&app, action),
        Command::Languages => {
            for language in LANGUAGES {
                let note = if language.code == languages::AUTO_DETECT {
                    " (source only)"
                } else {
                    ""
                };
                println!("{:<8} {}{}", language.code, language.name, note);
            }
            Ok(())
        }
        command => {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;
            runtime.block_on(run_async(&app, command))
        }
    }
}

async fn run_async(app: &App, command: Command) -> Result<()> {
    match command {
        Command::Translate {
            text,
            engine,
            languages,
        } => {
            let orchestrator = app.orchestrator(&languages)?;
            orchestrator.start(&text, &app.engine_or_default(engine)).await;
            finish(render_until_settled(&orchestrator).await)
        }
        Command::Capture {
            engine,
            delay,
            languages,
        } => {
            let orchestrator = app.orchestrator(&languages)?;
            if delay > 0 {
                tokio::time::sleep(Duration::from_secs(delay)).await;
            }
            match app.acquisition().capture().await {
                Ok(Some(captured)) => {
                    info!(
                        "Captured {} chars ({:?})",
                        captured.value.chars().count(),
                        captured.source
                    );
                    orchestrator
                        .start(&captured.value, &app.engine_or_default(engine))
                        .await;
                    finish(render_until_settled(&orchestrator).await)
                }
                Ok(None) => {
                    println!("No text selected.");
                    Ok(())
                }
                Err(e) => {
                    report_error(&e);
                    Err(anyhow!(e))
                }
            }
        }
        Command::Listen {
            engine,
            hotkey,
            languages,
        } => {
            let binding = parse_binding(&hotkey.unwrap_or_else(|| app.settings.get().hotkey))
                .map_err(|e| anyhow!(e))?;
            let engine = app.engine_or_default(engine);
            let orchestrator = app.orchestrator(&languages)?;
            let acquisition = app.acquisition();

            println!("Press {} with text selected. Ctrl+C to quit.", binding.original);
            let mut hotkey = HotkeyListener::start(binding);
            let printer = spawn_printer(&orchestrator);

            while hotkey.next_trigger().await.is_some() {
                // A copy chord sent while the hotkey is still held merges with it.
                if !hotkey.modifiers_released(MODIFIER_RELEASE_TIMEOUT).await {
                    warn!("Hotkey modifiers still held, sending copy anyway");
                }
                match acquisition.capture().await {
                    Ok(Some(captured)) => orchestrator.start(&captured.value, &engine).await,
                    Ok(None) => info!("Hotkey pressed without a selection"),
                    Err(e) => report_error(&e),
                }
            }

            printer.abort();
            Ok(())
        }
        Command::Engines { .. } | Command::Key { .. } | Command::Languages => Ok(()),
    }
}

fn run_engines(app: &App, action: EnginesCommand) -> Result<()> {
    match action {
        EnginesCommand::List => {
            let selected = app.settings.get().selected_engine;
            let resolver = EngineResolver::new(app.settings.clone());
            for engine in resolver.all_engines() {
                let marker = if engine.id == selected { "*" } else { " " };
                let kind = match engine.kind {
                    EngineKind::Free => "free",
                    EngineKind::ChatCompatible => "chat",
                };
                let origin = if engine.is_custom { " (custom)" } else { "" };
                println!(
                    "{} {:<20} {:<5} {}{}",
                    marker, engine.id, kind, engine.display_name, origin
                );
            }
            Ok(())
        }
        EnginesCommand::Add {
            id,
            name,
            base_url,
            api_key,
            model,
        } => {
            let display_name = name.unwrap_or_else(|| id.clone());
            app.settings.add_custom_engine(Engine::custom(
                &id,
                &display_name,
                base_url,
                api_key,
                model,
            ))?;
            println!("Added engine '{}'.", id.trim());
            Ok(())
        }
        EnginesCommand::Remove { id } => {
            if app.settings.remove_custom_engine(&id)? {
                println!("Removed engine '{}'.", id);
                Ok(())
            } else {
                Err(anyhow!("No custom engine '{}'", id))
            }
        }
        EnginesCommand::Select { id } => {
            app.settings.update(|settings| {
                settings.selected_engine = id.clone();
                Ok(())
            })?;
            println!("Default engine is now '{}'.", id);
            Ok(())
        }
    }
}

fn run_key(app: &App, action: KeyCommand) -> Result<()> {
    match action {
        KeyCommand::Set { value } => {
            if value.trim().is_empty() {
                return Err(anyhow!("Refusing to store an empty key; use `key clear`"));
            }
            app.credentials.set(&value)?;
            println!("API key stored.");
        }
        KeyCommand::Clear => {
            app.credentials.set("")?;
            println!("API key cleared.");
        }
        KeyCommand::Status => {
            if app.credentials.has_key() {
                println!("API key: stored");
            } else {
                println!("API key: not set");
            }
        }
    }
    Ok(())
}

fn finish(session: TranslationSession) -> Result<()> {
    match session.error {
        Some(e) => Err(anyhow!(e)),
        None => Ok(()),
    }
}

fn report_error(error: &TranslationError) {
    let label = match error.severity() {
        Severity::Warning => "warning",
        Severity::Error => "error",
    };
    eprintln!("{}: {}", label, error.user_message());
    if error.has_remediation() {
        eprintln!(
            "Grant access under System Settings > Privacy & Security > Accessibility, then press the hotkey again."
        );
    }
    if let TranslationError::HttpStatus { body, .. } = error {
        if !body.is_empty() {
            error!("Response body: {}", body);
        }
    }
}

/// Prints sessions incrementally as the orchestrator publishes them.
#[derive(Default)]
struct SessionPrinter {
    source: String,
    printed: String,
    finished: bool,
}

impl SessionPrinter {
    fn render<W: Write>(&mut self, out: &mut W, session: &TranslationSession) {
        if session.status == SessionStatus::Idle {
            self.finished = true;
            return;
        }

        let new_session = session.source_text != self.source
            || (self.finished && session.status == SessionStatus::Loading);
        if new_session {
            self.source = session.source_text.clone();
            self.printed.clear();
            self.finished = false;
            let _ = writeln!(out, "\n» {}", session.source_text);
        }
        if self.finished {
            return;
        }

        let text = &session.accumulated_text;
        if text.starts_with(self.printed.as_str()) {
            let _ = write!(out, "{}", &text[self.printed.len()..]);
        } else {
            // Replaced wholesale, e.g. a dictionary entry after its raw JSON.
            let _ = write!(out, "\n{}", text);
        }
        self.printed = text.clone();

        if session.is_terminal() {
            self.finished = true;
            let _ = writeln!(out);
            if let Some(e) = &session.error {
                report_error(e);
            }
        }
        let _ = out.flush();
    }
}

async fn render_until_settled(orchestrator: &TranslationOrchestrator) -> TranslationSession {
    let mut rx = orchestrator.subscribe();
    let mut printer = SessionPrinter::default();
    let mut stdout = std::io::stdout();
    loop {
        let session = rx.borrow_and_update().clone();
        printer.render(&mut stdout, &session);
        if session.status != SessionStatus::Loading || rx.changed().await.is_err() {
            return session;
        }
    }
}

fn spawn_printer(orchestrator: &TranslationOrchestrator) -> tokio::task::JoinHandle<()> {
    let mut rx = orchestrator.subscribe();
    tokio::spawn(async move {
        let mut printer = SessionPrinter::default();
        let mut stdout = std::io::stdout();
        while rx.changed().await.is_ok() {
            let session = rx.borrow_and_update().clone();
            printer.render(&mut stdout, &session);
        }
    })
}
