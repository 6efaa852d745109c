pub mod cli;
pub mod clipboard;
pub mod engines;
pub mod errors;
pub mod free_translate;
pub mod input;
pub mod languages;
pub mod llm_client;
pub mod logging;
pub mod managers;
pub mod secure_keys;
pub mod selection;
pub mod settings;
pub mod shortcut;
pub mod translation_service;
#[cfg(unix)]
mod utils;
pub mod word_explanation;

pub use cli::run;
