//! Dictionary-style explanations for single-word queries.
//!
//! When the captured text is one word, the chat backend is asked for a strict JSON
//! object instead of a plain translation. The reply is parsed best-effort after the
//! stream completes; anything unparsable leaves the plain text as the result.

use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static WORD_LIKE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z'\-]+$").unwrap());

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Sense {
    #[serde(default)]
    pub pos: String,
    #[serde(default)]
    pub meaning: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct WordExplanation {
    #[serde(default)]
    pub word: String,
    #[serde(default, rename = "phoneticUS", alias = "phonetic_us")]
    pub phonetic_us: Option<String>,
    #[serde(default, rename = "web")]
    pub web_meaning: Option<String>,
    #[serde(default)]
    pub senses: Vec<Sense>,
}

impl WordExplanation {
    /// Plain-text rendering: `word /phonetic/`, then one `pos meaning` line per sense.
    pub fn copy_text(&self) -> String {
        let word = self.word.trim();
        let phonetic = self.phonetic_us.as_deref().unwrap_or("").trim();
        let header = if phonetic.is_empty() {
            word.to_string()
        } else {
            format!("{} {}", word, phonetic)
        };

        let mut lines = vec![header];
        for sense in &self.senses {
            let pos = sense.pos.trim();
            let meaning = sense.meaning.trim();
            let line = match (pos.is_empty(), meaning.is_empty()) {
                (true, _) => meaning.to_string(),
                (false, true) => pos.to_string(),
                (false, false) => format!("{} {}", pos, meaning),
            };
            lines.push(line);
        }
        if let Some(web) = self.web_meaning.as_deref().map(str::trim) {
            if !web.is_empty() {
                lines.push(format!("web. {}", web));
            }
        }

        lines.retain(|l| !l.is_empty());
        lines.join("\n")
    }
}

/// True for exactly one whitespace-delimited token made of ASCII letters,
/// apostrophes and hyphens, with at least one letter.
pub fn is_word_like(text: &str) -> bool {
    let mut tokens = text.split_whitespace();
    let (Some(token), None) = (tokens.next(), tokens.next()) else {
        return false;
    };
    WORD_LIKE.is_match(token) && token.chars().any(|c| c.is_ascii_alphabetic())
}

/// Pull a [`WordExplanation`] out of a model reply that may be wrapped in code
/// fences or surrounded by stray prose.
pub fn extract(raw: &str) -> Option<WordExplanation> {
    let unfenced = raw
        .lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n");

    let start = unfenced.find('{')?;
    let end = unfenced.rfind('}')?;
    if end < start {
        return None;
    }

    match serde_json::from_str::<WordExplanation>(&unfenced[start..=end]) {
        Ok(explanation) if !explanation.word.trim().is_empty() => Some(explanation),
        Ok(_) => {
            debug!("Word explanation has an empty word, ignoring");
            None
        }
        Err(e) => {
            debug!("Word explanation did not parse: {}", e);
            None
        }
    }
}
