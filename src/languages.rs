//! Language catalogue shared by the free engines and the chat instructions.

pub const AUTO_DETECT: &str = "auto";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LanguageOption {
    pub code: &'static str,
    pub name: &'static str,
}

pub const LANGUAGES: &[LanguageOption] = &[
    LanguageOption { code: "auto", name: "Auto Detect" },
    LanguageOption { code: "en", name: "English" },
    LanguageOption { code: "zh-Hans", name: "Simplified Chinese" },
    LanguageOption { code: "zh-Hant", name: "Traditional Chinese" },
    LanguageOption { code: "ja", name: "Japanese" },
    LanguageOption { code: "ko", name: "Korean" },
    LanguageOption { code: "fr", name: "French" },
    LanguageOption { code: "de", name: "German" },
    LanguageOption { code: "es", name: "Spanish" },
    LanguageOption { code: "ru", name: "Russian" },
];

/// Languages usable as a translation target (everything except auto-detect).
pub fn targets() -> impl Iterator<Item = &'static LanguageOption> {
    LANGUAGES.iter().filter(|l| l.code != AUTO_DETECT)
}

/// Display name for a code, or the code itself when it is not in the catalogue.
pub fn display_name(code: &str) -> &str {
    LANGUAGES
        .iter()
        .find(|l| l.code == code)
        .map(|l| l.name)
        .unwrap_or(code)
}

/// Google's translate endpoint wants region codes for the Chinese scripts.
pub fn google_code(code: &str) -> &str {
    match code {
        "zh-Hans" => "zh-CN",
        "zh-Hant" => "zh-TW",
        other => other,
    }
}

/// The Microsoft endpoint accepts script subtags as-is.
pub fn microsoft_code(code: &str) -> &str {
    code
}
