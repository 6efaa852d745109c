//! Stable error taxonomy for the capture → translate pipeline.
//!
//! Every failure the orchestrator can surface is one of the [`TranslationError`]
//! kinds. Transport failures are reduced to a [`TransportErrorCode`] first so that
//! all offline-class conditions collapse into [`TranslationError::NoNetwork`].

use serde::Serialize;
use std::error::Error as StdError;
use thiserror::Error;

/// Visual treatment hint. Never changes control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TranslationError {
    #[error("accessibility permission is required to read the selected text")]
    NotAuthorized,
    #[error("API key is missing")]
    MissingCredential,
    #[error("unsupported engine")]
    UnsupportedEngine,
    #[error("HTTP {code}: {body}")]
    HttpStatus { code: u16, body: String },
    #[error("network unavailable")]
    NoNetwork,
    #[error("invalid response from translation service")]
    InvalidResponse,
    #[error("translation failed: {0}")]
    Unknown(String),
}

impl TranslationError {
    pub fn http_status(code: u16, body: impl Into<String>) -> Self {
        TranslationError::HttpStatus {
            code,
            body: body.into(),
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            TranslationError::NoNetwork => Severity::Warning,
            TranslationError::HttpStatus { code: 429, .. } => Severity::Warning,
            _ => Severity::Error,
        }
    }

    /// True when the caller can offer a fix (open the permission settings).
    pub fn has_remediation(&self) -> bool {
        matches!(self, TranslationError::NotAuthorized)
    }

    /// Short English text for the presentation layer.
    pub fn user_message(&self) -> String {
        match self {
            TranslationError::NotAuthorized => {
                "Accessibility permission is required to read the selected text.".to_string()
            }
            TranslationError::MissingCredential => "API Key is missing.".to_string(),
            TranslationError::UnsupportedEngine => "Unsupported engine.".to_string(),
            TranslationError::HttpStatus { code: 401, .. } => {
                "API Key is invalid or expired.".to_string()
            }
            TranslationError::HttpStatus { code: 429, .. } => {
                "Usage limit exceeded. Please check your quota.".to_string()
            }
            TranslationError::HttpStatus { code, .. } => {
                format!("Translation failed (Error code: {}).", code)
            }
            TranslationError::NoNetwork => "Please check your network connection.".to_string(),
            TranslationError::InvalidResponse | TranslationError::Unknown(_) => {
                "Translation failed. Please try again.".to_string()
            }
        }
    }

    /// Classify a transport-level failure.
    pub fn from_transport(code: TransportErrorCode, detail: impl Into<String>) -> Self {
        if code.is_offline() {
            TranslationError::NoNetwork
        } else {
            TranslationError::Unknown(detail.into())
        }
    }
}

impl From<reqwest::Error> for TranslationError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return TranslationError::InvalidResponse;
        }
        if let Some(status) = err.status() {
            return TranslationError::http_status(status.as_u16(), String::new());
        }
        let code = TransportErrorCode::from_reqwest(&err);
        TranslationError::from_transport(code, err.to_string())
    }
}

/// Transport failure codes, modelled on the URL-loading error codes of desktop
/// HTTP stacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorCode {
    NotConnected,
    ConnectionLost,
    CannotConnectToHost,
    CannotFindHost,
    DnsLookupFailed,
    RoamingOff,
    DataNotAllowed,
    TimedOut,
    Other,
}

impl TransportErrorCode {
    pub fn is_offline(self) -> bool {
        matches!(
            self,
            TransportErrorCode::NotConnected
                | TransportErrorCode::ConnectionLost
                | TransportErrorCode::CannotConnectToHost
                | TransportErrorCode::CannotFindHost
                | TransportErrorCode::DnsLookupFailed
                | TransportErrorCode::RoamingOff
                | TransportErrorCode::DataNotAllowed
        )
    }

    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            return TransportErrorCode::TimedOut;
        }

        let mut source: Option<&(dyn StdError + 'static)> = err.source();
        while let Some(cause) = source {
            if let Some(io_err) = cause.downcast_ref::<std::io::Error>() {
                let code = Self::from_io(io_err);
                if code != TransportErrorCode::Other {
                    return code;
                }
            }
            let code = Self::from_message(&cause.to_string());
            if code != TransportErrorCode::Other {
                return code;
            }
            source = cause.source();
        }

        if err.is_connect() {
            TransportErrorCode::CannotConnectToHost
        } else {
            Self::from_message(&err.to_string())
        }
    }

    pub fn from_io(err: &std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::ConnectionRefused => TransportErrorCode::CannotConnectToHost,
            ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof => TransportErrorCode::ConnectionLost,
            ErrorKind::NotConnected | ErrorKind::AddrNotAvailable => {
                TransportErrorCode::NotConnected
            }
            ErrorKind::TimedOut => TransportErrorCode::TimedOut,
            _ => Self::from_message(&err.to_string()),
        }
    }

    fn from_message(message: &str) -> Self {
        let lower = message.to_lowercase();
        if lower.contains("dns error") || lower.contains("failed to lookup address") {
            TransportErrorCode::DnsLookupFailed
        } else if lower.contains("name or service not known")
            || lower.contains("no such host")
            || lower.contains("nodename nor servname")
        {
            TransportErrorCode::CannotFindHost
        } else if lower.contains("network is unreachable") {
            TransportErrorCode::NotConnected
        } else if lower.contains("connection refused") {
            TransportErrorCode::CannotConnectToHost
        } else if lower.contains("connection reset") || lower.contains("connection closed") {
            TransportErrorCode::ConnectionLost
        } else {
            TransportErrorCode::Other
        }
    }
}
