//! Status tokens notified by the peripheral on the status characteristic
//!
//! Happy path: `RECEIVED -> PROCESSING -> STORED -> SUCCESS`. The peripheral may
//! skip steps. Anything outside the vocabulary is surfaced as `Unknown`.

use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusToken {
    Received,
    Processing,
    Stored,
    Success,
    StorageFailed,
    InvalidJson,
    Unknown(String),
}

/// Some firmware wraps the token: `{"status": "STORED"}`
#[derive(Deserialize)]
struct Envelope {
    status: String,
}

impl StatusToken {
    pub fn parse(token: &str) -> Self {
        match token.trim() {
            "RECEIVED" => StatusToken::Received,
            "PROCESSING" => StatusToken::Processing,
            "STORED" => StatusToken::Stored,
            "SUCCESS" => StatusToken::Success,
            "STORAGE_FAILED" => StatusToken::StorageFailed,
            "ERROR_INVALID_JSON" => StatusToken::InvalidJson,
            other => StatusToken::Unknown(other.to_string()),
        }
    }

    /// Decode a raw notification value.
    ///
    /// Returns `None` for blank values (only NUL padding or whitespace).
    pub fn decode(raw: &[u8]) -> Option<Self> {
        let text = String::from_utf8_lossy(raw);
        let text = text.trim_matches(|c: char| c == '\0' || c.is_whitespace());
        if text.is_empty() {
            return None;
        }

        let token = Self::parse(text);
        if token.is_known() {
            return Some(token);
        }

        if let Ok(bytes) = data_encoding::BASE64.decode(text.as_bytes()) {
            if let Ok(inner) = std::str::from_utf8(&bytes) {
                let inner = Self::parse(inner.trim_matches('\0'));
                if inner.is_known() {
                    return Some(inner);
                }
            }
        }

        if let Ok(envelope) = serde_json::from_str::<Envelope>(text) {
            return Some(Self::parse(&envelope.status));
        }

        Some(token)
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, StatusToken::Unknown(_))
    }

    /// Progress percentage for the happy-path tokens
    pub fn progress(&self) -> Option<u8> {
        match self {
            StatusToken::Received => Some(25),
            StatusToken::Processing => Some(50),
            StatusToken::Stored => Some(75),
            StatusToken::Success => Some(100),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            StatusToken::Received => "RECEIVED",
            StatusToken::Processing => "PROCESSING",
            StatusToken::Stored => "STORED",
            StatusToken::Success => "SUCCESS",
            StatusToken::StorageFailed => "STORAGE_FAILED",
            StatusToken::InvalidJson => "ERROR_INVALID_JSON",
            StatusToken::Unknown(s) => s,
        }
    }
}
