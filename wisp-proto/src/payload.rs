//! Credential payload schema and the write encodings peripherals accept
//!
//! The payload is a flat JSON object. All five fields are always present;
//! firmware that only understood `ssid`/`password` is not supported.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// JSON body written to the credentials characteristic
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialPayload {
    pub ssid: String,
    pub password: String,
    pub auth_token: String,
    pub device_name: String,
    pub user_timezone: String,
}

impl CredentialPayload {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl fmt::Debug for CredentialPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialPayload")
            .field("ssid", &self.ssid)
            .field("password_len", &self.password.len())
            .field("auth_token_len", &self.auth_token.len())
            .field("device_name", &self.device_name)
            .field("user_timezone", &self.user_timezone)
            .finish()
    }
}

/// How the JSON payload is laid out on the wire.
///
/// Some peripheral stacks copy characteristic values into fixed C-string
/// buffers and reject anything that is not NUL-terminated ASCII, others only
/// accept a base64 text body. Writes are attempted in `DEFAULT_ENCODINGS` order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    /// UTF-8 JSON bytes, unmodified
    Bytes,
    /// ASCII-only JSON (non-ASCII escaped as `\uXXXX`), NUL-terminated
    Text,
    /// Standard padded base64 of the UTF-8 JSON
    Base64,
}

pub const DEFAULT_ENCODINGS: [Encoding; 3] = [Encoding::Bytes, Encoding::Text, Encoding::Base64];

impl Encoding {
    pub fn encode(self, json: &str) -> Vec<u8> {
        match self {
            Encoding::Bytes => json.as_bytes().to_vec(),
            Encoding::Text => {
                let mut out = String::with_capacity(json.len() + 1);
                for c in json.chars() {
                    if c.is_ascii() {
                        out.push(c);
                    } else {
                        let mut units = [0u16; 2];
                        for unit in c.encode_utf16(&mut units) {
                            out.push_str(&format!("\\u{:04x}", unit));
                        }
                    }
                }
                let mut bytes = out.into_bytes();
                bytes.push(0);
                bytes
            }
            Encoding::Base64 => data_encoding::BASE64.encode(json.as_bytes()).into_bytes(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Encoding::Bytes => "bytes",
            Encoding::Text => "text",
            Encoding::Base64 => "base64",
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Encoding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bytes" => Ok(Encoding::Bytes),
            "text" => Ok(Encoding::Text),
            "base64" => Ok(Encoding::Base64),
            other => Err(format!("unknown encoding: {other}")),
        }
    }
}
