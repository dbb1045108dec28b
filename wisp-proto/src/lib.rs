//! Wisp peripheral contract - GATT layout, credential payload and status tokens
//!
//! Everything in this crate describes what the peripheral firmware expects or
//! emits. It has no radio dependency so firmware-side tooling can share it.

pub mod ble;
pub mod payload;
pub mod status;

pub use ble::{ServiceProfile, FALLBACK_PROFILES, PRIMARY_PROFILE};
pub use payload::{CredentialPayload, Encoding, DEFAULT_ENCODINGS};
pub use status::StatusToken;
