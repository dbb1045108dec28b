//! Error types for the provisioning engine

/// Failure reported by the radio backend for a single primitive
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("permission denied")]
    PermissionDenied,
    #[error("not connected")]
    NotConnected,
    #[error("operation timed out")]
    TimedOut,
    #[error("rejected by peripheral: {0}")]
    Rejected(String),
    #[error("{0}")]
    Other(String),
}

/// Everything a provisioning attempt can end with.
///
/// `Display` is the short human message, `code()` is the stable identifier
/// used for telemetry.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ProvisionError {
    #[error("Bluetooth is not powered on")]
    RadioUnavailable,
    #[error("Bluetooth permission denied")]
    PermissionDenied,
    #[error("no matching device found: {0}")]
    DeviceNotFound(String),
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("provisioning service not found")]
    ServiceNotFound,
    #[error("{0} characteristic not found")]
    CharacteristicNotFound(&'static str),
    #[error("invalid credentials: {0}")]
    InvalidCredentials(&'static str),
    #[error("write failed: {0}")]
    WriteFailed(String),
    #[error("device did not confirm in time")]
    Timeout,
    #[error("device could not store the credentials")]
    StorageFailed,
    #[error("device rejected the credential payload")]
    InvalidPayload,
    #[error("unexpected status from device: {0}")]
    UnknownStatus(String),
    #[error("cannot {action} while {phase}")]
    InvalidState {
        action: &'static str,
        phase: &'static str,
    },
    #[error("{0}")]
    UnknownError(String),
}

impl ProvisionError {
    pub fn code(&self) -> &'static str {
        match self {
            ProvisionError::RadioUnavailable => "radio_unavailable",
            ProvisionError::PermissionDenied => "permission_denied",
            ProvisionError::DeviceNotFound(_) => "device_not_found",
            ProvisionError::ConnectionFailed(_) => "connection_failed",
            ProvisionError::ServiceNotFound => "service_not_found",
            ProvisionError::CharacteristicNotFound(_) => "characteristic_not_found",
            ProvisionError::InvalidCredentials(_) => "invalid_credentials",
            ProvisionError::WriteFailed(_) => "write_failed",
            ProvisionError::Timeout => "timeout",
            ProvisionError::StorageFailed => "storage_failed",
            ProvisionError::InvalidPayload => "invalid_payload",
            ProvisionError::UnknownStatus(_) => "unknown_status",
            ProvisionError::InvalidState { .. } => "invalid_state",
            ProvisionError::UnknownError(_) => "unknown_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_status_mentions_token() {
        let err = ProvisionError::UnknownStatus("FOO".to_string());
        assert!(err.to_string().contains("FOO"));
        assert_eq!(err.code(), "unknown_status");
    }

    #[test]
    fn invalid_state_message() {
        let err = ProvisionError::InvalidState {
            action: "send credentials",
            phase: "idle",
        };
        assert_eq!(err.to_string(), "cannot send credentials while idle");
    }
}
