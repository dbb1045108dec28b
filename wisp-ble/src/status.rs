//! Externally visible provisioning progress

use crate::ProvisionError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisioningStatus {
    Processing {
        progress: u8,
        message: String,
    },
    Complete {
        message: String,
        /// Set when completion was inferred rather than confirmed by the device
        warning: Option<String>,
    },
    Error {
        message: String,
        cause: ProvisionError,
    },
}

impl ProvisioningStatus {
    pub fn processing(progress: u8, message: impl Into<String>) -> Self {
        Self::Processing {
            progress,
            message: message.into(),
        }
    }

    pub fn confirmed(message: impl Into<String>) -> Self {
        Self::Complete {
            message: message.into(),
            warning: None,
        }
    }

    pub fn optimistic(message: impl Into<String>, warning: impl Into<String>) -> Self {
        Self::Complete {
            message: message.into(),
            warning: Some(warning.into()),
        }
    }

    pub fn error(cause: ProvisionError) -> Self {
        Self::Error {
            message: cause.to_string(),
            cause,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Processing { .. })
    }

    /// 0-100; `None` for errors
    pub fn progress(&self) -> Option<u8> {
        match self {
            Self::Processing { progress, .. } => Some(*progress),
            Self::Complete { .. } => Some(100),
            Self::Error { .. } => None,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Processing { message, .. }
            | Self::Complete { message, .. }
            | Self::Error { message, .. } => message,
        }
    }
}
