//! Network-join credentials handed to the peripheral

use std::fmt;

use wisp_proto::CredentialPayload;

use crate::ProvisionError;

/// 802.11 caps an SSID at 32 octets
const MAX_SSID_LEN: usize = 32;

#[derive(Clone, PartialEq, Eq)]
pub struct ProvisioningCredentials {
    pub ssid: String,
    pub password: String,
    pub auth_token: String,
    pub device_label: String,
    pub timezone: String,
}

impl ProvisioningCredentials {
    /// Checked before anything is written to the peripheral
    pub fn validate(&self) -> Result<(), ProvisionError> {
        if self.ssid.trim().is_empty() {
            return Err(ProvisionError::InvalidCredentials("network name is empty"));
        }
        if self.ssid.len() > MAX_SSID_LEN {
            return Err(ProvisionError::InvalidCredentials(
                "network name is longer than 32 bytes",
            ));
        }
        if self.auth_token.trim().is_empty() {
            return Err(ProvisionError::InvalidCredentials("auth token is empty"));
        }
        Ok(())
    }

    pub fn to_payload(&self) -> CredentialPayload {
        CredentialPayload {
            ssid: self.ssid.clone(),
            password: self.password.clone(),
            auth_token: self.auth_token.clone(),
            device_name: self.device_label.clone(),
            user_timezone: self.timezone.clone(),
        }
    }
}

// Never print the passphrase or token, only whether they are there.
impl fmt::Debug for ProvisioningCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProvisioningCredentials")
            .field("ssid_len", &self.ssid.len())
            .field("password_len", &self.password.len())
            .field("auth_token_present", &!self.auth_token.is_empty())
            .field("device_label", &self.device_label)
            .field("timezone", &self.timezone)
            .finish()
    }
}
