//! GATT service layout for Wisp provisioning peripherals
//!
//! Firmware across hardware revisions does not expose a single service UUID.
//! Current firmware uses the primary profile below; older boards shipped with
//! one of the vendor fallback profiles.

use uuid::Uuid;

/// Provisioning service UUID: 4fafc201-1fb5-459e-8fcc-c5c9c331914b
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x4fafc201_1fb5_459e_8fcc_c5c9c331914b);

/// Credentials characteristic UUID (write)
pub const CREDENTIALS_UUID: Uuid = Uuid::from_u128(0xbeb5483e_36e1_4688_b7f5_ea07361b26a8);

/// Status characteristic UUID (read/notify)
pub const STATUS_UUID: Uuid = Uuid::from_u128(0x1c95d5e3_d8f7_413a_bf3d_7a2e5d7be87e);

/// Nordic UART service, used by the first hardware revision
pub const NUS_SERVICE_UUID: Uuid = Uuid::from_u128(0x6e400001_b5a3_f393_e0a9_e50e24dcca9e);

/// Nordic UART RX characteristic (central writes here)
pub const NUS_RX_UUID: Uuid = Uuid::from_u128(0x6e400002_b5a3_f393_e0a9_e50e24dcca9e);

/// Nordic UART TX characteristic (peripheral notifies here)
pub const NUS_TX_UUID: Uuid = Uuid::from_u128(0x6e400003_b5a3_f393_e0a9_e50e24dcca9e);

/// Serial bridge service found on boards with an external BLE module
pub const SERIAL_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000ffe0_0000_1000_8000_00805f9b34fb);

/// Serial bridge characteristic, both writable and notifiable
pub const SERIAL_CHAR_UUID: Uuid = Uuid::from_u128(0x0000ffe1_0000_1000_8000_00805f9b34fb);

/// Which characteristics to expect inside a known service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceProfile {
    pub service: Uuid,
    pub credentials: Uuid,
    pub status: Uuid,
}

pub const PRIMARY_PROFILE: ServiceProfile = ServiceProfile {
    service: SERVICE_UUID,
    credentials: CREDENTIALS_UUID,
    status: STATUS_UUID,
};

/// Vendor fallbacks, in the order they are tried
pub const FALLBACK_PROFILES: [ServiceProfile; 2] = [
    ServiceProfile {
        service: NUS_SERVICE_UUID,
        credentials: NUS_RX_UUID,
        status: NUS_TX_UUID,
    },
    ServiceProfile {
        service: SERIAL_SERVICE_UUID,
        credentials: SERIAL_CHAR_UUID,
        status: SERIAL_CHAR_UUID,
    },
];

/// Look up the known characteristic layout for a service UUID
pub fn profile_for(service: &Uuid) -> Option<&'static ServiceProfile> {
    std::iter::once(&PRIMARY_PROFILE)
        .chain(FALLBACK_PROFILES.iter())
        .find(|p| &p.service == service)
}

/// True for UUIDs in the `0000xxxx-...` range used by SIG-assigned services
/// (Generic Access, Device Information, Battery, ...)
pub fn is_standard(uuid: &Uuid) -> bool {
    uuid.as_u128() >> 112 == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_services_are_detected() {
        let generic_access = Uuid::from_u128(0x00001800_0000_1000_8000_00805f9b34fb);
        assert!(is_standard(&generic_access));
        assert!(is_standard(&SERIAL_SERVICE_UUID));
        assert!(!is_standard(&SERVICE_UUID));
        assert!(!is_standard(&NUS_SERVICE_UUID));
    }

    #[test]
    fn profiles_resolve_by_service() {
        assert_eq!(profile_for(&SERVICE_UUID), Some(&PRIMARY_PROFILE));
        assert_eq!(profile_for(&NUS_SERVICE_UUID).map(|p| p.credentials), Some(NUS_RX_UUID));
        assert!(profile_for(&Uuid::nil()).is_none());
    }
}
