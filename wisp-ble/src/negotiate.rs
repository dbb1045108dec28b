//! Service and characteristic negotiation
//!
//! Peripheral firmware differs across hardware revisions, so nothing is
//! assumed about the GATT table. Each selection walks an ordered list of
//! tiers and keeps the first hit.

use std::future::{Future, ready};

use tracing::debug;
use uuid::Uuid;
use wisp_proto::ble::{FALLBACK_PROFILES, PRIMARY_PROFILE, ServiceProfile, is_standard, profile_for};

use crate::ProvisionError;
use crate::link::{CharacteristicDescriptor, ServiceDescriptor};

/// Run `attempt` on each candidate in order and return the first success.
/// When every candidate fails, all errors are returned in attempt order.
pub async fn try_in_order<C, T, E, F, Fut>(
    candidates: impl IntoIterator<Item = C>,
    mut attempt: F,
) -> Result<T, Vec<E>>
where
    F: FnMut(C) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut errors = Vec::new();
    for candidate in candidates {
        match attempt(candidate).await {
            Ok(value) => return Ok(value),
            Err(e) => errors.push(e),
        }
    }
    Err(errors)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceTier {
    /// The current provisioning service UUID
    Exact,
    /// A known vendor fallback UUID
    VendorFallback,
    /// First service outside the `0000xxxx` SIG range
    NonStandard,
    /// Whatever the peripheral listed first
    FirstListed,
}

impl ServiceTier {
    pub const ORDER: [ServiceTier; 4] = [
        ServiceTier::Exact,
        ServiceTier::VendorFallback,
        ServiceTier::NonStandard,
        ServiceTier::FirstListed,
    ];

    fn select<'a>(
        self,
        services: &'a [ServiceDescriptor],
        fallbacks: &[Uuid],
    ) -> Option<&'a ServiceDescriptor> {
        match self {
            ServiceTier::Exact => services.iter().find(|s| s.uuid == PRIMARY_PROFILE.service),
            ServiceTier::VendorFallback => fallbacks
                .iter()
                .find_map(|uuid| services.iter().find(|s| &s.uuid == uuid)),
            ServiceTier::NonStandard => services.iter().find(|s| !is_standard(&s.uuid)),
            ServiceTier::FirstListed => services.first(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteTier {
    KnownUuid,
    WithResponse,
    WithoutResponse,
}

impl WriteTier {
    const ORDER: [WriteTier; 3] = [
        WriteTier::KnownUuid,
        WriteTier::WithResponse,
        WriteTier::WithoutResponse,
    ];

    fn select<'a>(
        self,
        service: &'a ServiceDescriptor,
        profile: Option<&ServiceProfile>,
    ) -> Option<&'a CharacteristicDescriptor> {
        let mut chars = service.characteristics.iter();
        match self {
            WriteTier::KnownUuid => {
                let profile = profile?;
                chars.find(|c| c.uuid == profile.credentials && c.props.writable())
            }
            WriteTier::WithResponse => chars.find(|c| c.props.write),
            WriteTier::WithoutResponse => chars.find(|c| c.props.write_without_response),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StatusTier {
    KnownUuid,
    Notifiable,
}

impl StatusTier {
    const ORDER: [StatusTier; 2] = [StatusTier::KnownUuid, StatusTier::Notifiable];

    fn select<'a>(
        self,
        service: &'a ServiceDescriptor,
        profile: Option<&ServiceProfile>,
    ) -> Option<&'a CharacteristicDescriptor> {
        let mut chars = service.characteristics.iter();
        match self {
            StatusTier::KnownUuid => {
                let profile = profile?;
                chars.find(|c| c.uuid == profile.status)
            }
            StatusTier::Notifiable => chars.find(|c| c.props.notifiable()),
        }
    }
}

/// Outcome of negotiation, fixed for the lifetime of the connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Negotiated {
    pub service: ServiceDescriptor,
    pub tier: ServiceTier,
    pub credentials: CharacteristicDescriptor,
    /// Absent when the service has nothing that looks like a status channel
    pub status: Option<CharacteristicDescriptor>,
}

/// Pick the provisioning service, its writable characteristic and, when
/// present, the status characteristic. `extra_fallbacks` extends the vendor tier.
pub async fn negotiate(
    services: &[ServiceDescriptor],
    extra_fallbacks: &[Uuid],
) -> Result<Negotiated, ProvisionError> {
    let fallbacks: Vec<Uuid> = FALLBACK_PROFILES
        .iter()
        .map(|p| p.service)
        .chain(extra_fallbacks.iter().copied())
        .collect();

    let (tier, service) = try_in_order(ServiceTier::ORDER, |tier| {
        ready(
            tier.select(services, &fallbacks)
                .map(|s| (tier, s))
                .ok_or(tier),
        )
    })
    .await
    .map_err(|missed| {
        debug!(?missed, count = services.len(), "no service matched");
        ProvisionError::ServiceNotFound
    })?;
    debug!(service = %service.uuid, ?tier, "service selected");

    let profile = profile_for(&service.uuid);

    let credentials = try_in_order(WriteTier::ORDER, |tier| {
        ready(tier.select(service, profile).map(|c| (tier, c)).ok_or(tier))
    })
    .await
    .map(|(tier, c)| {
        debug!(characteristic = %c.uuid, ?tier, mode = %c.write_mode(), "credentials characteristic selected");
        c.clone()
    })
    .map_err(|_| ProvisionError::CharacteristicNotFound("credentials"))?;

    let status = try_in_order(StatusTier::ORDER, |tier| {
        ready(tier.select(service, profile).ok_or(tier))
    })
    .await
    .ok()
    .cloned();
    match &status {
        Some(c) => debug!(characteristic = %c.uuid, "status characteristic selected"),
        None => debug!("no status characteristic"),
    }

    Ok(Negotiated {
        service: service.clone(),
        tier,
        credentials,
        status,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{NOTIFY, READ, WRITE, WRITE_NO_RSP, characteristic, service};
    use wisp_proto::ble::{CREDENTIALS_UUID, NUS_RX_UUID, NUS_SERVICE_UUID, NUS_TX_UUID, SERVICE_UUID, STATUS_UUID};

    const GAP: Uuid = Uuid::from_u128(0x00001800_0000_1000_8000_00805f9b34fb);
    const DEVICE_NAME: Uuid = Uuid::from_u128(0x00002a00_0000_1000_8000_00805f9b34fb);
    const CUSTOM: Uuid = Uuid::from_u128(0x12345678_0000_4000_8000_00000000abcd);
    const CUSTOM_A: Uuid = Uuid::from_u128(0x12345678_0001_4000_8000_00000000abcd);
    const CUSTOM_B: Uuid = Uuid::from_u128(0x12345678_0002_4000_8000_00000000abcd);

    fn gap() -> ServiceDescriptor {
        service(GAP, vec![characteristic(GAP, DEVICE_NAME, READ)])
    }

    #[tokio::test]
    async fn try_in_order_stops_at_first_success() {
        let mut tried = Vec::new();
        let result: Result<u32, Vec<u32>> = try_in_order([1, 2, 3, 4], |n| {
            tried.push(n);
            ready(if n == 3 { Ok(n * 10) } else { Err(n) })
        })
        .await;
        assert_eq!(result, Ok(30));
        assert_eq!(tried, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn try_in_order_collects_every_error() {
        let result: Result<(), Vec<&str>> =
            try_in_order(["a", "b"], |c| ready(Err(c))).await;
        assert_eq!(result, Err(vec!["a", "b"]));
    }

    #[tokio::test]
    async fn exact_service_wins() {
        let services = vec![
            gap(),
            service(NUS_SERVICE_UUID, vec![characteristic(NUS_SERVICE_UUID, NUS_RX_UUID, WRITE)]),
            service(
                SERVICE_UUID,
                vec![
                    characteristic(SERVICE_UUID, STATUS_UUID, NOTIFY),
                    characteristic(SERVICE_UUID, CREDENTIALS_UUID, WRITE),
                ],
            ),
        ];
        let n = negotiate(&services, &[]).await.unwrap();
        assert_eq!(n.tier, ServiceTier::Exact);
        assert_eq!(n.credentials.uuid, CREDENTIALS_UUID);
        assert_eq!(n.status.map(|c| c.uuid), Some(STATUS_UUID));
    }

    #[tokio::test]
    async fn vendor_fallback_is_used_without_exact_match() {
        let services = vec![
            gap(),
            service(
                NUS_SERVICE_UUID,
                vec![
                    characteristic(NUS_SERVICE_UUID, NUS_TX_UUID, NOTIFY),
                    characteristic(NUS_SERVICE_UUID, NUS_RX_UUID, WRITE_NO_RSP),
                ],
            ),
        ];
        let n = negotiate(&services, &[]).await.unwrap();
        assert_eq!(n.tier, ServiceTier::VendorFallback);
        assert_eq!(n.credentials.uuid, NUS_RX_UUID);
        assert_eq!(n.status.map(|c| c.uuid), Some(NUS_TX_UUID));
    }

    #[tokio::test]
    async fn configured_fallback_outranks_heuristic() {
        let services = vec![
            service(CUSTOM_A, vec![characteristic(CUSTOM_A, CUSTOM_A, WRITE)]),
            service(CUSTOM_B, vec![characteristic(CUSTOM_B, CUSTOM_B, WRITE)]),
        ];
        let n = negotiate(&services, &[CUSTOM_B]).await.unwrap();
        assert_eq!(n.tier, ServiceTier::VendorFallback);
        assert_eq!(n.service.uuid, CUSTOM_B);
    }

    #[tokio::test]
    async fn non_standard_heuristic_skips_sig_services() {
        let services = vec![
            gap(),
            service(CUSTOM, vec![characteristic(CUSTOM, CUSTOM_A, WRITE)]),
        ];
        let n = negotiate(&services, &[]).await.unwrap();
        assert_eq!(n.tier, ServiceTier::NonStandard);
        assert_eq!(n.service.uuid, CUSTOM);
        assert!(n.status.is_none());
    }

    #[tokio::test]
    async fn first_listed_is_last_resort() {
        let services = vec![service(GAP, vec![characteristic(GAP, DEVICE_NAME, WRITE)])];
        let n = negotiate(&services, &[]).await.unwrap();
        assert_eq!(n.tier, ServiceTier::FirstListed);
    }

    #[tokio::test]
    async fn no_services_is_service_not_found() {
        assert_eq!(negotiate(&[], &[]).await, Err(ProvisionError::ServiceNotFound));
    }

    #[tokio::test]
    async fn write_with_response_preferred() {
        let services = vec![service(
            CUSTOM,
            vec![
                characteristic(CUSTOM, CUSTOM_A, WRITE_NO_RSP),
                characteristic(CUSTOM, CUSTOM_B, WRITE),
            ],
        )];
        let n = negotiate(&services, &[]).await.unwrap();
        assert_eq!(n.credentials.uuid, CUSTOM_B);
    }

    #[tokio::test]
    async fn no_writable_characteristic() {
        let services = vec![service(CUSTOM, vec![characteristic(CUSTOM, CUSTOM_A, NOTIFY)])];
        assert_eq!(
            negotiate(&services, &[]).await,
            Err(ProvisionError::CharacteristicNotFound("credentials"))
        );
    }
}
