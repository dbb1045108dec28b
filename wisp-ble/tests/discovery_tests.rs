//! Scan and connection lifecycle against the scripted radio

use std::time::Duration;

use futures::StreamExt;
use wisp_ble::testing::{MockPeripheral, MockRadio};
use wisp_ble::{DiscoveryManager, Link, ProvisionError, RadioState, ScanConfig};

fn manager(radio: &MockRadio) -> DiscoveryManager<MockRadio> {
    DiscoveryManager::new(radio.clone(), ScanConfig::default())
}

#[tokio::test(start_paused = true)]
async fn scan_reports_each_matching_peripheral_once() {
    let radio = MockRadio::new();
    let manager = manager(&radio);

    let sightings = manager.scan("WISP").await.unwrap();
    assert!(radio.is_scanning());

    radio.advertise("AA", Some("WISP-0001"), -60);
    radio.advertise("AA", Some("WISP-0001"), -48);
    radio.advertise("BB", Some("Headphones"), -40);
    radio.advertise("CC", None, -40);
    radio.advertise("DD", Some("WISP-0002"), -75);

    let start = tokio::time::Instant::now();
    let ids: Vec<String> = sightings.map(|s| s.unwrap().id).collect().await;

    assert_eq!(ids, vec!["AA", "DD"]);
    assert!(start.elapsed() >= Duration::from_secs(12));
    assert!(!radio.is_scanning());
}

#[tokio::test(start_paused = true)]
async fn empty_filter_matches_unnamed_peripherals() {
    let radio = MockRadio::new();
    let manager = manager(&radio);

    let mut sightings = manager.scan("").await.unwrap();
    radio.advertise("CC", None, -40);

    let first = sightings.next().await.unwrap().unwrap();
    assert_eq!(first.id, "CC");
    assert_eq!(first.name, None);
}

#[tokio::test(start_paused = true)]
async fn scan_needs_a_powered_radio() {
    let radio = MockRadio::new();
    radio.set_state(RadioState::PoweredOff);
    let manager = manager(&radio);

    assert!(matches!(
        manager.scan("WISP").await,
        Err(ProvisionError::RadioUnavailable)
    ));
    assert_eq!(radio.scan_starts(), 0);
}

#[tokio::test(start_paused = true)]
async fn scan_permission_is_reported() {
    let radio = MockRadio::new();
    radio.deny_scan_permission();
    let manager = manager(&radio);

    assert!(matches!(
        manager.scan("WISP").await,
        Err(ProvisionError::PermissionDenied)
    ));
}

#[tokio::test(start_paused = true)]
async fn radio_powering_off_ends_the_scan_with_an_error() {
    let radio = MockRadio::new();
    let manager = manager(&radio);

    let sightings = manager.scan("WISP").await.unwrap();
    radio.advertise("AA", Some("WISP-0001"), -60);
    radio.set_state(RadioState::PoweredOff);

    let items: Vec<_> = sightings.collect().await;
    assert_eq!(items.len(), 2);
    assert!(items[0].is_ok());
    assert!(matches!(items[1], Err(ProvisionError::RadioUnavailable)));
    assert!(!radio.is_scanning());
}

#[tokio::test(start_paused = true)]
async fn stop_scan_is_idempotent() {
    let radio = MockRadio::new();
    let manager = manager(&radio);

    manager.stop_scan().await;

    let sightings = manager.scan("WISP").await.unwrap();
    manager.stop_scan().await;
    manager.stop_scan().await;

    assert_eq!(radio.scan_stops(), 1);
    assert!(!radio.is_scanning());
    assert_eq!(sightings.count().await, 0);
}

#[tokio::test(start_paused = true)]
async fn new_scan_replaces_running_scan() {
    let radio = MockRadio::new();
    let manager = manager(&radio);

    let first = manager.scan("WISP").await.unwrap();
    let mut second = manager.scan("WISP").await.unwrap();
    assert_eq!(radio.scan_starts(), 2);

    radio.advertise("AA", Some("WISP-0001"), -60);
    assert_eq!(first.count().await, 0);
    assert_eq!(second.next().await.unwrap().unwrap().id, "AA");
}

#[tokio::test(start_paused = true)]
async fn find_picks_the_accepted_sighting() {
    let radio = MockRadio::new();
    let manager = manager(&radio);

    let finder = {
        let radio = radio.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            radio.advertise("AA", Some("WISP-0001"), -60);
            radio.advertise("BB", Some("WISP-0002"), -50);
        })
    };

    let found = manager.find("WISP", |p| p.name.as_deref() == Some("WISP-0002")).await.unwrap();
    finder.await.unwrap();

    assert_eq!(found.id, "BB");
    assert!(!radio.is_scanning());
}

#[tokio::test(start_paused = true)]
async fn find_without_match_is_device_not_found() {
    let radio = MockRadio::new();
    let manager = manager(&radio);

    assert_eq!(
        manager.find("WISP", |_| true).await,
        Err(ProvisionError::DeviceNotFound("WISP".to_string()))
    );
}

#[tokio::test(start_paused = true)]
async fn connect_exposes_the_active_link() {
    let radio = MockRadio::new();
    radio.add_peripheral("AA", MockPeripheral::provisioning());
    let manager = manager(&radio);

    let state = manager.connect("AA").await.unwrap();
    assert!(*state.borrow());
    assert_eq!(manager.active_id().as_deref(), Some("AA"));

    let active = manager.get_active_connection("AA").unwrap();
    assert_eq!(active.id(), "AA");
    assert!(active.is_connected());
    assert!(!active.link.discover_services().await.unwrap().is_empty());

    assert!(matches!(
        manager.get_active_connection("BB"),
        Err(ProvisionError::ConnectionFailed(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn connect_failure_leaves_nothing_active() {
    let radio = MockRadio::new();
    radio.add_peripheral("AA", MockPeripheral::provisioning());
    radio.make_unreachable("AA");
    let manager = manager(&radio);

    assert!(matches!(
        manager.connect("AA").await,
        Err(ProvisionError::ConnectionFailed(_))
    ));
    assert!(matches!(
        manager.connect("ZZ").await,
        Err(ProvisionError::ConnectionFailed(_))
    ));
    assert_eq!(manager.active_id(), None);
}

#[tokio::test(start_paused = true)]
async fn second_connect_drops_the_first() {
    let radio = MockRadio::new();
    radio.add_peripheral("AA", MockPeripheral::provisioning());
    radio.add_peripheral("BB", MockPeripheral::provisioning());
    let manager = manager(&radio);

    let first = manager.connect("AA").await.unwrap();
    let second = manager.connect("BB").await.unwrap();

    assert!(!*first.borrow());
    assert!(*second.borrow());
    assert!(!radio.link("AA").unwrap().is_connected());
    assert_eq!(manager.active_id().as_deref(), Some("BB"));
    assert!(manager.get_active_connection("AA").is_err());
}

#[tokio::test(start_paused = true)]
async fn peripheral_disconnect_clears_the_active_connection() {
    let radio = MockRadio::new();
    radio.add_peripheral("AA", MockPeripheral::provisioning());
    let manager = manager(&radio);

    let mut state = manager.connect("AA").await.unwrap();
    radio.drop_connection("AA");

    state.changed().await.unwrap();
    assert!(!*state.borrow());
    assert_eq!(manager.active_id(), None);
}

#[tokio::test(start_paused = true)]
async fn disconnect_is_idempotent() {
    let radio = MockRadio::new();
    radio.add_peripheral("AA", MockPeripheral::provisioning());
    let manager = manager(&radio);

    let state = manager.connect("AA").await.unwrap();
    manager.disconnect().await;
    manager.disconnect().await;

    assert!(!*state.borrow());
    assert_eq!(manager.active_id(), None);
}
