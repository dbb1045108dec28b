//! Wisp BLE provisioning engine
//!
//! Finds Wisp peripherals, connects to one, negotiates the provisioning
//! service and hands it Wi-Fi credentials, then reports what the device
//! says about them.
//!
//! # Example
//!
//! ```ignore
//! use futures::StreamExt;
//! use wisp_ble::{BtleRadio, DiscoveryManager, EngineConfig, ProvisioningSession};
//!
//! let config = EngineConfig::default();
//! let manager = DiscoveryManager::new(BtleRadio::new(0).await?, config.scan.clone());
//! let device = manager.find("WISP", |_| true).await?;
//! manager.connect(&device.id).await?;
//!
//! let mut session = ProvisioningSession::new(config.session);
//! session.initialize(&manager, &device.id).await?;
//! session.subscribe_to_status().await?;
//! let mut statuses = session.send_credentials(&credentials).await?;
//! while let Some(status) = statuses.next().await {
//!     println!("{}", status.message());
//! }
//! session.cleanup().await;
//! manager.disconnect().await;
//! ```

#[cfg(feature = "btleplug")]
pub mod btle;
pub mod config;
pub mod credentials;
pub mod discovery;
pub mod error;
pub mod link;
pub mod machine;
pub mod negotiate;
pub mod session;
pub mod status;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

#[cfg(feature = "btleplug")]
pub use btle::{BtleLink, BtleRadio};
pub use config::{ConfigError, EngineConfig, ScanConfig, SessionConfig, wisp_home};
pub use credentials::ProvisioningCredentials;
pub use discovery::{ActiveLink, DiscoveryManager, Sightings};
pub use error::{ProvisionError, TransportError};
pub use link::{Link, PeripheralHandle, Radio, RadioEvent, RadioState};
pub use machine::Phase;
pub use negotiate::{Negotiated, ServiceTier};
pub use session::{CleanupReport, ProvisioningSession, StatusStream};
pub use status::ProvisioningStatus;
