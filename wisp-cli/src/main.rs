//! Provisioning tool for Wisp devices
//!
//! Scans for Wisp peripherals and hands them Wi-Fi credentials over BLE.

mod logging;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use futures::StreamExt;
use tracing::{info, warn};
use wisp_ble::{
    BtleRadio, DiscoveryManager, EngineConfig, PeripheralHandle, ProvisioningCredentials,
    ProvisioningSession, ProvisioningStatus, wisp_home,
};

#[derive(Parser)]
#[command(name = "wisp")]
#[command(about = "Provision Wisp devices with Wi-Fi credentials over BLE")]
struct Cli {
    /// Emit logs as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List nearby Wisp devices
    Scan {
        /// Advertised-name substring, defaults to the configured filter
        #[arg(short, long)]
        filter: Option<String>,
        /// Scan duration in seconds, defaults to the configured timeout
        #[arg(short, long)]
        duration: Option<u64>,
    },
    /// Send Wi-Fi credentials to a device
    Provision {
        /// Exact advertised name or address of the device
        #[arg(short, long)]
        device: Option<String>,
        /// Network name; overrides the credentials file
        #[arg(long, requires = "password")]
        ssid: Option<String>,
        #[arg(long, requires = "ssid")]
        password: Option<String>,
        /// Wi-Fi credentials file (SSID on line 1, password on line 2)
        #[arg(short, long, default_value = "wifi_credentials.txt")]
        file: PathBuf,
        /// Account token the device uses to register itself
        #[arg(long, env = "WISP_AUTH_TOKEN", hide_env_values = true)]
        token: String,
        /// Friendly name stored on the device
        #[arg(long, default_value = "")]
        label: String,
        #[arg(long, default_value = "UTC")]
        timezone: String,
    },
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    logging::init(cli.json);

    let home = wisp_home()?;
    let mut config = EngineConfig::load_or_init(&home)?;

    match cli.command {
        Commands::Scan { filter, duration } => {
            if let Some(duration) = duration {
                config.scan.timeout_secs = duration;
            }
            let filter = filter.unwrap_or_else(|| config.scan.name_filter.clone());
            scan_devices(config, &filter).await?;
        }
        Commands::Provision {
            device,
            ssid,
            password,
            file,
            token,
            label,
            timezone,
        } => {
            let (ssid, password) = match (ssid, password) {
                (Some(ssid), Some(password)) => (ssid, password),
                _ => read_wifi_credentials(&file)?,
            };
            let credentials = ProvisioningCredentials {
                ssid,
                password,
                auth_token: token,
                device_label: label,
                timezone,
            };
            provision_device(config, device, &credentials).await?;
        }
        Commands::Config => {
            println!("# {}", home.join("config.json").display());
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

fn read_wifi_credentials(file: &Path) -> Result<(String, String), Box<dyn std::error::Error>> {
    let content = std::fs::read_to_string(file)
        .map_err(|e| format!("cannot read {}: {e}", file.display()))?;
    let mut lines = content.lines();
    let ssid = lines.next().ok_or("Missing SSID in credentials file")?.trim().to_string();
    let password = lines.next().unwrap_or_default().trim().to_string();
    Ok((ssid, password))
}

async fn manager(config: &EngineConfig) -> Result<DiscoveryManager<BtleRadio>, Box<dyn std::error::Error>> {
    let radio = BtleRadio::new(config.scan.adapter).await?;
    Ok(DiscoveryManager::new(radio, config.scan.clone()))
}

fn describe(p: &PeripheralHandle) -> String {
    let name = p.name.as_deref().unwrap_or("Unknown");
    let rssi = p.rssi.map(|r| format!("{r} dBm")).unwrap_or_else(|| "N/A".to_string());
    format!("{name} ({}) RSSI: {rssi}", p.id)
}

async fn scan_devices(config: EngineConfig, filter: &str) -> Result<(), Box<dyn std::error::Error>> {
    println!("Scanning for Wisp devices ({} seconds)...", config.scan.timeout_secs);
    let manager = manager(&config).await?;

    let mut sightings = manager.scan(filter).await?;
    let mut found = 0;
    while let Some(sighting) = sightings.next().await {
        println!("  {}", describe(&sighting?));
        found += 1;
    }
    println!("\nFound {found} devices");
    Ok(())
}

async fn provision_device(
    config: EngineConfig,
    target: Option<String>,
    credentials: &ProvisioningCredentials,
) -> Result<(), Box<dyn std::error::Error>> {
    // fail on bad input before touching the radio
    credentials.validate()?;
    let manager = manager(&config).await?;

    println!("Scanning for Wisp devices...");
    // a named device is matched exactly, never by substring
    let device = match &target {
        Some(t) => {
            manager
                .find("", |p| p.name.as_deref() == Some(t.as_str()) || p.id == *t)
                .await?
        }
        None => manager.find(&config.scan.name_filter, |_| true).await?,
    };
    println!("Found device: {}", describe(&device));

    println!("Connecting...");
    manager.connect(&device.id).await?;
    println!("Connected!");
    info!(id = %device.id, name = ?device.name, "connected");

    let mut session = ProvisioningSession::new(config.session.clone());
    let outcome = run_session(&mut session, &manager, &device.id, credentials).await;
    if let Err(e) = &outcome {
        warn!(id = %device.id, error = %e, "provisioning failed");
    }

    let report = session.cleanup().await;
    info!(?report, "session released");
    manager.disconnect().await;
    outcome
}

async fn run_session(
    session: &mut ProvisioningSession<wisp_ble::BtleLink>,
    manager: &DiscoveryManager<BtleRadio>,
    id: &str,
    credentials: &ProvisioningCredentials,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("Discovering services...");
    session.initialize(manager, id).await?;
    if !session.subscribe_to_status().await? {
        println!("Device does not report status; waiting for the deadline instead");
    }

    println!("Sending Wi-Fi credentials...");
    println!("  SSID: {}", credentials.ssid);
    let mut statuses = session.send_credentials(credentials).await?;

    while let Some(status) = statuses.next().await {
        match status {
            ProvisioningStatus::Processing { progress, message } => {
                println!("[{progress:>3}%] {message}");
            }
            ProvisioningStatus::Complete { message, warning } => {
                println!("[100%] {message}");
                if let Some(warning) = warning {
                    println!("Warning: {warning}");
                }
            }
            ProvisioningStatus::Error { message, cause } => {
                println!("Failed: {message}");
                return Err(cause.into());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(["wisp"].iter().chain(args))
    }

    #[test]
    fn network_flags_come_as_a_pair() {
        assert!(parse(&["provision", "--token", "t", "--password", "secret"]).is_err());
        assert!(parse(&["provision", "--token", "t", "--ssid", "HomeNet"]).is_err());

        let cli = parse(&["provision", "--token", "t", "--ssid", "HomeNet", "--password", ""]).unwrap();
        match cli.command {
            Commands::Provision { ssid, password, .. } => {
                assert_eq!(ssid.as_deref(), Some("HomeNet"));
                assert_eq!(password.as_deref(), Some(""));
            }
            _ => panic!("expected provision"),
        }
    }

    #[test]
    fn credentials_file_allows_open_networks() {
        let path = std::env::temp_dir().join(format!("wisp-creds-{}", std::process::id()));
        std::fs::write(&path, "HomeNet\n").unwrap();
        let (ssid, password) = read_wifi_credentials(&path).unwrap();
        assert_eq!(ssid, "HomeNet");
        assert_eq!(password, "");
        let _ = std::fs::remove_file(&path);
    }
}
