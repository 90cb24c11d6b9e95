pub mod daemon;
pub mod events;
#[cfg(target_os = "linux")]
pub mod gpio;
pub mod inventory;
pub mod supervisor;
pub mod systemd;
pub mod update;
pub mod watcher;

use clap::Parser;
use std::path::PathBuf;
#[cfg(target_os = "linux")]
use std::sync::Arc;
#[cfg(target_os = "linux")]
use std::time::Duration;
#[cfg(target_os = "linux")]
use tokio::sync::{mpsc, Mutex};
#[cfg(target_os = "linux")]
use tracing::{error, info, warn};
#[cfg(target_os = "linux")]
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[cfg(target_os = "linux")]
use cecup_common::config::{Config, DEFAULT_CONFIG_FILE};
#[cfg(target_os = "linux")]
use cecup_common::i2c::{CecBus, CecLink};
#[cfg(target_os = "linux")]
use cecup_common::types::ActivationState;

#[cfg(target_os = "linux")]
use inventory::{InventoryStore, SoftwareObject, CEC_FIRMWARE_ID, RUNNING_BMC_ID};
#[cfg(target_os = "linux")]
use supervisor::Supervisor;
#[cfg(target_os = "linux")]
use systemd::{RebootGuard, SystemdUnits, UnitRunner};
#[cfg(target_os = "linux")]
use update::UpdateManager;

/// CEC secure firmware update daemon
#[derive(Parser)]
#[command(name = "cecupd")]
#[command(about = "CEC secure firmware update daemon", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    conf: Option<PathBuf>,

    /// I2C bus number
    #[arg(long)]
    i2c_bus: Option<u8>,

    /// I2C device address (hex)
    #[arg(long, value_parser = clap::value_parser!(u8))]
    i2c_addr: Option<u8>,

    /// Directory watched for incoming firmware images
    #[arg(long)]
    image_dir: Option<PathBuf>,

    /// BCM pin number of the CEC interrupt line
    #[arg(long)]
    gpio_pin: Option<u8>,
}

#[cfg(target_os = "linux")]
#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cecupd=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("cecupd - CEC secure firmware update daemon");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let cli = Cli::parse();

    // Load configuration
    let mut config = match &cli.conf {
        Some(conf_path) => match Config::from_file(conf_path) {
            Ok(c) => {
                info!("Loaded configuration from {}", conf_path.display());
                c
            }
            Err(e) => {
                error!("Failed to load configuration: {}", e);
                std::process::exit(1);
            }
        },
        None => match Config::from_file_or_default(DEFAULT_CONFIG_FILE) {
            Ok(c) => c,
            Err(e) => {
                error!("Failed to load configuration: {}", e);
                std::process::exit(1);
            }
        },
    };

    // Apply CLI overrides
    if let Some(i2c_bus) = cli.i2c_bus {
        config.i2c_bus = i2c_bus;
    }
    if let Some(i2c_addr) = cli.i2c_addr {
        config.i2c_addr = i2c_addr;
    }
    if let Some(image_dir) = cli.image_dir {
        config.image_dir = image_dir;
    }
    if let Some(gpio_pin) = cli.gpio_pin {
        config.gpio_pin = gpio_pin;
    }

    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        std::process::exit(1);
    }

    info!(
        "Configuration: I2C bus {}, address 0x{:02X}, image dir {}",
        config.i2c_bus,
        config.i2c_addr,
        config.image_dir.display()
    );

    // Open the CEC link
    let bus = match CecBus::open(config.i2c_bus, config.i2c_addr) {
        Ok(bus) => {
            info!("Opened CEC I2C link");
            bus
        }
        Err(e) => {
            error!("Failed to open CEC I2C link: {}", e);
            std::process::exit(1);
        }
    };
    let device: Arc<Mutex<Box<dyn CecLink>>> = Arc::new(Mutex::new(Box::new(bus)));

    // Publish the inventory entries the supervisor sweeps over
    let inventory = Arc::new(InventoryStore::default());
    {
        let mut dev = device.lock().await;
        match dev.version() {
            Ok(version) => {
                info!("CEC firmware version {}", version);
                inventory.upsert(SoftwareObject {
                    id: CEC_FIRMWARE_ID.to_string(),
                    version: version.to_string(),
                    activation: ActivationState::Ready,
                    path: PathBuf::new(),
                });
            }
            Err(e) => warn!("Failed to read CEC firmware version: {}", e),
        }
    }
    match supervisor::bmc_version_id(&config.os_release) {
        Ok(version) => {
            inventory.upsert(SoftwareObject {
                id: RUNNING_BMC_ID.to_string(),
                version,
                activation: ActivationState::Active,
                path: config.os_release.clone(),
            });
        }
        Err(e) => warn!("Failed to read the running BMC version: {}", e),
    }

    let runner: Arc<dyn UnitRunner> = Arc::new(SystemdUnits);
    let guard = Arc::new(Mutex::new(RebootGuard::new(runner.clone())));

    let (manager_tx, manager_rx) = mpsc::unbounded_channel();
    let (supervisor_tx, supervisor_rx) = mpsc::unbounded_channel();

    // Inbound image channel
    let _watcher = match watcher::spawn_image_watch(&config.image_dir, manager_tx.clone()) {
        Ok(watcher) => watcher,
        Err(e) => {
            error!("Failed to watch image directory: {}", e);
            std::process::exit(1);
        }
    };

    // CEC interrupt line; the daemon stays useful without it
    let _interrupt_pin = match gpio::spawn_interrupt_listener(
        config.gpio_pin,
        vec![manager_tx.clone(), supervisor_tx.clone()],
    ) {
        Ok(pin) => Some(pin),
        Err(e) => {
            warn!("Continuing without the CEC interrupt line: {}", e);
            None
        }
    };

    // Spawn concurrent tasks
    let manager_handle = {
        let manager = UpdateManager::new(
            device.clone(),
            inventory.clone(),
            guard.clone(),
            runner.clone(),
            config.progress_file(),
            manager_tx.clone(),
            supervisor_tx.clone(),
        );
        tokio::spawn(async move {
            manager.run(manager_rx).await;
        })
    };

    let supervisor_handle = {
        let supervisor = Supervisor::new(
            device.clone(),
            inventory.clone(),
            guard.clone(),
            runner.clone(),
            config.os_release.clone(),
            Duration::from_secs(config.check_interval_secs),
        );
        tokio::spawn(async move {
            supervisor.run(supervisor_rx).await;
        })
    };

    let signal_handle = tokio::spawn(async move {
        daemon::wait_for_signal().await;
    });

    // Wait for any task to complete (signal will finish first on shutdown)
    tokio::select! {
        _ = manager_handle => {
            info!("Update manager task completed");
        }
        _ = supervisor_handle => {
            info!("Supervisor task completed");
        }
        _ = signal_handle => {
            info!("Signal received, initiating shutdown");
        }
    }

    info!("Daemon shutdown complete");
}

#[cfg(not(target_os = "linux"))]
fn main() {
    eprintln!("cecupd requires Linux for I2C and GPIO device access");
    std::process::exit(1);
}
