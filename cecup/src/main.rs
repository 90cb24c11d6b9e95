#[cfg(target_os = "linux")]
mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use cecup_common::config::{DEFAULT_I2C_ADDR, DEFAULT_I2C_BUS};
use cecup_common::protocol::ATTESTATION_PAYLOAD_SIZE;

/// CEC secure update command-line interface
#[derive(Parser)]
#[command(name = "cecup")]
#[command(about = "CEC secure update command-line interface", long_about = None)]
#[command(version)]
struct Cli {
    /// I2C bus number
    #[arg(long, default_value_t = DEFAULT_I2C_BUS)]
    bus: u8,

    /// I2C device address
    #[arg(long, default_value_t = DEFAULT_I2C_ADDR)]
    addr: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Announce to the CEC that the BMC has booted
    BootComplete,
    /// Stream a firmware image to the CEC
    CopyImage {
        /// Filename of the firmware image
        #[arg(short = 'f', long = "file")]
        file: PathBuf,
        /// Actual size of the firmware image in bytes
        #[arg(short = 's', long = "size")]
        size: u32,
    },
    /// Run the challenge-response attestation flow
    Attest {
        /// Attestation data size in bytes
        #[arg(short = 'd', long, default_value_t = ATTESTATION_PAYLOAD_SIZE)]
        data_size: u16,
        /// Block size at which data is read (32, 48, 64 or 128)
        #[arg(short = 'b', long, default_value_t = 128)]
        block_size: u16,
        /// Public key file used for signature validation
        #[arg(short = 'f', long)]
        public_key: Option<PathBuf>,
        /// 32 byte challenge nonce in hex
        #[arg(short = 'n', long)]
        nonce: Option<String>,
        /// Attestation scratch directory
        #[arg(long, default_value = cecup_common::config::DEFAULT_ATTEST_DIR)]
        dir: PathBuf,
    },
    /// Display the CEC controller state
    State,
    /// Display the CEC firmware version
    Version,
    /// Request a BMC reset from the CEC
    Reset,
}

#[cfg(target_os = "linux")]
fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cecup=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Some(Commands::BootComplete) => commands::boot_complete::run(cli.bus, cli.addr),
        Some(Commands::CopyImage { file, size }) => {
            commands::copy_image::run(cli.bus, cli.addr, &file, size)
        }
        Some(Commands::Attest {
            data_size,
            block_size,
            public_key,
            nonce,
            dir,
        }) => commands::attest::run(
            cli.bus,
            cli.addr,
            commands::attest::AttestArgs {
                data_size,
                block_size,
                public_key,
                nonce,
                dir,
            },
        ),
        Some(Commands::State) => commands::state::run(cli.bus, cli.addr),
        Some(Commands::Reset) => commands::reset::run(cli.bus, cli.addr),
        Some(Commands::Version) => commands::version::run(cli.bus, cli.addr),
        None => {
            println!("cecup version {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

#[cfg(not(target_os = "linux"))]
fn main() {
    eprintln!("cecup requires Linux for I2C device access");
    std::process::exit(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_verify() {
        // Verify CLI structure is valid
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cli_copy_image_args() {
        let cli =
            Cli::try_parse_from(["cecup", "copy-image", "-f", "/tmp/img.bin", "-s", "4096"])
                .unwrap();
        match cli.command {
            Some(Commands::CopyImage { file, size }) => {
                assert_eq!(file, PathBuf::from("/tmp/img.bin"));
                assert_eq!(size, 4096);
            }
            _ => panic!("expected copy-image"),
        }
    }

    #[test]
    fn test_cli_attest_defaults() {
        let cli = Cli::try_parse_from(["cecup", "attest"]).unwrap();
        match cli.command {
            Some(Commands::Attest {
                data_size,
                block_size,
                public_key,
                nonce,
                ..
            }) => {
                assert_eq!(data_size, ATTESTATION_PAYLOAD_SIZE);
                assert_eq!(block_size, 128);
                assert!(public_key.is_none());
                assert!(nonce.is_none());
            }
            _ => panic!("expected attest"),
        }
    }

    #[test]
    fn test_cli_bus_defaults() {
        let cli = Cli::try_parse_from(["cecup", "state"]).unwrap();
        assert_eq!(cli.bus, DEFAULT_I2C_BUS);
        assert_eq!(cli.addr, DEFAULT_I2C_ADDR);
    }

    #[test]
    fn test_cli_copy_image_requires_size() {
        assert!(Cli::try_parse_from(["cecup", "copy-image", "-f", "/tmp/img.bin"]).is_err());
    }
}
