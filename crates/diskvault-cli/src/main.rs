//! diskvault command-line interface for keystore and member-disk operations.

use anyhow::{ensure, Context, Result};
use clap::{Parser, Subcommand};
use diskvault_core::{
    config::DEFAULT_CONFIG_PATH,
    keystore::{KeystoreManager, KeystoreMode},
    logging,
    provider::ProviderState,
    workflow::{self, DiskStatus, WorkflowLevel, WorkflowReport},
    Session, VaultConfig,
};
use diskvault_host::SystemHostProvider;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

fn load_cli_config(path: &Path) -> Result<VaultConfig> {
    VaultConfig::load_or_default(path)
        .with_context(|| format!("failed to load configuration from {}", path.display()))
}

/// Top-level command-line options shared by every subcommand.
#[derive(Parser, Debug)]
#[command(
    name = "diskvault",
    version,
    about = "One-passphrase unlock orchestration for encrypted member disks."
)]
struct Cli {
    /// Path to the diskvault configuration file.
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Subcommands covering the keystore and member-disk lifecycle.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the encrypted keystore container.
    Newks {
        /// KDF iteration count override for container creation.
        #[arg(long)]
        iterations: Option<u32>,
    },

    /// Unlock and mount the keystore read-write for manual inspection.
    Openks,

    /// Unmount and lock the keystore, including one left open by another run.
    Closeks,

    /// Enroll raw devices as member disks (keyfile, partitions, encryption).
    Init {
        /// Devices to enroll (path, short name, or serial).
        #[arg(required = true)]
        devices: Vec<String>,
    },

    /// Attach member disks; without arguments, every enrolled disk.
    Attach {
        /// Disks to attach (path, short name, or serial).
        devices: Vec<String>,
    },

    /// Detach member disks; without arguments, every enrolled disk.
    Detach {
        /// Disks to detach (path, short name, or serial).
        devices: Vec<String>,
    },

    /// Include disks in no-argument attach runs again.
    Enable {
        /// Disks to enable (path, short name, or serial).
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Exclude disks from no-argument attach runs.
    Disable {
        /// Disks to disable (path, short name, or serial).
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Overwrite a device with a keyed pseudorandom stream.
    Wipe {
        /// Device to wipe (path, short name, or serial).
        device: String,

        /// Only overwrite the first and last N MiB instead of the whole device.
        size_mib: Option<u64>,

        /// Skip the interactive confirmation.
        #[arg(long)]
        force: bool,
    },

    /// Show enrollment, attach state, and backup freshness for every disk.
    Status,
}

/// Entry point: parse arguments and surface errors with an exit code.
fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

/// Dispatch to the requested subcommand and map results into rich output.
fn run() -> Result<()> {
    logging::init("info");
    let cli = Cli::parse();
    let config_path = cli.config.clone();

    match cli.command {
        Commands::Newks { iterations } => {
            let mut config = load_cli_config(&config_path)?;
            if iterations.is_some() {
                config.keystore.kdf_iterations = iterations;
            }
            let host = SystemHostProvider::from_config(&config)?;
            let manager = KeystoreManager::new(&config);
            manager.create(&host)?;
            println!(
                "Keystore created at {} ({} MiB).",
                manager.container_path().display(),
                config.keystore.size_mib
            );
            Ok(())
        }
        Commands::Openks => {
            let config = load_cli_config(&config_path)?;
            let host = SystemHostProvider::from_config(&config)?;
            let manager = KeystoreManager::new(&config);
            // No signal guard here: the keystore must stay open after exit.
            let handle = manager.open(&host, KeystoreMode::ReadWrite, &Session::new())?;
            println!(
                "Keystore open at {}. Run `diskvault closeks` when finished.",
                handle.mountpoint.display()
            );
            Ok(())
        }
        Commands::Closeks => {
            let config = load_cli_config(&config_path)?;
            let host = SystemHostProvider::from_config(&config)?;
            let manager = KeystoreManager::new(&config);
            manager.close(&host, &Session::new())?;
            println!("Keystore closed.");
            Ok(())
        }
        Commands::Init { devices } => {
            let config = load_cli_config(&config_path)?;
            let host = SystemHostProvider::from_config(&config)?;
            let report = workflow::enroll(&config, &host, &Session::new(), &devices)?;
            print_report(report);
            Ok(())
        }
        Commands::Attach { devices } => {
            let config = load_cli_config(&config_path)?;
            let host = SystemHostProvider::from_config(&config)?;
            let report = workflow::attach(&config, &host, &Session::new(), &devices)?;
            print_report(report);
            Ok(())
        }
        Commands::Detach { devices } => {
            let config = load_cli_config(&config_path)?;
            let host = SystemHostProvider::from_config(&config)?;
            let report = workflow::detach(&config, &host, &Session::new(), &devices)?;
            print_report(report);
            Ok(())
        }
        Commands::Enable { ids } => {
            let config = load_cli_config(&config_path)?;
            let host = SystemHostProvider::from_config(&config)?;
            let report = workflow::set_auto_attach(&config, &host, &Session::new(), &ids, true)?;
            print_report(report);
            Ok(())
        }
        Commands::Disable { ids } => {
            let config = load_cli_config(&config_path)?;
            let host = SystemHostProvider::from_config(&config)?;
            let report = workflow::set_auto_attach(&config, &host, &Session::new(), &ids, false)?;
            print_report(report);
            Ok(())
        }
        Commands::Wipe {
            device,
            size_mib,
            force,
        } => {
            if let Some(bound) = size_mib {
                ensure!(bound > 0, "the wipe bound must be at least 1 MiB");
            }
            if !force {
                confirm_wipe(&device)?;
            }
            let config = load_cli_config(&config_path)?;
            let host = SystemHostProvider::from_config(&config)?;
            let report = workflow::wipe(&host, &device, size_mib)?;
            print_report(report);
            Ok(())
        }
        Commands::Status => {
            let config = load_cli_config(&config_path)?;
            let host = SystemHostProvider::from_config(&config)?;
            let statuses = workflow::status(&config, &host, &Session::new())?;
            print_statuses(&statuses);
            Ok(())
        }
    }
}

fn confirm_wipe(device: &str) -> Result<()> {
    print!("This will irreversibly overwrite {device}. Type `yes` to continue: ");
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().read_line(&mut answer)?;
    ensure!(answer.trim() == "yes", "wipe aborted");
    Ok(())
}

fn print_report(report: WorkflowReport) {
    println!("{}", report.title);
    for event in report.events {
        println!("  [{}] {}", level_tag(event.level), event.message);
    }
}

fn level_tag(level: WorkflowLevel) -> &'static str {
    match level {
        WorkflowLevel::Info => "info",
        WorkflowLevel::Success => "ok",
        WorkflowLevel::Warn => "warn",
        WorkflowLevel::Error => "fail",
    }
}

fn print_statuses(statuses: &[DiskStatus]) {
    if statuses.is_empty() {
        println!("No enrolled disks.");
        return;
    }
    println!("Enrolled disks");
    for status in statuses {
        let state = match &status.state {
            ProviderState::Attached => "attached".to_string(),
            ProviderState::Detached => "detached".to_string(),
            ProviderState::Unknown(reason) => format!("unknown ({reason})"),
        };
        let auto = if status.auto_attach { "auto" } else { "manual" };
        let backup = match status.backup_fresh {
            Some(true) => "backup fresh",
            Some(false) => "backup stale",
            None => "backup partition missing",
        };
        println!("  {} {state}, {auto}, {backup}", status.id);
    }
}
