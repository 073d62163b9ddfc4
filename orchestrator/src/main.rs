//! suitectl - Entry Point
//!
//! Installs, extends, upgrades and rolls back a Suite deployment on a single
//! host. Every mutating command backs up first and restores on failure.

use std::io::IsTerminal;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use colored::Colorize;
use tracing::{debug, error};

use suitectl::cli::{BackupCommands, Cli, Commands};
use suitectl::deploy::docker::DockerComposeExecutor;
use suitectl::errors::OrchestratorError;
use suitectl::http::{CoreApiClient, ReleaseClient};
use suitectl::lifecycle::{
    AddModuleOptions, InstallOptions, OperationReport, Orchestrator, OrchestratorOptions, RemoveModuleOptions,
    RotateOptions, StatusReport, UpgradeOptions,
};
use suitectl::logs::{init_logging, LogLevel, LogOptions};
use suitectl::prompt::DialoguerConfirm;
use suitectl::registry::ModuleRegistry;
use suitectl::storage::layout::InstallLayout;
use suitectl::storage::state::DeploymentState;
use suitectl::utils::version_info;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Commands::Version = cli.command {
        println!("{}", version_info());
        return ExitCode::SUCCESS;
    }

    let layout = InstallLayout::new(&cli.root);
    let log_dir = layout.logs_dir();
    let log_options = LogOptions {
        log_level: LogLevel::from_verbosity(cli.verbose, cli.quiet),
        stderr: true,
        log_dir: log_dir.exists().await.then(|| log_dir.path().to_path_buf()),
        json_format: cli.json_logs,
    };
    // Keep the guard alive so the file writer flushes on exit
    let _guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            None
        }
    };

    match run(&cli, layout).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            eprintln!("{} {}", "[ERROR]".red().bold(), e);
            if let Some(backup) = e.recovery_backup() {
                eprintln!("Backup for manual recovery: {}", backup.display());
            }
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run(cli: &Cli, layout: InstallLayout) -> Result<(), OrchestratorError> {
    let mut orchestrator = build_orchestrator(cli, layout).await?;

    match &cli.command {
        Commands::Install(args) => {
            let report = orchestrator.install(&InstallOptions::from(args)).await?;
            print_report(&report);
        }
        Commands::AddModule(args) => {
            let report = orchestrator.add_module(&AddModuleOptions::from(args)).await?;
            print_report(&report);
        }
        Commands::RemoveModule(args) => {
            let report = orchestrator.remove_module(&RemoveModuleOptions::from(args)).await?;
            print_report(&report);
        }
        Commands::Upgrade(args) => {
            let report = orchestrator.upgrade(&UpgradeOptions::from(args)).await?;
            print_report(&report);
        }
        Commands::RotateCredentials(args) => {
            let report = orchestrator.rotate_credentials(&RotateOptions::from(args)).await?;
            print_report(&report);
        }
        Commands::Status(args) => {
            let status = orchestrator.status().await?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                print_status(&status);
            }
        }
        Commands::Backup(BackupCommands::Create { reason }) => {
            let entry = orchestrator.create_backup(reason).await?;
            let partial = entry
                .metadata
                .as_ref()
                .map(|m| m.status != suitectl::backup::BackupStatus::Complete)
                .unwrap_or(true);
            if partial {
                println!("{} Backup {} is incomplete", "[WARN]".yellow().bold(), entry.path.display());
            }
            println!("{} Backup created: {}", "[SUCCESS]".green().bold(), entry.path.display());
        }
        Commands::Backup(BackupCommands::List { json }) => {
            let entries = orchestrator.list_backups().await?;
            if *json {
                let metadata: Vec<_> = entries.iter().map(|e| (&e.id, &e.metadata)).collect();
                println!("{}", serde_json::to_string_pretty(&metadata)?);
            } else if entries.is_empty() {
                println!("No backups");
            } else {
                for entry in &entries {
                    match &entry.metadata {
                        Some(m) => println!(
                            "{:<20} {:<12} {:<24} {}",
                            entry.id,
                            format!("{:?}", m.status),
                            m.reason,
                            m.installed.join(",")
                        ),
                        None => println!("{:<20} {}", entry.id, "unreadable metadata".yellow()),
                    }
                }
            }
        }
        Commands::Backup(BackupCommands::Restore { backup }) => {
            let report = orchestrator.restore(backup).await?;
            print_report(&report);
        }
        Commands::Backup(BackupCommands::Cleanup { keep }) => {
            let removed = orchestrator.cleanup_backups(*keep).await?;
            for path in &removed {
                println!("Removed {}", path.display());
            }
            println!("{} Removed {} backup(s)", "[SUCCESS]".green().bold(), removed.len());
        }
        Commands::Version => println!("{}", version_info()),
    }

    Ok(())
}

async fn build_orchestrator(cli: &Cli, layout: InstallLayout) -> Result<Orchestrator, OrchestratorError> {
    let config = layout.config_file();
    let options = if config.exists().await {
        OrchestratorOptions::from_state(&DeploymentState::load(&config).await?)
    } else {
        OrchestratorOptions::default()
    };
    debug!("Orchestrator options: {:?}", options);

    let registry = ModuleRegistry::load(&layout).await?;
    let executor = Arc::new(DockerComposeExecutor::new(
        layout.compose_dir().path(),
        vec![
            layout.config_file().path().to_path_buf(),
            layout.secrets_file().path().to_path_buf(),
        ],
    ));
    let issuer = Arc::new(CoreApiClient::new(&options.core_url)?);
    let interactive = !cli.non_interactive && std::io::stdin().is_terminal();
    let confirm = Arc::new(DialoguerConfirm::new(cli.yes, interactive));

    let mut orchestrator = Orchestrator::new(layout, registry, executor, issuer, confirm);
    if let Some(release_url) = &options.release_url {
        orchestrator = orchestrator.with_release_source(Arc::new(ReleaseClient::new(release_url)?));
    }
    Ok(orchestrator)
}

fn print_report(report: &OperationReport) {
    for note in &report.notes {
        println!("  {}", note);
    }
    println!("{} {}", "[SUCCESS]".green().bold(), report.summary());
}

fn print_status(status: &StatusReport) {
    println!("Install root: {}", status.root);
    println!("Infrastructure: {}", status.infra_mode);
    if status.performance_mode {
        println!("Performance mode: on");
    }

    println!("\nServices:");
    for service in status.modules.iter().chain(status.infrastructure.iter()) {
        let health = if service.health.is_success() {
            service.health.to_string().green()
        } else {
            service.health.to_string().red()
        };
        let version = match (&service.version, &service.frontend_version) {
            (Some(backend), Some(frontend)) if backend != frontend => format!("{} / {}", backend, frontend),
            (Some(backend), _) => backend.clone(),
            (None, _) => "-".to_string(),
        };
        println!("  {:<16} {:<20} {}", service.name, version, health);
    }

    match &status.latest_backup {
        Some(id) => println!("\nLatest backup: {}", id),
        None => println!("\nNo backups"),
    }
}
