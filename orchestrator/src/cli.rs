//! Command line arguments

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::lifecycle::{AddModuleOptions, InstallOptions, RemoveModuleOptions, RotateOptions, UpgradeOptions};
use crate::storage::layout::DEFAULT_ROOT;
use crate::storage::state::InfraMode;

/// suitectl - install, extend and upgrade a Suite deployment
#[derive(Parser, Debug)]
#[command(name = "suitectl")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Install root
    #[arg(long, env = "SUITECTL_ROOT", default_value = DEFAULT_ROOT, global = true)]
    pub root: PathBuf,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Answer yes to every confirmation
    #[arg(short, long, env = "SUITECTL_YES", global = true)]
    pub yes: bool,

    /// Never prompt; confirmations default to no
    #[arg(long, global = true)]
    pub non_interactive: bool,

    /// Log to stderr as JSON
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Install infrastructure, the base service and modules
    Install(InstallArgs),

    /// Add a module to the installation
    AddModule(AddModuleArgs),

    /// Remove a module from the installation
    RemoveModule(RemoveModuleArgs),

    /// Upgrade installed modules, or roll back the last upgrade
    Upgrade(UpgradeArgs),

    /// Rotate database and broker passwords
    RotateCredentials(RotateArgs),

    /// Show installed modules and their health
    Status(StatusArgs),

    /// Backup management
    #[command(subcommand)]
    Backup(BackupCommands),

    /// Show version information
    Version,
}

#[derive(Args, Debug)]
pub struct InstallArgs {
    /// Release version; defaults to the latest published release
    #[arg(long)]
    pub version: Option<String>,

    /// Run database, cache and broker as local containers (default)
    #[arg(long, conflicts_with = "external_infra")]
    pub full_infra: bool,

    /// Use infrastructure provided off-host
    #[arg(long)]
    pub external_infra: bool,

    /// Module to install; repeat or separate with commas
    #[arg(short, long = "module", value_delimiter = ',')]
    pub modules: Vec<String>,

    /// Reinstall over an existing installation
    #[arg(short, long)]
    pub force: bool,
}

impl From<&InstallArgs> for InstallOptions {
    fn from(args: &InstallArgs) -> Self {
        InstallOptions {
            version: args.version.clone(),
            infra_mode: if args.external_infra { InfraMode::External } else { InfraMode::Full },
            modules: args.modules.clone(),
            force: args.force,
        }
    }
}

#[derive(Args, Debug)]
pub struct AddModuleArgs {
    /// Module name
    pub name: String,

    /// Use this API key instead of provisioning one
    #[arg(long)]
    pub api_key: Option<String>,

    #[arg(long)]
    pub version: Option<String>,

    /// Recreate the module container at its current version
    #[arg(long)]
    pub restart: bool,

    /// Reinstall even when the module is healthy
    #[arg(short, long)]
    pub force: bool,

    /// Register a customer module from this manifest first
    #[arg(long)]
    pub manifest: Option<PathBuf>,
}

impl From<&AddModuleArgs> for AddModuleOptions {
    fn from(args: &AddModuleArgs) -> Self {
        AddModuleOptions {
            name: args.name.clone(),
            api_key: args.api_key.clone(),
            version: args.version.clone(),
            restart: args.restart,
            force: args.force,
            manifest: args.manifest.clone(),
        }
    }
}

#[derive(Args, Debug)]
pub struct RemoveModuleArgs {
    /// Module name
    pub name: String,

    /// Remove even when installed modules depend on it
    #[arg(short, long)]
    pub force: bool,

    /// Also delete the stored API key
    #[arg(long)]
    pub remove_key: bool,
}

impl From<&RemoveModuleArgs> for RemoveModuleOptions {
    fn from(args: &RemoveModuleArgs) -> Self {
        RemoveModuleOptions {
            name: args.name.clone(),
            force: args.force,
            remove_key: args.remove_key,
        }
    }
}

#[derive(Args, Debug)]
pub struct UpgradeArgs {
    /// Target version; defaults to the latest published release
    #[arg(long)]
    pub version: Option<String>,

    /// Upgrade only these modules; repeat or separate with commas
    #[arg(short, long = "module", value_delimiter = ',')]
    pub modules: Vec<String>,

    /// Roll back to the backup taken before the last upgrade
    #[arg(long, conflicts_with_all = ["version", "modules", "skip_backup"])]
    pub rollback: bool,

    /// Do not take a backup first
    #[arg(long)]
    pub skip_backup: bool,

    /// Recreate even when versions already match
    #[arg(short, long)]
    pub force: bool,
}

impl From<&UpgradeArgs> for UpgradeOptions {
    fn from(args: &UpgradeArgs) -> Self {
        UpgradeOptions {
            version: args.version.clone(),
            modules: args.modules.clone(),
            rollback: args.rollback,
            skip_backup: args.skip_backup,
            force: args.force,
        }
    }
}

#[derive(Args, Debug)]
pub struct RotateArgs {
    /// Only rotate the database password
    #[arg(long, conflicts_with = "rmq_only")]
    pub db_only: bool,

    /// Only rotate the broker password
    #[arg(long)]
    pub rmq_only: bool,

    /// Show what would change without changing it
    #[arg(long)]
    pub dry_run: bool,
}

impl From<&RotateArgs> for RotateOptions {
    fn from(args: &RotateArgs) -> Self {
        RotateOptions {
            db_only: args.db_only,
            rmq_only: args.rmq_only,
            dry_run: args.dry_run,
        }
    }
}

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Subcommand, Debug)]
pub enum BackupCommands {
    /// Take a backup now
    Create {
        #[arg(long, default_value = "manual")]
        reason: String,
    },

    /// List backups, newest first
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Restore a backup by id or path
    Restore { backup: String },

    /// Delete old backups
    Cleanup {
        /// Backups to keep; defaults to BACKUP_RETENTION
        #[arg(long)]
        keep: Option<usize>,
    },
}
