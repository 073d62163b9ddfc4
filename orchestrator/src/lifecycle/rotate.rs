//! Infrastructure password rotation

use secrecy::{ExposeSecret, SecretString};
use tracing::{error, info, warn};

use crate::backup::manager::{psql_stdin_command, DATABASE_SERVICE};
use crate::backup::BackupRequest;
use crate::credentials::passwords::generate_password;
use crate::credentials::InfraSecrets;
use crate::deploy::compose::{ComposePlan, TargetScope};
use crate::deploy::fsm::{OperationEvent, OperationFsm};
use crate::errors::OrchestratorError;
use crate::lifecycle::options::OrchestratorOptions;
use crate::lifecycle::orchestrator::{advance, Orchestrator};
use crate::lifecycle::report::OperationReport;
use crate::storage::state::InfraMode;

const BROKER_SERVICE: &str = "rabbitmq";

#[derive(Debug, Clone, Copy, Default)]
pub struct RotateOptions {
    pub db_only: bool,
    pub rmq_only: bool,
    pub dry_run: bool,
}

impl RotateOptions {
    fn database(&self) -> bool {
        !self.rmq_only
    }

    fn broker(&self) -> bool {
        !self.db_only
    }
}

/// `ALTER USER` statement with identifier and literal quoting
pub fn alter_user_sql(user: &str, password: &SecretString) -> String {
    format!(
        "ALTER USER \"{}\" WITH PASSWORD '{}';\n",
        user.replace('"', "\"\""),
        password.expose_secret().replace('\'', "''")
    )
}

/// Change a broker password, reading the new one from stdin
pub fn rabbitmq_change_password_command(user: &str) -> Vec<String> {
    vec![
        "rabbitmqctl".to_string(),
        "change_password".to_string(),
        user.to_string(),
    ]
}

impl Orchestrator {
    /// Generate new infrastructure passwords, apply them and recreate the app tier.
    ///
    /// Backups never hold the secrets file, so a failure re-applies the old
    /// passwords instead of restoring a backup.
    pub async fn rotate_credentials(&self, opts: &RotateOptions) -> Result<OperationReport, OrchestratorError> {
        let mut fsm = OperationFsm::new();
        let mut notes = Vec::new();

        // Validating
        if opts.db_only && opts.rmq_only {
            return Err(OrchestratorError::ConfigError(
                "--db-only and --rmq-only cannot be combined".to_string(),
            ));
        }
        self.executor.check_available().await?;
        let state = self.load_installed_state().await?;
        if state.infra_mode != InfraMode::Full {
            return Err(OrchestratorError::Prerequisite(
                "Credential rotation needs full infra mode; external infrastructure credentials are managed off-host"
                    .to_string(),
            ));
        }

        let secrets_file = self.layout.secrets_file();
        let old = InfraSecrets::load(&secrets_file).await?;
        let mut new = old.clone();
        if opts.database() {
            new.postgres_password = generate_password();
        }
        if opts.broker() {
            new.rabbitmq_password = generate_password();
        }

        let available = self.available_fragments().await?;
        let running = self.executor.running_services().await?;
        let full = self.compose_plan(
            &state,
            &state.installed,
            &state.installed,
            TargetScope::Everything,
            &running,
            &available,
        )?;
        let mut plan = full.narrowed(full.app_services());
        plan.force_recreate = true;

        if opts.dry_run {
            if opts.database() {
                notes.push(format!("Would rotate the postgres password of {}", old.postgres_user));
            }
            if opts.broker() {
                notes.push(format!("Would rotate the rabbitmq password of {}", old.rabbitmq_user));
            }
            notes.push(format!("Would recreate {}", plan.services.join(", ")));
            advance(&mut fsm, OperationEvent::NoChange)?;
            return Ok(OperationReport::from_fsm("rotate-credentials (dry run)", &fsm, notes));
        }
        advance(&mut fsm, OperationEvent::Validated)?;

        // Backing up
        let request = BackupRequest::new("rotate-credentials").with_state(&state);
        self.take_backup(&mut fsm, request).await?;

        // Mutating and verifying
        let options = OrchestratorOptions::from_state(&state);
        let result = async {
            self.apply_secrets(&new, opts).await?;
            advance(&mut fsm, OperationEvent::Mutated)?;
            self.recreate(&plan, &options).await?;
            advance(&mut fsm, OperationEvent::Verified)
        }
        .await;

        if let Err(cause) = result {
            error!("{}", cause);
            warn!("Re-applying previous credentials");
            let restored = async {
                self.apply_secrets(&old, opts).await?;
                self.recreate(&plan, &options).await
            }
            .await;

            let event = if fsm.can_roll_back() {
                OperationEvent::RolledBack(cause.to_string())
            } else {
                OperationEvent::Abort(cause.to_string())
            };
            if let Err(e) = fsm.process(event) {
                warn!("{}", e);
            }

            let backup = fsm
                .backup()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| secrets_file.path().to_path_buf());
            return Err(match restored {
                Ok(()) if fsm.backup().is_some() => OrchestratorError::RolledBack {
                    cause: Box::new(cause),
                    backup,
                },
                Ok(()) => cause,
                Err(rollback) => OrchestratorError::RollbackFailed {
                    cause: Box::new(cause),
                    rollback: Box::new(rollback),
                    backup,
                },
            });
        }

        // Committed
        if opts.database() {
            notes.push(format!("Rotated the postgres password of {}", new.postgres_user));
        }
        if opts.broker() {
            notes.push(format!("Rotated the rabbitmq password of {}", new.rabbitmq_user));
        }
        Ok(OperationReport::from_fsm("rotate-credentials", &fsm, notes))
    }

    /// Set passwords inside the running services, then persist them
    async fn apply_secrets(&self, secrets: &InfraSecrets, opts: &RotateOptions) -> Result<(), OrchestratorError> {
        if opts.database() {
            info!("Changing postgres password of {}", secrets.postgres_user);
            let sql = alter_user_sql(&secrets.postgres_user, &secrets.postgres_password);
            self.executor
                .exec(DATABASE_SERVICE, &psql_stdin_command(), Some(sql.into_bytes()))
                .await
                .map_err(|e| OrchestratorError::Credential(format!("postgres password change failed: {}", e)))?;
        }
        if opts.broker() {
            info!("Changing rabbitmq password of {}", secrets.rabbitmq_user);
            let input = format!("{}\n", secrets.rabbitmq_password.expose_secret());
            self.executor
                .exec(
                    BROKER_SERVICE,
                    &rabbitmq_change_password_command(&secrets.rabbitmq_user),
                    Some(input.into_bytes()),
                )
                .await
                .map_err(|e| OrchestratorError::Credential(format!("rabbitmq password change failed: {}", e)))?;
        }
        secrets.save(&self.layout.secrets_file()).await
    }

    /// Recreate the app tier so it picks up the secrets file, then verify it
    async fn recreate(&self, plan: &ComposePlan, options: &OrchestratorOptions) -> Result<(), OrchestratorError> {
        self.apply(plan, false).await?;
        self.verify(&plan.services, options).await
    }
}
