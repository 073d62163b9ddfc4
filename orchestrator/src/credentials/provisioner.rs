//! Per-module API key provisioning

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::errors::OrchestratorError;
use crate::prompt::Confirm;
use crate::registry::module::Module;
use crate::storage::state::DeploymentState;

/// Response of the base service's key provisioning endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuedKey {
    pub api_key: String,
    /// False when the base service already held a key for the module
    pub created: bool,
}

/// Something that can mint module API keys
#[async_trait]
pub trait KeyIssuer: Send + Sync {
    async fn issue_key(
        &self,
        module: &str,
        deployment_secret: &str,
    ) -> Result<IssuedKey, OrchestratorError>;
}

/// How a module's API key was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionOutcome {
    /// The module does not use an API key
    NotRequired,
    /// Operator-supplied key
    Explicit,
    /// Key already stored in the configuration
    Existing,
    /// Freshly minted by the base service
    Minted,
    /// Base service returned a key it had already issued
    Fetched,
    /// No key; operator accepted running without one
    Degraded,
}

impl ProvisionOutcome {
    pub fn has_key(&self) -> bool {
        !matches!(self, ProvisionOutcome::Degraded)
    }
}

impl fmt::Display for ProvisionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProvisionOutcome::NotRequired => "not required",
            ProvisionOutcome::Explicit => "provided",
            ProvisionOutcome::Existing => "existing",
            ProvisionOutcome::Minted => "minted",
            ProvisionOutcome::Fetched => "already issued",
            ProvisionOutcome::Degraded => "missing",
        };
        write!(f, "{}", s)
    }
}

/// Resolves module API keys in priority order: explicit, stored, minted, degraded
#[derive(Clone)]
pub struct CredentialProvisioner {
    issuer: Arc<dyn KeyIssuer>,
    confirm: Arc<dyn Confirm>,
}

impl CredentialProvisioner {
    pub fn new(issuer: Arc<dyn KeyIssuer>, confirm: Arc<dyn Confirm>) -> Self {
        Self { issuer, confirm }
    }

    /// Make sure `module` has an API key in `state`.
    ///
    /// The key is written into `state` only; the caller persists it.
    pub async fn get_or_provision(
        &self,
        state: &mut DeploymentState,
        module: &Module,
        explicit_key: Option<&str>,
    ) -> Result<ProvisionOutcome, OrchestratorError> {
        let Some(env_var) = module.api_key_env.as_deref() else {
            return Ok(ProvisionOutcome::NotRequired);
        };

        if let Some(key) = explicit_key.map(str::trim).filter(|k| !k.is_empty()) {
            state.set(env_var, key);
            info!("Using provided API key for {}", module.name);
            return Ok(ProvisionOutcome::Explicit);
        }

        if state.api_key(env_var).is_some() {
            return Ok(ProvisionOutcome::Existing);
        }

        let issued = match state.deployment_secret() {
            Some(secret) => match self.issuer.issue_key(&module.name, secret).await {
                Ok(issued) => Some(issued),
                Err(e) => {
                    warn!("Could not provision API key for {}: {}", module.name, e);
                    None
                }
            },
            None => {
                warn!("No deployment secret configured; cannot provision API key for {}", module.name);
                None
            }
        };

        if let Some(issued) = issued {
            if issued.api_key.trim().is_empty() {
                warn!("Key endpoint returned an empty key for {}", module.name);
            } else {
                state.set(env_var, issued.api_key);
                let outcome = if issued.created {
                    ProvisionOutcome::Minted
                } else {
                    ProvisionOutcome::Fetched
                };
                info!("API key for {}: {}", module.name, outcome);
                return Ok(outcome);
            }
        }

        warn!(
            "Module {} will start without {}; calls to the base service will be rejected until a key is set",
            module.name, env_var
        );
        let accepted = self.confirm.confirm(
            &format!("Continue installing {} without an API key?", module.name),
            false,
        )?;
        if accepted {
            Ok(ProvisionOutcome::Degraded)
        } else {
            Err(OrchestratorError::Credential(format!(
                "no API key for {} (pass --api-key or set {})",
                module.name, env_var
            )))
        }
    }
}
