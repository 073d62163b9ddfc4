//! Container executor boundary
//!
//! The orchestrator never builds runtime command lines itself. It hands a
//! typed [`ComposePlan`] to an [`Executor`], which renders it into whatever
//! invocation the real runtime needs.

use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::deploy::compose::ComposePlan;
use crate::deploy::health::HealthVerdict;
use crate::errors::OrchestratorError;

/// Container runtime operations used by the lifecycle
#[async_trait]
pub trait Executor: Send + Sync {
    /// Fail with a prerequisite error when the runtime is unusable
    async fn check_available(&self) -> Result<(), OrchestratorError>;

    /// Pull images for the plan's services only
    async fn pull(&self, plan: &ComposePlan) -> Result<(), OrchestratorError>;

    /// Create and start the plan's services
    async fn up(&self, plan: &ComposePlan) -> Result<(), OrchestratorError>;

    /// Stop the plan's services
    async fn stop(&self, plan: &ComposePlan) -> Result<(), OrchestratorError>;

    /// Stop and remove the plan's containers
    async fn remove(&self, plan: &ComposePlan) -> Result<(), OrchestratorError>;

    /// Names of services with a running container
    async fn running_services(&self) -> Result<BTreeSet<String>, OrchestratorError>;

    /// Current health verdict of a service's container
    async fn health(&self, service: &str) -> Result<HealthVerdict, OrchestratorError>;

    /// Run a command inside a running service container, returning stdout
    async fn exec(
        &self,
        service: &str,
        command: &[String],
        stdin: Option<Vec<u8>>,
    ) -> Result<Vec<u8>, OrchestratorError>;

    /// Recent log lines of all project containers
    async fn logs_tail(&self, lines: usize) -> Result<String, OrchestratorError>;

    /// Remove dangling images
    async fn prune_images(&self) -> Result<(), OrchestratorError>;
}
