//! Lifecycle operations
//!
//! Every operation runs the same pipeline (validate, back up, mutate,
//! verify, commit) through an [`OperationFsm`](crate::deploy::fsm::OperationFsm).
//! A failure after mutation rolls back when the operation took a backup.

pub mod add_module;
pub mod backups;
pub mod install;
pub mod options;
pub mod orchestrator;
pub mod remove_module;
pub mod report;
pub mod rollback;
pub mod rotate;
pub mod status;
pub mod upgrade;

pub use add_module::AddModuleOptions;
pub use install::InstallOptions;
pub use options::OrchestratorOptions;
pub use orchestrator::Orchestrator;
pub use remove_module::RemoveModuleOptions;
pub use report::OperationReport;
pub use rotate::RotateOptions;
pub use status::{ServiceStatus, StatusReport};
pub use upgrade::UpgradeOptions;
