//! Module API keys and infrastructure passwords

pub mod passwords;
pub mod provisioner;

pub use passwords::InfraSecrets;
pub use provisioner::{CredentialProvisioner, IssuedKey, KeyIssuer, ProvisionOutcome};
