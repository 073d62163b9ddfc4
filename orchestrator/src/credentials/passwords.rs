//! Generated secrets and the infrastructure secrets file

use base64::engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE};
use base64::Engine;
use rand::distributions::Alphanumeric;
use rand::{Rng, RngCore};
use secrecy::{ExposeSecret, SecretString};
use tracing::info;

use crate::errors::OrchestratorError;
use crate::filesys::file::File;
use crate::storage::env_file::EnvFile;

pub const KEY_POSTGRES_USER: &str = "POSTGRES_USER";
pub const KEY_POSTGRES_PASSWORD: &str = "POSTGRES_PASSWORD";
pub const KEY_POSTGRES_DB: &str = "POSTGRES_DB";
pub const KEY_RABBITMQ_USER: &str = "RABBITMQ_USER";
pub const KEY_RABBITMQ_PASSWORD: &str = "RABBITMQ_PASSWORD";

const PASSWORD_LENGTH: usize = 32;

/// Random alphanumeric password, safe to embed in SQL literals and env files
pub fn generate_password() -> SecretString {
    let password: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(PASSWORD_LENGTH)
        .map(char::from)
        .collect();
    SecretString::from(password)
}

/// Shared secret authenticating the orchestrator against the base service
pub fn generate_deployment_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    STANDARD_NO_PAD
        .encode(bytes)
        .replace(['+', '/'], "x")
}

/// 32 random bytes, URL-safe base64 (the format the application expects)
pub fn generate_encryption_key() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE.encode(bytes)
}

/// Credentials of the co-located database and message broker
#[derive(Debug, Clone)]
pub struct InfraSecrets {
    pub postgres_user: String,
    pub postgres_password: SecretString,
    pub postgres_db: String,
    pub rabbitmq_user: String,
    pub rabbitmq_password: SecretString,
}

impl InfraSecrets {
    /// Fresh secrets with generated passwords
    pub fn generate() -> Self {
        Self {
            postgres_user: "suite".to_string(),
            postgres_password: generate_password(),
            postgres_db: "suite".to_string(),
            rabbitmq_user: "suite".to_string(),
            rabbitmq_password: generate_password(),
        }
    }

    pub fn from_env(env: &EnvFile) -> Result<Self, OrchestratorError> {
        let require = |key: &str| {
            env.get_non_empty(key)
                .map(|v| v.to_string())
                .ok_or_else(|| OrchestratorError::Credential(format!("{} missing from secrets file", key)))
        };
        Ok(Self {
            postgres_user: require(KEY_POSTGRES_USER)?,
            postgres_password: SecretString::from(require(KEY_POSTGRES_PASSWORD)?),
            postgres_db: require(KEY_POSTGRES_DB)?,
            rabbitmq_user: require(KEY_RABBITMQ_USER)?,
            rabbitmq_password: SecretString::from(require(KEY_RABBITMQ_PASSWORD)?),
        })
    }

    /// Load the secrets file
    pub async fn load(file: &File) -> Result<Self, OrchestratorError> {
        if !file.exists().await {
            return Err(OrchestratorError::Credential(format!(
                "secrets file {} not found",
                file.path().display()
            )));
        }
        Self::from_env(&EnvFile::load(file).await?)
    }

    /// Load the secrets file, generating and saving it when absent
    pub async fn load_or_generate(file: &File) -> Result<Self, OrchestratorError> {
        if file.exists().await {
            return Self::load(file).await;
        }
        let secrets = Self::generate();
        secrets.save(file).await?;
        info!("Generated infrastructure credentials in {}", file.path().display());
        Ok(secrets)
    }

    pub fn to_env(&self) -> EnvFile {
        let mut env = EnvFile::new();
        env.set(KEY_POSTGRES_USER, self.postgres_user.clone());
        env.set(KEY_POSTGRES_PASSWORD, self.postgres_password.expose_secret());
        env.set(KEY_POSTGRES_DB, self.postgres_db.clone());
        env.set(KEY_RABBITMQ_USER, self.rabbitmq_user.clone());
        env.set(KEY_RABBITMQ_PASSWORD, self.rabbitmq_password.expose_secret());
        env
    }

    /// Write atomically, readable by the owner only
    pub async fn save(&self, file: &File) -> Result<(), OrchestratorError> {
        self.to_env().save(file).await?;
        file.set_permissions_600().await
    }
}
