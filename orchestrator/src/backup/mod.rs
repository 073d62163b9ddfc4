//! Backups taken ahead of mutations, and their restore

pub mod manager;
pub mod metadata;

pub use manager::{BackupEntry, BackupManager, BackupRequest, RestoreReport};
pub use metadata::{BackupMetadata, BackupStatus, PieceStatus, RollbackRecord};
