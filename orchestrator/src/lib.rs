//! suitectl library
//!
//! Lifecycle orchestration for a containerized Suite deployment: module
//! registry, dependency resolution, compose planning, backups, credentials
//! and health-gated rollback.

pub mod backup;
pub mod cli;
pub mod credentials;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod http;
pub mod lifecycle;
pub mod logs;
pub mod prompt;
pub mod registry;
pub mod storage;
pub mod utils;
