//! Durable storage: install layout, configuration file, deployment state

pub mod env_file;
pub mod layout;
pub mod state;
