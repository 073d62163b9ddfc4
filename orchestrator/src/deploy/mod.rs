//! Deployment module

pub mod compose;
pub mod docker;
pub mod executor;
pub mod fsm;
pub mod health;
pub mod resolver;
