//! HTTP clients for the base service and the release host

pub mod client;

pub use client::{CoreApiClient, HttpClient, ReleaseClient, ReleaseSource};
