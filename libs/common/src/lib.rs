//! Shared plumbing for nibesrv services
//!
//! - logging bootstrap (console + rolling files)
//! - shutdown signal handling
//! - startup banner and service metadata
//! - shared command-line arguments

pub mod bootstrap_args;
pub mod logging;
pub mod service_bootstrap;
pub mod shutdown;

// Re-export common dependencies
pub use anyhow;
pub use tokio_util::sync::CancellationToken;
