//! cloud-prepare command line driver.
//!
//! Runs the gateway lifecycle against the cluster in the current kubeconfig
//! using the generic Kubernetes provider.

pub mod cli;

pub use cli::{execute, Cli, Commands};
