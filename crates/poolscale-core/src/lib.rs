//! poolscale-core — shared types for the pool autoscaler.
//!
//! Holds the data model (units, workloads, utilization snapshots, pool
//! bounds), the two collaborator ports the control loop drives
//! ([`ProvisioningPort`], [`UtilizationSampler`]), and the TOML
//! configuration consumed by the daemon.
//!
//! Nothing in this crate performs I/O on its own except
//! [`Config::from_file`]; provisioning and sampling are supplied by
//! adapters implementing the ports.

pub mod config;
pub mod ports;
pub mod types;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::{Config, ConfigError, ConfigResult, PolicyConfig};
pub use ports::{PortFuture, ProvisionError, ProvisionResult, ProvisioningPort, UtilizationSampler};
pub use types::*;
