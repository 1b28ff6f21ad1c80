//! Collaborator ports driven by the control loop.
//!
//! Any HTTP/RPC client can be plugged in by implementing these traits.
//! Futures are boxed so the ports stay object-safe and can be shared as
//! `Arc<dyn ProvisioningPort>` between the loop and the executor.

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

use crate::types::{Sample, Unit, UnitId};

/// Boxed future returned by port methods.
pub type PortFuture<'a, T> = Pin<Box<dyn Future<Output = ProvisionResult<T>> + Send + 'a>>;

/// Result type alias for port operations.
pub type ProvisionResult<T> = Result<T, ProvisionError>;

/// Failures reported by a provisioning or sampling adapter.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("provisioner unreachable: {0}")]
    Unreachable(String),

    /// The adapter's credential must be refreshed before retrying.
    #[error("credential expired")]
    CredentialExpired,

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("transport error: {0}")]
    Transport(String),
}

/// Requests pool size changes from the external provisioning system.
pub trait ProvisioningPort: Send + Sync {
    /// Lightweight liveness check, issued before any mutating request.
    fn probe(&self) -> PortFuture<'_, ()>;

    /// Ask for one more unit. `Ok(false)` means the request was refused.
    fn add_unit(&self) -> PortFuture<'_, bool>;

    /// Ask for `unit_id` to be removed. `Ok(false)` means the request was refused.
    fn remove_unit<'a>(&'a self, unit_id: &'a str) -> PortFuture<'a, bool>;

    /// Ids of the units currently in the pool, as the provisioner sees them.
    ///
    /// A unit still being provisioned may be reported with an empty id.
    fn list_unit_ids(&self) -> PortFuture<'_, Vec<UnitId>>;
}

/// Reports the current utilization of the pool.
pub trait UtilizationSampler: Send + Sync {
    fn list_units(&self) -> PortFuture<'_, Vec<Unit>>;

    /// Take a full sample. Samplers that also know about unplaced
    /// workloads override this.
    fn sample(&self) -> PortFuture<'_, Sample> {
        Box::pin(async move { Ok(Sample::from_units(self.list_units().await?)) })
    }
}
