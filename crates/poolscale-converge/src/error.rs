//! Executor error types.

use poolscale_core::ProvisionError;
use thiserror::Error;

/// Reasons a scale action was not issued.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("provisioner unreachable: {0}")]
    Unreachable(ProvisionError),

    #[error("pool is empty, refusing to scale relative to it")]
    PoolEmpty,

    #[error("provisioner refused to {0}")]
    Rejected(String),

    #[error("provisioning error: {0}")]
    Provision(#[from] ProvisionError),
}

pub type ExecutorResult<T> = Result<T, ExecutorError>;
