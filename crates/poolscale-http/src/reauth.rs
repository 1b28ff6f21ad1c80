//! Bounded credential refresh around any port adapter.
//!
//! When a call fails with `ProvisionError::CredentialExpired` the wrapper
//! asks the adapter to refresh its credential and repeats the call, up to
//! `max_attempts` calls in total. Any other outcome is returned as is.

use std::future::Future;

use tracing::warn;

use poolscale_core::{
    PortFuture, ProvisionError, ProvisionResult, ProvisioningPort, Sample, Unit, UnitId,
    UtilizationSampler,
};

/// An adapter whose credential can be renewed in place.
pub trait CredentialRefresh: Send + Sync {
    fn refresh(&self) -> PortFuture<'_, ()>;
}

/// Retries calls on the wrapped adapter after refreshing its credential.
pub struct Reauthenticating<P> {
    inner: P,
    max_attempts: u32,
}

impl<P: CredentialRefresh> Reauthenticating<P> {
    /// `max_attempts` counts the first call; zero is treated as one.
    pub fn new(inner: P, max_attempts: u32) -> Self {
        Self {
            inner,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }

    fn with_retry<'a, T, F, Fut>(
        &'a self,
        operation: &'static str,
        mut call: F,
    ) -> impl Future<Output = ProvisionResult<T>> + Send + 'a
    where
        T: Send + 'a,
        F: FnMut(&'a P) -> Fut + Send + 'a,
        Fut: Future<Output = ProvisionResult<T>> + Send + 'a,
    {
        async move {
            let mut attempt = 1;
            loop {
                match call(&self.inner).await {
                    Err(ProvisionError::CredentialExpired) if attempt < self.max_attempts => {
                        warn!(
                            operation,
                            attempt,
                            max_attempts = self.max_attempts,
                            "credential expired, refreshing"
                        );
                        self.inner.refresh().await?;
                        attempt += 1;
                    }
                    Err(ProvisionError::CredentialExpired) => {
                        warn!(
                            operation,
                            attempts = attempt,
                            "credential still expired, giving up"
                        );
                        return Err(ProvisionError::CredentialExpired);
                    }
                    other => return other,
                }
            }
        }
    }
}

impl<P: ProvisioningPort + CredentialRefresh> ProvisioningPort for Reauthenticating<P> {
    fn probe(&self) -> PortFuture<'_, ()> {
        Box::pin(self.with_retry("probe", |p| p.probe()))
    }

    fn add_unit(&self) -> PortFuture<'_, bool> {
        Box::pin(self.with_retry("add_unit", |p| p.add_unit()))
    }

    fn remove_unit<'a>(&'a self, unit_id: &'a str) -> PortFuture<'a, bool> {
        Box::pin(self.with_retry("remove_unit", move |p| p.remove_unit(unit_id)))
    }

    fn list_unit_ids(&self) -> PortFuture<'_, Vec<UnitId>> {
        Box::pin(self.with_retry("list_unit_ids", |p| p.list_unit_ids()))
    }
}

impl<P: UtilizationSampler + CredentialRefresh> UtilizationSampler for Reauthenticating<P> {
    fn list_units(&self) -> PortFuture<'_, Vec<Unit>> {
        Box::pin(self.with_retry("list_units", |p| p.list_units()))
    }

    fn sample(&self) -> PortFuture<'_, Sample> {
        Box::pin(self.with_retry("sample", |p| p.sample()))
    }
}
