//! Autoscaler — the per-pool control loop.
//!
//! Each tick is self-contained: the pool is observed fresh, at most one
//! unit is added or removed, and any failure is logged and contained in
//! the tick. The loop waits for a scale action to converge before the
//! next tick, so a pool never has more than one action in flight.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use rand::seq::IndexedRandom;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use poolscale_converge::{Convergence, ConvergenceExecutor, ExecutorError};
use poolscale_core::{
    Config, ConfigResult, PoolBounds, ProvisioningPort, Unit, UnitId, UtilizationSampler,
};
use poolscale_schedule::Calendar;

use crate::policy::{Decision, ScalingPolicy};

/// Static settings for one pool, fixed for the process lifetime.
#[derive(Debug, Clone)]
pub struct AutoscalerSettings {
    pub pool: String,
    pub bounds: PoolBounds,
    pub policy: ScalingPolicy,
    pub calendar: Calendar,
    pub timezone: Tz,
    /// Treat every tick as inside a schedule window.
    pub ignore_schedule: bool,
}

impl AutoscalerSettings {
    pub fn from_config(config: &Config) -> ConfigResult<Self> {
        Ok(Self {
            pool: config.pool.name.clone(),
            bounds: config.pool.bounds(),
            policy: ScalingPolicy::from(config.policy),
            calendar: config.schedule.calendar()?,
            timezone: config.schedule.timezone()?,
            ignore_schedule: config.schedule.ignore,
        })
    }

    /// Whether reactive scaling applies at `now`.
    pub fn schedule_active(&self, now: DateTime<Utc>) -> bool {
        self.ignore_schedule || self.calendar.is_active(&now.with_timezone(&self.timezone))
    }
}

/// Why a tick took no action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The pool could not be observed.
    ObservationFailed,
    /// The pool reported no units.
    EmptyPool,
    /// The bounds or the sample were rejected by the policy.
    InvalidInput,
    /// A scale-down was decided but no unit can be removed.
    NoScaleInCandidate,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::ObservationFailed => write!(f, "pool could not be observed"),
            SkipReason::EmptyPool => write!(f, "pool is empty"),
            SkipReason::InvalidInput => write!(f, "policy rejected its input"),
            SkipReason::NoScaleInCandidate => write!(f, "no unit eligible for removal"),
        }
    }
}

/// What a single tick did.
#[derive(Debug)]
pub enum TickOutcome {
    Skipped { reason: SkipReason },
    /// Inside a window, the pool is at its target.
    Held,
    /// Outside a window, one unit was added towards `max_units`.
    PreWarmed(Convergence),
    /// Outside a window, the pool is already at `max_units`.
    AtMaximum,
    ScaledUp(Convergence),
    ScaledDown { unit: UnitId, convergence: Convergence },
    /// The executor did not issue or complete the request.
    ActionFailed(ExecutorError),
}

/// Drives one pool towards its target size.
pub struct Autoscaler {
    settings: AutoscalerSettings,
    sampler: Arc<dyn UtilizationSampler>,
    provisioner: Arc<dyn ProvisioningPort>,
    executor: ConvergenceExecutor,
}

impl Autoscaler {
    pub fn new(
        settings: AutoscalerSettings,
        sampler: Arc<dyn UtilizationSampler>,
        provisioner: Arc<dyn ProvisioningPort>,
        executor: ConvergenceExecutor,
    ) -> Self {
        Self {
            settings,
            sampler,
            provisioner,
            executor,
        }
    }

    pub fn settings(&self) -> &AutoscalerSettings {
        &self.settings
    }

    /// Run one tick as of `now`.
    pub async fn tick(&self, now: DateTime<Utc>, shutdown: &watch::Receiver<bool>) -> TickOutcome {
        if self.settings.schedule_active(now) {
            self.tick_reactive(shutdown).await
        } else {
            self.tick_prewarm(shutdown).await
        }
    }

    /// Outside the windows: grow towards `max_units`, never shrink.
    async fn tick_prewarm(&self, shutdown: &watch::Receiver<bool>) -> TickOutcome {
        let pool = &self.settings.pool;
        let size = match self.provisioner.list_unit_ids().await {
            Ok(ids) => ids.len(),
            Err(e) => {
                warn!(%pool, error = %e, "failed to list units, skipping tick");
                return TickOutcome::Skipped {
                    reason: SkipReason::ObservationFailed,
                };
            }
        };
        if size == 0 {
            warn!(%pool, "no units listed, skipping tick");
            return TickOutcome::Skipped {
                reason: SkipReason::EmptyPool,
            };
        }

        let max = self.settings.bounds.max_units;
        if size >= max as usize {
            debug!(%pool, size, max, "outside schedule, pool at maximum");
            return TickOutcome::AtMaximum;
        }

        info!(%pool, size, max, "outside schedule, pre-warming one unit");
        match self.executor.scale_out(shutdown.clone()).await {
            Ok(convergence) => TickOutcome::PreWarmed(convergence),
            Err(e) => TickOutcome::ActionFailed(e),
        }
    }

    /// Inside a window: sample, decide, act.
    async fn tick_reactive(&self, shutdown: &watch::Receiver<bool>) -> TickOutcome {
        let pool = &self.settings.pool;
        let sample = match self.sampler.sample().await {
            Ok(sample) => sample,
            Err(e) => {
                warn!(%pool, error = %e, "failed to sample utilization, skipping tick");
                return TickOutcome::Skipped {
                    reason: SkipReason::ObservationFailed,
                };
            }
        };
        if sample.units.is_empty() {
            warn!(%pool, "no units sampled, skipping tick");
            return TickOutcome::Skipped {
                reason: SkipReason::EmptyPool,
            };
        }

        let snapshot = sample.snapshot();
        debug!(
            %pool,
            units = ?unit_ids(&sample.units, |_| true),
            unused = ?unit_ids(&sample.units, |u| u.idle),
            total = snapshot.total_units,
            effective_idle = snapshot.effective_idle(),
            pending = snapshot.pending_units,
            unscheduled = snapshot.unscheduled_workloads,
            cores_used = snapshot.cores_used,
            "sampled pool"
        );

        let decision = match self.settings.policy.evaluate(&snapshot, &self.settings.bounds) {
            Ok(decision) => decision,
            Err(e) => {
                error!(%pool, error = %e, "policy rejected input, holding");
                return TickOutcome::Skipped {
                    reason: SkipReason::InvalidInput,
                };
            }
        };
        debug!(%pool, %decision, "policy decision");

        match decision {
            Decision::Hold => TickOutcome::Held,
            Decision::ScaleUp => {
                info!(%pool, total = snapshot.total_units, "scaling up by one unit");
                match self.executor.scale_out(shutdown.clone()).await {
                    Ok(convergence) => TickOutcome::ScaledUp(convergence),
                    Err(e) => TickOutcome::ActionFailed(e),
                }
            }
            Decision::ScaleDown => {
                let Some(unit) = pick_scale_in_target(&sample.units) else {
                    warn!(%pool, "scale-down decided but no idle unit to remove");
                    return TickOutcome::Skipped {
                        reason: SkipReason::NoScaleInCandidate,
                    };
                };
                info!(%pool, %unit, total = snapshot.total_units, "scaling down by one unit");
                match self.executor.scale_in(&unit, shutdown.clone()).await {
                    Ok(convergence) => TickOutcome::ScaledDown { unit, convergence },
                    Err(e) => TickOutcome::ActionFailed(e),
                }
            }
        }
    }

    /// Tick every `interval` until shutdown is signalled.
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let pool = &self.settings.pool;
        info!(
            %pool,
            interval_secs = interval.as_secs(),
            min = self.settings.bounds.min_units,
            max = self.settings.bounds.max_units,
            extra = self.settings.bounds.extra_capacity,
            "autoscaler started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let outcome = self.tick(Utc::now(), &shutdown).await;
            match &outcome {
                TickOutcome::Skipped { reason } => debug!(%pool, %reason, "tick skipped"),
                TickOutcome::ActionFailed(e) => warn!(%pool, error = %e, "scale action failed"),
                other => debug!(%pool, outcome = ?other, "tick finished"),
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!(%pool, "autoscaler shutting down");
    }
}

/// Choose the unit to remove on scale-down.
///
/// A pending unit goes first since it carries no work yet; otherwise a
/// random idle unit. Units without an id cannot be addressed.
pub fn pick_scale_in_target(units: &[Unit]) -> Option<UnitId> {
    if let Some(pending) = units.iter().find(|u| u.pending && !u.id.is_empty()) {
        return Some(pending.id.clone());
    }
    let idle: Vec<&Unit> = units.iter().filter(|u| u.idle && !u.id.is_empty()).collect();
    idle.choose(&mut rand::rng()).map(|u| u.id.clone())
}

fn unit_ids(units: &[Unit], keep: impl Fn(&Unit) -> bool) -> Vec<&str> {
    units.iter().filter(|u| keep(u)).map(|u| u.id.as_str()).collect()
}
