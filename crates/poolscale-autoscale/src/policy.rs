//! Scaling policy — maps one utilization reading to a single-step decision.
//!
//! Both policies are pure: no I/O, no state carried between ticks.

use std::fmt;

use poolscale_core::{PolicyConfig, PoolBounds, UtilizationSnapshot};
use thiserror::Error;

/// What the pool should do this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    ScaleUp,
    ScaleDown,
    Hold,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::ScaleUp => write!(f, "scale-up"),
            Decision::ScaleDown => write!(f, "scale-down"),
            Decision::Hold => write!(f, "hold"),
        }
    }
}

/// Inputs for which no decision can be made.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    #[error("min cannot exceed max ({min} > {max})")]
    MinExceedsMax { min: u32, max: u32 },

    #[error("min plus extra cannot exceed max ({min} + {extra} > {max})")]
    MinPlusExtraExceedsMax { min: u32, extra: u32, max: u32 },

    #[error("idle units cannot exceed total units ({idle} > {total})")]
    IdleExceedsTotal { idle: u32, total: u32 },

    #[error("cores per unit must be positive")]
    ZeroCoresPerUnit,
}

pub type PolicyResult<T> = Result<T, PolicyError>;

/// Check pool bounds on their own, without a utilization reading.
pub fn check_bounds(bounds: &PoolBounds) -> PolicyResult<()> {
    validate_bounds(bounds.extra_capacity, bounds.min_units, bounds.max_units).map(|_| ())
}

fn validate_bounds(extra: u32, min: u32, max: u32) -> PolicyResult<u64> {
    if min > max {
        return Err(PolicyError::MinExceedsMax { min, max });
    }
    let floor = u64::from(min) + u64::from(extra);
    if floor > u64::from(max) {
        return Err(PolicyError::MinPlusExtraExceedsMax { min, extra, max });
    }
    Ok(floor)
}

/// Decide from idle-unit counts.
///
/// `idle` must already exclude pending units. Rules are checked in order:
/// below the floor grows, a short idle buffer grows up to `max`, a surplus
/// idle buffer shrinks down to the floor, anything else holds.
pub fn decide(total: u32, idle: u32, extra: u32, min: u32, max: u32) -> PolicyResult<Decision> {
    let floor = validate_bounds(extra, min, max)?;
    if idle > total {
        return Err(PolicyError::IdleExceedsTotal { idle, total });
    }

    let total_units = u64::from(total);
    let decision = if total_units < floor {
        Decision::ScaleUp
    } else if idle < extra && total < max {
        Decision::ScaleUp
    } else if idle > extra && total_units > floor {
        Decision::ScaleDown
    } else {
        Decision::Hold
    };
    Ok(decision)
}

/// Decide from core usage, keeping `extra` units' worth of cores free.
///
/// A unit is only removed when the capacity left after removing it still
/// covers the target, so a pool sitting just above the target holds.
pub fn decide_by_cores(
    total: u32,
    cores_used: u64,
    cores_per_unit: u32,
    extra: u32,
    min: u32,
    max: u32,
) -> PolicyResult<Decision> {
    let floor = validate_bounds(extra, min, max)?;
    if cores_per_unit == 0 {
        return Err(PolicyError::ZeroCoresPerUnit);
    }

    let per_unit = u64::from(cores_per_unit);
    let total_units = u64::from(total);
    let target = cores_used.saturating_add(per_unit * u64::from(extra));
    let capacity = total_units * per_unit;

    let decision = if total_units < floor {
        Decision::ScaleUp
    } else if capacity < target && total < max {
        Decision::ScaleUp
    } else if capacity.saturating_sub(per_unit) >= target && total_units > floor {
        Decision::ScaleDown
    } else {
        Decision::Hold
    };
    Ok(decision)
}

/// The configured utilization signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalingPolicy {
    IdleUnits,
    Cores { cores_per_unit: u32 },
}

impl From<PolicyConfig> for ScalingPolicy {
    fn from(config: PolicyConfig) -> Self {
        match config {
            PolicyConfig::IdleUnits => ScalingPolicy::IdleUnits,
            PolicyConfig::Cores { cores_per_unit } => ScalingPolicy::Cores { cores_per_unit },
        }
    }
}

impl ScalingPolicy {
    pub fn evaluate(
        &self,
        snapshot: &UtilizationSnapshot,
        bounds: &PoolBounds,
    ) -> PolicyResult<Decision> {
        match *self {
            ScalingPolicy::IdleUnits => decide(
                snapshot.total_units,
                snapshot.effective_idle(),
                bounds.extra_capacity,
                bounds.min_units,
                bounds.max_units,
            ),
            ScalingPolicy::Cores { cores_per_unit } => decide_by_cores(
                snapshot.total_units,
                snapshot.cores_used,
                cores_per_unit,
                bounds.extra_capacity,
                bounds.min_units,
                bounds.max_units,
            ),
        }
    }
}
