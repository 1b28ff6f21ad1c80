//! poolscale-autoscale — idle-buffer scaling for a single worker pool.
//!
//! On every tick the [`Autoscaler`] consults the schedule, samples the
//! pool, asks the [`policy`] for a decision and, unless the answer is
//! `Hold`, hands a single-unit change to the convergence executor.
//!
//! # Decision rules (idle units)
//!
//! ```text
//! total < min + extra                      → ScaleUp
//! idle < extra and total < max             → ScaleUp
//! idle > extra and total > min + extra     → ScaleDown
//! otherwise                                → Hold
//! ```
//!
//! At most one unit is added or removed per tick; repeated ticks walk
//! the pool to its target size.
//!
//! Outside the scheduled windows the policy is bypassed and the pool is
//! grown towards `max_units`, one unit per tick, and never shrunk.

pub mod policy;
pub mod scaler;

pub use policy::{
    Decision, PolicyError, PolicyResult, ScalingPolicy, check_bounds, decide, decide_by_cores,
};
pub use scaler::{Autoscaler, AutoscalerSettings, SkipReason, TickOutcome, pick_scale_in_target};
