//! poolscale-schedule — time-of-day gate for the autoscaler.
//!
//! A [`Calendar`] maps each weekday to at most one [`TimeWindow`]. The
//! control loop asks [`Calendar::is_active`] on every tick; outside the
//! active windows the pool is pre-warmed to its maximum size instead of
//! being scaled reactively.
//!
//! # Window semantics
//!
//! ```text
//! whole_day            → active all day
//! start < end          → active for start <= hour < end
//! start > end          → active for hour >= start || hour < end  (crosses midnight)
//! start == end         → never active (zero-width)
//! ```
//!
//! A window that crosses midnight belongs to the weekday it starts on;
//! the early-morning hours it covers are matched against that same
//! weekday's entry, not the following day's.

pub mod calendar;

pub use calendar::{Calendar, CalendarError, TimeWindow};
