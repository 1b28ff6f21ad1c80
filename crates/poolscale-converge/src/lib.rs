//! poolscale-converge — turns a scale decision into a confirmed change.
//!
//! The provisioning backend is asynchronous and eventually consistent:
//! an accepted request says nothing about when the pool will reflect it.
//! The [`ConvergenceExecutor`] therefore issues a single add/remove
//! request and then polls the observed unit list until the change is
//! visible, the deadline passes, or shutdown is signalled.
//!
//! # Flow
//!
//! ```text
//! probe()            → unreachable? return Unreachable
//! list_unit_ids()    → previous size (0 → PoolEmpty)
//! add_unit() / remove_unit(id)
//!                    → refused? return Rejected, no polling
//! poll list_unit_ids() every poll_interval until
//!     add:    size == previous + 1 and no placeholder ids
//!     remove: size == previous - 1 and id absent
//!   or deadline      → TimedOut (not an error)
//!   or shutdown      → Cancelled
//! ```

pub mod error;
pub mod executor;

pub use error::{ExecutorError, ExecutorResult};
pub use executor::{Convergence, ConvergenceExecutor, ScaleAction};
