//! poolscale-http — an HTTP/JSON backend for the provisioning and
//! sampling ports.
//!
//! [`HttpProvisioner`] is a plain adapter: it carries no decision logic
//! and never retries on its own. Wrapping it in [`Reauthenticating`]
//! adds bounded credential refresh:
//!
//! ```text
//! Reauthenticating<HttpProvisioner>
//!   call ──► 401 ──► CredentialExpired ──► refresh() ──► call again
//!                                          (at most max_attempts calls)
//! ```

pub mod client;
pub mod reauth;

pub use client::HttpProvisioner;
pub use reauth::{CredentialRefresh, Reauthenticating};
