//! Retrying promise-returning operations.
//!
//! - [`retry`] / [`retry_with`]: re-invoke an operation until it fulfills or
//!   its attempts run out, optionally with exponential backoff
//! - [`RenewalCoordinator`]: park operations that failed because a session
//!   expired, renew the session once, then replay or reject them together

mod attempt;
mod policy;
mod session;

pub use attempt::{retry, retry_with};
pub use policy::{RetryPolicy, calculate_retry_delay};
pub use session::{RenewalCoordinator, RenewalCoordinatorBuilder};
