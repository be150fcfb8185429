//! Core domain types for pledge.
//!
//! This crate contains pure domain types with no IO, no threads, and minimal
//! dependencies. The concurrency crates build on these:
//!
//! - **`PromiseState`**: the tri-state cell content of a promise, also used as
//!   the result of a timed wait
//! - **`Error`**: the default rejection type
//! - **`WorkItemId`** / **`WorkStatus`**: identity and lifecycle of queued work

mod error;
mod ids;
mod state;
mod work;

pub use error::Error;
pub use ids::WorkItemId;
pub use state::PromiseState;
pub use work::WorkStatus;
