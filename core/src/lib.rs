//! Promise/Future primitive for pledge.
//!
//! - **`Promise`** / **`Resolver`**: single-assignment result with chained
//!   continuations, each scheduled on a caller-chosen execution context
//! - **`Future`**: read-only view with cached, blocking retrieval
//! - **`Executor`**: where continuations and producer tasks run
//!   (`WorkerPool`, `SerialQueue`, or the shared `background()` pool)
//! - **`CriticalSection`** / **`Signal`**: the locking and wake-up primitives
//!   the rest of the crate is built on

pub mod executor;
mod future;
mod promise;
pub mod sync;

pub use executor::{
    ExecutionContext, Executor, Job, SerialQueue, WorkerPool, background, init_background,
};
pub use future::Future;
pub use promise::{Promise, Resolver};
pub use sync::{CriticalSection, Signal};

pub use pledge_types::{Error, PromiseState, WorkItemId, WorkStatus};
