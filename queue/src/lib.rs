//! Pausable, cancellable task queue.
//!
//! Work submitted to a [`TaskQueue`] runs on the queue's execution context.
//! While the queue is paused, work that has not started is held back and
//! released in arrival order on [`TaskQueue::resume`]. [`TaskQueue::cancel`]
//! discards everything that has not started yet.
//!
//! Cancellation is cooperative: a body that is already running is never
//! interrupted. There is no error channel; cancelled bodies are skipped
//! silently.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use pledge_core::{CriticalSection, ExecutionContext, Job, background};
use pledge_types::{WorkItemId, WorkStatus};

struct Slot {
    status: WorkStatus,
    body: Option<Job>,
}

/// A queued unit of work: its body plus a cancellation state.
struct WorkItem {
    id: WorkItemId,
    slot: CriticalSection<Slot>,
}

impl WorkItem {
    fn new(id: WorkItemId, body: Job) -> Self {
        Self {
            id,
            slot: CriticalSection::new(Slot {
                status: WorkStatus::Scheduled,
                body: Some(body),
            }),
        }
    }

    fn status(&self) -> WorkStatus {
        self.slot.synchronized(|slot| slot.status)
    }

    /// Take the body for execution. `None` if the item was cancelled.
    fn start(&self) -> Option<Job> {
        self.slot.synchronized(|slot| {
            if slot.status != WorkStatus::Scheduled {
                return None;
            }
            slot.status = WorkStatus::Running;
            slot.body.take()
        })
    }

    /// Cancel if not yet started, handing back the discarded body. Callers
    /// drop it outside any queue lock.
    fn cancel(&self) -> Option<Job> {
        self.slot.synchronized(|slot| {
            if slot.status != WorkStatus::Scheduled {
                return None;
            }
            slot.status = WorkStatus::Cancelled;
            slot.body.take()
        })
    }

    fn finish(&self) {
        self.slot.synchronized(|slot| slot.status = WorkStatus::Completed);
    }
}

#[derive(Default)]
struct QueueState {
    paused: bool,
    tracked: BTreeMap<WorkItemId, Arc<WorkItem>>,
    held: BTreeMap<WorkItemId, Arc<WorkItem>>,
}

struct Inner {
    context: ExecutionContext,
    state: CriticalSection<QueueState>,
    next_id: AtomicU64,
}

impl Inner {
    fn dispatch(self: &Arc<Self>, item: Arc<WorkItem>) {
        let queue = Arc::clone(self);
        self.context.execute(Box::new(move || queue.run(&item)));
    }

    fn run(&self, item: &Arc<WorkItem>) {
        let body = self.state.synchronized(|state| {
            if state.paused {
                if item.status() == WorkStatus::Scheduled {
                    state.held.insert(item.id, Arc::clone(item));
                }
                return None;
            }
            item.start()
        });
        let Some(body) = body else {
            return;
        };

        tracing::trace!(id = %item.id, "Running queued work");
        let _completion = Completion { queue: self, item };
        body();
    }

    fn untrack(&self, id: WorkItemId) {
        self.state.synchronized(|state| {
            state.tracked.remove(&id);
            state.held.remove(&id);
        });
    }
}

/// Marks an item completed and stops tracking it, even if its body panics.
struct Completion<'a> {
    queue: &'a Inner,
    item: &'a WorkItem,
}

impl Drop for Completion<'_> {
    fn drop(&mut self) {
        self.item.finish();
        self.queue.untrack(self.item.id);
    }
}

/// Pausable, cancellable queue of work items.
///
/// Clones share the same queue.
#[derive(Clone)]
pub struct TaskQueue {
    inner: Arc<Inner>,
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskQueue {
    /// A queue running its work on the shared background context.
    #[must_use]
    pub fn new() -> Self {
        Self::on(background())
    }

    #[must_use]
    pub fn on(context: ExecutionContext) -> Self {
        Self {
            inner: Arc::new(Inner {
                context,
                state: CriticalSection::new(QueueState::default()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Submit `work`. It runs on the queue's context once the queue is not
    /// paused, unless it is cancelled first.
    pub fn enqueue<F>(&self, work: F) -> WorkHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let id = WorkItemId::new(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let item = Arc::new(WorkItem::new(id, Box::new(work)));

        let runnable = self.inner.state.synchronized(|state| {
            state.tracked.insert(id, Arc::clone(&item));
            if state.paused {
                state.held.insert(id, Arc::clone(&item));
                false
            } else {
                true
            }
        });
        tracing::trace!(id = %id, held = !runnable, "Enqueued work");

        if runnable {
            self.inner.dispatch(Arc::clone(&item));
        }
        WorkHandle {
            item,
            queue: Arc::downgrade(&self.inner),
        }
    }

    /// Hold back work that has not started. Returns `false` if already paused.
    pub fn pause(&self) -> bool {
        let changed = self.inner.state.synchronized(|state| {
            let changed = !state.paused;
            state.paused = true;
            changed
        });
        if changed {
            tracing::debug!("Task queue paused");
        }
        changed
    }

    /// Release held work in arrival order. Returns `false` if not paused.
    pub fn resume(&self) -> bool {
        let released = self.inner.state.synchronized(|state| {
            if !state.paused {
                return None;
            }
            state.paused = false;
            Some(std::mem::take(&mut state.held))
        });
        let Some(released) = released else {
            return false;
        };

        tracing::debug!(released = released.len(), "Task queue resumed");
        for item in released.into_values() {
            self.inner.dispatch(item);
        }
        true
    }

    /// Cancel every tracked item that has not started and forget all of them.
    ///
    /// The queue is paused for the duration of the sweep and left running
    /// afterwards. Bodies that are already running finish normally. Returns
    /// the number of items that were cancelled before they could start.
    pub fn cancel(&self) -> usize {
        let (tracked, discarded) = self.inner.state.synchronized(|state| {
            state.paused = true;
            let tracked = std::mem::take(&mut state.tracked);
            state.held.clear();
            let discarded: Vec<Job> =
                tracked.values().filter_map(|item| item.cancel()).collect();
            state.paused = false;
            (tracked.len(), discarded)
        });

        let cancelled = discarded.len();
        drop(discarded);
        tracing::debug!(tracked, cancelled, "Task queue cancelled");
        cancelled
    }

    /// Number of items submitted and not yet completed or cancelled.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.state.synchronized(|state| state.tracked.len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.inner.state.synchronized(|state| state.paused)
    }

    /// Number of items parked while the queue is paused.
    #[must_use]
    pub fn held(&self) -> usize {
        self.inner.state.synchronized(|state| state.held.len())
    }
}

impl fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (paused, tracked, held) = self.inner.state.synchronized(|state| {
            (state.paused, state.tracked.len(), state.held.len())
        });
        f.debug_struct("TaskQueue")
            .field("context", &self.inner.context.name())
            .field("paused", &paused)
            .field("tracked", &tracked)
            .field("held", &held)
            .finish()
    }
}

/// Handle to a submitted work item.
pub struct WorkHandle {
    item: Arc<WorkItem>,
    queue: Weak<Inner>,
}

impl WorkHandle {
    #[must_use]
    pub fn id(&self) -> WorkItemId {
        self.item.id
    }

    #[must_use]
    pub fn status(&self) -> WorkStatus {
        self.item.status()
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.status() == WorkStatus::Cancelled
    }

    /// Cancel this item if it has not started. Returns whether it was
    /// cancelled by this call.
    pub fn cancel(&self) -> bool {
        let Some(body) = self.item.cancel() else {
            return false;
        };
        drop(body);
        if let Some(queue) = self.queue.upgrade() {
            queue.untrack(self.item.id);
        }
        tracing::trace!(id = %self.item.id, "Work item cancelled");
        true
    }
}

impl fmt::Debug for WorkHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkHandle")
            .field("id", &self.item.id)
            .field("status", &self.status())
            .finish()
    }
}
