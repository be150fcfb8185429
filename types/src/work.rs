/// Lifecycle of a queued unit of work.
///
/// `Scheduled -> Running -> Completed`, or `Scheduled -> Cancelled`. A cancel
/// request that arrives while the body is `Running` does not change the
/// status; the body runs to completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkStatus {
    Scheduled,
    Running,
    Cancelled,
    Completed,
}
