//! Promise state.
//!
//! A promise starts `Pending` and moves to exactly one terminal variant. The
//! same type is returned by timed waits, where `Pending` means the deadline
//! passed before the promise settled. That keeps "no value yet" distinct from
//! "fulfilled with an empty value" even when `T` is itself an `Option`.

/// State of a single-assignment result cell.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PromiseState<T, E> {
    #[default]
    Pending,
    Fulfilled(T),
    Rejected(E),
}

impl<T, E> PromiseState<T, E> {
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    #[must_use]
    pub const fn is_fulfilled(&self) -> bool {
        matches!(self, Self::Fulfilled(_))
    }

    /// True exactly when an error is present.
    #[must_use]
    pub const fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }

    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !self.is_pending()
    }

    #[must_use]
    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Fulfilled(value) => Some(value),
            _ => None,
        }
    }

    #[must_use]
    pub fn error(&self) -> Option<&E> {
        match self {
            Self::Rejected(error) => Some(error),
            _ => None,
        }
    }

    /// Converts a terminal state into a `Result`. Returns `None` while pending.
    #[must_use]
    pub fn into_result(self) -> Option<Result<T, E>> {
        match self {
            Self::Pending => None,
            Self::Fulfilled(value) => Some(Ok(value)),
            Self::Rejected(error) => Some(Err(error)),
        }
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Fulfilled(_) => "fulfilled",
            Self::Rejected(_) => "rejected",
        }
    }
}

impl<T, E> From<Result<T, E>> for PromiseState<T, E> {
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(value) => Self::Fulfilled(value),
            Err(error) => Self::Rejected(error),
        }
    }
}
