//! Deferred results of queued operations
use crate::error::{
    Error,
    Result,
};
use std::sync::{
    Arc,
    OnceLock,
};

#[derive(Debug)]
enum Outcome<V> {
    Ready(V),
    Cancelled,
    Aborted,
}

/// The write side of a [`ResultHandle`], kept by the transaction
#[derive(Debug)]
pub(crate) struct Slot<V> {
    cell: Arc<OnceLock<Outcome<V>>>,
}

impl<V> Slot<V> {
    pub(crate) fn new() -> (Self, ResultHandle<V>) {
        let cell = Arc::new(OnceLock::new());
        (
            Self {
                cell: Arc::clone(&cell),
            },
            ResultHandle { cell },
        )
    }

    // The first settle wins, later ones are ignored
    pub(crate) fn resolve(&self, value: V) {
        let _ = self.cell.set(Outcome::Ready(value));
    }

    pub(crate) fn cancel(&self) {
        let _ = self.cell.set(Outcome::Cancelled);
    }

    pub(crate) fn abort(&self) {
        let _ = self.cell.set(Outcome::Aborted);
    }
}

/// A value that becomes available once the operation that produces it has been dispatched and
/// acknowledged. Handles are cheap to clone and can be read from any thread.
#[derive(Debug)]
pub struct ResultHandle<V> {
    cell: Arc<OnceLock<Outcome<V>>>,
}

impl<V> Clone for ResultHandle<V> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
        }
    }
}

impl<V> ResultHandle<V> {
    /// Borrow the resolved value
    /// # Errors
    /// Returns [`Error::NotYetDispatched`] before a successful dispatch, and [`Error::Cancelled`]
    /// or [`Error::Aborted`] if the operation will never produce a value
    pub fn get(&self) -> Result<&V> {
        match self.cell.get() {
            None => Err(Error::NotYetDispatched),
            Some(Outcome::Ready(v)) => Ok(v),
            Some(Outcome::Cancelled) => Err(Error::Cancelled),
            Some(Outcome::Aborted) => Err(Error::Aborted),
        }
    }

    /// Whether the value is available
    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self.cell.get(), Some(Outcome::Ready(_)))
    }

    /// Whether the handle has been settled one way or another
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.cell.get().is_some()
    }
}

impl<V> ResultHandle<V>
where
    V: Clone,
{
    /// Copy out the resolved value
    /// # Errors
    /// See [`ResultHandle::get`]
    pub fn value(&self) -> Result<V> {
        self.get().cloned()
    }
}
