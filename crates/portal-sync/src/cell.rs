//! # Async Cell
//!
//! A shared handle to a value that may not exist yet.
//!
//! ## States
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   Pending { interim } ──── resolve(v) ────► Resolved(v)                │
//! │          │                                      │                       │
//! │          │                                      └── replace(v') (store  │
//! │          │                                          rewrote the slot)   │
//! │          └───────────── fail(e) ──────────► Failed(e)                  │
//! │                                                                         │
//! │   The first settle wins; later resolve/fail calls are ignored.         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Cells are cheap to clone and every clone observes the same state, so the
//! store can hand the same cell to every caller that fetches a path.
//! Failures are values: they are read with [`Cell::error`] or returned from
//! [`Cell::settled`], never raised.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;

use crate::error::{SyncError, SyncResult};

enum CellState<T> {
    Pending { interim: Option<T> },
    Resolved(T),
    Failed(SyncError),
}

struct Shared<T> {
    state: Mutex<CellState<T>>,
    settled: watch::Sender<bool>,
}

/// A possibly-pending value shared between every holder.
pub struct Cell<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Cell<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Cell<T> {
    fn with_state(state: CellState<T>) -> Self {
        let settled = !matches!(state, CellState::Pending { .. });
        let (tx, _) = watch::channel(settled);
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                settled: tx,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CellState<T>> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Do both handles point at the same cell?
    pub fn ptr_eq(a: &Cell<T>, b: &Cell<T>) -> bool {
        Arc::ptr_eq(&a.shared, &b.shared)
    }

    pub fn is_pending(&self) -> bool {
        matches!(*self.lock(), CellState::Pending { .. })
    }

    pub fn is_resolved(&self) -> bool {
        matches!(*self.lock(), CellState::Resolved(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(*self.lock(), CellState::Failed(_))
    }

    pub fn error(&self) -> Option<SyncError> {
        match &*self.lock() {
            CellState::Failed(err) => Some(err.clone()),
            _ => None,
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Cell<T> {
    // =========================================================================
    // Construction
    // =========================================================================

    pub fn resolved(value: T) -> Self {
        Self::with_state(CellState::Resolved(value))
    }

    pub fn failed(err: SyncError) -> Self {
        Self::with_state(CellState::Failed(err))
    }

    pub fn pending(interim: Option<T>) -> Self {
        Self::with_state(CellState::Pending { interim })
    }

    /// Run `fut` on the tokio runtime and settle the cell with its output.
    ///
    /// Must be called from within a runtime.
    pub fn spawn<F>(fut: F, interim: Option<T>) -> Self
    where
        F: Future<Output = SyncResult<T>> + Send + 'static,
    {
        let cell = Self::pending(interim);
        cell.drive(fut);
        cell
    }

    /// Settle this (pending) cell from a spawned task.
    ///
    /// If the task dies before producing a result the cell fails with
    /// [`SyncError::Abandoned`].
    pub(crate) fn drive<F>(&self, fut: F)
    where
        F: Future<Output = SyncResult<T>> + Send + 'static,
    {
        let settler = Settler {
            cell: Some(self.clone()),
        };
        tokio::spawn(async move {
            let result = fut.await;
            settler.settle(result);
        });
    }

    // =========================================================================
    // Readers
    // =========================================================================

    /// The resolved value, if there is one yet.
    pub fn value(&self) -> Option<T> {
        match &*self.lock() {
            CellState::Resolved(value) => Some(value.clone()),
            _ => None,
        }
    }

    /// The placeholder shown while pending.
    pub fn interim(&self) -> Option<T> {
        match &*self.lock() {
            CellState::Pending { interim } => interim.clone(),
            _ => None,
        }
    }

    /// Resolved value, falling back to the interim value.
    pub fn current(&self) -> Option<T> {
        match &*self.lock() {
            CellState::Resolved(value) => Some(value.clone()),
            CellState::Pending { interim } => interim.clone(),
            CellState::Failed(_) => None,
        }
    }

    fn outcome(&self) -> Option<SyncResult<T>> {
        match &*self.lock() {
            CellState::Pending { .. } => None,
            CellState::Resolved(value) => Some(Ok(value.clone())),
            CellState::Failed(err) => Some(Err(err.clone())),
        }
    }

    /// Wait until the cell resolves or fails.
    pub async fn settled(&self) -> SyncResult<T> {
        let mut rx = self.shared.settled.subscribe();
        loop {
            if let Some(outcome) = self.outcome() {
                return outcome;
            }
            if rx.changed().await.is_err() {
                return Err(SyncError::Abandoned);
            }
        }
    }

    // =========================================================================
    // Derivation
    // =========================================================================

    /// Derive a cell by applying `f` to the value.
    ///
    /// The interim value goes through `f` too, so a derived cell has an
    /// interim whenever its source does.
    pub fn map<U, F>(&self, f: F) -> Cell<U>
    where
        U: Clone + Send + Sync + 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        self.try_map(move |value| Ok(f(value)))
    }

    /// Like [`Cell::map`] with a fallible conversion.
    pub fn try_map<U, F>(&self, f: F) -> Cell<U>
    where
        U: Clone + Send + Sync + 'static,
        F: Fn(T) -> SyncResult<U> + Send + Sync + 'static,
    {
        match self.outcome() {
            Some(Ok(value)) => return Cell::from_result(f(value)),
            Some(Err(err)) => return Cell::failed(err),
            None => {}
        }
        let interim = self.interim().and_then(|value| f(value).ok());
        let source = self.clone();
        Cell::spawn(async move { f(source.settled().await?) }, interim)
    }

    /// Chain an async continuation onto the value.
    pub fn then<U, F, Fut>(&self, f: F) -> Cell<U>
    where
        U: Clone + Send + Sync + 'static,
        F: FnOnce(T) -> Fut + Send + 'static,
        Fut: Future<Output = SyncResult<U>> + Send + 'static,
    {
        if let Some(Err(err)) = self.outcome() {
            return Cell::failed(err);
        }
        let source = self.clone();
        Cell::spawn(
            async move {
                let value = source.settled().await?;
                f(value).await
            },
            None,
        )
    }

    fn from_result(result: SyncResult<T>) -> Self {
        match result {
            Ok(value) => Self::resolved(value),
            Err(err) => Self::failed(err),
        }
    }

    // =========================================================================
    // Writers (store and engine only)
    // =========================================================================

    /// Settle with a value. Returns false if the cell had already settled.
    pub(crate) fn resolve(&self, value: T) -> bool {
        self.settle(CellState::Resolved(value))
    }

    pub(crate) fn fail(&self, err: SyncError) -> bool {
        self.settle(CellState::Failed(err))
    }

    fn settle(&self, next: CellState<T>) -> bool {
        {
            let mut state = self.lock();
            if !matches!(*state, CellState::Pending { .. }) {
                return false;
            }
            *state = next;
        }
        self.shared.settled.send_replace(true);
        true
    }

    /// Swap the placeholder of a pending cell.
    pub(crate) fn set_interim(&self, value: T) {
        if let CellState::Pending { interim } = &mut *self.lock() {
            *interim = Some(value);
        }
    }

    /// Overwrite a resolved value in place; pending cells get a new interim.
    pub(crate) fn replace(&self, value: T) {
        match &mut *self.lock() {
            CellState::Resolved(current) => *current = value,
            CellState::Pending { interim } => *interim = Some(value),
            CellState::Failed(_) => {}
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Cell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.lock() {
            CellState::Pending { interim } => f
                .debug_struct("Cell::Pending")
                .field("interim", interim)
                .finish(),
            CellState::Resolved(value) => f.debug_tuple("Cell::Resolved").field(value).finish(),
            CellState::Failed(err) => f.debug_tuple("Cell::Failed").field(err).finish(),
        }
    }
}

/// Settles its cell exactly once, failing it if dropped unused.
struct Settler<T: Clone + Send + Sync + 'static> {
    cell: Option<Cell<T>>,
}

impl<T: Clone + Send + Sync + 'static> Settler<T> {
    fn settle(mut self, result: SyncResult<T>) {
        if let Some(cell) = self.cell.take() {
            match result {
                Ok(value) => cell.resolve(value),
                Err(err) => cell.fail(err),
            };
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Drop for Settler<T> {
    fn drop(&mut self) {
        if let Some(cell) = self.cell.take() {
            cell.fail(SyncError::Abandoned);
        }
    }
}
