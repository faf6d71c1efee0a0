//! The session contract repositories execute statements through.
//!
//! Uses RPITIT (return-position `impl Trait` in traits) for the async
//! flavor, no `async-trait` needed.

use std::future::Future;
use std::sync::Arc;

use crate::entity::Record;
use crate::error::DataError;
use crate::query::{CountQuery, DeleteStatement, InsertStatement, SelectQuery, UpdateStatement};

/// Blocking session.
///
/// Statements run inside the session's current transaction; `commit` and
/// `rollback` end it and the next statement starts a new one.
pub trait Session: Send {
    /// Rows matching the query, with requested relationships attached.
    fn fetch(&mut self, query: &SelectQuery) -> Result<Vec<Record>, DataError>;

    fn count(&mut self, query: &CountQuery) -> Result<u64, DataError>;

    /// Stage a new row and return it with store-assigned values filled in.
    fn add(&mut self, stmt: &InsertStatement) -> Result<Record, DataError>;

    /// Returns the updated rows (without relationships).
    fn update(&mut self, stmt: &UpdateStatement) -> Result<Vec<Record>, DataError>;

    /// Returns the number of deleted rows.
    fn delete(&mut self, stmt: &DeleteStatement) -> Result<u64, DataError>;

    fn flush(&mut self) -> Result<(), DataError>;

    fn commit(&mut self) -> Result<(), DataError>;

    fn rollback(&mut self) -> Result<(), DataError>;

    /// Release the session. Uncommitted work is discarded.
    fn close(&mut self) -> Result<(), DataError>;
}

/// Suspending counterpart of [`Session`].
///
/// Implementations must discard uncommitted work when dropped, so a
/// cancelled operation never leaves a half-committed state.
pub trait AsyncSession: Send {
    fn fetch(&mut self, query: &SelectQuery) -> impl Future<Output = Result<Vec<Record>, DataError>> + Send;

    fn count(&mut self, query: &CountQuery) -> impl Future<Output = Result<u64, DataError>> + Send;

    fn add(&mut self, stmt: &InsertStatement) -> impl Future<Output = Result<Record, DataError>> + Send;

    fn update(&mut self, stmt: &UpdateStatement) -> impl Future<Output = Result<Vec<Record>, DataError>> + Send;

    fn delete(&mut self, stmt: &DeleteStatement) -> impl Future<Output = Result<u64, DataError>> + Send;

    fn flush(&mut self) -> impl Future<Output = Result<(), DataError>> + Send;

    fn commit(&mut self) -> impl Future<Output = Result<(), DataError>> + Send;

    fn rollback(&mut self) -> impl Future<Output = Result<(), DataError>> + Send;

    fn close(&mut self) -> impl Future<Output = Result<(), DataError>> + Send;
}

pub trait SessionFactory: Send + Sync {
    type Session: Session;

    fn open(&self) -> Result<Self::Session, DataError>;
}

pub trait AsyncSessionFactory: Send + Sync {
    type Session: AsyncSession;

    fn open(&self) -> impl Future<Output = Result<Self::Session, DataError>> + Send;
}

/// Shared slot holding a blocking session.
///
/// Every repository of a unit of work holds a clone; access is exclusive.
/// Once the session is released all access fails with
/// [`DataError::SessionClosed`].
pub struct SessionHandle<S> {
    slot: Arc<std::sync::Mutex<Option<S>>>,
}

impl<S> Clone for SessionHandle<S> {
    fn clone(&self) -> Self {
        Self {
            slot: self.slot.clone(),
        }
    }
}

impl<S: Session> SessionHandle<S> {
    pub fn new(session: S) -> Self {
        Self {
            slot: Arc::new(std::sync::Mutex::new(Some(session))),
        }
    }

    /// Run `f` with exclusive access to the session.
    pub fn with<R>(&self, f: impl FnOnce(&mut S) -> Result<R, DataError>) -> Result<R, DataError> {
        let mut slot = self
            .slot
            .lock()
            .map_err(|_| DataError::Other("session lock poisoned".into()))?;
        let session = slot.as_mut().ok_or(DataError::SessionClosed)?;
        f(session)
    }

    /// Remove the session from the slot; later access fails.
    pub fn release(&self) -> Option<S> {
        match self.slot.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.slot.lock().map(|slot| slot.is_some()).unwrap_or(false)
    }
}

/// Shared slot holding a suspending session.
pub struct AsyncSessionHandle<S> {
    slot: Arc<tokio::sync::Mutex<Option<S>>>,
}

impl<S> Clone for AsyncSessionHandle<S> {
    fn clone(&self) -> Self {
        Self {
            slot: self.slot.clone(),
        }
    }
}

impl<S: AsyncSession> AsyncSessionHandle<S> {
    pub fn new(session: S) -> Self {
        Self {
            slot: Arc::new(tokio::sync::Mutex::new(Some(session))),
        }
    }

    /// Lock the slot. Callers get the session with
    /// `guard.as_mut().ok_or(DataError::SessionClosed)?`.
    pub async fn lock(&self) -> tokio::sync::MutexGuard<'_, Option<S>> {
        self.slot.lock().await
    }

    pub async fn release(&self) -> Option<S> {
        self.slot.lock().await.take()
    }

    /// Non-waiting release, used when a unit of work is dropped.
    pub fn try_release(&self) -> Option<S> {
        self.slot.try_lock().ok().and_then(|mut slot| slot.take())
    }

    pub async fn is_open(&self) -> bool {
        self.slot.lock().await.is_some()
    }
}
