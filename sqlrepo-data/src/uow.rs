//! Units of work: several repositories behind one session and transaction.
//!
//! ```ignore
//! struct Library<S: Session> {
//!     authors: Repository<Author, S>,
//!     books: Repository<Book, S>,
//! }
//!
//! impl<S: Session> RepositorySet<S> for Library<S> {
//!     fn init_repositories(session: &SessionHandle<S>) -> Result<Self, DataError> {
//!         Ok(Self {
//!             authors: Repository::new(session.clone())?,
//!             books: Repository::new(session.clone())?,
//!         })
//!     }
//! }
//!
//! let count = UnitOfWork::<Library<_>, _>::run(&factory, |lib| lib.books.count(()))?;
//! ```

use std::future::Future;
use std::time::Duration;

use crate::entity::Entity;
use crate::error::DataError;
use crate::repository::{AsyncRepository, Repository};
use crate::session::{
    AsyncSession, AsyncSessionFactory, AsyncSessionHandle, Session, SessionFactory, SessionHandle,
};

/// Builds the repositories of a blocking unit of work.
pub trait RepositorySet<S: Session>: Sized {
    /// When true, leaving the scope normally neither commits, rolls back nor
    /// closes; the session stays in its handle for whoever owns it.
    const SKIP_SESSION_USE: bool = false;

    fn init_repositories(session: &SessionHandle<S>) -> Result<Self, DataError>;
}

/// Builds the repositories of a suspending unit of work.
pub trait AsyncRepositorySet<S: AsyncSession>: Sized + Send {
    const SKIP_SESSION_USE: bool = false;

    fn init_repositories(session: &AsyncSessionHandle<S>) -> Result<Self, DataError>;
}

impl<T: Entity, S: Session> RepositorySet<S> for Repository<T, S> {
    fn init_repositories(session: &SessionHandle<S>) -> Result<Self, DataError> {
        Repository::new(session.clone())
    }
}

impl<T: Entity, S: AsyncSession> AsyncRepositorySet<S> for AsyncRepository<T, S> {
    fn init_repositories(session: &AsyncSessionHandle<S>) -> Result<Self, DataError> {
        AsyncRepository::new(session.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitState {
    Active,
    Committed,
    RolledBack,
    /// Left normally with session use skipped.
    Released,
}

/// Blocking unit of work.
///
/// `commit` and `rollback` may be called inside the scope; the unit stays
/// active until `finish` or `abort`. Dropping an active unit rolls back.
pub struct UnitOfWork<R, S: Session> {
    session: SessionHandle<S>,
    repositories: R,
    state: UnitState,
}

impl<R: RepositorySet<S>, S: Session> UnitOfWork<R, S> {
    pub fn begin<F>(factory: &F) -> Result<Self, DataError>
    where
        F: SessionFactory<Session = S>,
    {
        Self::from_session(factory.open()?)
    }

    pub fn from_session(session: S) -> Result<Self, DataError> {
        let handle = SessionHandle::new(session);
        Self::from_handle(handle.clone()).inspect_err(|_| {
            if let Some(mut session) = handle.release() {
                let _ = session.close();
            }
        })
    }

    /// Unit over a session the caller holds a handle to, e.g. one shared
    /// with an outer scope.
    pub fn from_handle(handle: SessionHandle<S>) -> Result<Self, DataError> {
        let repositories = R::init_repositories(&handle)?;
        tracing::debug!(skip_session_use = R::SKIP_SESSION_USE, "Unit of work started");
        Ok(Self {
            session: handle,
            repositories,
            state: UnitState::Active,
        })
    }

    pub fn repositories(&self) -> &R {
        &self.repositories
    }

    pub fn state(&self) -> UnitState {
        self.state
    }

    pub fn session(&self) -> &SessionHandle<S> {
        &self.session
    }

    pub fn commit(&self) -> Result<(), DataError> {
        self.session.with(|s| s.commit())
    }

    pub fn rollback(&self) -> Result<(), DataError> {
        self.session.with(|s| s.rollback())
    }

    /// Normal exit: commit, then close the session. A failed commit is
    /// rolled back and returned.
    ///
    /// With session use skipped the session is left open and untouched in
    /// its handle.
    pub fn finish(&mut self) -> Result<(), DataError> {
        self.ensure_active()?;
        if R::SKIP_SESSION_USE {
            self.state = UnitState::Released;
            tracing::debug!(state = ?self.state, "Unit of work finished");
            return Ok(());
        }
        let outcome = match self.commit() {
            Ok(()) => {
                self.state = UnitState::Committed;
                Ok(())
            }
            Err(err) => {
                if let Err(rollback) = self.rollback() {
                    tracing::warn!(error = %rollback, "Rollback after failed commit failed");
                }
                self.state = UnitState::RolledBack;
                Err(err)
            }
        };
        self.close();
        tracing::debug!(state = ?self.state, "Unit of work finished");
        outcome
    }

    /// Exceptional exit: roll back, then release the session.
    pub fn abort(&mut self) -> Result<(), DataError> {
        self.ensure_active()?;
        let outcome = self.rollback();
        self.state = UnitState::RolledBack;
        self.close();
        tracing::debug!("Unit of work rolled back");
        outcome
    }

    /// Run `f` inside a fresh unit of work.
    ///
    /// An error from `f` rolls back and is returned unchanged.
    pub fn run<F, T, E>(factory: &F, f: impl FnOnce(&R) -> Result<T, E>) -> Result<T, E>
    where
        F: SessionFactory<Session = S>,
        E: From<DataError>,
    {
        let mut unit = Self::begin(factory)?;
        match f(&unit.repositories) {
            Ok(value) => {
                unit.finish()?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback) = unit.abort() {
                    tracing::warn!(error = %rollback, "Rollback of failed unit of work failed");
                }
                Err(err)
            }
        }
    }

    fn ensure_active(&self) -> Result<(), DataError> {
        match self.state {
            UnitState::Active => Ok(()),
            _ => Err(DataError::SessionClosed),
        }
    }

    fn close(&mut self) {
        if let Some(mut session) = self.session.release() {
            if let Err(err) = session.close() {
                tracing::warn!(error = %err, "Failed to close session");
            }
        }
    }
}

impl<R, S: Session> Drop for UnitOfWork<R, S> {
    fn drop(&mut self) {
        if self.state != UnitState::Active {
            return;
        }
        tracing::warn!("Unit of work dropped while active, rolling back");
        if let Some(mut session) = self.session.release() {
            if let Err(err) = session.rollback() {
                tracing::warn!(error = %err, "Rollback of dropped unit of work failed");
            }
            let _ = session.close();
        }
    }
}

/// Suspending unit of work.
pub struct AsyncUnitOfWork<R, S: AsyncSession> {
    session: AsyncSessionHandle<S>,
    repositories: R,
    state: UnitState,
}

impl<R: AsyncRepositorySet<S>, S: AsyncSession> AsyncUnitOfWork<R, S> {
    pub async fn begin<F>(factory: &F) -> Result<Self, DataError>
    where
        F: AsyncSessionFactory<Session = S>,
    {
        Self::from_session(factory.open().await?)
    }

    /// Failing repository construction drops the session, discarding it.
    pub fn from_session(session: S) -> Result<Self, DataError> {
        Self::from_handle(AsyncSessionHandle::new(session))
    }

    pub fn from_handle(handle: AsyncSessionHandle<S>) -> Result<Self, DataError> {
        let repositories = R::init_repositories(&handle)?;
        tracing::debug!(skip_session_use = R::SKIP_SESSION_USE, "Unit of work started");
        Ok(Self {
            session: handle,
            repositories,
            state: UnitState::Active,
        })
    }

    pub fn repositories(&self) -> &R {
        &self.repositories
    }

    pub fn state(&self) -> UnitState {
        self.state
    }

    pub fn session(&self) -> &AsyncSessionHandle<S> {
        &self.session
    }

    pub async fn commit(&self) -> Result<(), DataError> {
        let mut guard = self.session.lock().await;
        guard.as_mut().ok_or(DataError::SessionClosed)?.commit().await
    }

    pub async fn rollback(&self) -> Result<(), DataError> {
        let mut guard = self.session.lock().await;
        guard.as_mut().ok_or(DataError::SessionClosed)?.rollback().await
    }

    pub async fn finish(&mut self) -> Result<(), DataError> {
        self.ensure_active()?;
        if R::SKIP_SESSION_USE {
            self.state = UnitState::Released;
            tracing::debug!(state = ?self.state, "Unit of work finished");
            return Ok(());
        }
        let outcome = match self.commit().await {
            Ok(()) => {
                self.state = UnitState::Committed;
                Ok(())
            }
            Err(err) => {
                if let Err(rollback) = self.rollback().await {
                    tracing::warn!(error = %rollback, "Rollback after failed commit failed");
                }
                self.state = UnitState::RolledBack;
                Err(err)
            }
        };
        self.close().await;
        tracing::debug!(state = ?self.state, "Unit of work finished");
        outcome
    }

    pub async fn abort(&mut self) -> Result<(), DataError> {
        self.ensure_active()?;
        let outcome = self.rollback().await;
        self.state = UnitState::RolledBack;
        self.close().await;
        tracing::debug!("Unit of work rolled back");
        outcome
    }

    /// Run `f` with a clone of the repositories inside a fresh unit of work.
    pub async fn run<F, T, E, Fut>(factory: &F, f: impl FnOnce(R) -> Fut) -> Result<T, E>
    where
        F: AsyncSessionFactory<Session = S>,
        R: Clone,
        Fut: Future<Output = Result<T, E>>,
        E: From<DataError>,
    {
        let mut unit = Self::begin(factory).await?;
        let result = f(unit.repositories.clone()).await;
        unit.settle(result).await
    }

    /// Like [`run`](Self::run), rolling back with [`DataError::Timeout`]
    /// when `f` does not complete within `timeout`.
    pub async fn run_with_timeout<F, T, E, Fut>(
        factory: &F,
        timeout: Duration,
        f: impl FnOnce(R) -> Fut,
    ) -> Result<T, E>
    where
        F: AsyncSessionFactory<Session = S>,
        R: Clone,
        Fut: Future<Output = Result<T, E>>,
        E: From<DataError>,
    {
        let mut unit = Self::begin(factory).await?;
        let result = match tokio::time::timeout(timeout, f(unit.repositories.clone())).await {
            Ok(result) => result,
            Err(_) => {
                tracing::debug!(timeout_ms = timeout.as_millis() as u64, "Unit of work timed out");
                Err(DataError::Timeout(timeout).into())
            }
        };
        unit.settle(result).await
    }

    async fn settle<T, E>(&mut self, result: Result<T, E>) -> Result<T, E>
    where
        E: From<DataError>,
    {
        match result {
            Ok(value) => {
                self.finish().await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback) = self.abort().await {
                    tracing::warn!(error = %rollback, "Rollback of failed unit of work failed");
                }
                Err(err)
            }
        }
    }

    fn ensure_active(&self) -> Result<(), DataError> {
        match self.state {
            UnitState::Active => Ok(()),
            _ => Err(DataError::SessionClosed),
        }
    }

    async fn close(&mut self) {
        if let Some(mut session) = self.session.release().await {
            if let Err(err) = session.close().await {
                tracing::warn!(error = %err, "Failed to close session");
            }
        }
    }
}

impl<R, S: AsyncSession> Drop for AsyncUnitOfWork<R, S> {
    /// Rollback cannot be awaited here; dropping the session discards its
    /// uncommitted work instead.
    fn drop(&mut self) {
        if self.state != UnitState::Active {
            return;
        }
        tracing::warn!("Unit of work dropped while active, rolling back");
        drop(self.session.try_release());
    }
}
