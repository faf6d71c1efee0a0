use std::time::Duration;

use sqlrepo_data::error::{DataError, ErrorKind};
use sqlrepo_data::repository::{AsyncRepository, Repository};
use sqlrepo_data::session::{AsyncSession, AsyncSessionHandle, Session, SessionHandle};
use sqlrepo_data::uow::{AsyncRepositorySet, AsyncUnitOfWork, RepositorySet, UnitOfWork, UnitState};
use sqlrepo_data::{filter, record};
use sqlrepo_test::{library, Author, Book, MemorySession, Operation};

struct Library<S: Session> {
    authors: Repository<Author, S>,
    books: Repository<Book, S>,
}

impl<S: Session> RepositorySet<S> for Library<S> {
    fn init_repositories(session: &SessionHandle<S>) -> Result<Self, DataError> {
        Ok(Self {
            authors: Repository::new(session.clone())?,
            books: Repository::new(session.clone())?,
        })
    }
}

struct ReadOnly<S: Session> {
    books: Repository<Book, S>,
}

impl<S: Session> RepositorySet<S> for ReadOnly<S> {
    const SKIP_SESSION_USE: bool = true;

    fn init_repositories(session: &SessionHandle<S>) -> Result<Self, DataError> {
        Ok(Self {
            books: Repository::new(session.clone())?,
        })
    }
}

struct AsyncLibrary<S: AsyncSession> {
    authors: AsyncRepository<Author, S>,
    books: AsyncRepository<Book, S>,
}

impl<S: AsyncSession> Clone for AsyncLibrary<S> {
    fn clone(&self) -> Self {
        Self {
            authors: self.authors.clone(),
            books: self.books.clone(),
        }
    }
}

impl<S: AsyncSession> AsyncRepositorySet<S> for AsyncLibrary<S> {
    fn init_repositories(session: &AsyncSessionHandle<S>) -> Result<Self, DataError> {
        Ok(Self {
            authors: AsyncRepository::new(session.clone())?,
            books: AsyncRepository::new(session.clone())?,
        })
    }
}

#[derive(Debug, PartialEq)]
enum AppError {
    Data(String),
    Rejected(&'static str),
}

impl From<DataError> for AppError {
    fn from(err: DataError) -> Self {
        AppError::Data(err.to_string())
    }
}

struct AsyncReadOnly<S: AsyncSession> {
    books: AsyncRepository<Book, S>,
}

impl<S: AsyncSession> AsyncRepositorySet<S> for AsyncReadOnly<S> {
    const SKIP_SESSION_USE: bool = true;

    fn init_repositories(session: &AsyncSessionHandle<S>) -> Result<Self, DataError> {
        Ok(Self {
            books: AsyncRepository::new(session.clone())?,
        })
    }
}

type Uow = UnitOfWork<Library<MemorySession>, MemorySession>;
type AsyncUow = AsyncUnitOfWork<AsyncLibrary<MemorySession>, MemorySession>;

// ── Blocking ────────────────────────────────────────────────────────────

#[test]
fn normal_exit_commits_flushed_work() {
    let db = library().unwrap();
    let id = Uow::run(&db.factory(), |lib| {
        let author = lib.authors.create(record! { "name" => "Dee" })?;
        lib.books
            .create(record! { "title" => "Kite", "author_id" => author.id })
            .map(|b| b.id)
    })
    .unwrap();

    assert_eq!(id, 6);
    assert_eq!(db.len::<Author>(), 4);
    assert_eq!(db.len::<Book>(), 6);
    let stats = db.stats();
    assert_eq!((stats.flushes, stats.commits, stats.rollbacks), (2, 1, 0));
    assert_eq!(stats.opened, stats.closed);
}

#[test]
fn failure_rolls_back_and_keeps_the_original_error() {
    let db = library().unwrap();
    let result: Result<(), AppError> = Uow::run(&db.factory(), |lib| {
        lib.authors.create(record! { "name" => "Dee" })?;
        Err(AppError::Rejected("quota exceeded"))
    });

    assert_eq!(result, Err(AppError::Rejected("quota exceeded")));
    assert_eq!(db.len::<Author>(), 3);
    assert_eq!(db.stats().rollbacks, 1);
}

#[test]
fn data_errors_pass_through_unchanged() {
    let db = library().unwrap();
    let err = Uow::run(&db.factory(), |lib| {
        lib.books.update(filter! { "author_id" => 1 }, record! { "pages" => 1 })?;
        lib.books.get(filter! { "author_id" => 1 })
    })
    .err()
    .unwrap();

    assert_eq!(err.kind(), ErrorKind::MultipleResults);
    let pages: Vec<_> = db.rows::<Book>().iter().map(|r| r.get("pages").cloned()).collect();
    assert!(!pages.contains(&Some(sqlrepo_data::value::Value::Int(1))));
}

#[test]
fn explicit_commit_inside_the_scope_is_durable() {
    let db = library().unwrap();
    let mut uow = Uow::begin(&db.factory()).unwrap();
    uow.repositories().authors.create(record! { "name" => "Dee" }).unwrap();
    uow.commit().unwrap();
    uow.repositories().authors.create(record! { "name" => "Eve" }).unwrap();
    assert_eq!(uow.state(), UnitState::Active);

    uow.abort().unwrap();
    assert_eq!(uow.state(), UnitState::RolledBack);
    assert_eq!(db.len::<Author>(), 4);
}

#[test]
fn repositories_are_unusable_after_exit() {
    let db = library().unwrap();
    let mut uow = Uow::begin(&db.factory()).unwrap();
    let books = uow.repositories().books.clone();
    uow.finish().unwrap();
    assert_eq!(uow.state(), UnitState::Committed);

    assert!(matches!(books.count(()), Err(DataError::SessionClosed)));
    assert!(matches!(uow.finish(), Err(DataError::SessionClosed)));
}

#[test]
fn skipped_session_use_neither_commits_nor_rolls_back() {
    let db = library().unwrap();
    let mut uow = UnitOfWork::<ReadOnly<_>, _>::begin(&db.factory()).unwrap();
    assert_eq!(uow.repositories().books.count(()).unwrap(), 5);
    uow.finish().unwrap();

    assert_eq!(uow.state(), UnitState::Released);
    assert_eq!(db.stats().commits, 0);
    assert_eq!(db.stats().rollbacks, 0);
    assert_eq!(db.stats().closed, 0);
    assert!(uow.session().is_open());
}

#[test]
fn skipped_session_use_leaves_staged_work_to_the_owner() {
    let db = library().unwrap();
    let handle = SessionHandle::new(db.session());
    let mut uow = UnitOfWork::<ReadOnly<_>, _>::from_handle(handle.clone()).unwrap();
    uow.repositories().books.create(record! { "title" => "Kite" }).unwrap();
    uow.finish().unwrap();
    assert_eq!(db.len::<Book>(), 5);
    assert_eq!(uow.repositories().books.count(()).unwrap(), 6);

    handle.with(|s| Session::commit(s)).unwrap();
    assert_eq!(db.len::<Book>(), 6);
    assert_eq!(db.stats().rollbacks, 0);
}

#[test]
fn skipped_session_use_still_rolls_back_on_failure() {
    let db = library().unwrap();
    let result = UnitOfWork::<ReadOnly<_>, _>::run(&db.factory(), |ro| {
        ro.books.delete(())?;
        ro.books.get(filter! { "id" => 1 })
    });
    assert_eq!(result.err().map(|e| e.kind()), Some(ErrorKind::NotFound));
    assert_eq!(db.stats().rollbacks, 1);
    assert_eq!(db.len::<Book>(), 5);
}

#[test]
fn failed_commit_is_rolled_back_and_reported() {
    let db = library().unwrap();
    db.fail_on(Operation::Commit);
    let err = Uow::run(&db.factory(), |lib| lib.authors.create(record! { "name" => "Dee" }))
        .err()
        .unwrap();

    assert!(matches!(err, DataError::Database(_)));
    assert_eq!(db.len::<Author>(), 3);
    assert_eq!(db.stats().rollbacks, 1);
}

#[test]
fn dropping_an_active_unit_rolls_back() {
    let db = library().unwrap();
    {
        let uow = Uow::begin(&db.factory()).unwrap();
        uow.repositories().authors.create(record! { "name" => "Dee" }).unwrap();
    }
    assert_eq!(db.len::<Author>(), 3);
    assert_eq!(db.stats().rollbacks, 1);
}

// ── Suspending ──────────────────────────────────────────────────────────

#[tokio::test]
async fn async_run_commits_on_success() {
    let db = library().unwrap();
    let title = AsyncUow::run(&db.factory(), |lib| async move {
        let author = lib.authors.create(record! { "name" => "Dee" }).await?;
        let book = lib
            .books
            .create(record! { "title" => "Kite", "author_id" => author.id })
            .await?;
        Ok::<_, DataError>(book.title)
    })
    .await
    .unwrap();

    assert_eq!(title, "Kite");
    assert_eq!(db.len::<Book>(), 6);
    assert_eq!(db.stats().commits, 1);
}

#[tokio::test]
async fn async_failure_rolls_back() {
    let db = library().unwrap();
    let result: Result<(), AppError> = AsyncUow::run(&db.factory(), |lib| async move {
        lib.books.delete(()).await?;
        Err(AppError::Rejected("nope"))
    })
    .await;

    assert_eq!(result, Err(AppError::Rejected("nope")));
    assert_eq!(db.len::<Book>(), 5);
}

#[tokio::test]
async fn timeout_rolls_back_with_timeout_error() {
    let db = library().unwrap();
    db.set_latency(Some(Duration::from_millis(50)));
    let err = AsyncUow::run_with_timeout(&db.factory(), Duration::from_millis(70), |lib| async move {
        lib.books.delete(()).await?;
        lib.authors.delete(()).await?;
        Ok::<_, DataError>(())
    })
    .await
    .unwrap_err();

    assert!(matches!(err, DataError::Timeout(_)));
    assert_eq!(db.len::<Book>(), 5);
    assert_eq!(db.len::<Author>(), 3);
}

#[tokio::test]
async fn dropping_an_async_unit_discards_work() {
    let db = library().unwrap();
    {
        let uow = AsyncUow::begin(&db.factory()).await.unwrap();
        uow.repositories().authors.create(record! { "name" => "Dee" }).await.unwrap();
        assert!(uow.session().is_open().await);
    }
    assert_eq!(db.len::<Author>(), 3);

    let mut uow = AsyncUow::begin(&db.factory()).await.unwrap();
    uow.repositories().books.delete(filter! { "id" => 5 }).await.unwrap();
    uow.finish().await.unwrap();
    assert_eq!(uow.state(), UnitState::Committed);
    assert_eq!(db.len::<Book>(), 4);
}

#[tokio::test]
async fn async_skipped_session_use_keeps_the_session_open() {
    let db = library().unwrap();
    let handle = AsyncSessionHandle::new(db.session());
    let mut uow = AsyncUnitOfWork::<AsyncReadOnly<_>, _>::from_handle(handle.clone()).unwrap();
    uow.repositories().books.delete(filter! { "id" => 5 }).await.unwrap();
    uow.finish().await.unwrap();

    assert_eq!(uow.state(), UnitState::Released);
    assert!(handle.is_open().await);
    assert_eq!(db.stats().rollbacks, 0);
    assert_eq!(db.stats().closed, 0);
    assert_eq!(db.len::<Book>(), 5);

    let mut guard = handle.lock().await;
    AsyncSession::commit(guard.as_mut().unwrap()).await.unwrap();
    drop(guard);
    assert_eq!(db.len::<Book>(), 4);
}
