//! sqlrepo: generic repositories, filter conversion and unit of work.
//!
//! The repository core (entities, filters, load options, repositories and
//! units of work) is always available and is also re-exported at the crate
//! root. Backends are opt-in:
//!
//! | Feature     | Brings in                                              |
//! |-------------|--------------------------------------------------------|
//! | `sqlx`      | `SqlxSession` and `SqlxSessionFactory` over a sqlx pool |
//! | `sqlite`    | `sqlx` with the SQLite driver enabled                  |
//! | `test-util` | `MemoryDatabase`, an in-memory session engine          |
//! | `full`      | `sqlx` and `test-util`                                 |
//!
//! ```ignore
//! use sqlrepo::prelude::*;
//!
//! let pool = SqlitePool::connect("sqlite::memory:").await?;
//! let factory = SqlxSessionFactory::new(pool);
//! let titles = AsyncUnitOfWork::<Shelf, _>::run(&factory, |shelf| async move {
//!     let books = shelf.books.list(ListOptions::new().order_by("title")).await?;
//!     DataResult::Ok(books.into_iter().map(|b| b.title).collect::<Vec<_>>())
//! })
//! .await?;
//! ```

pub use sqlrepo_data;
pub use sqlrepo_data::*;

#[cfg(feature = "sqlx")]
pub use sqlrepo_data_sqlx;

#[cfg(feature = "test-util")]
pub use sqlrepo_test;

pub mod types {
    /// Result of a repository or unit-of-work operation.
    pub type DataResult<T> = Result<T, sqlrepo_data::DataError>;
}

/// Core types plus those of every enabled backend.
pub mod prelude {
    pub use crate::types::*;
    pub use sqlrepo_data::prelude::*;

    #[cfg(feature = "sqlx")]
    pub use sqlrepo_data_sqlx::prelude::*;
}
