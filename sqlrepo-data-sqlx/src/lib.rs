//! # sqlrepo-data-sqlx: SQLx backend for sqlrepo
//!
//! Runs the statements built by `sqlrepo-data` repositories against a
//! real database through [SQLx](https://github.com/launchbadge/sqlx).
//!
//! A unit of work gets one [`SqlxSession`] from a [`SqlxSessionFactory`].
//! The session begins its transaction with the first statement and keeps
//! it until the unit commits or rolls back. Factories are built from a
//! pool or from any state implementing [`HasPool`]. Driver failures reach
//! callers as `DataError` through [`SqlxErrorExt`].
//!
//! Only SQLite is wired up, behind the default `sqlite` feature.
//!
//! # Quick start
//!
//! ```ignore
//! use sqlrepo_data::prelude::*;
//! use sqlrepo_data_sqlx::SqlxSessionFactory;
//!
//! let pool = SqlitePool::connect("sqlite::memory:").await?;
//! let factory = SqlxSessionFactory::new(pool);
//!
//! let title = AsyncUnitOfWork::<Library<_>, _>::run(&factory, |lib| async move {
//!     let book = lib.books.create(record! { "title" => "Dune" }).await?;
//!     Ok::<_, DataError>(book.title)
//! })
//! .await?;
//! ```
//!
//! SQLite's `LIKE` ignores ASCII case on its own, so case-sensitive search
//! terms still match regardless of case on this backend.

pub mod error;
pub mod pool;
#[cfg(feature = "sqlite")]
mod row;
#[cfg(feature = "sqlite")]
pub mod session;

pub use error::{SqlxErrorExt, SqlxResult};
pub use pool::HasPool;
#[cfg(feature = "sqlite")]
pub use session::{SqlxSession, SqlxSessionFactory};

/// Re-exports of the most commonly used types from both `sqlrepo-data` and this crate.
pub mod prelude {
    pub use crate::{HasPool, SqlxErrorExt};
    #[cfg(feature = "sqlite")]
    pub use crate::{SqlxSession, SqlxSessionFactory};
    pub use sqlrepo_data::prelude::*;
}
