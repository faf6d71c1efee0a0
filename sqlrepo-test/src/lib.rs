//! Test tooling for sqlrepo: an in-memory transactional database whose
//! sessions implement both session flavors, plus fixture entities.

mod db;
mod eval;
pub mod fixtures;

pub use db::{
    ConstraintViolation, InjectedFailure, MemoryDatabase, MemorySession, MemorySessionFactory,
    Operation, SessionStats,
};
pub use fixtures::{Author, Book, Publisher};

use sqlrepo_data::entity::Record;
use sqlrepo_data::error::DataError;
use sqlrepo_data::record;

/// Install a `tracing` subscriber honoring `RUST_LOG`; repeated calls are
/// no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("sqlrepo=debug")),
        )
        .with_test_writer()
        .try_init();
}

/// A database holding two publishers, three authors and five books.
///
/// | publisher | authors       | books                              |
/// |-----------|---------------|------------------------------------|
/// | 1 Orbit   | 1 Ann, 2 Ben  | Ann: 1 Dune (412), 2 Emma (230)    |
/// |           |               | Ben: 3 Fall (120)                  |
/// | 2 Tor     | 3 Cid (inactive) | Cid: 4 Gulf (88, archived)      |
/// | -         | -             | 5 Halo (300, no author)            |
pub fn library() -> Result<MemoryDatabase, DataError> {
    let db = MemoryDatabase::new();
    db.seed::<Publisher>([
        record! { "name" => "Orbit", "country" => "UK" },
        record! { "name" => "Tor", "country" => "US" },
    ])?;
    db.seed::<Author>([
        record! { "name" => "Ann", "email" => "ann@example.com", "active" => true, "publisher_id" => 1 },
        record! { "name" => "Ben", "active" => true, "publisher_id" => 1 },
        record! { "name" => "Cid", "active" => false, "publisher_id" => 2 },
    ])?;
    db.seed::<Book>(books())?;
    Ok(db)
}

fn books() -> Vec<Record> {
    vec![
        record! { "title" => "Dune", "pages" => 412, "price" => 9.5, "archived" => false, "author_id" => 1 },
        record! { "title" => "Emma", "pages" => 230, "price" => 7.0, "archived" => false, "author_id" => 1 },
        record! { "title" => "Fall", "pages" => 120, "archived" => false, "author_id" => 2 },
        record! { "title" => "Gulf", "pages" => 88, "price" => 4.25, "archived" => true, "author_id" => 3 },
        record! { "title" => "Halo", "pages" => 300, "archived" => false },
    ]
}
