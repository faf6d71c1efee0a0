//! Generic repositories over a pluggable session.
//!
//! Filters are plain data ([`FilterSpec`]) converted into predicate trees
//! ([`Expr`]) against static entity metadata; repositories assemble those
//! into statements and hand them to a [`Session`] or [`AsyncSession`].

pub mod config;
pub mod entity;
pub mod error;
pub mod filter;
pub mod load;
pub mod page;
pub mod query;
pub mod repository;
pub mod session;
pub mod sql;
pub mod uow;
pub mod value;

#[cfg(test)]
mod testing;

pub use config::{AllowedNoneFields, ConfigError, DisableFieldType, RepositoryConfig, RepositorySettings};
pub use entity::{Cardinality, Entity, EntityMeta, FieldKind, FieldMeta, Record, RelationMeta};
pub use error::{DataError, ErrorKind};
pub use filter::{Clause, CompareOp, Expr, FilterSpec, FilterStrategy};
pub use load::{LoadOptions, LoadStrategy};
pub use page::{Page, Pageable};
pub use query::{Direction, Join, OrderBy, Search};
pub use repository::{AsyncRepository, ListOptions, Repository};
pub use session::{
    AsyncSession, AsyncSessionFactory, AsyncSessionHandle, Session, SessionFactory, SessionHandle,
};
pub use sql::{Dialect, IdentifierPolicy, SqlRenderer, SqlStatement};
pub use uow::{AsyncRepositorySet, AsyncUnitOfWork, RepositorySet, UnitOfWork, UnitState};
pub use value::{FromValue, Value};

pub mod prelude {
    //! Re-exports of the most commonly used data types.
    pub use crate::{
        filter, record, AsyncRepository, AsyncRepositorySet, AsyncSession, AsyncSessionHandle,
        AsyncUnitOfWork, Clause, DataError, Entity, EntityMeta, FieldKind, FieldMeta, FilterSpec,
        FilterStrategy, ListOptions, LoadOptions, LoadStrategy, Page, Pageable, Record,
        RelationMeta, Repository, RepositoryConfig, RepositorySet, Search, Session, SessionHandle,
        UnitOfWork, Value,
    };
}
