use sqlx::{Database, Pool};

/// Access to the connection pool owned by an application state.
///
/// [`SqlxSessionFactory::from_state`](crate::SqlxSessionFactory::from_state)
/// takes any implementor:
///
/// ```ignore
/// impl HasPool<Sqlite> for MyState {
///     fn pool(&self) -> &Pool<Sqlite> {
///         &self.pool
///     }
/// }
///
/// let factory = SqlxSessionFactory::from_state(&state);
/// ```
pub trait HasPool<DB: Database> {
    fn pool(&self) -> &Pool<DB>;
}

impl<DB: Database> HasPool<DB> for Pool<DB> {
    fn pool(&self) -> &Pool<DB> {
        self
    }
}
