use sqlrepo_data::DataError;

/// Maps driver errors onto [`DataError`].
///
/// `DataError` is defined in `sqlrepo-data`, which knows nothing of sqlx, so
/// the conversion is a method: `.map_err(SqlxErrorExt::into_data_error)`.
/// Missing rows become `NotFound`; a closed pool means the session can no
/// longer be used. Everything else, constraint violations included, is a
/// database error.
pub trait SqlxErrorExt {
    fn into_data_error(self) -> DataError;
}

impl SqlxErrorExt for sqlx::Error {
    fn into_data_error(self) -> DataError {
        match &self {
            sqlx::Error::RowNotFound => DataError::NotFound("no row returned".into()),
            sqlx::Error::PoolClosed => DataError::SessionClosed,
            sqlx::Error::PoolTimedOut => DataError::Other("connection pool timed out".into()),
            _ => DataError::database(self),
        }
    }
}

pub type SqlxResult<T> = Result<T, DataError>;
