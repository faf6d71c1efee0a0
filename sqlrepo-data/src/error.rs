use std::time::Duration;

/// Coarse classification of [`DataError`] values.
///
/// Lets callers (and adapter layers such as HTTP error mappers) branch on the
/// kind of failure without matching every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed filter specification, unknown field/operator/strategy,
    /// invalid values or options.
    Configuration,
    /// `get` matched no row.
    NotFound,
    /// `get` matched more than one row.
    MultipleResults,
    /// A relationship hop in a nested path could not be resolved.
    PathResolution,
    /// Disable-related repository options are missing.
    AttributeConfiguration,
    /// The session failed while executing, flushing, committing or rolling back.
    Transaction,
}

/// Errors that can occur in the data layer.
#[derive(Debug)]
pub enum DataError {
    /// Caller misuse detected while building a query or statement.
    Configuration(String),
    /// A field name does not exist on the entity.
    FieldResolution { entity: String, field: String },
    /// A hop of a nested path is neither a relationship nor a field of the
    /// entity reached by the previous hops.
    PathResolution {
        entity: String,
        path: String,
        segment: String,
    },
    NotFound(String),
    /// `count` is the number of distinct rows observed (at least 2).
    MultipleResults { entity: String, count: usize },
    /// Repository options required by an operation are not set.
    Attribute(String),
    Database(Box<dyn std::error::Error + Send + Sync>),
    /// The session behind a handle was released (unit of work exited).
    SessionClosed,
    Timeout(Duration),
    Other(String),
}

impl DataError {
    /// Construct a `Database` variant from any error type.
    ///
    /// Used by session backends (e.g. `sqlrepo-data-sqlx`) to wrap
    /// driver-specific errors.
    pub fn database(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        DataError::Database(Box::new(err))
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        DataError::Configuration(msg.into())
    }

    pub fn field(entity: &str, field: &str) -> Self {
        DataError::FieldResolution {
            entity: entity.to_string(),
            field: field.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            DataError::Configuration(_) | DataError::FieldResolution { .. } => {
                ErrorKind::Configuration
            }
            DataError::PathResolution { .. } => ErrorKind::PathResolution,
            DataError::NotFound(_) => ErrorKind::NotFound,
            DataError::MultipleResults { .. } => ErrorKind::MultipleResults,
            DataError::Attribute(_) => ErrorKind::AttributeConfiguration,
            DataError::Database(_)
            | DataError::SessionClosed
            | DataError::Timeout(_)
            | DataError::Other(_) => ErrorKind::Transaction,
        }
    }

    pub fn is_configuration(&self) -> bool {
        self.kind() == ErrorKind::Configuration
    }
}

impl std::fmt::Display for DataError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataError::Configuration(msg) => write!(f, "Configuration error: {msg}"),
            DataError::FieldResolution { entity, field } => {
                write!(f, "Unknown field '{field}' on entity {entity}")
            }
            DataError::PathResolution {
                entity,
                path,
                segment,
            } => write!(
                f,
                "Cannot resolve '{segment}' of path '{path}' on entity {entity}"
            ),
            DataError::NotFound(msg) => write!(f, "Not found: {msg}"),
            DataError::MultipleResults { entity, count } => {
                write!(f, "Expected one {entity}, found {count} or more")
            }
            DataError::Attribute(msg) => write!(f, "Repository attribute error: {msg}"),
            DataError::Database(err) => write!(f, "Database error: {err}"),
            DataError::SessionClosed => write!(f, "Session is closed"),
            DataError::Timeout(after) => write!(f, "Operation timed out after {after:?}"),
            DataError::Other(msg) => write!(f, "Data error: {msg}"),
        }
    }
}

impl std::error::Error for DataError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DataError::Database(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}
