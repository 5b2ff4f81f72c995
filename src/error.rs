use thiserror::Error;

use crate::template::TemplateError;

#[derive(Debug, Error)]
pub enum NobleError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error("Language model error: {0}")]
    UpstreamModel(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid content: {0}")]
    InvalidContent(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl NobleError {
    pub fn not_found(what: impl std::fmt::Display, id: impl std::fmt::Display) -> Self {
        NobleError::NotFound(format!("{} '{}'", what, id))
    }

    /// Stable machine-readable code for HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            NobleError::NotFound(_) => "NOT_FOUND",
            NobleError::Unauthorized(_) => "UNAUTHORIZED",
            NobleError::Template(_) => "TEMPLATE_ERROR",
            NobleError::UpstreamModel(_) => "UPSTREAM_MODEL_ERROR",
            NobleError::Conflict(_) => "CONFLICT",
            NobleError::InvalidContent(_) => "INVALID_CONTENT",
            NobleError::Storage(_) => "STORAGE_ERROR",
            NobleError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<rusqlite::Error> for NobleError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, msg)
                if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                    || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY =>
            {
                NobleError::Conflict(msg.clone().unwrap_or_else(|| e.to_string()))
            }
            _ => NobleError::Storage(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for NobleError {
    fn from(err: serde_json::Error) -> Self {
        NobleError::InvalidContent(err.to_string())
    }
}

impl From<anthropic_messages::AnthropicError> for NobleError {
    fn from(err: anthropic_messages::AnthropicError) -> Self {
        NobleError::UpstreamModel(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, NobleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_names_the_entity() {
        let err = NobleError::not_found("Exercise", "ex-1");
        assert_eq!(err.to_string(), "Exercise 'ex-1' not found");
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[test]
    fn unique_violation_maps_to_conflict() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (k TEXT UNIQUE); INSERT INTO t VALUES ('a');")
            .unwrap();
        let err: NobleError = conn
            .execute("INSERT INTO t VALUES ('a')", [])
            .unwrap_err()
            .into();
        assert!(matches!(err, NobleError::Conflict(_)));
    }

    #[test]
    fn other_sqlite_errors_map_to_storage() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let err: NobleError = conn
            .execute("INSERT INTO missing VALUES (1)", [])
            .unwrap_err()
            .into();
        assert!(matches!(err, NobleError::Storage(_)));
    }
}
