//! Error types for the pattern-fragment engine

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PfError>;

#[derive(Error, Debug)]
pub enum PfError {
    #[error("Unsupported query: {0}")]
    UnsupportedQuery(String),

    #[error("Unknown type: {0}")]
    UnknownType(String),

    #[error("Taxonomy error: {0}")]
    Taxonomy(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Corrupt stored value: {0}")]
    Corrupt(String),

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl PfError {
    /// Get error code for wire protocol
    pub fn code(&self) -> &'static str {
        match self {
            PfError::UnsupportedQuery(_) => "UNSUPPORTED_QUERY",
            PfError::UnknownType(_) => "UNKNOWN_TYPE",
            PfError::Store(_) | PfError::Redis(_) => "STORE_UNAVAILABLE",
            PfError::Timeout(_) => "TIMEOUT",
            _ => "INTERNAL_ERROR",
        }
    }

    /// Whether the error was caused by the request rather than the server.
    pub fn is_client_error(&self) -> bool {
        matches!(self, PfError::UnsupportedQuery(_) | PfError::UnknownType(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(PfError::UnsupportedQuery("x".into()).code(), "UNSUPPORTED_QUERY");
        assert_eq!(PfError::UnknownType("biolink:Nope".into()).code(), "UNKNOWN_TYPE");
        assert_eq!(PfError::Store("down".into()).code(), "STORE_UNAVAILABLE");
        assert_eq!(PfError::Timeout("get".into()).code(), "TIMEOUT");
        assert_eq!(PfError::Corrupt("odd list".into()).code(), "INTERNAL_ERROR");
    }

    #[test]
    fn test_client_errors() {
        assert!(PfError::UnsupportedQuery("two edges".into()).is_client_error());
        assert!(PfError::UnknownType("biolink:Nope".into()).is_client_error());
        assert!(!PfError::Store("down".into()).is_client_error());
    }
}
