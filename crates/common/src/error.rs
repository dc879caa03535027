use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Not authorized: {0}")]
    Authorization(String),

    #[error("Object storage error: {0}")]
    Storage(String),

    #[error("Metric processing error: {0}")]
    Processing(String),

    #[error("Persistence error: {0}")]
    Persistence(String),
}

impl Error {
    /// Wrap a database failure crossing into the domain taxonomy
    pub fn persistence(err: impl std::fmt::Display) -> Self {
        Error::Persistence(err.to_string())
    }

    /// Errors that are the caller's fault rather than the system's
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::Validation(_) | Error::NotFound(_) | Error::Authorization(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persistence_wraps_database_failures() {
        let err = Error::persistence(anyhow::anyhow!("connection reset"));
        assert!(matches!(err, Error::Persistence(_)));
        assert!(!err.is_client_error());
        assert!(err.to_string().contains("connection reset"));
    }

    #[test]
    fn test_client_errors() {
        assert!(Error::Validation("bad input".into()).is_client_error());
        assert!(Error::NotFound("Shelf".into()).is_client_error());
        assert!(Error::Authorization("no role".into()).is_client_error());
        assert!(!Error::Storage("put failed".into()).is_client_error());
        assert!(!Error::Processing("timeout".into()).is_client_error());
    }
}
