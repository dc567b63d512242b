//! Error types for Meshplane

use thiserror::Error;

/// Result type alias using Meshplane Error
pub type Result<T> = std::result::Result<T, Error>;

/// Meshplane error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Resource not found: {kind} with id {id}")]
    NotFound { kind: String, id: String },

    #[error("{context}: {}", join_errors(.errors))]
    Aggregate { context: String, errors: Vec<Error> },

    #[error("No free listen port left on router {router}")]
    PortsExhausted { router: String },

    #[error("No free interface name left on router {router}")]
    NamesExhausted { router: String },

    #[error("Job submission failed: {0}")]
    JobSubmission(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

fn join_errors(errors: &[Error]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl Error {
    pub fn not_found(kind: &str, id: impl Into<String>) -> Self {
        Error::NotFound {
            kind: kind.to_string(),
            id: id.into(),
        }
    }

    /// Collapse collected sub-operation failures.
    ///
    /// Returns `Ok(())` when nothing failed, the single error when exactly one
    /// failed, and an `Aggregate` otherwise.
    pub fn aggregate(context: impl Into<String>, mut errors: Vec<Error>) -> Result<()> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(Error::Aggregate {
                context: context.into(),
                errors,
            }),
        }
    }

    /// HTTP-equivalent status for the error category
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Validation(_) | Error::Crypto(_) => 400,
            Error::NotFound { .. } => 404,
            Error::Conflict(_) => 409,
            _ => 500,
        }
    }

    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate_collapses() {
        assert!(Error::aggregate("nothing", vec![]).is_ok());

        let single = Error::aggregate("one", vec![Error::Conflict("dup".into())]).unwrap_err();
        assert!(matches!(single, Error::Conflict(_)));

        let many = Error::aggregate(
            "delete router r1",
            vec![
                Error::Internal("a".into()),
                Error::not_found("iface", "i1"),
            ],
        )
        .unwrap_err();
        assert_eq!(many.status_code(), 500);
        let msg = many.to_string();
        assert!(msg.starts_with("delete router r1: "));
        assert!(msg.contains("iface with id i1"));
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(Error::Validation("x".into()).status_code(), 400);
        assert_eq!(Error::not_found("router", "r").status_code(), 404);
        assert_eq!(Error::Conflict("x".into()).status_code(), 409);
        assert!(!Error::PortsExhausted { router: "r".into() }.is_client_error());
    }
}
