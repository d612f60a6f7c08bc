use std::time::Duration;
use thiserror::Error;

use crate::services::solver::SolverError;

pub type Result<T> = std::result::Result<T, SelectionError>;

#[derive(Debug, Error)]
pub enum SelectionError {
    #[error("Dependency unavailable: {0}")]
    DependencyUnavailable(String),

    #[error("Malformed input: {0}")]
    MalformedInput(String),

    #[error("Unknown candidate id: {0}")]
    UnknownCandidate(i64),

    #[error("Solver timed out after {0:?}")]
    SolverTimeout(Duration),

    #[error("Solver authentication failed: {0}")]
    SolverAuthFailure(String),

    #[error("Solver returned no result: {0}")]
    SolverNoResult(String),

    #[error("Text generation error: {0}")]
    Generation(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl SelectionError {
    /// Solver outcomes leave the selection untouched, so the caller may retry.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SelectionError::SolverTimeout(_)
                | SelectionError::SolverAuthFailure(_)
                | SelectionError::SolverNoResult(_)
        )
    }
}

impl From<SolverError> for SelectionError {
    fn from(err: SolverError) -> Self {
        match err {
            SolverError::Timeout(elapsed) => SelectionError::SolverTimeout(elapsed),
            SolverError::AuthFailure(msg) => SelectionError::SolverAuthFailure(msg),
            SolverError::NoResult(msg) => SelectionError::SolverNoResult(msg),
            SolverError::Transport(msg) => {
                SelectionError::SolverNoResult(format!("transport: {}", msg))
            }
        }
    }
}

impl From<serde_json::Error> for SelectionError {
    fn from(err: serde_json::Error) -> Self {
        SelectionError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for SelectionError {
    fn from(err: std::io::Error) -> Self {
        SelectionError::Persistence(err.to_string())
    }
}

impl From<reqwest::Error> for SelectionError {
    fn from(err: reqwest::Error) -> Self {
        SelectionError::Generation(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_solver_errors_are_recoverable() {
        let timeout: SelectionError = SolverError::Timeout(Duration::from_millis(3000)).into();
        assert!(matches!(timeout, SelectionError::SolverTimeout(_)));
        assert!(timeout.is_recoverable());

        let auth: SelectionError = SolverError::AuthFailure("bad token".to_string()).into();
        assert!(auth.is_recoverable());

        let transport: SelectionError = SolverError::Transport("reset".to_string()).into();
        assert!(matches!(transport, SelectionError::SolverNoResult(_)));
    }

    #[test]
    fn test_input_errors_are_not_recoverable() {
        assert!(!SelectionError::MalformedInput("x".to_string()).is_recoverable());
        assert!(!SelectionError::DependencyUnavailable("solver".to_string()).is_recoverable());
    }
}
