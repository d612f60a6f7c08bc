/// Solver Gateway Module
///
/// Boundary to whatever resolves a [`QuboObjective`] into a binary selection.
/// The search algorithm is pluggable; implementations only have to honour the
/// contract below.
///
/// # Contract
/// - The returned assignment covers every candidate id in the objective
/// - Timeout, authentication failure and "no result" are distinct outcomes
/// - A failed solve never yields a partial assignment
///
/// # Implementations
/// - [`LocalAnnealer`]: in-process exact enumeration / simulated annealing
/// - [`RemoteAnnealingGateway`]: external annealing service over HTTP
pub mod local;
pub mod remote;

pub use local::{LocalAnnealer, LocalSolverConfig};
pub use remote::RemoteAnnealingGateway;

use crate::services::objective::QuboObjective;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SolverError {
    #[error("Solver timed out after {0:?}")]
    Timeout(Duration),

    #[error("Solver authentication failed: {0}")]
    AuthFailure(String),

    #[error("Solver returned no feasible result: {0}")]
    NoResult(String),

    #[error("Solver transport error: {0}")]
    Transport(String),
}

/// Access token for the solving backend
#[derive(Clone, Default, PartialEq, Eq)]
pub struct SolverCredentials {
    pub token: String,
}

impl SolverCredentials {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.token.trim().is_empty()
    }
}

impl fmt::Debug for SolverCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SolverCredentials")
            .field("token", &if self.is_empty() { "<empty>" } else { "<redacted>" })
            .finish()
    }
}

/// Candidate id → selected
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Assignment(BTreeMap<i64, bool>);

impl Assignment {
    /// Bind solver bits back to candidate ids by variable index.
    pub fn from_bits(variable_ids: &[i64], bits: &[bool]) -> Self {
        Self(
            variable_ids
                .iter()
                .copied()
                .zip(bits.iter().copied())
                .collect(),
        )
    }

    pub fn get(&self, id: i64) -> Option<bool> {
        self.0.get(&id).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn selected_ids(&self) -> Vec<i64> {
        self.0
            .iter()
            .filter(|(_, on)| **on)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Bits in the objective's variable order; `None` if any id is missing.
    pub fn to_bits(&self, variable_ids: &[i64]) -> Option<Vec<bool>> {
        variable_ids.iter().map(|id| self.get(*id)).collect()
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SolverGateway: Send + Sync {
    /// Minimize the objective within `timeout`.
    async fn solve(
        &self,
        objective: &QuboObjective,
        credentials: &SolverCredentials,
        timeout: Duration,
    ) -> Result<Assignment, SolverError>;

    fn name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assignment_binding() {
        let assignment = Assignment::from_bits(&[10, 11, 12], &[true, false, true]);

        assert_eq!(assignment.len(), 3);
        assert_eq!(assignment.get(11), Some(false));
        assert_eq!(assignment.selected_ids(), vec![10, 12]);
        assert_eq!(
            assignment.to_bits(&[12, 10, 11]),
            Some(vec![true, true, false])
        );
        assert_eq!(assignment.to_bits(&[10, 99]), None);
    }

    #[test]
    fn test_credentials_debug_is_redacted() {
        let creds = SolverCredentials::new("AE/secret-token");
        let printed = format!("{:?}", creds);
        assert!(!printed.contains("secret"));
        assert!(SolverCredentials::new("  ").is_empty());
    }
}
