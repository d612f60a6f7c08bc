// ============================================
// Selection Session (選稿會話)
// ============================================
//
// One candidate batch, its rating history and the target profile.
//
//   Generated ──rate──▶ Rated ──optimize──▶ Optimized ─┐
//       ▲                                      │ ▲      │ optimize again
//       └──────────── reset (keeps selection) ─┘ └──────┘
//
// A new generation round replaces the batch and clears history + ratings.

use crate::error::{Result, SelectionError};
use crate::models::{validate_batch, CandidateItem, Rating, TargetProfile};
use crate::services::history::HistoryStore;
use crate::services::solver::{Assignment, SolverCredentials};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Generated,
    Rated,
    Optimized,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: Uuid,
    pub candidates: Vec<CandidateItem>,
    pub history: HistoryStore,
    pub profile: TargetProfile,
    pub credentials: SolverCredentials,
}

impl Default for Session {
    fn default() -> Self {
        Self::new(TargetProfile::default())
    }
}

impl Session {
    pub fn new(profile: TargetProfile) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            candidates: Vec::new(),
            history: HistoryStore::new(),
            profile,
            credentials: SolverCredentials::default(),
        }
    }

    pub fn with_credentials(mut self, credentials: SolverCredentials) -> Self {
        self.credentials = credentials;
        self
    }

    /// Start a new generation round: fresh batch, no ratings, no history.
    pub fn replace_batch(&mut self, mut candidates: Vec<CandidateItem>) -> Result<()> {
        validate_batch(&candidates)?;
        for candidate in candidates.iter_mut() {
            candidate.selected = false;
            candidate.user_rating = None;
        }

        info!(
            session_id = %self.session_id,
            candidates = candidates.len(),
            dropped_history = self.history.len(),
            "Candidate batch replaced"
        );

        self.candidates = candidates;
        self.history.clear();
        Ok(())
    }

    /// Rate one candidate; 0 clears the rating. Last rating wins.
    pub fn update_rating(&mut self, id: i64, rating: u8) -> Result<()> {
        let rating = Rating::from_wire(rating)?;
        let candidate = self
            .candidates
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or(SelectionError::UnknownCandidate(id))?;

        candidate.user_rating = rating;
        debug!(id = id, rating = ?rating.map(|r| r.value()), "Rating updated");
        Ok(())
    }

    /// Clear history and every rating; the current selection stays.
    pub fn reset_history(&mut self) {
        self.history.clear();
        for candidate in self.candidates.iter_mut() {
            candidate.user_rating = None;
        }
        info!(session_id = %self.session_id, "History and ratings reset");
    }

    /// Write a full assignment back; nothing changes unless every candidate is covered.
    pub fn apply_assignment(&mut self, assignment: &Assignment) -> Result<usize> {
        let flags: Vec<bool> = self
            .candidates
            .iter()
            .map(|c| {
                assignment.get(c.id).ok_or_else(|| {
                    SelectionError::SolverNoResult(format!("assignment missing candidate {}", c.id))
                })
            })
            .collect::<Result<_>>()?;

        for (candidate, flag) in self.candidates.iter_mut().zip(flags) {
            candidate.selected = flag;
        }
        Ok(self.selected_count())
    }

    pub fn selected(&self) -> Vec<&CandidateItem> {
        self.candidates.iter().filter(|c| c.selected).collect()
    }

    pub fn selected_count(&self) -> usize {
        self.candidates.iter().filter(|c| c.selected).count()
    }

    pub fn rated_count(&self) -> usize {
        self.candidates
            .iter()
            .filter(|c| c.user_rating.is_some())
            .count()
    }

    pub fn phase(&self) -> SessionPhase {
        if self.selected_count() > 0 {
            SessionPhase::Optimized
        } else if self.rated_count() > 0 {
            SessionPhase::Rated
        } else {
            SessionPhase::Generated
        }
    }
}

/// Serialized access to one session; every read-modify-write holds the lock throughout.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    inner: Arc<Mutex<Session>>,
}

impl SessionHandle {
    pub fn new(session: Session) -> Self {
        Self {
            inner: Arc::new(Mutex::new(session)),
        }
    }

    pub async fn lock(&self) -> MutexGuard<'_, Session> {
        self.inner.lock().await
    }

    pub async fn update_rating(&self, id: i64, rating: u8) -> Result<()> {
        self.inner.lock().await.update_rating(id, rating)
    }

    pub async fn reset_history(&self) {
        self.inner.lock().await.reset_history();
    }

    pub async fn replace_batch(&self, candidates: Vec<CandidateItem>) -> Result<()> {
        self.inner.lock().await.replace_batch(candidates)
    }

    pub async fn snapshot(&self) -> Session {
        self.inner.lock().await.clone()
    }
}
