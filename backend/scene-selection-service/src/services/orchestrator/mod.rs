// ============================================
// Selection Orchestrator
// ============================================
//
// Cold start:
//   1. Build fit + length objective
//   2. Solve
//   3. Write back `selected`
//
// Adaptive (strict order):
//   1. Append every rated candidate to history
//   2. Refit the preference model on the whole history
//   3. Predict ratings for the current batch
//   4. Build preference + fit + length objective and solve
//   5. Write back `selected`
//
// Capabilities are checked before history is touched. Solver failures
// leave `selected` exactly as it was.

use crate::error::{Result, SelectionError};
use crate::models::validate_batch;
use crate::services::features::{FeatureVector, Vectorize};
use crate::services::objective::{ObjectiveBuilder, ObjectiveMode, ObjectiveWeights, QuboObjective};
use crate::services::preference::{PreferenceModel, DEFAULT_RIDGE_ALPHA};
use crate::services::session::{Session, SessionHandle};
use crate::services::solver::SolverGateway;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Default solver budget
pub const DEFAULT_SOLVER_TIMEOUT: Duration = Duration::from_millis(3000);

/// Runtime availability of the regression and solving backends
#[derive(Clone)]
pub struct Capabilities {
    pub solver: Option<Arc<dyn SolverGateway>>,
    pub regression: bool,
}

impl Capabilities {
    pub fn new(solver: Option<Arc<dyn SolverGateway>>, regression: bool) -> Self {
        Self { solver, regression }
    }

    pub fn require_solver(&self) -> Result<Arc<dyn SolverGateway>> {
        self.solver.clone().ok_or_else(|| {
            SelectionError::DependencyUnavailable("no solver backend configured".to_string())
        })
    }

    pub fn require_regression(&self) -> Result<()> {
        if self.regression {
            Ok(())
        } else {
            Err(SelectionError::DependencyUnavailable(
                "preference regression is disabled".to_string(),
            ))
        }
    }
}

impl std::fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capabilities")
            .field("solver", &self.solver.as_ref().map(|s| s.name()))
            .field("regression", &self.regression)
            .finish()
    }
}

/// Operation requested against a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionAction {
    ColdStart,
    Adaptive,
    Reset,
}

impl FromStr for SelectionAction {
    type Err = SelectionError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cold-start" | "cold_start" | "optimize" => Ok(SelectionAction::ColdStart),
            "adaptive" | "bbo" | "bbo-step" => Ok(SelectionAction::Adaptive),
            "reset" | "bbo-reset" => Ok(SelectionAction::Reset),
            other => Err(SelectionError::Configuration(format!(
                "unknown selection action: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OptimizationOutcome {
    pub mode: ObjectiveMode,
    pub selected_ids: Vec<i64>,
    /// `None` when the solver was skipped (empty batch)
    pub energy: Option<f64>,
    pub history_len: usize,
    pub appended: usize,
    pub predicted_ratings: Vec<f64>,
}

pub struct SelectionOrchestrator {
    capabilities: Capabilities,
    builder: ObjectiveBuilder,
    ridge_alpha: f64,
    solver_timeout: Duration,
}

impl SelectionOrchestrator {
    pub fn new(capabilities: Capabilities) -> Self {
        Self {
            capabilities,
            builder: ObjectiveBuilder::default(),
            ridge_alpha: DEFAULT_RIDGE_ALPHA,
            solver_timeout: DEFAULT_SOLVER_TIMEOUT,
        }
    }

    pub fn with_weights(mut self, weights: ObjectiveWeights) -> Self {
        self.builder = ObjectiveBuilder::new(weights);
        self
    }

    pub fn with_ridge_alpha(mut self, alpha: f64) -> Self {
        self.ridge_alpha = alpha;
        self
    }

    pub fn with_solver_timeout(mut self, timeout: Duration) -> Self {
        self.solver_timeout = timeout;
        self
    }

    /// Optimize on attribute fit and length only.
    pub async fn optimize_cold_start(&self, session: &mut Session) -> Result<OptimizationOutcome> {
        let solver = self.capabilities.require_solver()?;
        session.profile.validate()?;
        validate_batch(&session.candidates)?;

        if session.candidates.is_empty() {
            info!(mode = "cold_start", "Empty candidate batch, solver skipped");
            return Ok(self.skipped(ObjectiveMode::ColdStart, session));
        }

        let objective = self
            .builder
            .build_cold_start(&session.candidates, &session.profile)?;

        let energy = self.solve_and_apply(solver.as_ref(), &objective, session).await?;

        Ok(OptimizationOutcome {
            mode: ObjectiveMode::ColdStart,
            selected_ids: selected_ids(session),
            energy: Some(energy),
            history_len: session.history.len(),
            appended: 0,
            predicted_ratings: Vec::new(),
        })
    }

    /// Learn from ratings, then optimize with the preference term.
    pub async fn optimize_adaptive(&self, session: &mut Session) -> Result<OptimizationOutcome> {
        self.capabilities.require_regression()?;
        let solver = self.capabilities.require_solver()?;
        session.profile.validate()?;
        validate_batch(&session.candidates)?;

        if session.candidates.is_empty() {
            info!(mode = "adaptive", "Empty candidate batch, solver skipped");
            return Ok(self.skipped(ObjectiveMode::Adaptive, session));
        }

        // 1. 先寫入歷史，再訓練
        let appended = session.history.append_rated(&session.candidates);

        // 2. 全量重訓
        let model = PreferenceModel::fit_ridge(&session.history.training_pairs(), self.ridge_alpha)?;

        // 3. 預測當前候選
        let vectors: Vec<FeatureVector> = session.candidates.iter().map(|c| c.vectorize()).collect();
        let predicted_ratings = model.predict(&vectors);

        info!(
            appended = appended,
            history = session.history.len(),
            trained = model.is_trained(),
            "Preference model refreshed"
        );

        // 4. 建模並求解
        let objective =
            self.builder
                .build_adaptive(&session.candidates, &session.profile, &predicted_ratings)?;

        let energy = self.solve_and_apply(solver.as_ref(), &objective, session).await?;

        Ok(OptimizationOutcome {
            mode: ObjectiveMode::Adaptive,
            selected_ids: selected_ids(session),
            energy: Some(energy),
            history_len: session.history.len(),
            appended,
            predicted_ratings,
        })
    }

    /// Run an action while holding the session lock for its whole duration.
    pub async fn run(
        &self,
        handle: &SessionHandle,
        action: SelectionAction,
    ) -> Result<Option<OptimizationOutcome>> {
        let mut session = handle.lock().await;
        match action {
            SelectionAction::ColdStart => self.optimize_cold_start(&mut session).await.map(Some),
            SelectionAction::Adaptive => self.optimize_adaptive(&mut session).await.map(Some),
            SelectionAction::Reset => {
                session.reset_history();
                Ok(None)
            }
        }
    }

    async fn solve_and_apply(
        &self,
        solver: &dyn SolverGateway,
        objective: &QuboObjective,
        session: &mut Session,
    ) -> Result<f64> {
        let assignment = solver
            .solve(objective, &session.credentials, self.solver_timeout)
            .await
            .map_err(|e| {
                warn!(
                    solver = solver.name(),
                    mode = objective.mode.as_str(),
                    error = %e,
                    "Solve failed, selection left unchanged"
                );
                SelectionError::from(e)
            })?;

        let bits = assignment.to_bits(&objective.variable_ids).ok_or_else(|| {
            SelectionError::SolverNoResult("assignment does not cover every candidate".to_string())
        })?;
        let energy = objective.energy(&bits);

        let selected = session.apply_assignment(&assignment)?;

        info!(
            session_id = %session.session_id,
            solver = solver.name(),
            mode = objective.mode.as_str(),
            candidates = objective.num_variables(),
            selected = selected,
            energy = energy,
            "Selection updated"
        );

        Ok(energy)
    }

    fn skipped(&self, mode: ObjectiveMode, session: &Session) -> OptimizationOutcome {
        OptimizationOutcome {
            mode,
            selected_ids: Vec::new(),
            energy: None,
            history_len: session.history.len(),
            appended: 0,
            predicted_ratings: Vec::new(),
        }
    }
}

fn selected_ids(session: &Session) -> Vec<i64> {
    session.selected().iter().map(|c| c.id).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CandidateItem, ItemAttributes, TargetProfile};
    use crate::services::solver::{
        Assignment, LocalAnnealer, MockSolverGateway, SolverError,
    };

    fn candidate(id: i64, len: usize, profile: &TargetProfile) -> CandidateItem {
        CandidateItem::new(
            id,
            "字".repeat(len),
            1.0,
            ItemAttributes::SceneCraft(profile.scene_targets),
        )
    }

    fn session(lengths: &[usize]) -> Session {
        let mut session = Session::default();
        let candidates = lengths
            .iter()
            .enumerate()
            .map(|(i, len)| candidate(i as i64, *len, &session.profile))
            .collect();
        session.replace_batch(candidates).unwrap();
        session
    }

    fn local() -> Capabilities {
        Capabilities::new(Some(Arc::new(LocalAnnealer::default())), true)
    }

    fn failing_solver(error: fn() -> SolverError) -> Capabilities {
        let mut mock = MockSolverGateway::new();
        mock.expect_name().return_const("mock");
        mock.expect_solve().returning(move |_, _, _| Err(error()));
        Capabilities::new(Some(Arc::new(mock)), true)
    }

    #[tokio::test]
    async fn test_cold_start_tie_picks_lowest_index() {
        let mut s = session(&[100, 900]);
        let outcome = SelectionOrchestrator::new(local())
            .optimize_cold_start(&mut s)
            .await
            .unwrap();

        // 160 + (-2) for either single item
        assert_eq!(outcome.selected_ids, vec![0]);
        assert!((outcome.energy.unwrap() - 158.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_cold_start_hits_target_length() {
        let mut s = session(&[200, 300, 450, 50]);
        let outcome = SelectionOrchestrator::new(local())
            .optimize_cold_start(&mut s)
            .await
            .unwrap();

        let total: usize = s.selected().iter().map(|c| c.char_len()).sum();
        assert_eq!(total, 500, "selected {:?}", outcome.selected_ids);
    }

    #[tokio::test]
    async fn test_empty_batch_never_calls_solver() {
        let mut mock = MockSolverGateway::new();
        mock.expect_name().return_const("mock");
        mock.expect_solve().times(0);
        let orchestrator =
            SelectionOrchestrator::new(Capabilities::new(Some(Arc::new(mock)), true));

        let mut s = Session::default();
        let cold = orchestrator.optimize_cold_start(&mut s).await.unwrap();
        let adaptive = orchestrator.optimize_adaptive(&mut s).await.unwrap();

        assert!(cold.energy.is_none());
        assert!(adaptive.energy.is_none());
        assert!(adaptive.selected_ids.is_empty());
        assert_eq!(adaptive.appended, 0);
    }

    #[tokio::test]
    async fn test_solver_failure_keeps_previous_selection() {
        let mut s = session(&[100, 400]);
        s.apply_assignment(&Assignment::from_bits(&[0, 1], &[false, true]))
            .unwrap();

        for make in [
            (|| SolverError::Timeout(Duration::from_millis(3000))) as fn() -> SolverError,
            || SolverError::AuthFailure("expired".to_string()),
            || SolverError::NoResult("empty".to_string()),
        ] {
            let orchestrator = SelectionOrchestrator::new(failing_solver(make));
            let err = orchestrator.optimize_cold_start(&mut s).await.unwrap_err();

            assert!(err.is_recoverable());
            let flags: Vec<bool> = s.candidates.iter().map(|c| c.selected).collect();
            assert_eq!(flags, vec![false, true]);
        }
    }

    #[tokio::test]
    async fn test_solver_error_kinds_are_distinguished() {
        let mut s = session(&[100]);

        let timeout = SelectionOrchestrator::new(failing_solver(|| {
            SolverError::Timeout(Duration::from_millis(3000))
        }))
        .optimize_cold_start(&mut s)
        .await;
        assert!(matches!(timeout, Err(SelectionError::SolverTimeout(_))));

        let auth = SelectionOrchestrator::new(failing_solver(|| {
            SolverError::AuthFailure("bad".to_string())
        }))
        .optimize_cold_start(&mut s)
        .await;
        assert!(matches!(auth, Err(SelectionError::SolverAuthFailure(_))));
    }

    #[tokio::test]
    async fn test_missing_capability_does_not_touch_history() {
        let mut s = session(&[100, 200]);
        s.update_rating(0, 5).unwrap();

        let no_regression = Capabilities::new(Some(Arc::new(LocalAnnealer::default())), false);
        let err = SelectionOrchestrator::new(no_regression)
            .optimize_adaptive(&mut s)
            .await
            .unwrap_err();
        assert!(matches!(err, SelectionError::DependencyUnavailable(_)));
        assert!(s.history.is_empty());

        let no_solver = Capabilities::new(None, true);
        let err = SelectionOrchestrator::new(no_solver)
            .optimize_adaptive(&mut s)
            .await
            .unwrap_err();
        assert!(matches!(err, SelectionError::DependencyUnavailable(_)));
        assert!(s.history.is_empty());
    }

    #[tokio::test]
    async fn test_adaptive_learns_from_current_ratings() {
        let mut s = session(&[250, 250, 250, 250]);
        s.candidates[2].relevance = 0.2;
        s.update_rating(0, 1).unwrap();
        s.update_rating(2, 5).unwrap();

        let outcome = SelectionOrchestrator::new(local())
            .optimize_adaptive(&mut s)
            .await
            .unwrap();

        // 本次評分立即參與訓練
        assert_eq!(outcome.appended, 2);
        assert_eq!(outcome.history_len, 2);
        assert!(outcome.predicted_ratings[2] > outcome.predicted_ratings[0]);
        assert!(outcome.selected_ids.contains(&2));
    }

    #[tokio::test]
    async fn test_adaptive_without_ratings_uses_neutral_prediction() {
        let mut s = session(&[100, 400]);
        let outcome = SelectionOrchestrator::new(local())
            .optimize_adaptive(&mut s)
            .await
            .unwrap();

        assert_eq!(outcome.predicted_ratings, vec![3.0, 3.0]);
        assert_eq!(outcome.appended, 0);
    }

    #[tokio::test]
    async fn test_adaptive_objective_reaches_solver() {
        let mut mock = MockSolverGateway::new();
        mock.expect_name().return_const("mock");
        mock.expect_solve()
            .withf(|objective, _, timeout| {
                objective.mode == ObjectiveMode::Adaptive && *timeout == Duration::from_millis(1500)
            })
            .times(1)
            .returning(|objective, _, _| {
                let bits = vec![true; objective.num_variables()];
                Ok(Assignment::from_bits(&objective.variable_ids, &bits))
            });

        let mut s = session(&[10, 20]);
        let outcome = SelectionOrchestrator::new(Capabilities::new(Some(Arc::new(mock)), true))
            .with_solver_timeout(Duration::from_millis(1500))
            .optimize_adaptive(&mut s)
            .await
            .unwrap();

        assert_eq!(outcome.selected_ids, vec![0, 1]);
    }

    #[tokio::test]
    async fn test_run_reset_through_handle() {
        let mut s = session(&[100, 400]);
        s.update_rating(1, 4).unwrap();
        let handle = SessionHandle::new(s);
        let orchestrator = SelectionOrchestrator::new(local());

        orchestrator.run(&handle, SelectionAction::Adaptive).await.unwrap();
        let selected_before: Vec<bool> =
            handle.snapshot().await.candidates.iter().map(|c| c.selected).collect();

        let outcome = orchestrator.run(&handle, SelectionAction::Reset).await.unwrap();
        assert!(outcome.is_none());

        let after = handle.snapshot().await;
        assert!(after.history.is_empty());
        assert_eq!(after.rated_count(), 0);
        let selected_after: Vec<bool> = after.candidates.iter().map(|c| c.selected).collect();
        assert_eq!(selected_before, selected_after);
    }

    #[test]
    fn test_action_parsing() {
        assert_eq!("cold-start".parse::<SelectionAction>().unwrap(), SelectionAction::ColdStart);
        assert_eq!("ADAPTIVE".parse::<SelectionAction>().unwrap(), SelectionAction::Adaptive);
        assert_eq!("reset".parse::<SelectionAction>().unwrap(), SelectionAction::Reset);
        assert!("anneal".parse::<SelectionAction>().is_err());
    }
}
