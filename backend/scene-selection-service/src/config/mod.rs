use crate::services::objective::ObjectiveWeights;
use crate::services::orchestrator::{Capabilities, SelectionOrchestrator};
use crate::services::solver::{
    LocalAnnealer, LocalSolverConfig, RemoteAnnealingGateway, SolverCredentials, SolverGateway,
};
use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SolverBackend {
    Local,
    Remote,
    #[serde(rename = "none")]
    Disabled,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    // Session document
    pub session_file: String,
    pub selection_action: String,

    // Solver
    pub solver_backend: SolverBackend,
    pub solver_endpoint: Option<String>,
    pub solver_token: String,
    pub solver_timeout_ms: u64,
    pub exact_solver_limit: usize,
    pub anneal_sweeps: usize,
    pub anneal_restarts: usize,
    pub anneal_seed: u64,

    // Preference model
    pub preference_model_enabled: bool,
    pub ridge_alpha: f64,

    // Objective weights
    pub preference_weight: f64,
    pub cold_start_relevance_weight: f64,
    pub adaptive_relevance_weight: f64,
    pub length_penalty_weight: f64,

    // Text generation
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub generation_timeout_secs: u64,

    // Observability
    pub log_level: String,
}

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .set_default("session_file", "settings.json")?
            .set_default("selection_action", "cold-start")?
            .set_default("solver_backend", "local")?
            .set_default("solver_token", "")?
            .set_default("solver_timeout_ms", 3000)?
            .set_default("exact_solver_limit", 20)?
            .set_default("anneal_sweeps", 4000)?
            .set_default("anneal_restarts", 4)?
            .set_default("anneal_seed", 42)?
            .set_default("preference_model_enabled", true)?
            .set_default("ridge_alpha", 1.0)?
            .set_default("preference_weight", 10.0)?
            .set_default("cold_start_relevance_weight", 2.0)?
            .set_default("adaptive_relevance_weight", 1.0)?
            .set_default("length_penalty_weight", 0.001)?
            .set_default("gemini_model", "gemini-2.5-flash")?
            .set_default("generation_timeout_secs", 60)?
            .set_default("log_level", "info")?
            .add_source(config::Environment::default().separator("__"))
            .build()?;

        config.try_deserialize()
    }

    pub fn validate(&self) -> Result<()> {
        if self.solver_timeout_ms == 0 {
            return Err(anyhow!("Solver timeout must be greater than 0"));
        }

        if self.solver_backend == SolverBackend::Remote
            && self
                .solver_endpoint
                .as_deref()
                .map_or(true, |e| e.trim().is_empty())
        {
            return Err(anyhow!("Remote solver backend requires SOLVER_ENDPOINT"));
        }

        let weights = [
            ("preference_weight", self.preference_weight),
            ("cold_start_relevance_weight", self.cold_start_relevance_weight),
            ("adaptive_relevance_weight", self.adaptive_relevance_weight),
            ("length_penalty_weight", self.length_penalty_weight),
        ];
        for (name, value) in weights {
            if !value.is_finite() || value < 0.0 {
                return Err(anyhow!("{} must be finite and non-negative", name));
            }
        }

        if !self.ridge_alpha.is_finite() || self.ridge_alpha <= 0.0 {
            return Err(anyhow!("Ridge alpha must be greater than 0"));
        }

        if self.session_file.trim().is_empty() {
            return Err(anyhow!("Session file path is required"));
        }

        Ok(())
    }

    pub fn solver_timeout(&self) -> Duration {
        Duration::from_millis(self.solver_timeout_ms)
    }

    pub fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.generation_timeout_secs)
    }

    pub fn objective_weights(&self) -> ObjectiveWeights {
        ObjectiveWeights {
            preference: self.preference_weight,
            cold_start_relevance: self.cold_start_relevance_weight,
            adaptive_relevance: self.adaptive_relevance_weight,
            length_penalty: self.length_penalty_weight,
        }
    }

    pub fn local_solver(&self) -> LocalSolverConfig {
        LocalSolverConfig {
            exact_limit: self.exact_solver_limit,
            sweeps: self.anneal_sweeps,
            restarts: self.anneal_restarts,
            seed: self.anneal_seed,
        }
    }

    /// Token from the environment, if any; the session document may carry its own.
    pub fn solver_credentials(&self) -> Option<SolverCredentials> {
        let credentials = SolverCredentials::new(self.solver_token.clone());
        (!credentials.is_empty()).then_some(credentials)
    }

    pub fn capabilities(&self) -> Result<Capabilities> {
        let solver: Option<Arc<dyn SolverGateway>> = match self.solver_backend {
            SolverBackend::Local => Some(Arc::new(LocalAnnealer::new(self.local_solver()))),
            SolverBackend::Remote => {
                let endpoint = self
                    .solver_endpoint
                    .as_deref()
                    .ok_or_else(|| anyhow!("Remote solver backend requires SOLVER_ENDPOINT"))?;
                Some(Arc::new(RemoteAnnealingGateway::new(endpoint)?))
            }
            SolverBackend::Disabled => None,
        };

        Ok(Capabilities::new(solver, self.preference_model_enabled))
    }

    pub fn orchestrator(&self) -> Result<SelectionOrchestrator> {
        Ok(SelectionOrchestrator::new(self.capabilities()?)
            .with_weights(self.objective_weights())
            .with_ridge_alpha(self.ridge_alpha)
            .with_solver_timeout(self.solver_timeout()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> Config {
        Config {
            session_file: "settings.json".to_string(),
            selection_action: "cold-start".to_string(),
            solver_backend: SolverBackend::Local,
            solver_endpoint: None,
            solver_token: String::new(),
            solver_timeout_ms: 3000,
            exact_solver_limit: 20,
            anneal_sweeps: 4000,
            anneal_restarts: 4,
            anneal_seed: 42,
            preference_model_enabled: true,
            ridge_alpha: 1.0,
            preference_weight: 10.0,
            cold_start_relevance_weight: 2.0,
            adaptive_relevance_weight: 1.0,
            length_penalty_weight: 0.001,
            gemini_api_key: None,
            gemini_model: "gemini-2.5-flash".to_string(),
            generation_timeout_secs: 60,
            log_level: "info".to_string(),
        }
    }

    #[test]
    fn test_config_validation() {
        let config = valid();
        assert!(config.validate().is_ok());
        assert_eq!(config.objective_weights(), ObjectiveWeights::default());
        assert_eq!(config.solver_timeout(), Duration::from_millis(3000));
    }

    #[test]
    fn test_remote_backend_requires_endpoint() {
        let mut config = valid();
        config.solver_backend = SolverBackend::Remote;
        assert!(config.validate().is_err());

        config.solver_endpoint = Some("   ".to_string());
        assert!(config.validate().is_err());

        config.solver_endpoint = Some("https://annealer.internal".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_capabilities_follow_backend() {
        let mut config = valid();
        let caps = config.capabilities().unwrap();
        assert_eq!(caps.require_solver().unwrap().name(), "local-annealer");
        assert!(caps.require_regression().is_ok());

        config.solver_backend = SolverBackend::Disabled;
        config.preference_model_enabled = false;
        let caps = config.capabilities().unwrap();
        assert!(caps.require_solver().is_err());
        assert!(caps.require_regression().is_err());
    }

    #[test]
    fn test_blank_token_is_no_credentials() {
        let mut config = valid();
        assert!(config.solver_credentials().is_none());

        config.solver_token = "secret".to_string();
        assert_eq!(config.solver_credentials().unwrap().token, "secret");
    }

    #[test]
    fn test_invalid_numbers() {
        let mut config = valid();
        config.solver_timeout_ms = 0;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.length_penalty_weight = -0.1;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.preference_weight = f64::INFINITY;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.ridge_alpha = 0.0;
        assert!(config.validate().is_err());
    }
}
