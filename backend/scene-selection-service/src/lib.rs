pub mod config;
pub mod error;
pub mod models;
pub mod services;

pub use config::{Config, SolverBackend};
pub use error::{Result, SelectionError};
pub use models::{CandidateItem, HistoryRecord, ItemAttributes, ItemKind, Rating, TargetProfile};
pub use services::{
    Assignment, CandidateGenerator, Capabilities, DraftComposer, FeatureVector, GeminiGenerator,
    HistoryStore, JsonFileStore, LocalAnnealer, LocalSolverConfig, ObjectiveBuilder,
    ObjectiveMode, ObjectiveWeights, OptimizationOutcome, PreferenceModel, QuboObjective,
    RemoteAnnealingGateway, SelectionAction, SelectionOrchestrator, Session, SessionHandle,
    SessionPhase, SessionSnapshot, SessionStore, SolverCredentials, SolverError, SolverGateway,
    StoryTopic, TextGenerator,
};
