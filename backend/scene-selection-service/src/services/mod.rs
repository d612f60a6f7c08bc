pub mod features;
pub mod generation;
pub mod history;
pub mod objective;
pub mod orchestrator;
pub mod persistence;
pub mod preference;
pub mod session;
pub mod solver;

pub use features::FeatureVector;
pub use generation::{CandidateGenerator, DraftComposer, GeminiGenerator, StoryTopic, TextGenerator};
pub use history::HistoryStore;
pub use objective::{ObjectiveBuilder, ObjectiveMode, ObjectiveWeights, QuboObjective};
pub use orchestrator::{Capabilities, OptimizationOutcome, SelectionAction, SelectionOrchestrator};
pub use persistence::{JsonFileStore, SessionSnapshot, SessionStore};
pub use preference::PreferenceModel;
pub use session::{Session, SessionHandle, SessionPhase};
pub use solver::{
    Assignment, LocalAnnealer, LocalSolverConfig, RemoteAnnealingGateway, SolverCredentials,
    SolverError, SolverGateway,
};
