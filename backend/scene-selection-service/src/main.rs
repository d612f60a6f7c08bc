use anyhow::{anyhow, Context};
use scene_selection_service::{
    CandidateGenerator, Config, DraftComposer, GeminiGenerator, JsonFileStore, SelectionAction,
    SessionHandle, SessionSnapshot, SessionStore, TextGenerator,
};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Work the binary can do against the session document
enum WorkerAction {
    Select(SelectionAction),
    Generate,
    Draft,
    Polish,
}

impl WorkerAction {
    fn parse(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "generate" => Ok(WorkerAction::Generate),
            "draft" => Ok(WorkerAction::Draft),
            "polish" | "final" => Ok(WorkerAction::Polish),
            other => Ok(WorkerAction::Select(other.parse()?)),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load config
    let config = Config::from_env().context("Failed to load config")?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)))
        .init();

    config.validate()?;
    let action = WorkerAction::parse(&config.selection_action)?;

    info!(
        session_file = %config.session_file,
        action = %config.selection_action,
        solver_backend = ?config.solver_backend,
        "Starting scene-selection-service"
    );

    let store = JsonFileStore::new(&config.session_file);
    let mut snapshot = store.load().await?;

    match action {
        WorkerAction::Select(action) => run_selection(&config, &store, snapshot, action).await,
        WorkerAction::Generate => {
            let candidates = CandidateGenerator::new(text_generator(&config)?)
                .generate(&snapshot.topic)
                .await?;

            let mut session = snapshot.to_session()?;
            session.replace_batch(candidates)?;
            snapshot.absorb(&session);
            store.save(&snapshot).await?;

            info!(candidates = session.candidates.len(), "New candidate batch stored");
            Ok(())
        }
        WorkerAction::Draft => {
            let session = snapshot.to_session()?;
            let (summary, article) = DraftComposer::new(text_generator(&config)?)
                .compose_draft(&session.selected(), session.profile.target_length)
                .await?;

            snapshot.draft_summary = summary;
            snapshot.draft_article = article;
            store.save(&snapshot).await?;
            Ok(())
        }
        WorkerAction::Polish => {
            if snapshot.draft_article.trim().is_empty() {
                return Err(anyhow!("No draft article to polish"));
            }
            snapshot.final_text = DraftComposer::new(text_generator(&config)?)
                .polish(&snapshot.draft_article, &snapshot.additional_instruction)
                .await?;
            store.save(&snapshot).await?;
            Ok(())
        }
    }
}

async fn run_selection(
    config: &Config,
    store: &JsonFileStore,
    mut snapshot: SessionSnapshot,
    action: SelectionAction,
) -> anyhow::Result<()> {
    let mut session = snapshot.to_session()?;
    if let Some(credentials) = config.solver_credentials() {
        session = session.with_credentials(credentials);
    }

    let orchestrator = config.orchestrator()?;
    let handle = SessionHandle::new(session);
    let result = orchestrator.run(&handle, action).await;

    // History appended before a failed solve is kept
    snapshot.absorb(&*handle.lock().await);
    store.save(&snapshot).await?;

    match result {
        Ok(Some(outcome)) => {
            info!(
                mode = outcome.mode.as_str(),
                selected = ?outcome.selected_ids,
                energy = ?outcome.energy,
                history = outcome.history_len,
                "Selection complete"
            );
            Ok(())
        }
        Ok(None) => {
            info!("History reset");
            Ok(())
        }
        Err(e) if e.is_recoverable() => {
            warn!(error = %e, "Solve failed, stored selection unchanged");
            Err(e.into())
        }
        Err(e) => {
            error!(error = %e, "Selection failed");
            Err(e.into())
        }
    }
}

fn text_generator(config: &Config) -> anyhow::Result<Arc<dyn TextGenerator>> {
    let api_key = config
        .gemini_api_key
        .as_deref()
        .filter(|k| !k.trim().is_empty())
        .ok_or_else(|| anyhow!("GEMINI_API_KEY is required for text generation"))?;

    Ok(Arc::new(GeminiGenerator::new(
        api_key,
        &config.gemini_model,
        config.generation_timeout(),
    )?))
}
