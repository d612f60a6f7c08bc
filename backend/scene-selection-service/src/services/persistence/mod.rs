// ============================================
// Session Persistence (設定檔存取)
// ============================================
//
// One JSON document holds the whole working state:
//
//   {
//     "topic_main", "topic_sub1", "topic_sub2",
//     "params":      { "p_desc_style", ..., "p_char_voice", "length" },
//     "candidates":  [ { "id", "text", "type", "relevance", "attributes", "selected", "user_rating" } ],
//     "bbo_history": [ { "attributes", "type", "relevance", "rating" } ],
//     "draft_summary", "draft_article", "additional_instruction", "final_text",
//     "solver_token"
//   }
//
// Missing keys fall back to defaults so older documents keep loading.
// Keys this service does not own (e.g. "gemini_key") are carried through untouched.

use crate::error::{Result, SelectionError};
use crate::models::{validate_batch, CandidateItem, TargetProfile};
use crate::services::generation::StoryTopic;
use crate::services::history::HistoryStore;
use crate::services::session::Session;
use crate::services::solver::SolverCredentials;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSnapshot {
    #[serde(flatten)]
    pub topic: StoryTopic,
    pub params: TargetProfile,
    pub candidates: Vec<CandidateItem>,
    #[serde(rename = "bbo_history")]
    pub history: HistoryStore,
    pub draft_summary: String,
    pub draft_article: String,
    pub additional_instruction: String,
    pub final_text: String,
    #[serde(alias = "amplify_token")]
    pub solver_token: String,
    /// 其他工具寫入的鍵, 存檔時原樣寫回
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl SessionSnapshot {
    /// Rebuild a live session; the batch is validated on the way in.
    pub fn to_session(&self) -> Result<Session> {
        validate_batch(&self.candidates)?;
        self.params.validate()?;

        let mut session = Session::new(self.params.clone())
            .with_credentials(SolverCredentials::new(self.solver_token.clone()));
        session.candidates = self.candidates.clone();
        session.history = self.history.clone();
        Ok(session)
    }

    /// Copy the session's mutable state back; drafts, topic and token are left alone.
    pub fn absorb(&mut self, session: &Session) {
        self.params = session.profile.clone();
        self.candidates = session.candidates.clone();
        self.history = session.history.clone();
    }
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self) -> Result<SessionSnapshot>;

    async fn save(&self, snapshot: &SessionSnapshot) -> Result<()>;
}

/// Pretty-printed JSON file, replaced atomically on save
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "settings.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl SessionStore for JsonFileStore {
    async fn load(&self) -> Result<SessionSnapshot> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "No session file, starting from defaults");
                return Ok(SessionSnapshot::default());
            }
            Err(e) => {
                return Err(SelectionError::Persistence(format!(
                    "failed to read {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };

        let snapshot: SessionSnapshot = serde_json::from_slice(&bytes)?;
        debug!(
            path = %self.path.display(),
            candidates = snapshot.candidates.len(),
            history = snapshot.history.len(),
            "Session loaded"
        );
        Ok(snapshot)
    }

    async fn save(&self, snapshot: &SessionSnapshot) -> Result<()> {
        let body = serde_json::to_vec_pretty(snapshot)?;
        let temp = self.temp_path();

        tokio::fs::write(&temp, &body).await?;
        tokio::fs::rename(&temp, &self.path).await?;

        debug!(path = %self.path.display(), bytes = body.len(), "Session saved");
        Ok(())
    }
}
