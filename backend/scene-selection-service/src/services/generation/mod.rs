// ============================================
// Candidate Generation & Drafting (候選生成與成稿)
// ============================================
//
// 1. CandidateGenerator: topic → 15 Scene Craft + 15 Character Dynamics blocks
// 2. DraftComposer: selected blocks → plot summary → article
// 3. DraftComposer::polish: draft + editor instructions → final text
//
// All calls go through `TextGenerator`, so the LLM backend is swappable.

use crate::error::{Result, SelectionError};
use crate::models::{CandidateItem, ItemKind};
use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Blocks requested per kind
pub const BLOCKS_PER_KIND: usize = 15;

/// Relevance when the model leaves it out
pub const DEFAULT_RELEVANCE: f64 = 0.5;

pub const DEFAULT_POLISH_INSTRUCTION: &str = "誤字脱字の修正、表現のブラッシュアップ";

// ============================================
// Text Generator Trait
// ============================================

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Single-turn completion
    async fn generate(&self, prompt: &str) -> Result<String>;

    fn name(&self) -> &'static str;
}

// ============================================
// Gemini Provider
// ============================================

pub struct GeminiGenerator {
    client: HttpClient,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiGenerator {
    pub fn new(api_key: &str, model: &str, timeout: Duration) -> Result<Self> {
        let client = HttpClient::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SelectionError::Generation(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.base_url, self.model)
    }
}

#[derive(Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
}

#[derive(Serialize, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Serialize, Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: GeminiContent,
}

impl GeminiResponse {
    fn text(self) -> Option<String> {
        let content = self.candidates.into_iter().next()?.content;
        let text: String = content.parts.into_iter().map(|p| p.text).collect();
        if text.trim().is_empty() {
            None
        } else {
            Some(text)
        }
    }
}

#[async_trait]
impl TextGenerator for GeminiGenerator {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let request = GeminiRequest {
            contents: vec![GeminiContent {
                parts: vec![GeminiPart {
                    text: prompt.to_string(),
                }],
            }],
        };

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(SelectionError::Generation(format!(
                "Gemini API error {}: {}",
                status, error_text
            )));
        }

        let result: GeminiResponse = response.json().await?;
        result
            .text()
            .ok_or_else(|| SelectionError::Generation("Gemini returned no text".to_string()))
    }

    fn name(&self) -> &'static str {
        "gemini"
    }
}

// ============================================
// Candidate Generation
// ============================================

/// Writing topic: one required setting plus two optional ones
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoryTopic {
    #[serde(rename = "topic_main", default)]
    pub main: String,
    #[serde(rename = "topic_sub1", default)]
    pub sub1: String,
    #[serde(rename = "topic_sub2", default)]
    pub sub2: String,
}

impl StoryTopic {
    pub fn new(main: impl Into<String>) -> Self {
        Self {
            main: main.into(),
            ..Default::default()
        }
    }

    fn context(&self) -> String {
        let mut context = format!("設定1(必須): {}\n", self.main);
        if !self.sub1.trim().is_empty() {
            context.push_str(&format!("設定2: {}\n", self.sub1));
        }
        if !self.sub2.trim().is_empty() {
            context.push_str(&format!("設定3: {}\n", self.sub2));
        }
        context
    }
}

#[derive(Debug, Deserialize)]
struct GeneratedBlock {
    #[serde(rename = "type")]
    kind: String,
    text: String,
    #[serde(default)]
    scores: BTreeMap<String, serde_json::Value>,
}

pub struct CandidateGenerator {
    generator: Arc<dyn TextGenerator>,
}

impl CandidateGenerator {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }

    pub async fn generate(&self, topic: &StoryTopic) -> Result<Vec<CandidateItem>> {
        if topic.main.trim().is_empty() {
            return Err(SelectionError::MalformedInput(
                "main topic is required".to_string(),
            ));
        }

        let reply = self.generator.generate(&candidate_prompt(topic)).await?;
        let candidates = parse_candidates(&reply)?;

        info!(
            provider = self.generator.name(),
            candidates = candidates.len(),
            "Candidate blocks generated"
        );
        Ok(candidates)
    }
}

fn candidate_prompt(topic: &StoryTopic) -> String {
    format!(
        r#"以下の執筆テーマに基づき、「小説の場面設定(Scene Craft)」と「キャラクター・ダイナミクス(Character Dynamics)」の文章ブロックを各{n}個生成してください。
各ブロックは異なる観点を持ち、重複しないようにしてください。

【小説の場面設定】
{context}
【Scene Craft のパラメータ】
desc_style（説明的－描写的）, perspective（第三者的－当事者的）, sensory（視覚以外の臨場感）, thought（思考の開示）, tension（会話の緊張感）, reality（現実的－空想的）

【Character Dynamics のパラメータ】
char_count（登場人物人数）, char_mental（精神性）, char_belief（信念）, char_trauma（過去の因縁）, char_voice（語り口の癖）

出力は以下の形式の JSON 配列のみ。Markdown 不要。
[
  {{"type": "Scene Craft", "text": "...", "scores": {{"relevance": 0.0-1.0, "desc_style": 0.0-1.0, "perspective": 0.0-1.0, "sensory": 0.0-1.0, "thought": 0.0-1.0, "tension": 0.0-1.0, "reality": 0.0-1.0}}}},
  {{"type": "Character Dynamics", "text": "...", "scores": {{"relevance": 0.0-1.0, "char_count": 0.0-1.0, "char_mental": 0.0-1.0, "char_belief": 0.0-1.0, "char_trauma": 0.0-1.0, "char_voice": 0.0-1.0}}}}
]"#,
        n = BLOCKS_PER_KIND,
        context = topic.context(),
    )
}

/// Pull the JSON array out of an LLM reply and turn it into a fresh batch.
pub fn parse_candidates(reply: &str) -> Result<Vec<CandidateItem>> {
    let cleaned = reply.replace("```json", "").replace("```", "");
    let (start, end) = match (cleaned.find('['), cleaned.rfind(']')) {
        (Some(start), Some(end)) if start < end => (start, end),
        _ => {
            warn!(reply_len = reply.len(), "No JSON array in generation reply");
            return Err(SelectionError::Generation(
                "reply does not contain a JSON array".to_string(),
            ));
        }
    };

    let blocks: Vec<GeneratedBlock> = serde_json::from_str(&cleaned[start..=end])
        .map_err(|e| SelectionError::Generation(format!("invalid block list: {}", e)))?;

    blocks
        .into_iter()
        .enumerate()
        .map(|(i, block)| {
            let kind = ItemKind::parse(&block.kind)?;
            let scores: BTreeMap<String, f64> = block
                .scores
                .iter()
                .filter_map(|(k, v)| v.as_f64().map(|v| (k.clone(), v)))
                .collect();
            let relevance = scores.get("relevance").copied().unwrap_or(DEFAULT_RELEVANCE);

            Ok(CandidateItem::from_scores(
                i as i64,
                block.text,
                relevance,
                kind,
                &scores,
            ))
        })
        .collect()
}

// ============================================
// Draft Composition
// ============================================

pub struct DraftComposer {
    generator: Arc<dyn TextGenerator>,
}

impl DraftComposer {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }

    /// Returns `(summary, article)`.
    pub async fn compose_draft(
        &self,
        selected: &[&CandidateItem],
        target_length: u32,
    ) -> Result<(String, String)> {
        if selected.is_empty() {
            return Err(SelectionError::MalformedInput(
                "no blocks selected for drafting".to_string(),
            ));
        }

        let materials = materials(selected);

        let summary = self.generator.generate(&summary_prompt(&materials)).await?;
        debug!(summary_chars = summary.chars().count(), "Plot summary generated");

        let article = self
            .generator
            .generate(&article_prompt(&summary, &materials, target_length))
            .await?;

        info!(
            blocks = selected.len(),
            target_length = target_length,
            article_chars = article.chars().count(),
            "Draft composed"
        );
        Ok((summary, article))
    }

    pub async fn polish(&self, draft: &str, instructions: &str) -> Result<String> {
        let instructions = if instructions.trim().is_empty() {
            DEFAULT_POLISH_INSTRUCTION
        } else {
            instructions
        };

        self.generator
            .generate(&format!(
                "以下の小説原稿を、編集者の指示に従って推敲してください。\n\n原稿:\n{}\n\n編集者指示:\n{}\n\n出力は推敲後の本文のみ。",
                draft, instructions
            ))
            .await
    }
}

fn materials(selected: &[&CandidateItem]) -> String {
    selected
        .iter()
        .map(|c| format!("【{}】\n{}", c.kind().as_str(), c.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn summary_prompt(materials: &str) -> String {
    format!(
        "以下の小説の断片を統合し、一つの場面としてのプロット概要を200文字程度で作成してください。\n矛盾がある場合は、より面白い方向に統合してください。\n\n素材:\n{}",
        materials
    )
}

fn article_prompt(summary: &str, materials: &str, target_length: u32) -> String {
    format!(
        "あなたはプロの小説家です。プロット概要と素材ブロックを使い、小説の一場面を執筆してください。\n\n目標文字数: {}文字程度\n\n【プロット概要】\n{}\n\n【素材ブロック】\n{}\n\n素材を単に繋げず、自然な流れの場面として構成してください。出力は本文のみ。",
        target_length, summary, materials
    )
}
