use crate::error::{Result, SelectionError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Candidate block category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ItemKind {
    #[serde(rename = "Scene Craft", alias = "SceneCraft", alias = "scene_craft")]
    SceneCraft,
    #[serde(
        rename = "Character Dynamics",
        alias = "CharacterDynamics",
        alias = "character_dynamics"
    )]
    CharacterDynamics,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::SceneCraft => "Scene Craft",
            ItemKind::CharacterDynamics => "Character Dynamics",
        }
    }

    /// Canonical attribute keys for this kind, in vector order.
    pub fn keys(&self) -> &'static [&'static str] {
        match self {
            ItemKind::SceneCraft => &SceneCraftAttributes::KEYS,
            ItemKind::CharacterDynamics => &CharacterDynamicsAttributes::KEYS,
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace(['_', ' '], "").as_str() {
            "scenecraft" => Ok(ItemKind::SceneCraft),
            "characterdynamics" => Ok(ItemKind::CharacterDynamics),
            other => Err(SelectionError::MalformedInput(format!(
                "unknown item kind: {}",
                other
            ))),
        }
    }
}

/// 場面描寫屬性 (6 維)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SceneCraftAttributes {
    pub desc_style: f64,
    pub perspective: f64,
    pub sensory: f64,
    pub thought: f64,
    pub tension: f64,
    pub reality: f64,
}

impl SceneCraftAttributes {
    pub const KEYS: [&'static str; 6] = [
        "desc_style",
        "perspective",
        "sensory",
        "thought",
        "tension",
        "reality",
    ];

    pub fn values(&self) -> [f64; 6] {
        [
            self.desc_style,
            self.perspective,
            self.sensory,
            self.thought,
            self.tension,
            self.reality,
        ]
    }

    fn from_map(map: &BTreeMap<String, f64>) -> Self {
        let get = |key: &str| map.get(key).copied().unwrap_or(0.0);
        Self {
            desc_style: get("desc_style"),
            perspective: get("perspective"),
            sensory: get("sensory"),
            thought: get("thought"),
            tension: get("tension"),
            reality: get("reality"),
        }
    }
}

/// 角色動態屬性 (5 維)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CharacterDynamicsAttributes {
    pub char_count: f64,
    pub char_mental: f64,
    pub char_belief: f64,
    pub char_trauma: f64,
    pub char_voice: f64,
}

impl CharacterDynamicsAttributes {
    pub const KEYS: [&'static str; 5] = [
        "char_count",
        "char_mental",
        "char_belief",
        "char_trauma",
        "char_voice",
    ];

    pub fn values(&self) -> [f64; 5] {
        [
            self.char_count,
            self.char_mental,
            self.char_belief,
            self.char_trauma,
            self.char_voice,
        ]
    }

    fn from_map(map: &BTreeMap<String, f64>) -> Self {
        let get = |key: &str| map.get(key).copied().unwrap_or(0.0);
        Self {
            char_count: get("char_count"),
            char_mental: get("char_mental"),
            char_belief: get("char_belief"),
            char_trauma: get("char_trauma"),
            char_voice: get("char_voice"),
        }
    }
}

/// Attribute payload, tagged by kind. Keys not valid for the kind cannot be represented.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ItemAttributes {
    SceneCraft(SceneCraftAttributes),
    CharacterDynamics(CharacterDynamicsAttributes),
}

impl ItemAttributes {
    pub fn kind(&self) -> ItemKind {
        match self {
            ItemAttributes::SceneCraft(_) => ItemKind::SceneCraft,
            ItemAttributes::CharacterDynamics(_) => ItemKind::CharacterDynamics,
        }
    }

    /// Build from a loosely keyed score map; absent keys become 0.0, foreign keys are ignored.
    pub fn from_map(kind: ItemKind, map: &BTreeMap<String, f64>) -> Self {
        match kind {
            ItemKind::SceneCraft => ItemAttributes::SceneCraft(SceneCraftAttributes::from_map(map)),
            ItemKind::CharacterDynamics => {
                ItemAttributes::CharacterDynamics(CharacterDynamicsAttributes::from_map(map))
            }
        }
    }

    /// `(key, value)` pairs in canonical key order.
    pub fn entries(&self) -> Vec<(&'static str, f64)> {
        let values: Vec<f64> = match self {
            ItemAttributes::SceneCraft(a) => a.values().to_vec(),
            ItemAttributes::CharacterDynamics(a) => a.values().to_vec(),
        };
        self.kind().keys().iter().copied().zip(values).collect()
    }

    pub fn to_map(&self) -> BTreeMap<String, f64> {
        self.entries()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect()
    }
}

/// Stand-in for an attribute the scorer left out, when measuring fit to the targets
pub const UNSCORED_ATTRIBUTE: f64 = 0.5;

/// Which canonical keys were actually scored; bit `i` is `kind.keys()[i]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttributePresence(u16);

impl Default for AttributePresence {
    fn default() -> Self {
        Self::ALL
    }
}

impl AttributePresence {
    pub const ALL: Self = Self(u16::MAX);

    pub fn from_map(kind: ItemKind, map: &BTreeMap<String, f64>) -> Self {
        let bits = kind
            .keys()
            .iter()
            .enumerate()
            .filter(|(_, key)| map.contains_key(**key))
            .fold(0u16, |bits, (i, _)| bits | (1 << i));
        Self(bits)
    }

    pub fn contains(&self, index: usize) -> bool {
        index < 16 && self.0 & (1 << index) != 0
    }
}

/// User rating on the 1–5 scale
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Rating(u8);

impl Rating {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 5;

    pub fn new(value: u8) -> Result<Self> {
        if (Self::MIN..=Self::MAX).contains(&value) {
            Ok(Self(value))
        } else {
            Err(SelectionError::MalformedInput(format!(
                "rating must be within {}..={}, got {}",
                Self::MIN,
                Self::MAX,
                value
            )))
        }
    }

    /// Wire form: 0 means unrated.
    pub fn from_wire(value: u8) -> Result<Option<Self>> {
        if value == 0 {
            Ok(None)
        } else {
            Self::new(value).map(Some)
        }
    }

    pub fn value(&self) -> u8 {
        self.0
    }

    pub fn as_f64(&self) -> f64 {
        f64::from(self.0)
    }
}

/// One generated content block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "CandidateWire", into = "CandidateWire")]
pub struct CandidateItem {
    pub id: i64,
    pub text: String,
    pub relevance: f64,
    pub attributes: ItemAttributes,
    pub selected: bool,
    pub user_rating: Option<Rating>,
    /// Keys present in the source score map
    pub presence: AttributePresence,
}

impl CandidateItem {
    pub fn new(id: i64, text: impl Into<String>, relevance: f64, attributes: ItemAttributes) -> Self {
        Self {
            id,
            text: text.into(),
            relevance,
            attributes,
            selected: false,
            user_rating: None,
            presence: AttributePresence::ALL,
        }
    }

    /// Build from a loosely keyed score map, remembering which keys were scored.
    pub fn from_scores(
        id: i64,
        text: impl Into<String>,
        relevance: f64,
        kind: ItemKind,
        scores: &BTreeMap<String, f64>,
    ) -> Self {
        Self {
            presence: AttributePresence::from_map(kind, scores),
            ..Self::new(id, text, relevance, ItemAttributes::from_map(kind, scores))
        }
    }

    pub fn kind(&self) -> ItemKind {
        self.attributes.kind()
    }

    /// Length in characters, not bytes.
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CandidateWire {
    id: i64,
    text: String,
    #[serde(rename = "type")]
    kind: ItemKind,
    relevance: f64,
    #[serde(default)]
    attributes: BTreeMap<String, f64>,
    #[serde(default)]
    selected: bool,
    #[serde(default)]
    user_rating: u8,
}

impl TryFrom<CandidateWire> for CandidateItem {
    type Error = SelectionError;

    fn try_from(wire: CandidateWire) -> Result<Self> {
        if !wire.relevance.is_finite() {
            return Err(SelectionError::MalformedInput(format!(
                "candidate {} has non-finite relevance",
                wire.id
            )));
        }
        let mut item = Self::from_scores(
            wire.id,
            wire.text,
            wire.relevance,
            wire.kind,
            &wire.attributes,
        );
        item.selected = wire.selected;
        item.user_rating = Rating::from_wire(wire.user_rating)?;
        Ok(item)
    }
}

impl From<CandidateItem> for CandidateWire {
    fn from(item: CandidateItem) -> Self {
        Self {
            id: item.id,
            text: item.text,
            kind: item.attributes.kind(),
            relevance: item.relevance,
            attributes: item
                .attributes
                .entries()
                .into_iter()
                .enumerate()
                .filter(|(i, _)| item.presence.contains(*i))
                .map(|(_, (k, v))| (k.to_string(), v))
                .collect(),
            selected: item.selected,
            user_rating: item.user_rating.map(|r| r.value()).unwrap_or(0),
        }
    }
}

/// Reject batches whose ids are not unique.
pub fn validate_batch(candidates: &[CandidateItem]) -> Result<()> {
    let mut seen = HashSet::with_capacity(candidates.len());
    for candidate in candidates {
        if !seen.insert(candidate.id) {
            return Err(SelectionError::MalformedInput(format!(
                "duplicate candidate id {}",
                candidate.id
            )));
        }
    }
    Ok(())
}

/// Desired attribute values plus target length
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ProfileWire", into = "ProfileWire")]
pub struct TargetProfile {
    pub scene_targets: SceneCraftAttributes,
    pub character_targets: CharacterDynamicsAttributes,
    pub target_length: u32,
}

impl Default for TargetProfile {
    fn default() -> Self {
        Self {
            scene_targets: SceneCraftAttributes {
                desc_style: 0.5,
                perspective: 0.5,
                sensory: 0.5,
                thought: 0.5,
                tension: 0.5,
                reality: 0.5,
            },
            character_targets: CharacterDynamicsAttributes {
                char_count: 0.2,
                char_mental: 0.5,
                char_belief: 0.5,
                char_trauma: 0.0,
                char_voice: 0.5,
            },
            target_length: 500,
        }
    }
}

impl TargetProfile {
    pub fn validate(&self) -> Result<()> {
        if self.target_length == 0 {
            return Err(SelectionError::MalformedInput(
                "target length must be positive".to_string(),
            ));
        }

        let scene = SceneCraftAttributes::KEYS
            .iter()
            .zip(self.scene_targets.values());
        let character = CharacterDynamicsAttributes::KEYS
            .iter()
            .zip(self.character_targets.values());

        for (key, value) in scene.chain(character) {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(SelectionError::MalformedInput(format!(
                    "target {} must be within [0, 1], got {}",
                    key, value
                )));
            }
        }
        Ok(())
    }

    /// Target values matching the candidate's kind, in canonical key order.
    pub fn targets_for(&self, kind: ItemKind) -> Vec<f64> {
        match kind {
            ItemKind::SceneCraft => self.scene_targets.values().to_vec(),
            ItemKind::CharacterDynamics => self.character_targets.values().to_vec(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ProfileWire {
    p_desc_style: f64,
    p_perspective: f64,
    p_sensory: f64,
    p_thought: f64,
    p_tension: f64,
    p_reality: f64,
    p_char_count: f64,
    p_char_mental: f64,
    p_char_belief: f64,
    p_char_trauma: f64,
    p_char_voice: f64,
    length: u32,
}

impl TryFrom<ProfileWire> for TargetProfile {
    type Error = SelectionError;

    fn try_from(w: ProfileWire) -> Result<Self> {
        let profile = Self {
            scene_targets: SceneCraftAttributes {
                desc_style: w.p_desc_style,
                perspective: w.p_perspective,
                sensory: w.p_sensory,
                thought: w.p_thought,
                tension: w.p_tension,
                reality: w.p_reality,
            },
            character_targets: CharacterDynamicsAttributes {
                char_count: w.p_char_count,
                char_mental: w.p_char_mental,
                char_belief: w.p_char_belief,
                char_trauma: w.p_char_trauma,
                char_voice: w.p_char_voice,
            },
            target_length: w.length,
        };
        profile.validate()?;
        Ok(profile)
    }
}

impl From<TargetProfile> for ProfileWire {
    fn from(p: TargetProfile) -> Self {
        Self {
            p_desc_style: p.scene_targets.desc_style,
            p_perspective: p.scene_targets.perspective,
            p_sensory: p.scene_targets.sensory,
            p_thought: p.scene_targets.thought,
            p_tension: p.scene_targets.tension,
            p_reality: p.scene_targets.reality,
            p_char_count: p.character_targets.char_count,
            p_char_mental: p.character_targets.char_mental,
            p_char_belief: p.character_targets.char_belief,
            p_char_trauma: p.character_targets.char_trauma,
            p_char_voice: p.character_targets.char_voice,
            length: p.target_length,
        }
    }
}

/// One rated sample for the preference surrogate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "HistoryWire", into = "HistoryWire")]
pub struct HistoryRecord {
    pub attributes: ItemAttributes,
    pub relevance: f64,
    pub rating: Rating,
    pub rated_at: Option<DateTime<Utc>>,
}

impl HistoryRecord {
    /// Snapshot a rated candidate; unrated candidates produce nothing.
    pub fn from_candidate(candidate: &CandidateItem) -> Option<Self> {
        candidate.user_rating.map(|rating| Self {
            attributes: candidate.attributes,
            relevance: candidate.relevance,
            rating,
            rated_at: Some(Utc::now()),
        })
    }

    pub fn kind(&self) -> ItemKind {
        self.attributes.kind()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct HistoryWire {
    #[serde(default)]
    attributes: BTreeMap<String, f64>,
    #[serde(rename = "type")]
    kind: ItemKind,
    #[serde(default = "default_relevance")]
    relevance: f64,
    rating: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    rated_at: Option<DateTime<Utc>>,
}

fn default_relevance() -> f64 {
    0.5
}

impl TryFrom<HistoryWire> for HistoryRecord {
    type Error = SelectionError;

    fn try_from(w: HistoryWire) -> Result<Self> {
        Ok(Self {
            attributes: ItemAttributes::from_map(w.kind, &w.attributes),
            relevance: w.relevance,
            rating: Rating::new(w.rating)?,
            rated_at: w.rated_at,
        })
    }
}

impl From<HistoryRecord> for HistoryWire {
    fn from(r: HistoryRecord) -> Self {
        Self {
            kind: r.attributes.kind(),
            attributes: r.attributes.to_map(),
            relevance: r.relevance,
            rating: r.rating.value(),
            rated_at: r.rated_at,
        }
    }
}
