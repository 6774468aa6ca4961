//! Core types for Hearth

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Unique identifier for a person profile
pub type ProfileId = String;

/// Sparse symptom map: symptom key -> present (true) / absent (false).
///
/// A missing key means "unknown". Keys are kept sorted so the canonical
/// serialization (and therefore the content hash) is stable.
pub type SymptomMap = BTreeMap<String, bool>;

/// How a person relates to the user who owns the profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Relationship {
    /// The user themself
    #[serde(rename = "self")]
    User,
    Child,
    Spouse,
    #[default]
    Other,
}

impl Relationship {
    pub fn as_str(&self) -> &'static str {
        match self {
            Relationship::User => "self",
            Relationship::Child => "child",
            Relationship::Spouse => "spouse",
            Relationship::Other => "other",
        }
    }
}

impl std::fmt::Display for Relationship {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Relationship {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "self" | "me" | "user" => Ok(Relationship::User),
            "child" | "son" | "daughter" | "kid" => Ok(Relationship::Child),
            "spouse" | "husband" | "wife" | "partner" => Ok(Relationship::Spouse),
            "other" => Ok(Relationship::Other),
            _ => Err(format!("Unknown relationship: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gender {
    Male,
    Female,
    NonBinary,
    Other,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
            Gender::NonBinary => "non_binary",
            Gender::Other => "other",
        }
    }
}

impl std::str::FromStr for Gender {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "male" | "m" | "boy" => Ok(Gender::Male),
            "female" | "f" | "girl" => Ok(Gender::Female),
            "non_binary" | "nonbinary" | "non-binary" | "nb" => Ok(Gender::NonBinary),
            "other" => Ok(Gender::Other),
            _ => Err(format!("Unknown gender: {}", s)),
        }
    }
}

/// One dated entry in an append-only journal field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub text: String,
    pub recorded_at: DateTime<Utc>,
}

/// One symptom flag change detected in conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymptomUpdate {
    /// Symptom key, e.g. "fidgetsOrSquirms"
    pub field: String,
    pub value: bool,
    /// Human-readable provenance
    pub reason: String,
    /// Message contained a correcting phrase ("actually", "I meant", ...)
    #[serde(default)]
    pub correction: bool,
}

/// Cached output of the diagnostic engine for one profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticCache {
    /// Hash of the symptom map the results were computed from
    pub symptom_hash: String,
    pub computed_at: DateTime<Utc>,
    pub results: Vec<DiagnosticResult>,
}

/// Stored record for one family member (or the user)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonProfile {
    pub id: ProfileId,
    pub user_id: String,
    pub name: String,
    pub relationship: Relationship,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    // Demographics
    pub age: Option<String>,
    pub gender: Option<Gender>,
    pub height: Option<String>,
    pub grade: Option<String>,
    pub school: Option<String>,
    /// Free-text work / school details
    pub work_info: Option<String>,
    /// Free-text medical details
    pub medical_info: Option<String>,

    // Set-valued fields (merged by union)
    #[serde(default)]
    pub diagnoses: Vec<String>,
    #[serde(default)]
    pub challenges: Vec<String>,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub therapies: Vec<String>,
    #[serde(default)]
    pub medications: Vec<String>,
    #[serde(default)]
    pub parent_goals: Vec<String>,

    // Append-only journals
    #[serde(default)]
    pub parent_notes: Vec<JournalEntry>,
    #[serde(default)]
    pub ai_observations: Vec<JournalEntry>,

    #[serde(default)]
    pub symptoms: SymptomMap,
    /// Content hash of `symptoms`, refreshed on every symptom write
    #[serde(default)]
    pub symptom_hash: String,
    pub diagnostics: Option<DiagnosticCache>,
}

/// Partial update for a profile.
///
/// `None` / blank scalars and empty lists are no-ops, never erasures.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfilePatch {
    pub relationship: Option<Relationship>,
    pub age: Option<String>,
    pub gender: Option<Gender>,
    pub height: Option<String>,
    pub grade: Option<String>,
    pub school: Option<String>,
    pub work_info: Option<String>,
    pub medical_info: Option<String>,
    pub diagnoses: Vec<String>,
    pub challenges: Vec<String>,
    pub strengths: Vec<String>,
    pub therapies: Vec<String>,
    pub medications: Vec<String>,
    pub parent_goals: Vec<String>,
    pub parent_note: Option<String>,
    pub ai_observation: Option<String>,
}

impl ProfilePatch {
    /// True when applying the patch can't change anything
    pub fn is_empty(&self) -> bool {
        self == &ProfilePatch::default()
    }
}

/// Input for creating a profile
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewProfile {
    pub user_id: String,
    pub name: String,
    #[serde(default)]
    pub relationship: Relationship,
    #[serde(default)]
    pub patch: ProfilePatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            _ => Err(format!("Unknown role: {}", s)),
        }
    }
}

/// A chat message. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub user_id: String,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(user_id: impl Into<String>, role: Role, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            role,
            content: content.into(),
            created_at: Utc::now(),
        }
    }
}

/// A role/content pair handed to the completion service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

impl From<&Message> for ChatTurn {
    fn from(message: &Message) -> Self {
        Self {
            role: message.role,
            content: message.content.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SummaryType {
    Brief,
    Meta,
}

impl SummaryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SummaryType::Brief => "brief",
            SummaryType::Meta => "meta",
        }
    }
}

impl std::str::FromStr for SummaryType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "brief" => Ok(SummaryType::Brief),
            "meta" => Ok(SummaryType::Meta),
            _ => Err(format!("Unknown summary type: {}", s)),
        }
    }
}

/// A compressed slice of conversation history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: String,
    pub user_id: String,
    pub summary_type: SummaryType,
    /// First message number covered (1-based)
    pub range_start: u64,
    /// Last message number covered (inclusive)
    pub range_end: u64,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl ConversationSummary {
    /// Message-range label, e.g. "11-20"
    pub fn range_label(&self) -> String {
        format!("{}-{}", self.range_start, self.range_end)
    }
}

/// Screening tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Probability {
    Low,
    Moderate,
    High,
}

impl Probability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Probability::Low => "low",
            Probability::Moderate => "moderate",
            Probability::High => "high",
        }
    }
}

impl std::str::FromStr for Probability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(Probability::Low),
            "moderate" | "medium" => Ok(Probability::Moderate),
            "high" => Ok(Probability::High),
            _ => Err(format!("Unknown probability tier: {}", s)),
        }
    }
}

/// One screening verdict. Derived data, regenerable from a symptom map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticResult {
    pub condition: String,
    pub probability: Probability,
    pub description: String,
    #[serde(default)]
    pub recommendations: Vec<String>,
    pub confidence: Option<f32>,
}

/// Storage mode determines SQLite journal settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum StorageMode {
    /// WAL mode for local disk
    #[default]
    Local,
    /// DELETE journal for cloud-synced folders
    CloudSafe,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to SQLite database
    pub db_path: String,
    #[serde(default)]
    pub storage_mode: StorageMode,
}

impl StorageConfig {
    pub fn in_memory() -> Self {
        Self {
            db_path: ":memory:".to_string(),
            storage_mode: StorageMode::Local,
        }
    }
}

/// Tunables for the extraction / summarization / context pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Brief summary every N messages
    pub brief_interval: u64,
    /// Meta summary every N messages
    pub meta_interval: u64,
    /// Messages compressed into one brief summary
    pub brief_window: usize,
    /// Skip the brief summary when fewer messages exist
    pub brief_min_messages: usize,
    /// Brief summaries kept after pruning
    pub brief_retention: usize,
    /// Skip the meta summary when fewer brief summaries exist
    pub meta_min_briefs: usize,
    /// Brief summaries injected into context
    pub context_brief_count: usize,
    /// Raw messages injected into context
    pub recent_message_count: usize,
    /// Diagnostic cache freshness window, in hours
    pub diagnostic_ttl_hours: i64,
    /// Answered symptoms needed before diagnostics are produced
    pub diagnostic_min_answered: usize,
    /// "Yes" answers needed before diagnostics are produced
    pub diagnostic_min_yes: usize,
    /// Token budget for the rendered system prompt
    pub context_token_budget: usize,
    /// Model name used to pick the tokenizer
    pub token_model: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            brief_interval: 10,
            meta_interval: 100,
            brief_window: 10,
            brief_min_messages: 5,
            brief_retention: 10,
            meta_min_briefs: 3,
            context_brief_count: 5,
            recent_message_count: 3,
            diagnostic_ttl_hours: 24,
            diagnostic_min_answered: 5,
            diagnostic_min_yes: 2,
            context_token_budget: 3000,
            token_model: "gpt-4o-mini".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relationship_serde_uses_self() {
        let json = serde_json::to_string(&Relationship::User).unwrap();
        assert_eq!(json, "\"self\"");
        let back: Relationship = serde_json::from_str("\"child\"").unwrap();
        assert_eq!(back, Relationship::Child);
        assert_eq!("husband".parse::<Relationship>().unwrap(), Relationship::Spouse);
    }

    #[test]
    fn test_probability_ordering() {
        assert!(Probability::High > Probability::Moderate);
        assert!(Probability::Moderate > Probability::Low);
        assert_eq!("Medium".parse::<Probability>().unwrap(), Probability::Moderate);
    }

    #[test]
    fn test_empty_patch() {
        assert!(ProfilePatch::default().is_empty());
        let patch = ProfilePatch {
            age: Some("7".into()),
            ..Default::default()
        };
        assert!(!patch.is_empty());
    }

    #[test]
    fn test_summary_range_label() {
        let summary = ConversationSummary {
            id: "s1".into(),
            user_id: "u1".into(),
            summary_type: SummaryType::Brief,
            range_start: 11,
            range_end: 20,
            content: "text".into(),
            created_at: Utc::now(),
        };
        assert_eq!(summary.range_label(), "11-20");
    }
}
