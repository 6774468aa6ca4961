//! Context package assembly
//!
//! Builds what each outbound chat call knows about the family:
//! - family block rendered from every profile (omitted entirely when empty)
//! - the latest meta summary plus the newest brief summaries, oldest first
//! - the last few raw messages, chronological
//!
//! The rendered system prompt is kept under a token budget by dropping the
//! oldest brief summaries first, then the meta summary.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::diagnostics::meets_trigger;
use super::symptoms::symptom_label;
use super::tokens::{BudgetReport, TokenCounter};
use crate::error::Result;
use crate::storage::FamilyStore;
use crate::types::{
    ChatTurn, ConversationSummary, PersonProfile, PipelineConfig, Probability, SummaryType,
};

const INSTRUCTIONS: &str = "You are a warm, practical parenting coach. \
Use what you know about this family naturally, without announcing that you remember it. \
Refer to family members by name. Give concrete, age-appropriate suggestions and keep replies \
conversational. Screening results are not a diagnosis: when they are present, name the likely \
condition plainly and suggest talking with a professional. If something is unclear, ask one \
short follow-up question.";

/// Everything injected into one outbound chat call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextPackage {
    /// Empty when the user has no profiles
    pub family_context: String,
    pub meta_summary: Option<ConversationSummary>,
    /// Oldest first
    pub brief_summaries: Vec<ConversationSummary>,
    /// Chronological
    pub recent_messages: Vec<ChatTurn>,
    pub message_count: u64,
}

impl ContextPackage {
    /// Summary texts: meta first, then briefs oldest first
    pub fn summaries(&self) -> Vec<String> {
        self.meta_summary
            .iter()
            .map(render_meta)
            .chain(self.brief_summaries.iter().map(render_brief))
            .collect()
    }
}

/// Final system prompt plus how it fits the budget
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderedPrompt {
    pub system_prompt: String,
    pub budget: BudgetReport,
    pub dropped_briefs: usize,
    pub dropped_meta: bool,
}

fn render_meta(summary: &ConversationSummary) -> String {
    format!(
        "Overview (messages {}): {}",
        summary.range_label(),
        summary.content
    )
}

fn render_brief(summary: &ConversationSummary) -> String {
    format!("Messages {}: {}", summary.range_label(), summary.content)
}

fn push_list(out: &mut String, label: &str, items: &[String]) {
    if !items.is_empty() {
        out.push_str(&format!("  {}: {}\n", label, items.join(", ")));
    }
}

fn push_scalar(out: &mut String, label: &str, value: &Option<String>) {
    if let Some(value) = value.as_deref().filter(|v| !v.trim().is_empty()) {
        out.push_str(&format!("  {}: {}\n", label, value));
    }
}

fn render_profile(profile: &PersonProfile, min_answered: usize, min_yes: usize) -> String {
    let mut header = format!("- {} ({})", profile.name, profile.relationship.as_str());
    if let Some(age) = profile.age.as_deref().filter(|a| !a.trim().is_empty()) {
        header.push_str(&format!(", age {}", age));
    }
    if let Some(gender) = profile.gender {
        header.push_str(&format!(", {}", gender.as_str()));
    }

    let mut out = header;
    out.push('\n');
    push_scalar(&mut out, "Grade", &profile.grade);
    push_scalar(&mut out, "School", &profile.school);
    push_scalar(&mut out, "Work", &profile.work_info);
    push_scalar(&mut out, "Medical", &profile.medical_info);
    push_scalar(&mut out, "Height", &profile.height);
    push_list(&mut out, "Diagnoses", &profile.diagnoses);
    push_list(&mut out, "Challenges", &profile.challenges);
    push_list(&mut out, "Strengths", &profile.strengths);
    push_list(&mut out, "Therapies", &profile.therapies);
    push_list(&mut out, "Medications", &profile.medications);
    push_list(&mut out, "Parent goals", &profile.parent_goals);

    let observed: Vec<String> = profile
        .symptoms
        .iter()
        .filter(|(_, v)| **v)
        .map(|(k, _)| symptom_label(k).to_string())
        .collect();
    let not_observed: Vec<String> = profile
        .symptoms
        .iter()
        .filter(|(_, v)| !**v)
        .map(|(k, _)| symptom_label(k).to_string())
        .collect();
    push_list(&mut out, "Observed", &observed);
    push_list(&mut out, "Not observed", &not_observed);

    if let Some(note) = profile.parent_notes.last() {
        out.push_str(&format!("  Latest parent note: {}\n", note.text));
    }

    let diagnostics = profile
        .diagnostics
        .as_ref()
        .filter(|_| meets_trigger(&profile.symptoms, min_answered, min_yes));
    if let Some(cache) = diagnostics {
        out.push_str("  Screening results:\n");
        for tier in [Probability::High, Probability::Moderate, Probability::Low] {
            for result in cache.results.iter().filter(|r| r.probability == tier) {
                out.push_str(&format!(
                    "    {}: {} - {}\n",
                    tier.as_str().to_uppercase(),
                    result.condition,
                    result.description
                ));
            }
        }
        let likely: Vec<&str> = cache
            .results
            .iter()
            .filter(|r| r.probability >= Probability::Moderate)
            .map(|r| r.condition.as_str())
            .collect();
        if !likely.is_empty() {
            out.push_str(&format!(
                "  When {} comes up, state the likely condition by name ({}) and explain what it means in plain language.\n",
                profile.name,
                likely.join(", ")
            ));
        }
    }
    out
}

/// Render every profile into the family block; empty input gives ""
pub fn render_family_context(profiles: &[PersonProfile], min_answered: usize, min_yes: usize) -> String {
    if profiles.is_empty() {
        return String::new();
    }
    let mut out = String::from("FAMILY MEMBERS:\n");
    for profile in profiles {
        out.push_str(&render_profile(profile, min_answered, min_yes));
    }
    out.trim_end().to_string()
}

fn compose(family: &str, meta: Option<&ConversationSummary>, briefs: &[ConversationSummary]) -> String {
    let mut sections = Vec::new();
    if !family.is_empty() {
        sections.push(family.to_string());
    }
    if meta.is_some() || !briefs.is_empty() {
        let mut history = String::from("CONVERSATION HISTORY:");
        for summary in meta.iter().map(|m| render_meta(m)).chain(briefs.iter().map(render_brief)) {
            history.push('\n');
            history.push_str(&summary);
        }
        sections.push(history);
    }
    sections.push(INSTRUCTIONS.to_string());
    sections.join("\n\n")
}

/// Reads profiles, summaries and messages into a [`ContextPackage`]
pub struct ContextAssembler {
    store: Arc<dyn FamilyStore>,
    config: PipelineConfig,
    tokens: TokenCounter,
}

impl ContextAssembler {
    pub fn new(store: Arc<dyn FamilyStore>, config: PipelineConfig) -> Result<Self> {
        let tokens = TokenCounter::for_model(&config.token_model, None)?;
        Ok(Self {
            store,
            config,
            tokens,
        })
    }

    pub fn assemble(&self, user_id: &str, message_count: u64) -> Result<ContextPackage> {
        self.assemble_excluding(user_id, message_count, None)
    }

    /// Like [`assemble`](Self::assemble), leaving out one message (the turn
    /// being answered, which is sent separately)
    pub fn assemble_excluding(
        &self,
        user_id: &str,
        message_count: u64,
        exclude_id: Option<&str>,
    ) -> Result<ContextPackage> {
        let profiles = self.store.get_profiles(user_id)?;
        let family_context = render_family_context(
            &profiles,
            self.config.diagnostic_min_answered,
            self.config.diagnostic_min_yes,
        );

        let summaries = self.store.get_summaries(user_id)?;
        let meta_summary = summaries
            .iter()
            .rev()
            .find(|s| s.summary_type == SummaryType::Meta)
            .cloned();
        let briefs: Vec<ConversationSummary> = summaries
            .into_iter()
            .filter(|s| s.summary_type == SummaryType::Brief)
            .collect();
        let skip = briefs.len().saturating_sub(self.config.context_brief_count);
        let brief_summaries = briefs.into_iter().skip(skip).collect();

        let wanted = self.config.recent_message_count;
        let mut recent: Vec<ChatTurn> = self
            .store
            .get_messages(user_id, wanted + usize::from(exclude_id.is_some()))?
            .iter()
            .filter(|m| Some(m.id.as_str()) != exclude_id)
            .take(wanted)
            .map(ChatTurn::from)
            .collect();
        recent.reverse();

        Ok(ContextPackage {
            family_context,
            meta_summary,
            brief_summaries,
            recent_messages: recent,
            message_count,
        })
    }

    /// Render the system prompt, trimming summaries to fit the token budget
    pub fn render_system_prompt(&self, package: &ContextPackage) -> RenderedPrompt {
        let budget = self.config.context_token_budget;
        let mut briefs: &[ConversationSummary] = &package.brief_summaries;
        let mut meta = package.meta_summary.as_ref();

        let mut prompt = compose(&package.family_context, meta, briefs);
        let mut tokens = self.tokens.count(&prompt);
        let mut dropped_briefs = 0;
        let mut dropped_meta = false;

        while tokens > budget {
            if !briefs.is_empty() {
                briefs = &briefs[1..];
                dropped_briefs += 1;
            } else if meta.is_some() {
                meta = None;
                dropped_meta = true;
            } else {
                break;
            }
            prompt = compose(&package.family_context, meta, briefs);
            tokens = self.tokens.count(&prompt);
        }

        if dropped_briefs > 0 || dropped_meta {
            debug!(dropped_briefs, dropped_meta, tokens, budget, "Trimmed summaries to fit budget");
        }
        if tokens > budget {
            warn!(tokens, budget, "System prompt exceeds token budget after trimming");
        }

        RenderedPrompt {
            system_prompt: prompt,
            budget: BudgetReport::new(tokens, budget),
            dropped_briefs,
            dropped_meta,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{ProfileStore, Storage};
    use crate::types::{DiagnosticCache, DiagnosticResult, Message, ProfilePatch, Relationship, Role};
    use chrono::Utc;

    fn summary(user: &str, kind: SummaryType, start: u64, end: u64, content: &str) -> ConversationSummary {
        ConversationSummary {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user.to_string(),
            summary_type: kind,
            range_start: start,
            range_end: end,
            content: content.to_string(),
            created_at: Utc::now(),
        }
    }

    fn assembler(storage: &Arc<Storage>, config: PipelineConfig) -> ContextAssembler {
        ContextAssembler::new(storage.clone(), config).unwrap()
    }

    #[test]
    fn test_empty_profiles_omit_family_section() {
        let storage = Arc::new(Storage::open_in_memory().unwrap());
        let assembler = assembler(&storage, PipelineConfig::default());
        let package = assembler.assemble("u1", 0).unwrap();

        assert_eq!(package.family_context, "");
        let rendered = assembler.render_system_prompt(&package);
        assert!(!rendered.system_prompt.contains("FAMILY"));
        assert!(!rendered.system_prompt.to_lowercase().contains("no family"));
        assert!(rendered.system_prompt.ends_with(INSTRUCTIONS));
    }

    #[test]
    fn test_summary_selection_and_recent_messages() {
        let storage = Arc::new(Storage::open_in_memory().unwrap());
        storage
            .save_summary(&summary("u1", SummaryType::Meta, 1, 100, "old meta"))
            .unwrap();
        for i in 1..=7u64 {
            storage
                .save_summary(&summary("u1", SummaryType::Brief, i * 10 - 9, i * 10, &format!("brief {}", i)))
                .unwrap();
        }
        storage
            .save_summary(&summary("u1", SummaryType::Meta, 1, 200, "new meta"))
            .unwrap();
        let mut last = None;
        for i in 0..5 {
            let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
            last = Some(storage.save_message(&Message::new("u1", role, format!("m{}", i))).unwrap());
        }

        let assembler = assembler(&storage, PipelineConfig::default());
        let package = assembler
            .assemble_excluding("u1", 5, last.as_ref().map(|m| m.id.as_str()))
            .unwrap();

        assert_eq!(package.meta_summary.as_ref().unwrap().content, "new meta");
        let briefs: Vec<&str> = package.brief_summaries.iter().map(|s| s.content.as_str()).collect();
        assert_eq!(briefs, vec!["brief 3", "brief 4", "brief 5", "brief 6", "brief 7"]);
        assert_eq!(package.summaries().len(), 6);
        assert!(package.summaries()[0].starts_with("Overview"));

        let recent: Vec<&str> = package.recent_messages.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(recent, vec!["m1", "m2", "m3"]);
    }

    #[test]
    fn test_family_block_with_diagnostics() {
        let storage = Arc::new(Storage::open_in_memory().unwrap());
        let profiles = ProfileStore::new(storage.clone());
        let (sam, _) = profiles.get_or_create("u1", "Sam", Relationship::Child).unwrap();
        profiles
            .update("u1", "Sam", &ProfilePatch { age: Some("12".into()), ..Default::default() })
            .unwrap();
        storage
            .modify_profile(&sam.id, &mut |p| {
                for key in ["losesThings", "easilyDistracted", "forgetfulInDailyActivities", "failsToFinishTasks"] {
                    p.symptoms.insert(key.to_string(), true);
                }
                p.symptoms.insert("interruptsOthers".to_string(), false);
                p.diagnostics = Some(DiagnosticCache {
                    symptom_hash: String::new(),
                    computed_at: Utc::now(),
                    results: vec![DiagnosticResult {
                        condition: "ADHD Traits".into(),
                        probability: Probability::Moderate,
                        description: "Several attention behaviors".into(),
                        recommendations: vec![],
                        confidence: None,
                    }],
                });
            })
            .unwrap();

        let package = assembler(&storage, PipelineConfig::default()).assemble("u1", 2).unwrap();
        let family = &package.family_context;
        assert!(family.starts_with("FAMILY MEMBERS:\n- Sam (child), age 12"));
        assert!(family.contains("Observed: "));
        assert!(family.contains("Not observed: Interrupts others"));
        assert!(family.contains("MODERATE: ADHD Traits - Several attention behaviors"));
        assert!(family.contains("state the likely condition by name (ADHD Traits)"));
    }

    #[test]
    fn test_diagnostics_hidden_below_trigger() {
        let storage = Arc::new(Storage::open_in_memory().unwrap());
        let profiles = ProfileStore::new(storage.clone());
        let (ava, _) = profiles.get_or_create("u1", "Ava", Relationship::Child).unwrap();
        storage
            .modify_profile(&ava.id, &mut |p| {
                p.symptoms.insert("losesThings".to_string(), true);
                p.diagnostics = Some(DiagnosticCache {
                    symptom_hash: String::new(),
                    computed_at: Utc::now(),
                    results: vec![],
                });
            })
            .unwrap();
        let package = assembler(&storage, PipelineConfig::default()).assemble("u1", 0).unwrap();
        assert!(!package.family_context.contains("Screening"));
    }

    #[test]
    fn test_budget_drops_oldest_briefs_then_meta() {
        let storage = Arc::new(Storage::open_in_memory().unwrap());
        let filler = "The parent described a long difficult week with many details. ".repeat(20);
        storage
            .save_summary(&summary("u1", SummaryType::Meta, 1, 100, &filler))
            .unwrap();
        for i in 1..=3u64 {
            storage
                .save_summary(&summary("u1", SummaryType::Brief, i * 10 - 9, i * 10, &filler))
                .unwrap();
        }

        let unlimited = assembler(&storage, PipelineConfig::default());
        let package = unlimited.assemble("u1", 30).unwrap();
        let full = unlimited.render_system_prompt(&package);
        assert_eq!(full.dropped_briefs, 0);
        assert!(!full.budget.over_budget);

        let tight_config = PipelineConfig {
            context_token_budget: full.budget.total_tokens - 10,
            ..PipelineConfig::default()
        };
        let tight = assembler(&storage, tight_config).render_system_prompt(&package);
        assert_eq!(tight.dropped_briefs, 1);
        assert!(!tight.dropped_meta);
        assert!(tight.system_prompt.contains("Messages 21-30"));
        assert!(!tight.system_prompt.contains("Messages 1-10:"));

        let tiny_config = PipelineConfig {
            context_token_budget: 10,
            ..PipelineConfig::default()
        };
        let tiny = assembler(&storage, tiny_config).render_system_prompt(&package);
        assert_eq!(tiny.dropped_briefs, 3);
        assert!(tiny.dropped_meta);
        assert!(tiny.budget.over_budget);
        assert!(tiny.system_prompt.ends_with(INSTRUCTIONS));
    }
}
