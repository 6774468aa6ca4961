//! Chat orchestrator
//!
//! Drives one user turn end to end:
//! credit check -> persist user message -> extract and merge profile facts ->
//! symptom updates -> diagnostics refresh -> context assembly -> completion ->
//! persist reply -> schedule summaries.
//!
//! Turns for the same user are serialized; different users run concurrently.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::completion::{CompletionOptions, CompletionService};
use crate::credits::CreditGate;
use crate::error::{HearthError, Result};
use crate::intelligence::diagnostics::{analysis_unavailable, DiagnosticService, DiagnosticStrategy};
use crate::intelligence::entities::{mentions_word, FamilyExtractor};
use crate::intelligence::{ContextAssembler, Summarizer, SummaryTrigger, SymptomExtractor};
use crate::locks::KeyedLocks;
use crate::storage::{FamilyStore, ProfileStore};
use crate::types::{ChatTurn, DiagnosticResult, Message, PipelineConfig, Relationship, Role};

/// Shown when the completion call fails
pub const APOLOGY_REPLY: &str =
    "I'm sorry, I'm having trouble responding right now. Please try again in a moment.";

/// Shown when the user has no credits left
pub const OUT_OF_CREDITS_REPLY: &str =
    "You've run out of credits. Add more credits to keep chatting.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyStatus {
    Ok,
    /// Completion failed; the apology was not persisted
    Degraded,
    /// Nothing was persisted and no external call was made
    OutOfCredits,
}

/// Outcome of one chat turn
#[derive(Debug, Serialize)]
pub struct ChatReply {
    pub response: String,
    pub status: ReplyStatus,
    /// Stored messages for the user after this turn
    pub message_count: u64,
    /// Profiles created or updated from this message
    pub profiles_updated: Vec<String>,
    pub summaries: SummaryTrigger,
    /// Background summary job, when one was scheduled
    #[serde(skip)]
    pub summary_job: Option<JoinHandle<()>>,
}

impl ChatReply {
    fn out_of_credits(message_count: u64) -> Self {
        Self {
            response: OUT_OF_CREDITS_REPLY.to_string(),
            status: ReplyStatus::OutOfCredits,
            message_count,
            profiles_updated: Vec::new(),
            summaries: SummaryTrigger::default(),
            summary_job: None,
        }
    }
}

/// Result card for an explicit diagnostic request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiagnosisReport {
    pub person: String,
    pub profile_id: String,
    pub results: Vec<DiagnosticResult>,
    /// True when the results are the "try again later" placeholder
    pub degraded: bool,
}

/// Explicitly wired pipeline for chat turns
pub struct ChatOrchestrator {
    store: Arc<dyn FamilyStore>,
    profiles: ProfileStore,
    extractor: FamilyExtractor,
    symptoms: SymptomExtractor,
    diagnostics: DiagnosticService,
    summarizer: Arc<Summarizer>,
    assembler: ContextAssembler,
    completion: Arc<dyn CompletionService>,
    credits: Arc<dyn CreditGate>,
    chat_options: CompletionOptions,
    user_locks: KeyedLocks,
}

impl ChatOrchestrator {
    pub fn new(
        store: Arc<dyn FamilyStore>,
        completion: Arc<dyn CompletionService>,
        strategy: Arc<dyn DiagnosticStrategy>,
        credits: Arc<dyn CreditGate>,
        config: PipelineConfig,
    ) -> Result<Self> {
        let assembler = ContextAssembler::new(store.clone(), config.clone())?;
        Ok(Self {
            profiles: ProfileStore::new(store.clone()),
            extractor: FamilyExtractor::default(),
            symptoms: SymptomExtractor::new(),
            diagnostics: DiagnosticService::new(store.clone(), strategy, &config),
            summarizer: Arc::new(Summarizer::new(store.clone(), completion.clone(), config)),
            assembler,
            store,
            completion,
            credits,
            chat_options: CompletionOptions::default(),
            user_locks: KeyedLocks::new(),
        })
    }

    pub fn with_chat_options(mut self, options: CompletionOptions) -> Self {
        self.chat_options = options;
        self
    }

    pub fn with_extractor(mut self, extractor: FamilyExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn store(&self) -> &Arc<dyn FamilyStore> {
        &self.store
    }

    pub fn profiles(&self) -> &ProfileStore {
        &self.profiles
    }

    pub fn summarizer(&self) -> &Arc<Summarizer> {
        &self.summarizer
    }

    pub fn credits(&self) -> &Arc<dyn CreditGate> {
        &self.credits
    }

    /// Run one chat turn
    #[instrument(skip_all, fields(user_id = %user_id, message_len = message.len()))]
    pub async fn handle_message(&self, user_id: &str, message: &str) -> Result<ChatReply> {
        let message = message.trim();
        if message.is_empty() {
            return Err(HearthError::InvalidInput("message is empty".to_string()));
        }

        let _turn = self.user_locks.lock(user_id).await;

        let count_before = self.store.count_messages(user_id)?;
        if !self.credits.has_credit(user_id) {
            info!(user_id, "Turn refused: out of credits");
            return Ok(ChatReply::out_of_credits(count_before));
        }

        let user_message = self
            .store
            .save_message(&Message::new(user_id, Role::User, message))?;

        let (profiles_updated, symptom_profiles) = self.apply_extraction(user_id, message)?;
        for profile_id in &symptom_profiles {
            self.diagnostics.refresh(profile_id).await?;
        }

        let package = self.assembler.assemble_excluding(
            user_id,
            count_before + 1,
            Some(user_message.id.as_str()),
        )?;
        let prompt = self.assembler.render_system_prompt(&package);
        debug!(
            tokens = prompt.budget.total_tokens,
            summaries = package.summaries().len(),
            recent = package.recent_messages.len(),
            "Context assembled"
        );

        let completion = self
            .completion
            .complete(
                &prompt.system_prompt,
                &package.recent_messages,
                message,
                &self.chat_options,
            )
            .await;

        let (response, status) = match completion {
            Ok(text) => {
                self.store
                    .save_message(&Message::new(user_id, Role::Assistant, text.as_str()))?;
                if let Err(e) = self.credits.consume(user_id) {
                    warn!(user_id, error = %e, "Credit consumption failed after reply");
                }
                (text, ReplyStatus::Ok)
            }
            Err(e) => {
                warn!(
                    user_id,
                    backend = self.completion.name(),
                    error = %e,
                    "Completion failed, replying with apology"
                );
                (APOLOGY_REPLY.to_string(), ReplyStatus::Degraded)
            }
        };

        let message_count = self.store.count_messages(user_id)?;
        let summaries = self.summarizer.check_between(count_before, message_count);
        let summary_job = self.summarizer.spawn(user_id, message_count, summaries);

        Ok(ChatReply {
            response,
            status,
            message_count,
            profiles_updated,
            summaries,
            summary_job,
        })
    }

    /// Merge extracted facts and symptom flags.
    ///
    /// Returns the names of updated profiles and the ids of profiles whose
    /// symptoms changed.
    fn apply_extraction(&self, user_id: &str, message: &str) -> Result<(Vec<String>, Vec<String>)> {
        let known: BTreeSet<String> = self
            .store
            .get_profiles(user_id)?
            .into_iter()
            .map(|p| p.name)
            .collect();
        let extraction = self.extractor.extract(message, &known);

        let mut updated = Vec::new();
        for name in extraction.people() {
            if !known.contains(&name) {
                // A new person needs a relationship before a profile is created
                let Some(relationship) = extraction.relationships.get(&name).copied() else {
                    continue;
                };
                self.profiles.get_or_create(user_id, &name, relationship)?;
            }
            self.profiles.update(user_id, &name, &extraction.to_patch(&name))?;
            updated.push(name);
        }

        let profiles = self.store.get_profiles(user_id)?;
        let mut targets: Vec<_> = profiles
            .iter()
            .filter(|p| mentions_word(message, &p.name))
            .collect();
        if targets.is_empty() {
            let children: Vec<_> = profiles
                .iter()
                .filter(|p| p.relationship == Relationship::Child)
                .collect();
            if children.len() == 1 {
                targets = children;
            }
        }

        let mut symptom_profiles = Vec::new();
        for profile in targets {
            let updates = self.symptoms.extract(message, &profile.name);
            if updates.is_empty() {
                continue;
            }
            self.profiles.apply_symptom_updates(&profile.id, &updates)?;
            symptom_profiles.push(profile.id.clone());
        }

        Ok((updated, symptom_profiles))
    }

    /// Score one person on demand, ignoring the minimum trigger.
    ///
    /// Scoring failures degrade to the "try again later" card.
    #[instrument(skip_all, fields(user_id = %user_id, person = %person))]
    pub async fn diagnose(&self, user_id: &str, person: &str) -> Result<DiagnosisReport> {
        if !self.credits.has_credit(user_id) {
            return Err(HearthError::OutOfCredits(user_id.to_string()));
        }

        let _turn = self.user_locks.lock(user_id).await;

        let profile = self
            .store
            .get_profile(user_id, person)?
            .ok_or_else(|| HearthError::NotFound(format!("profile '{}'", person)))?;

        let results = match self.diagnostics.diagnose(&profile.id).await {
            Ok(results) => results,
            Err(e) => {
                warn!(user_id, profile_id = %profile.id, error = %e, "Diagnosis failed");
                vec![analysis_unavailable()]
            }
        };
        let placeholder = analysis_unavailable();
        let degraded = results.len() == 1 && results[0].condition == placeholder.condition;

        Ok(DiagnosisReport {
            person: profile.name,
            profile_id: profile.id,
            results,
            degraded,
        })
    }

    /// Recent conversation, chronological
    pub fn history(&self, user_id: &str, limit: usize) -> Result<Vec<ChatTurn>> {
        let mut messages = self.store.get_messages(user_id, limit)?;
        messages.reverse();
        Ok(messages.iter().map(ChatTurn::from).collect())
    }
}
