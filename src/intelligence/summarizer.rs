//! Conversation summarizer
//!
//! Per-user state machine keyed by the running message count `N`:
//! - brief summary when `N % brief_interval == 0`, from the latest
//!   `brief_window` messages, range `[N - window + 1, N]`
//! - meta summary when `N % meta_interval == 0`, from the retained briefs,
//!   range `[1, N]`
//!
//! Only the newest `brief_retention` briefs survive pruning; meta summaries
//! are never pruned. Jobs run detached from the chat turn.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::completion::{CompletionOptions, CompletionService};
use crate::error::{HearthError, Result};
use crate::storage::FamilyStore;
use crate::types::{ConversationSummary, Message, PipelineConfig, Role, SummaryType};

const BRIEF_PROMPT: &str = "You summarize conversations between a parent and a parenting coach. \
Summarize the conversation below in 50-100 words. Keep names, ages, concerns, strategies \
that were suggested and anything the parent committed to trying. Write plain prose.";

const META_PROMPT: &str = "You maintain long-term memory for a parenting coach. \
Synthesize the conversation summaries below into one comprehensive summary of 100-200 words. \
Keep every family member mentioned, recurring concerns, what has been tried and how it went, \
and open questions. Write plain prose.";

/// Which summaries are due
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryTrigger {
    pub brief: bool,
    pub meta: bool,
}

impl SummaryTrigger {
    pub fn any(&self) -> bool {
        self.brief || self.meta
    }

    fn merge(self, other: SummaryTrigger) -> SummaryTrigger {
        SummaryTrigger {
            brief: self.brief || other.brief,
            meta: self.meta || other.meta,
        }
    }
}

/// Summaries due exactly at message count `n`
pub fn check_triggers(n: u64, config: &PipelineConfig) -> SummaryTrigger {
    let due = |interval: u64| n > 0 && interval > 0 && n % interval == 0;
    SummaryTrigger {
        brief: due(config.brief_interval),
        meta: due(config.meta_interval),
    }
}

/// Summaries due for any count in `(previous, current]`.
///
/// A turn normally adds two messages; a turn whose reply failed adds one,
/// which would otherwise leave the count stepping over every boundary.
pub fn triggers_between(previous: u64, current: u64, config: &PipelineConfig) -> SummaryTrigger {
    (previous.saturating_add(1)..=current)
        .map(|n| check_triggers(n, config))
        .fold(SummaryTrigger::default(), SummaryTrigger::merge)
}

fn render_transcript(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| {
            let speaker = match m.role {
                Role::User => "Parent",
                Role::Assistant => "Coach",
            };
            format!("{}: {}", speaker, m.content)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_briefs(briefs: &[ConversationSummary]) -> String {
    briefs
        .iter()
        .map(|s| format!("[Messages {}] {}", s.range_label(), s.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Creates, stores and prunes conversation summaries
pub struct Summarizer {
    store: Arc<dyn FamilyStore>,
    completion: Arc<dyn CompletionService>,
    config: PipelineConfig,
}

impl Summarizer {
    pub fn new(
        store: Arc<dyn FamilyStore>,
        completion: Arc<dyn CompletionService>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            store,
            completion,
            config,
        }
    }

    pub fn check(&self, message_count: u64) -> SummaryTrigger {
        check_triggers(message_count, &self.config)
    }

    pub fn check_between(&self, previous: u64, current: u64) -> SummaryTrigger {
        triggers_between(previous, current, &self.config)
    }

    async fn summarize(&self, prompt: &str, body: &str, max_tokens: u32) -> Result<String> {
        let options = CompletionOptions {
            max_tokens,
            temperature: 0.3,
            ..Default::default()
        };
        let text = self.completion.complete(prompt, &[], body, &options).await?;
        let text = text.trim();
        if text.is_empty() {
            return Err(HearthError::Completion("empty summary".to_string()));
        }
        Ok(text.to_string())
    }

    /// Summarize the latest messages; `None` when too few exist
    pub async fn create_brief(
        &self,
        user_id: &str,
        message_count: u64,
    ) -> Result<Option<ConversationSummary>> {
        let mut messages = self.store.get_messages(user_id, self.config.brief_window)?;
        if messages.len() < self.config.brief_min_messages {
            debug!(user_id, available = messages.len(), "Too few messages for brief summary");
            return Ok(None);
        }
        messages.reverse();

        let content = self
            .summarize(BRIEF_PROMPT, &render_transcript(&messages), 250)
            .await?;
        let window = self.config.brief_window.max(1) as u64;
        let summary = ConversationSummary {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            summary_type: SummaryType::Brief,
            range_start: message_count.saturating_sub(window - 1).max(1),
            range_end: message_count,
            content,
            created_at: Utc::now(),
        };
        self.store.save_summary(&summary)?;
        info!(user_id, range = %summary.range_label(), "Created brief summary");

        self.prune_briefs(user_id)?;
        Ok(Some(summary))
    }

    /// Compress retained briefs; `None` when too few exist
    pub async fn create_meta(
        &self,
        user_id: &str,
        message_count: u64,
    ) -> Result<Option<ConversationSummary>> {
        let briefs: Vec<ConversationSummary> = self
            .store
            .get_summaries(user_id)?
            .into_iter()
            .filter(|s| s.summary_type == SummaryType::Brief)
            .collect();
        if briefs.len() < self.config.meta_min_briefs {
            debug!(user_id, available = briefs.len(), "Too few briefs for meta summary");
            return Ok(None);
        }

        let content = self
            .summarize(META_PROMPT, &render_briefs(&briefs), 500)
            .await?;
        let summary = ConversationSummary {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            summary_type: SummaryType::Meta,
            range_start: 1,
            range_end: message_count,
            content,
            created_at: Utc::now(),
        };
        self.store.save_summary(&summary)?;
        info!(user_id, range = %summary.range_label(), briefs = briefs.len(), "Created meta summary");
        Ok(Some(summary))
    }

    /// Delete all but the newest `brief_retention` briefs; returns how many went
    pub fn prune_briefs(&self, user_id: &str) -> Result<usize> {
        let briefs: Vec<ConversationSummary> = self
            .store
            .get_summaries(user_id)?
            .into_iter()
            .filter(|s| s.summary_type == SummaryType::Brief)
            .collect();
        let excess = briefs.len().saturating_sub(self.config.brief_retention);
        for old in briefs.iter().take(excess) {
            self.store.delete_summary(&old.id)?;
        }
        if excess > 0 {
            debug!(user_id, pruned = excess, "Pruned brief summaries");
        }
        Ok(excess)
    }

    /// Run the due jobs in order: brief first so the meta sees it.
    ///
    /// Each job is logged on failure and does not stop the other; the first
    /// error is returned once both have run.
    pub async fn run(&self, user_id: &str, message_count: u64, trigger: SummaryTrigger) -> Result<()> {
        let mut first_error = None;
        if trigger.brief {
            if let Err(e) = self.create_brief(user_id, message_count).await {
                error!(user_id, message_count, error = %e, "Brief summary failed");
                first_error.get_or_insert(e);
            }
        }
        if trigger.meta {
            if let Err(e) = self.create_meta(user_id, message_count).await {
                error!(user_id, message_count, error = %e, "Meta summary failed");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Fire-and-forget; failures are logged, never returned to the turn
    pub fn spawn(
        self: &Arc<Self>,
        user_id: &str,
        message_count: u64,
        trigger: SummaryTrigger,
    ) -> Option<JoinHandle<()>> {
        if !trigger.any() {
            return None;
        }
        let this = Arc::clone(self);
        let user_id = user_id.to_string();
        Some(tokio::spawn(async move {
            // run logs each failed job
            let _ = this.run(&user_id, message_count, trigger).await;
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Storage;
    use crate::types::ChatTurn;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingCompletion {
        calls: AtomicUsize,
        fail: bool,
        fail_on: Option<usize>,
    }

    #[async_trait]
    impl CompletionService for CountingCompletion {
        async fn complete(
            &self,
            _system_prompt: &str,
            _prior_turns: &[ChatTurn],
            _user_message: &str,
            _options: &CompletionOptions,
        ) -> Result<String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail || self.fail_on == Some(n) {
                return Err(HearthError::Completion("offline".into()));
            }
            Ok(format!("summary {}", n))
        }

        fn name(&self) -> &str {
            "counting"
        }
    }

    fn summarizer(fail: bool) -> (Arc<Storage>, Arc<Summarizer>) {
        summarizer_with(CountingCompletion {
            calls: AtomicUsize::new(0),
            fail,
            fail_on: None,
        })
    }

    fn summarizer_with(completion: CountingCompletion) -> (Arc<Storage>, Arc<Summarizer>) {
        let storage = Arc::new(Storage::open_in_memory().unwrap());
        let completion = Arc::new(completion);
        let summarizer = Arc::new(Summarizer::new(
            storage.clone(),
            completion,
            PipelineConfig::default(),
        ));
        (storage, summarizer)
    }

    fn seed_messages(storage: &Storage, user: &str, count: usize) {
        for i in 0..count {
            let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
            storage
                .save_message(&Message::new(user, role, format!("message {}", i)))
                .unwrap();
        }
    }

    #[test]
    fn test_cadence() {
        let config = PipelineConfig::default();
        assert_eq!(check_triggers(0, &config), SummaryTrigger::default());
        assert_eq!(
            check_triggers(10, &config),
            SummaryTrigger { brief: true, meta: false }
        );
        assert_eq!(
            check_triggers(100, &config),
            SummaryTrigger { brief: true, meta: true }
        );
        assert!(!check_triggers(15, &config).any());
    }

    #[test]
    fn test_triggers_between_catches_odd_steps() {
        let config = PipelineConfig::default();
        assert!(triggers_between(9, 11, &config).brief);
        assert!(!triggers_between(10, 12, &config).any());
        assert!(triggers_between(99, 101, &config).meta);
    }

    #[tokio::test]
    async fn test_brief_skipped_with_few_messages() {
        let (storage, summarizer) = summarizer(false);
        seed_messages(&storage, "u1", 4);
        assert!(summarizer.create_brief("u1", 4).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_brief_range_and_retention() {
        let (storage, summarizer) = summarizer(false);
        seed_messages(&storage, "u1", 10);

        for i in 1..=15u64 {
            let created = summarizer.create_brief("u1", i * 10).await.unwrap().unwrap();
            assert_eq!(created.range_label(), format!("{}-{}", i * 10 - 9, i * 10));
        }

        let remaining = storage.get_summaries("u1").unwrap();
        assert_eq!(remaining.len(), 10);
        assert_eq!(remaining[0].range_label(), "51-60");
        assert_eq!(remaining[9].range_label(), "141-150");
    }

    #[tokio::test]
    async fn test_meta_needs_three_briefs_and_is_kept() {
        let (storage, summarizer) = summarizer(false);
        seed_messages(&storage, "u1", 10);

        summarizer.create_brief("u1", 10).await.unwrap();
        summarizer.create_brief("u1", 20).await.unwrap();
        assert!(summarizer.create_meta("u1", 20).await.unwrap().is_none());

        summarizer.create_brief("u1", 30).await.unwrap();
        let meta = summarizer.create_meta("u1", 30).await.unwrap().unwrap();
        assert_eq!(meta.range_label(), "1-30");

        for i in 4..=20u64 {
            summarizer.create_brief("u1", i * 10).await.unwrap();
        }
        let metas = storage
            .get_summaries("u1")
            .unwrap()
            .into_iter()
            .filter(|s| s.summary_type == SummaryType::Meta)
            .count();
        assert_eq!(metas, 1);
    }

    #[tokio::test]
    async fn test_failed_brief_does_not_skip_meta() {
        // calls 1-3 build the briefs, call 4 is the failing brief at N=100
        let (storage, summarizer) = summarizer_with(CountingCompletion {
            calls: AtomicUsize::new(0),
            fail: false,
            fail_on: Some(4),
        });
        seed_messages(&storage, "u1", 10);
        for n in [10, 20, 30] {
            summarizer.create_brief("u1", n).await.unwrap();
        }

        let result = summarizer
            .run("u1", 100, SummaryTrigger { brief: true, meta: true })
            .await;
        assert!(matches!(result, Err(HearthError::Completion(_))));

        let summaries = storage.get_summaries("u1").unwrap();
        let briefs = summaries
            .iter()
            .filter(|s| s.summary_type == SummaryType::Brief)
            .count();
        assert_eq!(briefs, 3);
        let meta = summaries
            .iter()
            .find(|s| s.summary_type == SummaryType::Meta)
            .unwrap();
        assert_eq!(meta.range_label(), "1-100");
    }

    #[tokio::test]
    async fn test_spawned_failure_is_contained() {
        let (storage, summarizer) = summarizer(true);
        seed_messages(&storage, "u1", 10);

        let handle = summarizer
            .spawn("u1", 10, SummaryTrigger { brief: true, meta: false })
            .unwrap();
        handle.await.unwrap();
        assert!(storage.get_summaries("u1").unwrap().is_empty());

        assert!(summarizer.spawn("u1", 11, SummaryTrigger::default()).is_none());
    }
}
