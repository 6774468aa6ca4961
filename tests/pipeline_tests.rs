//! End-to-end pipeline tests
//!
//! Drive the orchestrator, diagnostic service, summarizer and context
//! assembler together against SQLite, with a scripted completion backend.
//!
//! Run with: cargo test --test pipeline_tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use pretty_assertions::assert_eq;

use hearth::chat::APOLOGY_REPLY;
use hearth::intelligence::{
    check_triggers, ContextAssembler, DiagnosticOutcome, DiagnosticService, FamilyExtractor,
    LlmStrategy, RuleBasedStrategy, Summarizer, SummaryTrigger, SymptomCategory,
    SymptomExtractor,
};
use hearth::storage::{export_user, import_user, FamilyStore, ProfileStore, Storage};
use hearth::types::*;
use hearth::{
    ChatOrchestrator, CompletionOptions, CompletionService, CreditGate, CreditLedger, HearthError,
    ReplyStatus, Result, UnlimitedCredits,
};

const DIAGNOSTIC_JSON: &str = r#"{"results": [{"condition": "ADHD - Mainly Inattentive Type", "probability": "high", "description": "Inattentive pattern", "recommendations": ["Talk to your pediatrician"], "confidence": 0.8}]}"#;

/// Fixed reply for every call, counting calls
struct ScriptedCompletion {
    reply: Option<String>,
    calls: AtomicUsize,
}

impl ScriptedCompletion {
    fn replying(text: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: Some(text.to_string()),
            calls: AtomicUsize::new(0),
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            reply: None,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionService for ScriptedCompletion {
    async fn complete(
        &self,
        _system_prompt: &str,
        _prior_turns: &[ChatTurn],
        _user_message: &str,
        _options: &CompletionOptions,
    ) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.reply {
            Some(text) => Ok(text.clone()),
            None => Err(HearthError::Completion("503 Service Unavailable".into())),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

fn storage() -> Arc<Storage> {
    Arc::new(Storage::open_in_memory().unwrap())
}

fn orchestrator(
    storage: Arc<Storage>,
    completion: Arc<ScriptedCompletion>,
    credits: Arc<dyn CreditGate>,
) -> ChatOrchestrator {
    ChatOrchestrator::new(
        storage,
        completion,
        Arc::new(RuleBasedStrategy::default()),
        credits,
        PipelineConfig::default(),
    )
    .unwrap()
}

fn yes(field: &str) -> SymptomUpdate {
    SymptomUpdate {
        field: field.to_string(),
        value: true,
        reason: "test".to_string(),
        correction: false,
    }
}

fn child(profiles: &ProfileStore, name: &str) -> PersonProfile {
    profiles
        .get_or_create("u1", name, Relationship::Child)
        .unwrap()
        .0
}

// ============================================================================
// SCENARIOS
// ============================================================================

#[tokio::test]
async fn scenario_a_first_mention_builds_profile() {
    let message = "My son Sam is 12 and he can't sit still in class";

    let extraction = FamilyExtractor::default().extract(message, &Default::default());
    assert_eq!(extraction.children, vec!["Sam"]);
    assert_eq!(extraction.relationships.get("Sam"), Some(&Relationship::Child));
    assert_eq!(extraction.ages.get("Sam"), Some(&12));
    let updates = SymptomExtractor::new().extract(message, "Sam");
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].field, "fidgetsOrSquirms");
    assert!(updates[0].value);

    let storage = storage();
    let chat = orchestrator(
        storage.clone(),
        ScriptedCompletion::replying("That sounds hard."),
        Arc::new(UnlimitedCredits),
    );
    let reply = chat.handle_message("u1", message).await.unwrap();
    assert_eq!(reply.status, ReplyStatus::Ok);
    assert_eq!(reply.response, "That sounds hard.");

    let sam = storage.get_profile("u1", "Sam").unwrap().unwrap();
    assert_eq!(sam.relationship, Relationship::Child);
    assert_eq!(sam.age.as_deref(), Some("12"));
    assert_eq!(sam.gender, Some(Gender::Male));
    assert_eq!(sam.symptoms.get("fidgetsOrSquirms"), Some(&true));
    assert!(!sam.symptom_hash.is_empty());
}

#[tokio::test]
async fn possessive_mention_keeps_sole_child_routing() {
    let storage = storage();
    let chat = orchestrator(
        storage.clone(),
        ScriptedCompletion::replying("Noted."),
        Arc::new(UnlimitedCredits),
    );
    for message in [
        "My son Sam is 8",
        "Bedtime is my son's hardest time",
        "He can't sit still at dinner",
    ] {
        chat.handle_message("u1", message).await.unwrap();
    }

    let profiles = storage.get_profiles("u1").unwrap();
    let names: Vec<&str> = profiles.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["Sam"]);
    assert_eq!(profiles[0].symptoms.get("fidgetsOrSquirms"), Some(&true));
}

#[tokio::test]
async fn scenario_b_all_inattentive_yes() {
    let storage = storage();
    let profiles = ProfileStore::new(storage.clone());
    let sam = child(&profiles, "Sam");
    let updates: Vec<SymptomUpdate> = SymptomCategory::AdhdInattentive.keys().map(yes).collect();
    assert_eq!(updates.len(), 9);
    profiles.apply_symptom_updates(&sam.id, &updates).unwrap();

    let service = DiagnosticService::new(
        storage.clone(),
        Arc::new(RuleBasedStrategy::default()),
        &PipelineConfig::default(),
    );
    let outcome = service.refresh(&sam.id).await.unwrap();
    let DiagnosticOutcome::Computed(results) = outcome else {
        panic!("expected fresh results, got {:?}", outcome);
    };
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].condition, "ADHD - Mainly Inattentive Type");
    assert_eq!(results[0].probability, Probability::High);

    let stored = storage.get_profile_by_id(&sam.id).unwrap().unwrap();
    assert_eq!(stored.diagnostics.unwrap().results, results);
}

#[tokio::test]
async fn scenario_c_summary_cadence_after_ten_pairs() {
    let storage = storage();
    let completion = ScriptedCompletion::replying("Noted.");
    let chat = orchestrator(storage.clone(), completion, Arc::new(UnlimitedCredits));

    let mut last = None;
    for i in 0..10 {
        let mut reply = chat
            .handle_message("u1", &format!("Question number {}", i))
            .await
            .unwrap();
        if let Some(job) = reply.summary_job.take() {
            job.await.unwrap();
        }
        last = Some(reply);
    }

    let last = last.unwrap();
    assert_eq!(last.message_count, 20);
    assert_eq!(last.summaries, SummaryTrigger { brief: true, meta: false });

    let config = PipelineConfig::default();
    assert_eq!(check_triggers(10, &config), SummaryTrigger { brief: true, meta: false });
    assert_eq!(check_triggers(100, &config), SummaryTrigger { brief: true, meta: true });

    let ranges: Vec<String> = storage
        .get_summaries("u1")
        .unwrap()
        .iter()
        .map(|s| s.range_label())
        .collect();
    assert_eq!(ranges, vec!["1-10", "11-20"]);
}

// ============================================================================
// DIAGNOSTIC CACHE
// ============================================================================

#[tokio::test]
async fn diagnostic_cache_avoids_repeat_calls() {
    let storage = storage();
    let profiles = ProfileStore::new(storage.clone());
    let sam = child(&profiles, "Sam");
    let updates: Vec<SymptomUpdate> = SymptomCategory::AdhdInattentive.keys().map(yes).collect();
    profiles.apply_symptom_updates(&sam.id, &updates).unwrap();

    let completion = ScriptedCompletion::replying(DIAGNOSTIC_JSON);
    let service = DiagnosticService::new(
        storage.clone(),
        Arc::new(LlmStrategy::new(completion.clone())),
        &PipelineConfig::default(),
    );

    assert!(matches!(service.refresh(&sam.id).await.unwrap(), DiagnosticOutcome::Computed(_)));
    assert!(matches!(service.refresh(&sam.id).await.unwrap(), DiagnosticOutcome::Cached(_)));
    assert_eq!(completion.calls(), 1);

    // Flip one answer: the hash changes and the next refresh recomputes
    let flip = SymptomUpdate {
        value: false,
        ..yes("losesThings")
    };
    profiles.apply_symptom_updates(&sam.id, &[flip]).unwrap();
    assert!(matches!(service.refresh(&sam.id).await.unwrap(), DiagnosticOutcome::Computed(_)));
    assert_eq!(completion.calls(), 2);
}

#[tokio::test]
async fn diagnostic_model_failure_falls_back_to_rules() {
    let storage = storage();
    let profiles = ProfileStore::new(storage.clone());
    let sam = child(&profiles, "Sam");
    let updates: Vec<SymptomUpdate> = SymptomCategory::AdhdInattentive.keys().map(yes).collect();
    profiles.apply_symptom_updates(&sam.id, &updates).unwrap();

    let service = DiagnosticService::new(
        storage.clone(),
        Arc::new(LlmStrategy::new(ScriptedCompletion::replying("not json at all"))),
        &PipelineConfig::default(),
    );
    let results = service.diagnose(&sam.id).await.unwrap();
    assert_eq!(results[0].condition, "ADHD - Mainly Inattentive Type");
}

// ============================================================================
// SUMMARIES AND CONTEXT
// ============================================================================

#[tokio::test]
async fn summary_retention_keeps_ten_newest_briefs() {
    let storage = storage();
    for i in 0..10 {
        let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
        storage
            .save_message(&Message::new("u1", role, format!("message {}", i)))
            .unwrap();
    }

    let summarizer = Summarizer::new(
        storage.clone(),
        ScriptedCompletion::replying("A short summary."),
        PipelineConfig::default(),
    );
    for i in 1..=15u64 {
        summarizer.create_brief("u1", i * 10).await.unwrap().unwrap();
        if i == 5 || i == 10 {
            summarizer.create_meta("u1", i * 10).await.unwrap().unwrap();
        }
    }

    let summaries = storage.get_summaries("u1").unwrap();
    let brief_ends: Vec<u64> = summaries
        .iter()
        .filter(|s| s.summary_type == SummaryType::Brief)
        .map(|s| s.range_end)
        .collect();
    assert_eq!(brief_ends, (6..=15).map(|i| i * 10).collect::<Vec<_>>());

    let metas = summaries
        .iter()
        .filter(|s| s.summary_type == SummaryType::Meta)
        .count();
    assert_eq!(metas, 2);
}

#[tokio::test]
async fn context_without_profiles_omits_family_section() {
    let storage = storage();
    storage
        .save_message(&Message::new("u1", Role::User, "Hi there"))
        .unwrap();

    let assembler = ContextAssembler::new(storage.clone(), PipelineConfig::default()).unwrap();
    let package = assembler.assemble("u1", 1).unwrap();
    assert_eq!(package.family_context, "");
    assert!(package.summaries().is_empty());
    assert_eq!(package.recent_messages.len(), 1);

    let prompt = assembler.render_system_prompt(&package).system_prompt;
    assert!(!prompt.contains("FAMILY MEMBERS"));
    assert!(!prompt.to_lowercase().contains("no family"));
    assert!(!prompt.contains("CONVERSATION HISTORY"));
}

#[tokio::test]
async fn context_shows_screening_for_triggered_profiles() {
    let storage = storage();
    let profiles = ProfileStore::new(storage.clone());
    let sam = child(&profiles, "Sam");
    let updates: Vec<SymptomUpdate> = SymptomCategory::AdhdInattentive.keys().map(yes).collect();
    profiles.apply_symptom_updates(&sam.id, &updates).unwrap();
    DiagnosticService::new(
        storage.clone(),
        Arc::new(RuleBasedStrategy::default()),
        &PipelineConfig::default(),
    )
    .refresh(&sam.id)
    .await
    .unwrap();

    let assembler = ContextAssembler::new(storage.clone(), PipelineConfig::default()).unwrap();
    let package = assembler.assemble("u1", 0).unwrap();
    assert!(package.family_context.starts_with("FAMILY MEMBERS:"));
    assert!(package.family_context.contains("ADHD - Mainly Inattentive Type"));
}

// ============================================================================
// FAILURE PATHS
// ============================================================================

#[tokio::test]
async fn out_of_credits_stops_before_completion() {
    let storage = storage();
    let completion = ScriptedCompletion::replying("Sure.");
    let chat = orchestrator(storage.clone(), completion.clone(), Arc::new(CreditLedger::new(1)));

    let first = chat.handle_message("u1", "Hello").await.unwrap();
    assert_eq!(first.status, ReplyStatus::Ok);
    assert_eq!(chat.credits().balance("u1"), Some(0));

    let second = chat.handle_message("u1", "My son Leo is 6").await.unwrap();
    assert_eq!(second.status, ReplyStatus::OutOfCredits);
    assert_eq!(second.message_count, 2);
    assert_eq!(storage.count_messages("u1").unwrap(), 2);
    assert!(storage.get_profiles("u1").unwrap().is_empty());
    assert_eq!(completion.calls(), 1);

    assert!(matches!(
        chat.diagnose("u1", "Leo").await,
        Err(HearthError::OutOfCredits(_))
    ));
}

#[tokio::test]
async fn completion_failure_degrades_without_fabricated_reply() {
    let storage = storage();
    let chat = orchestrator(storage.clone(), ScriptedCompletion::failing(), Arc::new(CreditLedger::new(3)));

    let reply = chat.handle_message("u1", "My daughter Ava is 8").await.unwrap();
    assert_eq!(reply.status, ReplyStatus::Degraded);
    assert_eq!(reply.response, APOLOGY_REPLY);
    assert_eq!(reply.message_count, 1);

    let history = chat.history("u1", 10).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].role, Role::User);
    // Profile facts are kept; no credit is spent on a failed reply
    assert!(storage.get_profile("u1", "Ava").unwrap().is_some());
    assert_eq!(chat.credits().balance("u1"), Some(3));
}

#[tokio::test]
async fn diagnose_degrades_to_try_again_card() {
    let storage = storage();
    let completion = ScriptedCompletion::failing();
    let chat = ChatOrchestrator::new(
        storage.clone(),
        completion.clone(),
        Arc::new(LlmStrategy::new(completion).without_fallback()),
        Arc::new(UnlimitedCredits),
        PipelineConfig::default(),
    )
    .unwrap();
    child(&ProfileStore::new(storage.clone()), "Sam");

    let report = chat.diagnose("u1", "Sam").await.unwrap();
    assert!(report.degraded);
    assert_eq!(report.results.len(), 1);
    assert_eq!(report.results[0].condition, "Analysis Unavailable");
}

// ============================================================================
// CONCURRENCY AND EXPORT
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn users_run_independently_and_turns_serialize() {
    let storage = storage();
    let chat = Arc::new(orchestrator(
        storage.clone(),
        ScriptedCompletion::replying("Okay."),
        Arc::new(UnlimitedCredits),
    ));

    let mut handles = Vec::new();
    for user in ["u1", "u2"] {
        for i in 0..4 {
            let chat = chat.clone();
            handles.push(tokio::spawn(async move {
                chat.handle_message(user, &format!("Message {}", i)).await
            }));
        }
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap().status, ReplyStatus::Ok);
    }

    assert_eq!(storage.count_messages("u1").unwrap(), 8);
    assert_eq!(storage.count_messages("u2").unwrap(), 8);
    // Every user message is directly followed by its reply
    let history = chat.history("u1", 8).unwrap();
    for pair in history.chunks(2) {
        assert_eq!(pair[0].role, Role::User);
        assert_eq!(pair[1].role, Role::Assistant);
    }
}

#[tokio::test]
async fn export_import_round_trip_on_disk() {
    let source = storage();
    let chat = orchestrator(
        source.clone(),
        ScriptedCompletion::replying("Got it."),
        Arc::new(UnlimitedCredits),
    );
    chat.handle_message("u1", "My son Sam is 12 and he can't sit still in class")
        .await
        .unwrap();
    chat.handle_message("u1", "Sam is in 6th grade and goes to Lincoln Elementary")
        .await
        .unwrap();
    let exported = export_user(&*source, "u1").unwrap();
    assert_eq!(exported.profiles.len(), 1);
    assert_eq!(exported.messages.len(), 4);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("hearth.db");
    let target = Storage::open(StorageConfig {
        db_path: path.to_string_lossy().to_string(),
        storage_mode: StorageMode::Local,
    })
    .unwrap();
    import_user(&target, &exported).unwrap();

    let mut again = export_user(&target, "u1").unwrap();
    again.exported_at = exported.exported_at;
    assert_eq!(again, exported);
}
