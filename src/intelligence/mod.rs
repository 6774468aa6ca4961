//! Conversational intelligence pipeline
//!
//! Provides:
//! - Family entity extraction (names, ages, grades, schools, diagnoses)
//! - Symptom extraction with correction detection
//! - Diagnostic scoring (rule-based and model-backed) with caching
//! - Tiered conversation summaries
//! - Context package assembly under a token budget

pub mod context;
pub mod diagnostics;
pub mod entities;
pub mod summarizer;
pub mod symptoms;
pub mod tokens;

pub use context::{render_family_context, ContextAssembler, ContextPackage, RenderedPrompt};
pub use diagnostics::{
    analysis_unavailable, meets_trigger, tally, CategoryTally, DiagnosticOutcome,
    DiagnosticService, DiagnosticStrategy, LlmStrategy, RuleBasedStrategy, RuleThresholds,
};
pub use entities::{ExtractionConfig, FamilyExtraction, FamilyExtractor};
pub use summarizer::{check_triggers, triggers_between, Summarizer, SummaryTrigger};
pub use symptoms::{
    is_correction, symptom_field, symptom_label, SymptomCategory, SymptomExtractor, SymptomField,
    SYMPTOM_FIELDS,
};
pub use tokens::{count_tokens, BudgetReport, TokenCounter, TokenEncoding};
