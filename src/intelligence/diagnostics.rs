//! Diagnostic probability engine
//!
//! Two interchangeable strategies behind [`DiagnosticStrategy`]:
//! - [`RuleBasedStrategy`]: fixed category question sets and thresholds
//! - [`LlmStrategy`]: asks the completion service for a structured verdict,
//!   falling back to the rules (or a placeholder) on any failure
//!
//! [`DiagnosticService`] owns the per-profile cache: results are reused while
//! the symptom hash is unchanged and the cache is younger than the TTL.
//! This is a screening aid, not a clinical instrument.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::symptoms::{symptom_field, SymptomCategory};
use crate::completion::{CompletionOptions, CompletionService};
use crate::error::{HearthError, Result};
use crate::locks::KeyedLocks;
use crate::storage::{symptom_hash, FamilyStore};
use crate::types::{DiagnosticCache, DiagnosticResult, PipelineConfig, Probability, SymptomMap};

// =============================================================================
// Tallies
// =============================================================================

/// Answer counts for one screening category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryTally {
    pub category: SymptomCategory,
    pub yes: usize,
    pub no: usize,
    /// Number of questions in the category
    pub size: usize,
}

impl CategoryTally {
    pub fn confidence(&self) -> f32 {
        if self.size == 0 {
            0.0
        } else {
            self.yes as f32 / self.size as f32
        }
    }
}

/// Tally yes/no answers per scored category
pub fn tally(symptoms: &SymptomMap) -> Vec<CategoryTally> {
    SymptomCategory::SCORED
        .iter()
        .map(|category| {
            let mut tally = CategoryTally {
                category: *category,
                yes: 0,
                no: 0,
                size: 0,
            };
            for key in category.keys() {
                tally.size += 1;
                match symptoms.get(key) {
                    Some(true) => tally.yes += 1,
                    Some(false) => tally.no += 1,
                    None => {}
                }
            }
            tally
        })
        .collect()
}

/// Enough answers to show a diagnostic section at all?
pub fn meets_trigger(symptoms: &SymptomMap, min_answered: usize, min_yes: usize) -> bool {
    let yes = symptoms.values().filter(|v| **v).count();
    symptoms.len() >= min_answered && yes >= min_yes
}

// =============================================================================
// Strategy trait
// =============================================================================

/// A way of turning a symptom map into diagnostic results
#[async_trait]
pub trait DiagnosticStrategy: Send + Sync {
    /// Always returns at least one result; failures degrade internally
    async fn score(&self, symptoms: &SymptomMap) -> Vec<DiagnosticResult>;

    fn name(&self) -> &str;
}

// =============================================================================
// Rule-based strategy
// =============================================================================

/// Tunable thresholds for the rule-based scorer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleThresholds {
    pub adhd_high: usize,
    pub adhd_moderate: usize,
    pub autism_social_high: usize,
    pub autism_repetitive_high: usize,
    pub autism_moderate: usize,
    pub anxiety_high: usize,
    pub anxiety_moderate: usize,
    pub sensory_high: usize,
    pub sensory_moderate: usize,
    pub executive_high: usize,
    pub executive_moderate: usize,
}

impl Default for RuleThresholds {
    fn default() -> Self {
        Self {
            adhd_high: 6,
            adhd_moderate: 4,
            autism_social_high: 3,
            autism_repetitive_high: 2,
            autism_moderate: 2,
            anxiety_high: 4,
            anxiety_moderate: 2,
            sensory_high: 3,
            sensory_moderate: 2,
            executive_high: 4,
            executive_moderate: 2,
        }
    }
}

struct Finding {
    condition: &'static str,
    description: &'static str,
    recommendations: &'static [&'static str],
}

impl Finding {
    fn result(&self, probability: Probability, confidence: f32) -> DiagnosticResult {
        DiagnosticResult {
            condition: self.condition.to_string(),
            probability,
            description: self.description.to_string(),
            recommendations: self.recommendations.iter().map(|r| r.to_string()).collect(),
            confidence: Some(confidence),
        }
    }
}

const ADHD_RECOMMENDATIONS: &[&str] = &[
    "Discuss these observations with your pediatrician",
    "Ask about a formal ADHD evaluation",
    "Share observations with teachers to compare home and school",
    "Use visual schedules and short, clear instructions",
];

const ADHD_INATTENTIVE: Finding = Finding {
    condition: "ADHD - Mainly Inattentive Type",
    description: "Many reported behaviors match inattentive ADHD patterns: trouble sustaining focus, following through and staying organized.",
    recommendations: ADHD_RECOMMENDATIONS,
};

const ADHD_HYPERACTIVE: Finding = Finding {
    condition: "ADHD - Hyperactive-Impulsive Type",
    description: "Many reported behaviors match hyperactive-impulsive ADHD patterns: constant motion, difficulty waiting and interrupting.",
    recommendations: ADHD_RECOMMENDATIONS,
};

const ADHD_COMBINED: Finding = Finding {
    condition: "ADHD - Combined Type",
    description: "Reported behaviors match both inattentive and hyperactive-impulsive ADHD patterns.",
    recommendations: ADHD_RECOMMENDATIONS,
};

const ADHD_TRAITS: Finding = Finding {
    condition: "ADHD Traits",
    description: "Several attention or activity-level behaviors were reported, below the level usually associated with ADHD.",
    recommendations: &[
        "Keep a simple log of when focus or activity problems show up",
        "Mention the pattern at the next pediatric checkup",
    ],
};

const AUTISM: Finding = Finding {
    condition: "Autism Spectrum Disorder",
    description: "Reported behaviors include both social-communication differences and restricted or repetitive patterns typical of autism.",
    recommendations: &[
        "Ask your pediatrician about a developmental evaluation",
        "Consider a speech-language or occupational therapy assessment",
        "Keep routines predictable and give warning before changes",
    ],
};

const AUTISM_TRAITS: Finding = Finding {
    condition: "Autism Spectrum Traits",
    description: "Some social-communication or repetitive behaviors were reported that can be associated with autism.",
    recommendations: &[
        "Note situations where social or routine difficulties appear",
        "Raise these observations at the next developmental checkup",
    ],
};

const ANXIETY: Finding = Finding {
    condition: "Anxiety Disorder",
    description: "Frequent worry, tension and avoidance were reported, consistent with an anxiety disorder.",
    recommendations: &[
        "Talk to your pediatrician or a child therapist about anxiety",
        "Ask about cognitive behavioral therapy (CBT)",
        "Validate feelings and practice calming routines together",
    ],
};

const ANXIETY_SYMPTOMS: Finding = Finding {
    condition: "Anxiety Symptoms",
    description: "Some signs of worry or avoidance were reported.",
    recommendations: &[
        "Watch for situations that trigger worry",
        "Practice simple breathing or grounding exercises together",
    ],
};

const SENSORY: Finding = Finding {
    condition: "Sensory Processing Differences",
    description: "Several reactions to noise, textures or light were reported, suggesting sensory processing differences.",
    recommendations: &[
        "Ask about an occupational therapy sensory evaluation",
        "Offer noise-reducing headphones or tagless clothing",
    ],
};

const SENSORY_SENSITIVITIES: Finding = Finding {
    condition: "Sensory Sensitivities",
    description: "A few sensory sensitivities were reported.",
    recommendations: &["Notice which sensations are hardest and adjust where practical"],
};

const EXECUTIVE: Finding = Finding {
    condition: "Executive Function Difficulties",
    description: "Starting tasks, planning, transitions and remembering instructions appear consistently hard.",
    recommendations: &[
        "Break tasks into small steps with checklists",
        "Use timers and visual schedules for transitions",
        "Ask the school about organizational supports",
    ],
};

const EXECUTIVE_CHALLENGES: Finding = Finding {
    condition: "Executive Function Challenges",
    description: "Some planning or task-management difficulties were reported.",
    recommendations: &["Try checklists and visual reminders for daily routines"],
};

const NO_CONCERNS: Finding = Finding {
    condition: "No Significant Concerns",
    description: "The answers so far do not point to a specific concern.",
    recommendations: &["Keep sharing observations; the picture gets clearer over time"],
};

const UNAVAILABLE: Finding = Finding {
    condition: "Analysis Unavailable",
    description: "The symptom analysis could not be completed right now. Please try again later.",
    recommendations: &["Try again later"],
};

/// The deterministic "try again later" result
pub fn analysis_unavailable() -> DiagnosticResult {
    UNAVAILABLE.result(Probability::Low, 0.0)
}

/// Deterministic threshold scorer
#[derive(Debug, Clone, Default)]
pub struct RuleBasedStrategy {
    thresholds: RuleThresholds,
}

impl RuleBasedStrategy {
    pub fn new(thresholds: RuleThresholds) -> Self {
        Self { thresholds }
    }

    pub fn evaluate(&self, symptoms: &SymptomMap) -> Vec<DiagnosticResult> {
        let t = &self.thresholds;
        let tallies = tally(symptoms);
        let get = |category: SymptomCategory| {
            tallies
                .iter()
                .find(|t| t.category == category)
                .copied()
                .unwrap_or(CategoryTally {
                    category,
                    yes: 0,
                    no: 0,
                    size: 0,
                })
        };

        let inattentive = get(SymptomCategory::AdhdInattentive);
        let hyperactive = get(SymptomCategory::AdhdHyperactive);
        let social = get(SymptomCategory::AutismSocial);
        let repetitive = get(SymptomCategory::AutismRepetitive);
        let anxiety = get(SymptomCategory::Anxiety);
        let sensory = get(SymptomCategory::Sensory);
        let executive = get(SymptomCategory::ExecutiveFunction);

        let mut results = Vec::new();

        let inattentive_high = inattentive.yes >= t.adhd_high;
        let hyperactive_high = hyperactive.yes >= t.adhd_high;
        if inattentive_high && hyperactive_high {
            let confidence = (inattentive.confidence() + hyperactive.confidence()) / 2.0;
            results.push(ADHD_COMBINED.result(Probability::High, confidence));
        } else if inattentive_high {
            results.push(ADHD_INATTENTIVE.result(Probability::High, inattentive.confidence()));
        } else if hyperactive_high {
            results.push(ADHD_HYPERACTIVE.result(Probability::High, hyperactive.confidence()));
        } else if inattentive.yes.max(hyperactive.yes) >= t.adhd_moderate {
            let confidence = inattentive.confidence().max(hyperactive.confidence());
            results.push(ADHD_TRAITS.result(Probability::Moderate, confidence));
        }

        let autism_confidence = (social.yes + repetitive.yes) as f32
            / (social.size + repetitive.size).max(1) as f32;
        if social.yes >= t.autism_social_high && repetitive.yes >= t.autism_repetitive_high {
            results.push(AUTISM.result(Probability::High, autism_confidence));
        } else if social.yes >= t.autism_moderate || repetitive.yes >= t.autism_moderate {
            results.push(AUTISM_TRAITS.result(Probability::Moderate, autism_confidence));
        }

        if anxiety.yes >= t.anxiety_high {
            results.push(ANXIETY.result(Probability::High, anxiety.confidence()));
        } else if anxiety.yes >= t.anxiety_moderate {
            results.push(ANXIETY_SYMPTOMS.result(Probability::Moderate, anxiety.confidence()));
        }

        if sensory.yes >= t.sensory_high {
            results.push(SENSORY.result(Probability::High, sensory.confidence()));
        } else if sensory.yes >= t.sensory_moderate {
            results.push(SENSORY_SENSITIVITIES.result(Probability::Moderate, sensory.confidence()));
        }

        if executive.yes >= t.executive_high {
            results.push(EXECUTIVE.result(Probability::High, executive.confidence()));
        } else if executive.yes >= t.executive_moderate {
            results.push(EXECUTIVE_CHALLENGES.result(Probability::Moderate, executive.confidence()));
        }

        if results.is_empty() {
            results.push(NO_CONCERNS.result(Probability::Low, 0.0));
        }
        results
    }
}

#[async_trait]
impl DiagnosticStrategy for RuleBasedStrategy {
    async fn score(&self, symptoms: &SymptomMap) -> Vec<DiagnosticResult> {
        self.evaluate(symptoms)
    }

    fn name(&self) -> &str {
        "rule-based"
    }
}

// =============================================================================
// Language-model strategy
// =============================================================================

const DIAGNOSTIC_SYSTEM_PROMPT: &str = "You are a child development screening assistant. \
Given symptom checklist answers for one child, estimate which conditions are likely. \
This is a screening aid, not a diagnosis. \
Respond with JSON only, shaped as {\"results\": [{\"condition\": string, \
\"probability\": \"low\"|\"moderate\"|\"high\", \"description\": string, \
\"recommendations\": [string], \"confidence\": number between 0 and 1}]}. \
If nothing stands out, return a single result with condition \"No Significant Concerns\" and probability \"low\".";

#[derive(Debug, Deserialize)]
struct RawResult {
    condition: String,
    probability: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    recommendations: Vec<String>,
    #[serde(default)]
    confidence: Option<f32>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawResponse {
    Wrapped { results: Vec<RawResult> },
    Bare(Vec<RawResult>),
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

/// Parse a structured diagnostic response
pub fn parse_diagnostic_response(text: &str) -> Result<Vec<DiagnosticResult>> {
    let raw: RawResponse = serde_json::from_str(strip_code_fence(text))?;
    let raw = match raw {
        RawResponse::Wrapped { results } => results,
        RawResponse::Bare(results) => results,
    };

    let results = raw
        .into_iter()
        .filter(|r| !r.condition.trim().is_empty())
        .map(|r| {
            let probability = r
                .probability
                .parse::<Probability>()
                .map_err(HearthError::Completion)?;
            Ok(DiagnosticResult {
                condition: r.condition.trim().to_string(),
                probability,
                description: r.description,
                recommendations: r.recommendations,
                confidence: r.confidence.map(|c| c.clamp(0.0, 1.0)),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    if results.is_empty() {
        return Err(HearthError::Completion(
            "diagnostic response contained no results".to_string(),
        ));
    }
    Ok(results)
}

/// Render tallies and per-question answers for the model
pub fn render_answers(symptoms: &SymptomMap) -> String {
    let mut out = String::from("Category tallies (yes / questions, answered):\n");
    for t in tally(symptoms) {
        out.push_str(&format!(
            "- {}: {}/{} yes, {} answered\n",
            t.category.as_str(),
            t.yes,
            t.size,
            t.yes + t.no
        ));
    }
    out.push_str("\nAnswers:\n");
    for (key, value) in symptoms {
        let label = symptom_field(key).map(|f| f.label).unwrap_or(key.as_str());
        out.push_str(&format!(
            "- {} ({}): {}\n",
            label,
            key,
            if *value { "Yes" } else { "No" }
        ));
    }
    out
}

/// Completion-backed scorer with rule-based fallback
pub struct LlmStrategy {
    completion: Arc<dyn CompletionService>,
    fallback: Option<RuleBasedStrategy>,
    options: CompletionOptions,
}

impl LlmStrategy {
    pub fn new(completion: Arc<dyn CompletionService>) -> Self {
        Self {
            completion,
            fallback: Some(RuleBasedStrategy::default()),
            options: CompletionOptions::structured(1200),
        }
    }

    /// Use the fixed placeholder instead of the rules when the model fails
    pub fn without_fallback(mut self) -> Self {
        self.fallback = None;
        self
    }

    fn degrade(&self, symptoms: &SymptomMap) -> Vec<DiagnosticResult> {
        match &self.fallback {
            Some(rules) => rules.evaluate(symptoms),
            None => vec![analysis_unavailable()],
        }
    }
}

#[async_trait]
impl DiagnosticStrategy for LlmStrategy {
    async fn score(&self, symptoms: &SymptomMap) -> Vec<DiagnosticResult> {
        let response = self
            .completion
            .complete(
                DIAGNOSTIC_SYSTEM_PROMPT,
                &[],
                &render_answers(symptoms),
                &self.options,
            )
            .await;

        match response.and_then(|text| parse_diagnostic_response(&text)) {
            Ok(results) => results,
            Err(e) => {
                warn!(
                    backend = self.completion.name(),
                    error = %e,
                    "Model diagnostics failed, degrading"
                );
                self.degrade(symptoms)
            }
        }
    }

    fn name(&self) -> &str {
        "llm"
    }
}

// =============================================================================
// Cached service
// =============================================================================

/// What a refresh did
#[derive(Debug, Clone, PartialEq)]
pub enum DiagnosticOutcome {
    /// Below the minimum trigger; nothing computed
    Insufficient,
    Cached(Vec<DiagnosticResult>),
    Computed(Vec<DiagnosticResult>),
}

impl DiagnosticOutcome {
    pub fn results(&self) -> Option<&[DiagnosticResult]> {
        match self {
            DiagnosticOutcome::Insufficient => None,
            DiagnosticOutcome::Cached(r) | DiagnosticOutcome::Computed(r) => Some(r),
        }
    }
}

/// Diagnostic engine with the per-profile result cache
pub struct DiagnosticService {
    store: Arc<dyn FamilyStore>,
    strategy: Arc<dyn DiagnosticStrategy>,
    ttl: Duration,
    min_answered: usize,
    min_yes: usize,
    locks: KeyedLocks,
}

impl DiagnosticService {
    pub fn new(
        store: Arc<dyn FamilyStore>,
        strategy: Arc<dyn DiagnosticStrategy>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            store,
            strategy,
            ttl: Duration::hours(config.diagnostic_ttl_hours as i64),
            min_answered: config.diagnostic_min_answered,
            min_yes: config.diagnostic_min_yes,
            locks: KeyedLocks::new(),
        }
    }

    pub fn strategy_name(&self) -> &str {
        self.strategy.name()
    }

    pub fn meets_trigger(&self, symptoms: &SymptomMap) -> bool {
        meets_trigger(symptoms, self.min_answered, self.min_yes)
    }

    /// Profiles with a scoring run in flight
    pub fn active_locks(&self) -> usize {
        self.locks.len()
    }

    /// Recompute diagnostics when the trigger is met and the cache is stale
    pub async fn refresh(&self, profile_id: &str) -> Result<DiagnosticOutcome> {
        self.run(profile_id, false).await
    }

    /// Score regardless of the minimum trigger, still honoring the cache
    pub async fn diagnose(&self, profile_id: &str) -> Result<Vec<DiagnosticResult>> {
        match self.run(profile_id, true).await? {
            DiagnosticOutcome::Cached(results) | DiagnosticOutcome::Computed(results) => {
                Ok(results)
            }
            DiagnosticOutcome::Insufficient => Ok(vec![analysis_unavailable()]),
        }
    }

    async fn run(&self, profile_id: &str, force: bool) -> Result<DiagnosticOutcome> {
        let _guard = self.locks.lock(profile_id).await;

        // Re-read inside the critical section so a concurrent turn's write is seen
        let profile = self
            .store
            .get_profile_by_id(profile_id)?
            .ok_or_else(|| HearthError::NotFound(format!("profile {}", profile_id)))?;

        if !force && !self.meets_trigger(&profile.symptoms) {
            debug!(profile_id, answered = profile.symptoms.len(), "Diagnostic trigger not met");
            return Ok(DiagnosticOutcome::Insufficient);
        }

        let hash = symptom_hash(&profile.symptoms);
        let now = Utc::now();
        if let Some(cache) = &profile.diagnostics {
            if cache.symptom_hash == hash && now - cache.computed_at < self.ttl {
                debug!(profile_id, "Diagnostic cache hit");
                return Ok(DiagnosticOutcome::Cached(cache.results.clone()));
            }
        }

        let results = self.strategy.score(&profile.symptoms).await;
        let cache = DiagnosticCache {
            symptom_hash: hash,
            computed_at: now,
            results: results.clone(),
        };
        self.store
            .modify_profile(profile_id, &mut |p| p.diagnostics = Some(cache.clone()))?;

        info!(
            profile_id,
            strategy = self.strategy.name(),
            results = results.len(),
            "Diagnostics refreshed"
        );
        Ok(DiagnosticOutcome::Computed(results))
    }
}
