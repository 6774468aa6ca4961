//! Symptom extraction
//!
//! Maps conversational phrasing to boolean symptom flags through a static
//! table of (phrases, field, polarity) rows evaluated in order. Updates are
//! emitted in table order so that, when two rows hit the same field in one
//! message, the later row wins once the caller applies them. Negative rows
//! are listed after the positive rows they contradict.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::entities::{has_generic_reference, mentions_word};
use crate::types::SymptomUpdate;

/// Screening category a symptom key belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymptomCategory {
    AdhdInattentive,
    AdhdHyperactive,
    AutismSocial,
    AutismRepetitive,
    Anxiety,
    Sensory,
    ExecutiveFunction,
    /// Tracked and rendered into context, never scored
    Behavior,
    Sleep,
    Mood,
}

impl SymptomCategory {
    pub const SCORED: [SymptomCategory; 7] = [
        SymptomCategory::AdhdInattentive,
        SymptomCategory::AdhdHyperactive,
        SymptomCategory::AutismSocial,
        SymptomCategory::AutismRepetitive,
        SymptomCategory::Anxiety,
        SymptomCategory::Sensory,
        SymptomCategory::ExecutiveFunction,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SymptomCategory::AdhdInattentive => "adhd_inattentive",
            SymptomCategory::AdhdHyperactive => "adhd_hyperactive",
            SymptomCategory::AutismSocial => "autism_social",
            SymptomCategory::AutismRepetitive => "autism_repetitive",
            SymptomCategory::Anxiety => "anxiety",
            SymptomCategory::Sensory => "sensory",
            SymptomCategory::ExecutiveFunction => "executive_function",
            SymptomCategory::Behavior => "behavior",
            SymptomCategory::Sleep => "sleep",
            SymptomCategory::Mood => "mood",
        }
    }

    pub fn is_scored(&self) -> bool {
        Self::SCORED.contains(self)
    }

    /// Keys of the question set for this category
    pub fn keys(&self) -> impl Iterator<Item = &'static str> + '_ {
        SYMPTOM_FIELDS
            .iter()
            .filter(move |f| f.category == *self)
            .map(|f| f.key)
    }
}

/// One entry of the symptom vocabulary
#[derive(Debug, Clone, Copy)]
pub struct SymptomField {
    pub key: &'static str,
    pub label: &'static str,
    pub category: SymptomCategory,
}

const fn field(key: &'static str, label: &'static str, category: SymptomCategory) -> SymptomField {
    SymptomField {
        key,
        label,
        category,
    }
}

use SymptomCategory::*;

/// Known symptom keys
pub const SYMPTOM_FIELDS: &[SymptomField] = &[
    // ADHD inattentive (9)
    field("failsAttentionToDetails", "Makes careless mistakes", AdhdInattentive),
    field("difficultySustainingAttention", "Trouble staying focused", AdhdInattentive),
    field("doesNotSeemToListen", "Does not seem to listen", AdhdInattentive),
    field("failsToFinishTasks", "Does not finish tasks", AdhdInattentive),
    field("difficultyOrganizing", "Trouble organizing", AdhdInattentive),
    field("avoidsSustainedMentalEffort", "Avoids sustained mental effort", AdhdInattentive),
    field("losesThings", "Loses things", AdhdInattentive),
    field("easilyDistracted", "Easily distracted", AdhdInattentive),
    field("forgetfulInDailyActivities", "Forgetful in daily activities", AdhdInattentive),
    // ADHD hyperactive-impulsive (9)
    field("fidgetsOrSquirms", "Fidgets or squirms", AdhdHyperactive),
    field("leavesSeatWhenExpected", "Leaves seat when expected to stay seated", AdhdHyperactive),
    field("runsOrClimbsExcessively", "Runs or climbs excessively", AdhdHyperactive),
    field("unableToPlayQuietly", "Unable to play quietly", AdhdHyperactive),
    field("alwaysOnTheGo", "Always on the go", AdhdHyperactive),
    field("talksExcessively", "Talks excessively", AdhdHyperactive),
    field("blurtsOutAnswers", "Blurts out answers", AdhdHyperactive),
    field("difficultyWaitingTurn", "Trouble waiting their turn", AdhdHyperactive),
    field("interruptsOthers", "Interrupts others", AdhdHyperactive),
    // Autism social communication (5)
    field("poorEyeContact", "Limited eye contact", AutismSocial),
    field("difficultyWithSocialCues", "Misses social cues", AutismSocial),
    field("prefersPlayingAlone", "Prefers playing alone", AutismSocial),
    field("difficultyMakingFriends", "Trouble making friends", AutismSocial),
    field("delayedSpeech", "Delayed speech", AutismSocial),
    // Autism restricted / repetitive (4)
    field("repetitiveMovements", "Repetitive movements", AutismRepetitive),
    field("insistsOnRoutine", "Insists on sameness or routine", AutismRepetitive),
    field("intenseNarrowInterests", "Intense narrow interests", AutismRepetitive),
    field("upsetByChanges", "Upset by small changes", AutismRepetitive),
    // Anxiety (5)
    field("excessiveWorry", "Excessive worry", Anxiety),
    field("restlessOrOnEdge", "Restless or on edge", Anxiety),
    field("stomachachesOrHeadaches", "Stomachaches or headaches", Anxiety),
    field("avoidsNewSituations", "Avoids new situations", Anxiety),
    field("needsConstantReassurance", "Needs constant reassurance", Anxiety),
    // Sensory processing (5)
    field("sensitiveToNoise", "Sensitive to noise", Sensory),
    field("clothingTextureSensitivity", "Bothered by clothing textures", Sensory),
    field("foodTextureSensitivity", "Bothered by food textures", Sensory),
    field("seeksSensoryInput", "Seeks intense sensory input", Sensory),
    field("sensitiveToLight", "Sensitive to bright light", Sensory),
    // Executive function (5)
    field("difficultyStartingTasks", "Trouble starting tasks", ExecutiveFunction),
    field("poorTimeManagement", "Poor sense of time", ExecutiveFunction),
    field("difficultySwitchingTasks", "Trouble with transitions", ExecutiveFunction),
    field("poorWorkingMemory", "Forgets multi-step instructions", ExecutiveFunction),
    field("difficultyPlanningAhead", "Trouble planning ahead", ExecutiveFunction),
    // Unscored
    field("aggressiveBehavior", "Aggressive behavior", Behavior),
    field("defiesAuthority", "Defies authority", Behavior),
    field("frequentTantrums", "Frequent tantrums or meltdowns", Behavior),
    field("separationAnxiety", "Distress at separation", Behavior),
    field("difficultyFallingAsleep", "Trouble falling asleep", Sleep),
    field("nightWaking", "Wakes at night", Sleep),
    field("frequentSadness", "Frequent sadness", Mood),
    field("irritability", "Irritability", Mood),
    field("lowSelfEsteem", "Low self-esteem", Mood),
];

/// Look up a symptom key in the vocabulary
pub fn symptom_field(key: &str) -> Option<&'static SymptomField> {
    SYMPTOM_FIELDS.iter().find(|f| f.key == key)
}

/// Human label for a key, falling back to the key itself
pub fn symptom_label(key: &str) -> &str {
    symptom_field(key).map(|f| f.label).unwrap_or(key)
}

struct SymptomRule {
    phrases: &'static [&'static str],
    field: &'static str,
    value: bool,
}

const fn rule(phrases: &'static [&'static str], field: &'static str, value: bool) -> SymptomRule {
    SymptomRule {
        phrases,
        field,
        value,
    }
}

/// Ordered phrase table; negative rows come last
const SYMPTOM_RULES: &[SymptomRule] = &[
    // hyperactive-impulsive
    rule(&["can't sit still", "cannot sit still", "fidget", "squirm", "wiggles constantly"], "fidgetsOrSquirms", true),
    rule(&["gets out of his seat", "gets out of her seat", "leaves his seat", "leaves her seat", "won't stay seated", "out of his chair", "out of her chair"], "leavesSeatWhenExpected", true),
    rule(&["climbs on everything", "runs around", "climbing on furniture", "climbs the furniture"], "runsOrClimbsExcessively", true),
    rule(&["can't play quietly", "never plays quietly", "so loud when playing"], "unableToPlayQuietly", true),
    rule(&["on the go", "driven by a motor", "bouncing off the walls", "nonstop energy", "non-stop energy", "never stops moving"], "alwaysOnTheGo", true),
    rule(&["talks nonstop", "talks non-stop", "talks constantly", "never stops talking", "talks too much", "talks excessively"], "talksExcessively", true),
    rule(&["blurts out", "blurting"], "blurtsOutAnswers", true),
    rule(&["can't wait his turn", "can't wait her turn", "can't wait their turn", "hard time waiting", "trouble waiting", "impatient"], "difficultyWaitingTurn", true),
    rule(&["interrupts", "interrupting"], "interruptsOthers", true),
    // inattentive
    rule(&["careless mistakes", "sloppy work", "misses details", "silly mistakes"], "failsAttentionToDetails", true),
    rule(&["can't focus", "cannot focus", "trouble focusing", "can't concentrate", "short attention span", "hard time focusing", "loses focus", "can't pay attention"], "difficultySustainingAttention", true),
    rule(&["doesn't listen", "does not listen", "never listens", "ignores me", "tunes me out", "doesn't seem to hear"], "doesNotSeemToListen", true),
    rule(&["never finishes", "doesn't finish", "leaves homework unfinished", "doesn't complete", "half-finished"], "failsToFinishTasks", true),
    rule(&["disorganized", "unorganized", "messy backpack", "can't keep track"], "difficultyOrganizing", true),
    rule(&["avoids homework", "hates homework", "refuses to do homework", "avoids reading"], "avoidsSustainedMentalEffort", true),
    rule(&["loses things", "loses his", "loses her", "lost his", "lost her", "always losing"], "losesThings", true),
    rule(&["easily distracted", "gets distracted", "distracted by everything", "so distractible"], "easilyDistracted", true),
    rule(&["forgetful", "forgets everything", "always forgets", "forgets to"], "forgetfulInDailyActivities", true),
    // autism social
    rule(&["avoids eye contact", "no eye contact", "won't make eye contact", "poor eye contact"], "poorEyeContact", true),
    rule(&["social cues", "doesn't understand jokes", "takes things literally", "misreads people"], "difficultyWithSocialCues", true),
    rule(&["plays alone", "prefers to be alone", "doesn't play with other kids", "keeps to himself", "keeps to herself"], "prefersPlayingAlone", true),
    rule(&["no friends", "trouble making friends", "can't make friends", "hard time making friends"], "difficultyMakingFriends", true),
    rule(&["speech delay", "delayed speech", "late talker", "not talking yet"], "delayedSpeech", true),
    // autism repetitive
    rule(&["flaps his hands", "flaps her hands", "hand flapping", "hand-flapping", "rocks back and forth", "spins in circles"], "repetitiveMovements", true),
    rule(&["needs routine", "same routine", "insists on routine", "has to be the same", "rigid about"], "insistsOnRoutine", true),
    rule(&["obsessed with", "only talks about", "fixated on"], "intenseNarrowInterests", true),
    rule(&["when plans change", "hates change", "upset by change", "can't handle change"], "upsetByChanges", true),
    // anxiety
    rule(&["worries about everything", "worries a lot", "constantly worried", "always worried", "anxious all the time", "worrier"], "excessiveWorry", true),
    rule(&["on edge", "tense all the time", "keyed up"], "restlessOrOnEdge", true),
    rule(&["stomachache", "stomach ache", "tummy ache", "headaches"], "stomachachesOrHeadaches", true),
    rule(&["avoids new", "scared of new", "afraid of new", "refuses to try new"], "avoidsNewSituations", true),
    rule(&["needs reassurance", "constant reassurance", "keeps asking if"], "needsConstantReassurance", true),
    // sensory
    rule(&["covers his ears", "covers her ears", "loud noises", "sensitive to noise", "hates noise"], "sensitiveToNoise", true),
    rule(&["tags in", "scratchy clothes", "certain fabrics", "clothes bother", "socks bother"], "clothingTextureSensitivity", true),
    rule(&["picky eater", "texture of food", "food textures", "gags on"], "foodTextureSensitivity", true),
    rule(&["crashes into", "seeks pressure", "loves spinning", "chews on everything", "chews on his", "chews on her"], "seeksSensoryInput", true),
    rule(&["bright lights", "sensitive to light"], "sensitiveToLight", true),
    // executive function
    rule(&["can't get started", "procrastinat", "trouble starting", "won't start"], "difficultyStartingTasks", true),
    rule(&["always late", "no sense of time", "loses track of time", "runs out of time"], "poorTimeManagement", true),
    rule(&["trouble transitioning", "hard time transitioning", "transitions are hard", "can't switch"], "difficultySwitchingTasks", true),
    rule(&["forgets instructions", "can't remember instructions", "forgets what i said", "multi-step instructions"], "poorWorkingMemory", true),
    rule(&["doesn't plan", "can't plan", "last minute"], "difficultyPlanningAhead", true),
    // behavior, sleep, mood
    rule(&["hits ", "hitting", "kicks ", "kicking", "bites ", "biting", "aggressive"], "aggressiveBehavior", true),
    rule(&["defiant", "talks back", "won't do what", "argues with", "refuses to listen"], "defiesAuthority", true),
    rule(&["tantrum", "meltdown", "melts down"], "frequentTantrums", true),
    rule(&["clings to me", "won't let me leave", "cries when i leave", "separation anxiety", "afraid to be away"], "separationAnxiety", true),
    rule(&["can't fall asleep", "won't go to sleep", "trouble sleeping", "up until midnight", "bedtime is a battle", "won't sleep"], "difficultyFallingAsleep", true),
    rule(&["wakes up at night", "wakes up in the night", "nightmares", "night terrors"], "nightWaking", true),
    rule(&["cries a lot", "always sad", "seems sad", "depressed"], "frequentSadness", true),
    rule(&["irritable", "cranky", "snaps at", "short fuse"], "irritability", true),
    rule(&["i'm stupid", "i'm dumb", "hates himself", "hates herself", "says he's stupid", "says she's stupid"], "lowSelfEsteem", true),
    // negative polarity
    rule(&["can sit still", "sits still just fine", "sits still fine", "no trouble sitting still"], "fidgetsOrSquirms", false),
    rule(&["never interrupts", "doesn't interrupt"], "interruptsOthers", false),
    rule(&["quiet kid", "rarely talks"], "talksExcessively", false),
    rule(&["focuses well", "can focus", "no trouble focusing", "great focus", "pays attention well"], "difficultySustainingAttention", false),
    rule(&["listens well", "always listens"], "doesNotSeemToListen", false),
    rule(&["not easily distracted", "doesn't get distracted", "rarely distracted"], "easilyDistracted", false),
    rule(&["very organized", "well organized", "so organized"], "difficultyOrganizing", false),
    rule(&["good eye contact", "makes eye contact"], "poorEyeContact", false),
    rule(&["lots of friends", "makes friends easily", "has friends"], "difficultyMakingFriends", false),
    rule(&["doesn't worry", "not a worrier", "rarely worries"], "excessiveWorry", false),
    rule(&["never hits", "doesn't hit", "not aggressive"], "aggressiveBehavior", false),
    rule(&["no tantrums", "rarely has tantrums", "no more meltdowns"], "frequentTantrums", false),
    rule(&["sleeps well", "sleeps great", "sleeps through the night"], "difficultyFallingAsleep", false),
];

/// Phrases that mark a message as correcting earlier information
const CORRECTION_PHRASES: &[&str] = &[
    "actually",
    "i meant",
    "that's not right",
    "that's not true",
    "that isn't right",
    "i was wrong",
    "correction",
    "let me correct",
    "not anymore",
    "to clarify",
    "i misspoke",
    "scratch that",
];

/// Words that flip a phrase when they sit just before it in the same clause
const NEGATORS: &[&str] = &[
    "never", "not", "no", "doesn't", "don't", "didn't", "isn't", "wasn't", "won't", "rarely",
    "hardly", "barely",
];

/// Words a negator may reach back across
const NEGATION_WINDOW: usize = 3;

const CLAUSE_BREAKS: &[&str] = &[" and ", " but ", " though ", " although ", " yet "];

/// Is the phrase starting at `pos` negated within its own clause?
fn negated_at(lower: &str, pos: usize) -> bool {
    let prefix = &lower[..pos];
    let mut clause_start = prefix
        .rfind(['.', ',', ';', ':', '!', '?'])
        .map_or(0, |i| i + 1);
    for word in CLAUSE_BREAKS {
        if let Some(i) = prefix.rfind(word) {
            clause_start = clause_start.max(i + word.len());
        }
    }
    prefix[clause_start..]
        .split_whitespace()
        .rev()
        .take(NEGATION_WINDOW)
        .any(|w| NEGATORS.contains(&w.trim_matches(|c: char| !c.is_alphanumeric() && c != '\'')))
}

fn normalize(message: &str) -> String {
    message.to_lowercase().replace(['\u{2019}', '\u{2018}'], "'")
}

/// Does the message hedge or correct something said earlier?
pub fn is_correction(message: &str) -> bool {
    let lower = normalize(message);
    CORRECTION_PHRASES.iter().any(|p| lower.contains(p))
}

/// Table-driven symptom extractor
#[derive(Debug, Default, Clone)]
pub struct SymptomExtractor;

impl SymptomExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Symptom updates for `person_name`, in table order.
    ///
    /// Nothing is emitted unless the message names the person or refers to
    /// someone by pronoun or "my child".
    pub fn extract(&self, message: &str, person_name: &str) -> Vec<SymptomUpdate> {
        if !mentions_word(message, person_name) && !has_generic_reference(message) {
            return Vec::new();
        }

        let lower = normalize(message);
        let correction = is_correction(message);

        let mut updates: Vec<SymptomUpdate> = Vec::new();
        for rule in SYMPTOM_RULES {
            let Some((phrase, pos)) = rule
                .phrases
                .iter()
                .find_map(|p| lower.find(*p).map(|pos| (*p, pos)))
            else {
                continue;
            };
            let negated = negated_at(&lower, pos);
            let value = rule.value != negated;
            if updates.iter().any(|u| u.field == rule.field && u.value == value) {
                continue;
            }

            let mut reason = format!("matched \"{}\"", phrase.trim());
            if negated {
                reason.push_str(" (negated)");
            }
            if correction {
                reason = format!("correction: {}", reason);
            }
            updates.push(SymptomUpdate {
                field: rule.field.to_string(),
                value,
                reason,
                correction,
            });
        }

        if !updates.is_empty() {
            debug!(
                person = person_name,
                updates = updates.len(),
                correction,
                "Symptom updates extracted"
            );
        }
        updates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn fields(updates: &[SymptomUpdate]) -> Vec<(&str, bool)> {
        updates.iter().map(|u| (u.field.as_str(), u.value)).collect()
    }

    #[test]
    fn test_cant_sit_still() {
        let updates =
            SymptomExtractor::new().extract("My son Sam is 12 and he can't sit still in class", "Sam");
        assert_eq!(fields(&updates), vec![("fidgetsOrSquirms", true)]);
        assert!(!updates[0].correction);
    }

    #[test]
    fn test_requires_attribution() {
        let extractor = SymptomExtractor::new();
        assert!(extractor.extract("Kids today can't sit still", "Sam").is_empty());
        assert_eq!(extractor.extract("Sam can't focus", "Sam").len(), 1);
        assert_eq!(extractor.extract("my child can't focus", "Sam").len(), 1);
    }

    #[test]
    fn test_negated_phrase_and_negative_row_agree() {
        let updates = SymptomExtractor::new().extract("Sam is not easily distracted at all", "Sam");
        assert_eq!(fields(&updates), vec![("easilyDistracted", false)]);
    }

    #[test]
    fn test_negation_flips_positive_rows() {
        let extractor = SymptomExtractor::new();
        let updates = extractor.extract("Sam never loses things and doesn't fidget", "Sam");
        assert_eq!(
            fields(&updates),
            vec![("fidgetsOrSquirms", false), ("losesThings", false)]
        );
        assert!(updates.iter().all(|u| u.reason.ends_with("(negated)")));

        let updates = extractor.extract("He isn't disorganized", "Sam");
        assert_eq!(fields(&updates), vec![("difficultyOrganizing", false)]);
    }

    #[test]
    fn test_negation_stays_in_its_clause() {
        let updates =
            SymptomExtractor::new().extract("Sam never hits, but he interrupts constantly", "Sam");
        assert_eq!(
            fields(&updates),
            vec![("interruptsOthers", true), ("aggressiveBehavior", false)]
        );

        let updates = SymptomExtractor::new()
            .extract("He doesn't sleep much and he can't sit still", "Sam");
        assert_eq!(fields(&updates), vec![("fidgetsOrSquirms", true)]);
    }

    #[test]
    fn test_correction_flag() {
        let updates = SymptomExtractor::new().extract("Actually, he can sit still just fine", "Sam");
        assert_eq!(fields(&updates), vec![("fidgetsOrSquirms", false)]);
        assert!(updates[0].correction);
        assert!(updates[0].reason.starts_with("correction:"));
    }

    #[test]
    fn test_curly_apostrophe() {
        let updates = SymptomExtractor::new().extract("He can\u{2019}t focus on anything", "Sam");
        assert_eq!(fields(&updates), vec![("difficultySustainingAttention", true)]);
    }

    #[test]
    fn test_vocabulary_is_consistent() {
        let keys: HashSet<&str> = SYMPTOM_FIELDS.iter().map(|f| f.key).collect();
        assert_eq!(keys.len(), SYMPTOM_FIELDS.len());
        for rule in SYMPTOM_RULES {
            assert!(keys.contains(rule.field), "unknown field {}", rule.field);
        }
        assert_eq!(SymptomCategory::AdhdInattentive.keys().count(), 9);
        assert_eq!(SymptomCategory::AdhdHyperactive.keys().count(), 9);
        assert_eq!(SymptomCategory::AutismSocial.keys().count(), 5);
        assert_eq!(SymptomCategory::AutismRepetitive.keys().count(), 4);
        assert_eq!(SymptomCategory::Anxiety.keys().count(), 5);
        assert_eq!(SymptomCategory::Sensory.keys().count(), 5);
        assert_eq!(SymptomCategory::ExecutiveFunction.keys().count(), 5);
        assert!(!SymptomCategory::Sleep.is_scored());
    }

    #[test]
    fn test_labels() {
        assert_eq!(symptom_label("losesThings"), "Loses things");
        assert_eq!(symptom_label("madeUpKey"), "madeUpKey");
    }
}
