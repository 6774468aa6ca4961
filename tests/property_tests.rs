//! Property-based tests for hearth
//!
//! These tests verify invariants that must hold for all inputs:
//! - Extraction is pure and never panics
//! - Profile merges never lose information
//! - Symptom writes are last-write-wins
//! - Summary cadence follows the message count
//!
//! Run with: cargo test --test property_tests

use proptest::prelude::*;
use std::collections::BTreeSet;

const NAMES: &[&str] = &["Sam", "Ava", "Leo", "Maya", "Noah", "Zoe"];

fn known_names() -> impl Strategy<Value = BTreeSet<String>> {
    proptest::sample::subsequence(NAMES, 0..=3)
        .prop_map(|names| names.into_iter().map(String::from).collect())
}

/// Family-ish sentences stitched from fragments
fn family_message() -> impl Strategy<Value = String> {
    let fragment = prop_oneof![
        proptest::sample::select(NAMES).prop_map(|n| format!("My son {} is 9.", n)),
        proptest::sample::select(NAMES).prop_map(|n| format!("{} is my daughter.", n)),
        proptest::sample::select(NAMES).prop_map(|n| format!("{} is in 3rd grade.", n)),
        proptest::sample::select(NAMES).prop_map(|n| format!("{} has ADHD.", n)),
        Just("He can't sit still.".to_string()),
        Just("She worries about everything.".to_string()),
        Just("Actually, he sleeps well now.".to_string()),
        Just("My husband Chris helps at bedtime.".to_string()),
        Just("Thanks!".to_string()),
    ];
    proptest::collection::vec(fragment, 0..6).prop_map(|parts| parts.join(" "))
}

// ============================================================================
// EXTRACTION TESTS
// ============================================================================

mod extraction_tests {
    use super::*;
    use hearth::intelligence::{FamilyExtractor, SymptomExtractor};

    proptest! {
        /// Invariant: extract never panics on any string input
        #[test]
        fn never_panics(s in "\\PC{0,300}", known in known_names()) {
            let _ = FamilyExtractor::default().extract(&s, &known);
            for name in &known {
                let _ = SymptomExtractor::new().extract(&s, name);
            }
        }

        /// Invariant: same text and known names always give the same output
        #[test]
        fn extraction_is_pure(message in family_message(), known in known_names()) {
            let extractor = FamilyExtractor::default();
            let first = extractor.extract(&message, &known);
            let second = extractor.extract(&message, &known);
            prop_assert_eq!(first, second);
        }

        /// Invariant: feeding the extracted names back as known names adds no new people
        #[test]
        fn rerun_with_extracted_names_is_stable(message in family_message()) {
            let extractor = FamilyExtractor::default();
            let first = extractor.extract(&message, &BTreeSet::new());
            let known = first.people();
            let second = extractor.extract(&message, &known);
            prop_assert!(second.people().is_subset(&known) || known.is_empty());
            prop_assert_eq!(&first.children, &second.children);
            prop_assert_eq!(&first.adults, &second.adults);
        }

        /// Invariant: every extracted person has a valid name shape
        #[test]
        fn extracted_names_are_valid(message in family_message()) {
            let extractor = FamilyExtractor::default();
            let result = extractor.extract(&message, &BTreeSet::new());
            for name in result.children.iter().chain(result.adults.iter()) {
                prop_assert!(extractor.is_valid_name(name), "invalid name {}", name);
            }
        }

        /// Invariant: ages stay inside the accepted range
        #[test]
        fn ages_are_bounded(age in 0u32..200, name in proptest::sample::select(NAMES)) {
            let message = format!("My son {} is {}", name, age);
            let result = FamilyExtractor::default().extract(&message, &BTreeSet::new());
            if let Some(extracted) = result.ages.get(name) {
                prop_assert!(*extracted >= 1 && *extracted <= 99);
                prop_assert_eq!(*extracted as u32, age);
            }
        }
    }
}

// ============================================================================
// PROFILE MERGE TESTS
// ============================================================================

mod merge_tests {
    use super::*;
    use chrono::Utc;
    use hearth::storage::profiles::{apply_symptoms, merge_patch, symptom_hash};
    use hearth::types::{PersonProfile, ProfilePatch, SymptomUpdate};
    use std::collections::BTreeMap;

    fn blank_profile() -> PersonProfile {
        serde_json::from_value(serde_json::json!({
            "id": "p1",
            "user_id": "u1",
            "name": "Sam",
            "relationship": "child",
            "created_at": "2026-01-01T00:00:00Z",
            "updated_at": "2026-01-01T00:00:00Z",
        }))
        .expect("valid profile json")
    }

    fn maybe_text() -> impl Strategy<Value = Option<String>> {
        prop_oneof![
            Just(None),
            Just(Some(String::new())),
            Just(Some("   ".to_string())),
            "[a-z0-9 ]{1,12}".prop_map(Some),
        ]
    }

    fn patch() -> impl Strategy<Value = ProfilePatch> {
        let list = proptest::collection::vec("[A-Za-z ]{0,10}", 0..4);
        (maybe_text(), maybe_text(), maybe_text(), list.clone(), list.clone(), maybe_text())
            .prop_map(|(age, grade, school, diagnoses, challenges, parent_note)| ProfilePatch {
                age,
                grade,
                school,
                diagnoses,
                challenges,
                parent_note,
                ..Default::default()
            })
    }

    const SYMPTOM_KEYS: &[&str] = &["fidgetsOrSquirms", "losesThings", "excessiveWorry"];

    fn lowered(values: &[String]) -> BTreeSet<String> {
        values.iter().map(|v| v.trim().to_lowercase()).collect()
    }

    proptest! {
        /// Invariant: merging never removes set members, journal entries or scalars
        #[test]
        fn merge_is_monotonic(patches in proptest::collection::vec(patch(), 1..6)) {
            let mut profile = blank_profile();
            for patch in &patches {
                let before = profile.clone();
                merge_patch(&mut profile, patch, Utc::now());

                prop_assert!(lowered(&before.diagnoses).is_subset(&lowered(&profile.diagnoses)));
                prop_assert!(lowered(&before.challenges).is_subset(&lowered(&profile.challenges)));
                prop_assert!(profile.parent_notes.len() >= before.parent_notes.len());
                prop_assert_eq!(&profile.parent_notes[..before.parent_notes.len()], &before.parent_notes[..]);
                if before.age.is_some() {
                    prop_assert!(profile.age.is_some());
                }
                if before.school.is_some() {
                    prop_assert!(profile.school.is_some());
                }
            }
        }

        /// Invariant: set fields never hold case-insensitive duplicates or blanks
        #[test]
        fn merged_sets_are_unique(patches in proptest::collection::vec(patch(), 1..6)) {
            let mut profile = blank_profile();
            for patch in &patches {
                merge_patch(&mut profile, patch, Utc::now());
            }
            let unique = lowered(&profile.diagnoses);
            prop_assert_eq!(unique.len(), profile.diagnoses.len());
            prop_assert!(profile.diagnoses.iter().all(|d| !d.trim().is_empty()));
        }

        /// Invariant: an empty patch changes nothing
        #[test]
        fn empty_patch_is_noop(seed in patch()) {
            let mut profile = blank_profile();
            merge_patch(&mut profile, &seed, Utc::now());
            let before = profile.clone();
            merge_patch(&mut profile, &ProfilePatch::default(), Utc::now());
            prop_assert_eq!(before, profile);
        }

        /// Invariant: the last update to a symptom key wins and the hash tracks the map
        #[test]
        fn symptom_last_write_wins(
            updates in proptest::collection::vec(
                (proptest::sample::select(SYMPTOM_KEYS), any::<bool>()),
                0..12,
            )
        ) {
            let updates: Vec<SymptomUpdate> = updates
                .into_iter()
                .map(|(field, value)| SymptomUpdate {
                    field: field.to_string(),
                    value,
                    reason: "prop".to_string(),
                    correction: false,
                })
                .collect();

            let mut profile = blank_profile();
            profile.symptoms.insert("sensitiveToNoise".to_string(), true);
            apply_symptoms(&mut profile, &updates);

            let mut expected = BTreeMap::new();
            expected.insert("sensitiveToNoise".to_string(), true);
            for update in &updates {
                expected.insert(update.field.clone(), update.value);
            }
            prop_assert_eq!(&profile.symptoms, &expected);
            prop_assert_eq!(&profile.symptom_hash, &symptom_hash(&expected));
        }
    }
}

// ============================================================================
// SUMMARY CADENCE TESTS
// ============================================================================

mod cadence_tests {
    use super::*;
    use hearth::intelligence::{check_triggers, triggers_between};
    use hearth::types::PipelineConfig;

    proptest! {
        /// Invariant: brief every 10 messages, meta every 100
        #[test]
        fn cadence_follows_count(n in 1u64..250) {
            let config = PipelineConfig::default();
            let trigger = check_triggers(n, &config);
            prop_assert_eq!(trigger.brief, n % 10 == 0);
            prop_assert_eq!(trigger.meta, n % 100 == 0);
            if trigger.meta {
                prop_assert!(trigger.brief);
            }
        }

        /// Invariant: a turn fires a summary iff it crosses a boundary
        #[test]
        fn boundaries_are_never_skipped(previous in 0u64..240, step in 1u64..3) {
            let config = PipelineConfig::default();
            let current = previous + step;
            let trigger = triggers_between(previous, current, &config);
            let crossed_brief = (previous + 1..=current).any(|n| n % 10 == 0);
            let crossed_meta = (previous + 1..=current).any(|n| n % 100 == 0);
            prop_assert_eq!(trigger.brief, crossed_brief);
            prop_assert_eq!(trigger.meta, crossed_meta);
        }
    }

    #[test]
    fn zero_messages_trigger_nothing() {
        let trigger = check_triggers(0, &PipelineConfig::default());
        assert!(!trigger.any());
    }
}
