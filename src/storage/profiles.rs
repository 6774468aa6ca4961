//! Profile store adapter: get-or-create and non-destructive merge
//!
//! Merge rules:
//! - scalar fields: last non-blank write wins, blanks are ignored
//! - set fields: union, deduplicated case-insensitively, first spelling kept
//! - journals: append a dated entry
//! - symptoms: last write wins per key, keys are never removed

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use super::backend::FamilyStore;
use crate::error::{HearthError, Result};
use crate::types::{
    JournalEntry, NewProfile, PersonProfile, ProfilePatch, Relationship, SymptomMap,
    SymptomUpdate,
};

/// Content hash of a symptom map (SHA-256 over the sorted JSON encoding)
pub fn symptom_hash(symptoms: &SymptomMap) -> String {
    let canonical = serde_json::to_string(symptoms).unwrap_or_default();
    hex::encode(Sha256::digest(canonical.as_bytes()))
}

fn merge_scalar(target: &mut Option<String>, value: &Option<String>) {
    if let Some(v) = value {
        let trimmed = v.trim();
        if !trimmed.is_empty() {
            *target = Some(trimmed.to_string());
        }
    }
}

/// Union `values` into `target`, skipping blanks and case-insensitive repeats
pub fn union_into(target: &mut Vec<String>, values: &[String]) {
    for value in values {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            continue;
        }
        let lower = trimmed.to_lowercase();
        if !target.iter().any(|existing| existing.to_lowercase() == lower) {
            target.push(trimmed.to_string());
        }
    }
}

fn append_entry(journal: &mut Vec<JournalEntry>, text: &Option<String>, now: DateTime<Utc>) {
    if let Some(text) = text {
        let trimmed = text.trim();
        if !trimmed.is_empty() {
            journal.push(JournalEntry {
                text: trimmed.to_string(),
                recorded_at: now,
            });
        }
    }
}

/// Apply a patch to a profile in place
pub fn merge_patch(profile: &mut PersonProfile, patch: &ProfilePatch, now: DateTime<Utc>) {
    if let Some(relationship) = patch.relationship {
        profile.relationship = relationship;
    }
    if let Some(gender) = patch.gender {
        profile.gender = Some(gender);
    }

    merge_scalar(&mut profile.age, &patch.age);
    merge_scalar(&mut profile.height, &patch.height);
    merge_scalar(&mut profile.grade, &patch.grade);
    merge_scalar(&mut profile.school, &patch.school);
    merge_scalar(&mut profile.work_info, &patch.work_info);
    merge_scalar(&mut profile.medical_info, &patch.medical_info);

    union_into(&mut profile.diagnoses, &patch.diagnoses);
    union_into(&mut profile.challenges, &patch.challenges);
    union_into(&mut profile.strengths, &patch.strengths);
    union_into(&mut profile.therapies, &patch.therapies);
    union_into(&mut profile.medications, &patch.medications);
    union_into(&mut profile.parent_goals, &patch.parent_goals);

    append_entry(&mut profile.parent_notes, &patch.parent_note, now);
    append_entry(&mut profile.ai_observations, &patch.ai_observation, now);
}

/// Write symptom updates in order; later updates to a key overwrite earlier ones
pub fn apply_symptoms(profile: &mut PersonProfile, updates: &[SymptomUpdate]) {
    for update in updates {
        profile.symptoms.insert(update.field.clone(), update.value);
    }
    profile.symptom_hash = symptom_hash(&profile.symptoms);
}

/// Merge-aware profile operations over any `FamilyStore`
#[derive(Clone)]
pub struct ProfileStore {
    store: Arc<dyn FamilyStore>,
}

impl ProfileStore {
    pub fn new(store: Arc<dyn FamilyStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn FamilyStore> {
        &self.store
    }

    /// Look up by exact name, creating an empty profile when absent.
    ///
    /// Returns the profile and whether it was created by this call.
    pub fn get_or_create(
        &self,
        user_id: &str,
        name: &str,
        relationship: Relationship,
    ) -> Result<(PersonProfile, bool)> {
        if let Some(existing) = self.store.get_profile(user_id, name)? {
            return Ok((existing, false));
        }

        let created = self.store.create_profile(&NewProfile {
            user_id: user_id.to_string(),
            name: name.to_string(),
            relationship,
            patch: ProfilePatch::default(),
        })?;
        info!(
            user_id,
            profile_id = %created.id,
            relationship = relationship.as_str(),
            "Created person profile"
        );
        Ok((created, true))
    }

    /// Merge a partial update into the named profile
    pub fn update(&self, user_id: &str, name: &str, patch: &ProfilePatch) -> Result<PersonProfile> {
        let profile = self
            .store
            .get_profile(user_id, name)?
            .ok_or_else(|| HearthError::NotFound(format!("profile '{}'", name)))?;

        if patch.is_empty() {
            return Ok(profile);
        }

        debug!(user_id, profile_id = %profile.id, "Merging profile patch");
        self.store.update_profile(&profile.id, patch)
    }

    /// Overwrite symptom flags and refresh the symptom hash
    pub fn apply_symptom_updates(
        &self,
        profile_id: &str,
        updates: &[SymptomUpdate],
    ) -> Result<PersonProfile> {
        if updates.is_empty() {
            return self
                .store
                .get_profile_by_id(profile_id)?
                .ok_or_else(|| HearthError::NotFound(format!("profile {}", profile_id)));
        }

        debug!(
            profile_id,
            updates = updates.len(),
            corrections = updates.iter().filter(|u| u.correction).count(),
            "Applying symptom updates"
        );
        self.store
            .modify_profile(profile_id, &mut |profile| apply_symptoms(profile, updates))
    }
}
