//! Full per-user export / import
//!
//! The export document is the canonical at-rest shape: importing it
//! reconstructs identical profiles, messages and summaries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::backend::FamilyStore;
use crate::error::{HearthError, Result};
use crate::types::{ConversationSummary, Message, PersonProfile};

/// Export format version
pub const EXPORT_FORMAT_VERSION: &str = "1";

/// Everything one user owns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HearthExport {
    pub format_version: String,
    pub exported_at: DateTime<Utc>,
    pub user_id: String,
    pub profiles: Vec<PersonProfile>,
    /// Chronological, oldest first
    pub messages: Vec<Message>,
    /// Chronological, oldest first
    pub summaries: Vec<ConversationSummary>,
}

/// Serialize all of a user's data
pub fn export_user(store: &dyn FamilyStore, user_id: &str) -> Result<HearthExport> {
    let profiles = store.get_profiles(user_id)?;
    let total = store.count_messages(user_id)?;
    let mut messages = store.get_messages(user_id, total as usize)?;
    messages.reverse();
    let summaries = store.get_summaries(user_id)?;

    info!(
        user_id,
        profiles = profiles.len(),
        messages = messages.len(),
        summaries = summaries.len(),
        "Exported user data"
    );

    Ok(HearthExport {
        format_version: EXPORT_FORMAT_VERSION.to_string(),
        exported_at: Utc::now(),
        user_id: user_id.to_string(),
        profiles,
        messages,
        summaries,
    })
}

/// Replace a user's data with the contents of an export
pub fn import_user(store: &dyn FamilyStore, export: &HearthExport) -> Result<()> {
    if export.format_version != EXPORT_FORMAT_VERSION {
        return Err(HearthError::InvalidInput(format!(
            "unsupported export format version '{}'",
            export.format_version
        )));
    }

    let foreign = export
        .profiles
        .iter()
        .map(|p| p.user_id.as_str())
        .chain(export.messages.iter().map(|m| m.user_id.as_str()))
        .chain(export.summaries.iter().map(|s| s.user_id.as_str()))
        .any(|owner| owner != export.user_id);
    if foreign {
        return Err(HearthError::InvalidInput(
            "export contains records owned by another user".to_string(),
        ));
    }

    store.replace_user_data(
        &export.user_id,
        &export.profiles,
        &export.messages,
        &export.summaries,
    )?;

    info!(
        user_id = %export.user_id,
        profiles = export.profiles.len(),
        messages = export.messages.len(),
        summaries = export.summaries.len(),
        "Imported user data"
    );
    Ok(())
}

/// Parse an export document from JSON
pub fn parse_export(json: &str) -> Result<HearthExport> {
    Ok(serde_json::from_str(json)?)
}
