//! Persistence trait for profiles, messages and summaries
//!
//! The pipeline only talks to `FamilyStore`, so the backing engine can be
//! swapped without touching extraction, diagnostics or context assembly.
//!
//! # Design Principles
//!
//! 1. **Sync Interface**: All methods are synchronous. Async callers hold
//!    them briefly; no method performs network I/O.
//!
//! 2. **Atomic read-modify-write**: `modify_profile` runs the closure and the
//!    write as one unit, so two writers to one profile can't lose fields.
//!
//! 3. **Ordering**: messages come back newest-first from `get_messages`;
//!    summaries come back oldest-first from `get_summaries`.

use crate::error::Result;
use crate::types::{ConversationSummary, Message, NewProfile, PersonProfile, ProfilePatch};

use super::profiles::merge_patch;

pub trait FamilyStore: Send + Sync {
    // ========================================================================
    // Profiles
    // ========================================================================

    /// All profiles owned by a user, oldest first
    fn get_profiles(&self, user_id: &str) -> Result<Vec<PersonProfile>>;

    /// Exact (case-sensitive) name lookup
    fn get_profile(&self, user_id: &str, name: &str) -> Result<Option<PersonProfile>>;

    fn get_profile_by_id(&self, id: &str) -> Result<Option<PersonProfile>>;

    /// Create a profile. Fails if (user, name) already exists.
    fn create_profile(&self, input: &NewProfile) -> Result<PersonProfile>;

    /// Atomically load, mutate and persist one profile.
    ///
    /// Returns `NotFound` when the id does not exist. `updated_at` is
    /// refreshed by the store.
    fn modify_profile(
        &self,
        id: &str,
        mutate: &mut dyn FnMut(&mut PersonProfile),
    ) -> Result<PersonProfile>;

    /// Merge a partial update into a profile
    fn update_profile(&self, id: &str, patch: &ProfilePatch) -> Result<PersonProfile> {
        let now = chrono::Utc::now();
        self.modify_profile(id, &mut |profile| merge_patch(profile, patch, now))
    }

    fn delete_profile(&self, id: &str) -> Result<()>;

    // ========================================================================
    // Messages
    // ========================================================================

    fn save_message(&self, message: &Message) -> Result<Message>;

    /// Most recent `limit` messages, newest first
    fn get_messages(&self, user_id: &str, limit: usize) -> Result<Vec<Message>>;

    fn count_messages(&self, user_id: &str) -> Result<u64>;

    // ========================================================================
    // Summaries
    // ========================================================================

    /// All summaries for a user, oldest first
    fn get_summaries(&self, user_id: &str) -> Result<Vec<ConversationSummary>>;

    fn save_summary(&self, summary: &ConversationSummary) -> Result<()>;

    fn delete_summary(&self, id: &str) -> Result<()>;

    // ========================================================================
    // Bulk
    // ========================================================================

    /// Replace everything a user owns with the given records, in one
    /// transaction. Ids and timestamps are stored as given.
    fn replace_user_data(
        &self,
        user_id: &str,
        profiles: &[PersonProfile],
        messages: &[Message],
        summaries: &[ConversationSummary],
    ) -> Result<()>;
}
