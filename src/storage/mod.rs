//! Storage engine for Hearth
//!
//! SQLite persistence for profiles, messages and conversation summaries,
//! plus the merge-aware profile adapter and full export/import.

mod backend;
mod connection;
pub mod export;
mod migrations;
pub mod profiles;
pub mod queries;

pub use backend::FamilyStore;
pub use connection::Storage;
pub use export::{export_user, import_user, HearthExport};
pub use migrations::SCHEMA_VERSION;
pub use profiles::{symptom_hash, ProfileStore};
