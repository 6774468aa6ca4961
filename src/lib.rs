//! Hearth - memory for a parenting-coach chat
//!
//! Builds structured family profiles from free-text conversation and feeds
//! them back into every model prompt: entity and symptom extraction,
//! merge-aware profile storage, diagnostic screening, tiered conversation
//! summaries and budgeted context assembly.

pub mod chat;
pub mod completion;
pub mod credits;
pub mod error;
pub mod intelligence;
pub mod locks;
pub mod storage;
pub mod types;

pub use chat::{ChatOrchestrator, ChatReply, DiagnosisReport, ReplyStatus};
pub use completion::{create_completion_service, CompletionConfig, CompletionOptions, CompletionService};
pub use credits::{CreditGate, CreditLedger, UnlimitedCredits};
pub use error::{HearthError, Result};
pub use storage::{FamilyStore, ProfileStore, Storage};
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
