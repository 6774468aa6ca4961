//! Token counting for the context budget
//!
//! Uses tiktoken-rs. Unknown models are an error rather than a chars/4 guess.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tiktoken_rs::CoreBPE;

use crate::error::{HearthError, Result};

/// Supported encodings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenEncoding {
    /// GPT-4, GPT-3.5, Claude (approximation)
    Cl100kBase,
    /// GPT-4o, GPT-4o-mini
    O200kBase,
}

impl TokenEncoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenEncoding::Cl100kBase => "cl100k_base",
            TokenEncoding::O200kBase => "o200k_base",
        }
    }
}

/// Pick the encoding for a model name
pub fn detect_encoding(model: &str) -> Option<TokenEncoding> {
    let model = model.to_lowercase();
    if let Some(stripped) = model.strip_prefix("openai/") {
        return detect_encoding(stripped);
    }
    if model.contains("gpt-4o") || model.starts_with("o1") || model.starts_with("o3") {
        return Some(TokenEncoding::O200kBase);
    }
    if model.contains("gpt-4") || model.contains("gpt-3.5") || model.contains("claude") {
        return Some(TokenEncoding::Cl100kBase);
    }
    if model.starts_with("anthropic/") {
        return Some(TokenEncoding::Cl100kBase);
    }
    None
}

pub fn parse_encoding(encoding: &str) -> Option<TokenEncoding> {
    match encoding.to_lowercase().as_str() {
        "cl100k_base" | "cl100k" => Some(TokenEncoding::Cl100kBase),
        "o200k_base" | "o200k" => Some(TokenEncoding::O200kBase),
        _ => None,
    }
}

/// Reusable tokenizer; building the BPE tables is the expensive part
#[derive(Clone)]
pub struct TokenCounter {
    encoding: TokenEncoding,
    bpe: Arc<CoreBPE>,
}

impl TokenCounter {
    pub fn new(encoding: TokenEncoding) -> Result<Self> {
        let bpe = match encoding {
            TokenEncoding::Cl100kBase => tiktoken_rs::cl100k_base(),
            TokenEncoding::O200kBase => tiktoken_rs::o200k_base(),
        }
        .map_err(|e| HearthError::Internal(format!("Failed to initialize tokenizer: {}", e)))?;

        Ok(Self {
            encoding,
            bpe: Arc::new(bpe),
        })
    }

    /// Tokenizer for a model, or for an explicit encoding override
    pub fn for_model(model: &str, encoding: Option<&str>) -> Result<Self> {
        let encoding = match encoding {
            Some(enc) => parse_encoding(enc).ok_or_else(|| {
                HearthError::Config(format!(
                    "Unknown encoding '{}'. Supported: cl100k_base, o200k_base",
                    enc
                ))
            })?,
            None => detect_encoding(model).ok_or_else(|| {
                HearthError::Config(format!(
                    "Unknown model '{}'. Set an explicit encoding (cl100k_base or o200k_base).",
                    model
                ))
            })?,
        };
        Self::new(encoding)
    }

    pub fn encoding(&self) -> TokenEncoding {
        self.encoding
    }

    pub fn count(&self, text: &str) -> usize {
        self.bpe.encode_with_special_tokens(text).len()
    }
}

impl std::fmt::Debug for TokenCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCounter")
            .field("encoding", &self.encoding)
            .finish()
    }
}

/// Count tokens without keeping a counter around
pub fn count_tokens(text: &str, model: &str, encoding: Option<&str>) -> Result<usize> {
    Ok(TokenCounter::for_model(model, encoding)?.count(text))
}

/// How a rendered prompt sits against its budget
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetReport {
    pub total_tokens: usize,
    pub budget: usize,
    pub remaining: usize,
    pub over_budget: bool,
}

impl BudgetReport {
    pub fn new(total_tokens: usize, budget: usize) -> Self {
        Self {
            total_tokens,
            budget,
            remaining: budget.saturating_sub(total_tokens),
            over_budget: total_tokens > budget,
        }
    }
}
