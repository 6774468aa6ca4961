//! Credit gate for chat turns
//!
//! The orchestrator asks the gate before any external call and consumes one
//! credit per successful reply.

use dashmap::DashMap;
use tracing::debug;

use crate::error::{HearthError, Result};

pub trait CreditGate: Send + Sync {
    fn has_credit(&self, user_id: &str) -> bool;

    /// Take one credit; returns the remaining balance, if metered
    fn consume(&self, user_id: &str) -> Result<Option<u64>>;

    /// Current balance; `None` when unmetered
    fn balance(&self, user_id: &str) -> Option<u64>;
}

/// Never runs out
#[derive(Debug, Default, Clone, Copy)]
pub struct UnlimitedCredits;

impl CreditGate for UnlimitedCredits {
    fn has_credit(&self, _user_id: &str) -> bool {
        true
    }

    fn consume(&self, _user_id: &str) -> Result<Option<u64>> {
        Ok(None)
    }

    fn balance(&self, _user_id: &str) -> Option<u64> {
        None
    }
}

/// In-memory per-user balances
#[derive(Debug, Default)]
pub struct CreditLedger {
    balances: DashMap<String, u64>,
    /// Balance for users seen for the first time
    starting_balance: u64,
}

impl CreditLedger {
    pub fn new(starting_balance: u64) -> Self {
        Self {
            balances: DashMap::new(),
            starting_balance,
        }
    }

    pub fn grant(&self, user_id: &str, amount: u64) -> u64 {
        let mut entry = self
            .balances
            .entry(user_id.to_string())
            .or_insert(self.starting_balance);
        *entry = entry.saturating_add(amount);
        *entry
    }
}

impl CreditGate for CreditLedger {
    fn has_credit(&self, user_id: &str) -> bool {
        self.balance(user_id).unwrap_or(0) > 0
    }

    fn consume(&self, user_id: &str) -> Result<Option<u64>> {
        let mut entry = self
            .balances
            .entry(user_id.to_string())
            .or_insert(self.starting_balance);
        if *entry == 0 {
            return Err(HearthError::OutOfCredits(user_id.to_string()));
        }
        *entry -= 1;
        debug!(user_id, remaining = *entry, "Consumed credit");
        Ok(Some(*entry))
    }

    fn balance(&self, user_id: &str) -> Option<u64> {
        Some(
            self.balances
                .get(user_id)
                .map(|b| *b)
                .unwrap_or(self.starting_balance),
        )
    }
}
