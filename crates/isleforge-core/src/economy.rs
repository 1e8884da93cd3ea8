//! An in-memory [`Economy`] with an append-only withdrawal log.
//!
//! Balances use [`Decimal`] -- no floating point for money. Every
//! successful withdrawal is recorded and never modified, so tests can
//! assert exactly what was charged.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use isleforge_types::PlayerId;

use crate::collaborators::Economy;

/// One recorded withdrawal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Withdrawal {
    /// Who paid.
    pub player: PlayerId,
    /// How much.
    pub amount: Decimal,
    /// When.
    pub at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct LedgerState {
    balances: BTreeMap<PlayerId, Decimal>,
    withdrawals: Vec<Withdrawal>,
}

/// Balances and withdrawal history held in memory.
#[derive(Debug, Default)]
pub struct LedgerEconomy {
    state: Mutex<LedgerState>,
}

impl LedgerEconomy {
    /// An economy where every player has a zero balance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Credit `amount` to `player`. Negative or overflowing deposits are
    /// ignored and reported as `false`.
    pub fn deposit(&self, player: PlayerId, amount: Decimal) -> bool {
        if amount.is_sign_negative() {
            return false;
        }
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let balance = state.balances.entry(player).or_insert(Decimal::ZERO);
        match balance.checked_add(amount) {
            Some(next) => {
                *balance = next;
                true
            }
            None => false,
        }
    }

    /// Current balance of `player`.
    pub fn balance(&self, player: PlayerId) -> Decimal {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .balances
            .get(&player)
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    /// Every withdrawal made so far, oldest first.
    pub fn withdrawals(&self) -> Vec<Withdrawal> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .withdrawals
            .clone()
    }

    /// Sum of every withdrawal made by `player`.
    pub fn total_withdrawn(&self, player: PlayerId) -> Decimal {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .withdrawals
            .iter()
            .filter(|w| w.player == player)
            .fold(Decimal::ZERO, |acc, w| acc.saturating_add(w.amount))
    }
}

impl Economy for LedgerEconomy {
    fn has_balance(&self, player: PlayerId, amount: Decimal) -> bool {
        self.balance(player) >= amount
    }

    fn withdraw(&self, player: PlayerId, amount: Decimal) -> bool {
        if amount.is_sign_negative() {
            return false;
        }
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let current = state.balances.get(&player).copied().unwrap_or(Decimal::ZERO);
        let Some(next) = current.checked_sub(amount).filter(|n| !n.is_sign_negative()) else {
            return false;
        };
        state.balances.insert(player, next);
        state.withdrawals.push(Withdrawal {
            player,
            amount,
            at: Utc::now(),
        });
        true
    }
}
