//! Mempool for LVE Node
//!
//! A bounded, fee-prioritized transaction pool. Admission ordering is the
//! node's job (nonce and balance checks happen in the submit path); the
//! pool itself guarantees bounded size, duplicate suppression, and that
//! draining for a block never breaks a sender's nonce sequence.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::ledger::{Amount, COIN, Ledger, LedgerError, MAX_TX_PER_BLOCK, Transaction};

/// Pool capacity: enough backlog for 50 full blocks.
pub const MEMPOOL_CAP: usize = MAX_TX_PER_BLOCK * 50;
/// Transactions older than this are garbage collected.
pub const MAX_TX_AGE_MS: u64 = 60 * 60 * 1000;

/// Mempool pressure, derived from the pending count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Congestion {
    Low,
    Medium,
    High,
    Critical,
}

/// Advisory fee guidance surfaced to wallets.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeRecommendation {
    pub congestion: Congestion,
    pub pending: usize,
    pub recommended: Amount,
}

#[derive(Debug, Clone, Default)]
pub struct Mempool {
    pool: Vec<Transaction>,
    ids: HashSet<String>,
    cap: usize,
}

impl Mempool {
    pub fn new(cap: usize) -> Self {
        Self { pool: Vec::new(), ids: HashSet::new(), cap }
    }

    pub fn len(&self) -> usize {
        self.pool.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.pool
    }

    /// Admit a transaction the submit path already validated.
    pub fn add(&mut self, tx: Transaction) -> Result<(), LedgerError> {
        if self.ids.contains(&tx.id) {
            return Err(LedgerError::DuplicateTx(tx.id));
        }
        if self.pool.len() >= self.cap {
            return Err(LedgerError::MempoolFull);
        }
        self.ids.insert(tx.id.clone());
        self.pool.push(tx);
        Ok(())
    }

    /// Number of pending transactions sent by an address.
    pub fn pending_count_for(&self, address: &str) -> u64 {
        self.pool
            .iter()
            .filter(|tx| tx.from.as_deref() == Some(address))
            .count() as u64
    }

    /// Total spendable balance an address's pending transactions would take.
    pub fn pending_outflow(&self, address: &str) -> Amount {
        self.pool
            .iter()
            .filter(|tx| tx.from.as_deref() == Some(address))
            .map(Ledger::debit_of)
            .sum()
    }

    /// Drain up to `max` transactions, highest fee first, without ever
    /// emitting a sender's nonce out of sequence. `base_nonce` yields the
    /// last applied nonce per address.
    pub fn drain_top(&mut self, max: usize, base_nonce: impl Fn(&str) -> u64) -> Vec<Transaction> {
        let mut candidates: Vec<Transaction> = self.pool.clone();
        candidates.sort_by(|a, b| b.fee.cmp(&a.fee).then(a.timestamp.cmp(&b.timestamp)));
        let mut next_nonce: std::collections::HashMap<String, u64> = std::collections::HashMap::new();
        let mut picked: Vec<Transaction> = Vec::new();
        let mut progressed = true;
        // A lower-nonce tx with a lower fee can unlock a higher-fee one, so
        // keep scanning until a pass picks nothing
        while picked.len() < max && progressed {
            progressed = false;
            for tx in &candidates {
                if picked.len() >= max {
                    break;
                }
                if picked.iter().any(|p| p.id == tx.id) {
                    continue;
                }
                let sender = tx.from.as_deref().unwrap_or_default();
                let expected = *next_nonce
                    .entry(sender.to_string())
                    .or_insert_with(|| base_nonce(sender) + 1);
                if tx.is_system() || tx.nonce == expected {
                    if !tx.is_system() {
                        next_nonce.insert(sender.to_string(), expected + 1);
                    }
                    picked.push(tx.clone());
                    progressed = true;
                }
            }
        }
        let picked_ids: HashSet<&str> = picked.iter().map(|tx| tx.id.as_str()).collect();
        self.pool.retain(|tx| !picked_ids.contains(tx.id.as_str()));
        for id in &picked_ids {
            self.ids.remove(*id);
        }
        picked
    }

    /// Evict transactions that made it into an applied block.
    pub fn remove_applied(&mut self, ids: &[String]) {
        let applied: HashSet<&str> = ids.iter().map(String::as_str).collect();
        self.pool.retain(|tx| !applied.contains(tx.id.as_str()));
        for id in ids {
            self.ids.remove(id);
        }
    }

    /// Drop transactions older than [`MAX_TX_AGE_MS`]; returns how many.
    pub fn gc_stale(&mut self, now_ms: u64) -> usize {
        let before = self.pool.len();
        self.pool
            .retain(|tx| now_ms.saturating_sub(tx.timestamp) <= MAX_TX_AGE_MS);
        let ids: HashSet<&str> = self.pool.iter().map(|tx| tx.id.as_str()).collect();
        self.ids.retain(|id| ids.contains(id.as_str()));
        before - self.pool.len()
    }

    pub fn congestion(&self) -> Congestion {
        let pending = self.pool.len();
        if pending < 100 {
            Congestion::Low
        } else if pending < 500 {
            Congestion::Medium
        } else if pending < 2000 {
            Congestion::High
        } else {
            Congestion::Critical
        }
    }

    /// Monotone step fee over the pending count.
    pub fn fee_recommendation(&self) -> FeeRecommendation {
        let congestion = self.congestion();
        let recommended = match congestion {
            Congestion::Low => COIN / 1000,      // 0.001 LVE
            Congestion::Medium => COIN / 200,    // 0.005 LVE
            Congestion::High => COIN / 50,       // 0.02  LVE
            Congestion::Critical => COIN / 10,   // 0.1   LVE
        };
        FeeRecommendation { congestion, pending: self.pool.len(), recommended }
    }
}

/// Optional staking discount on the recommended fee:
/// `min(50, 10·log10(stakeCoins))` percent for stakes of at least 10 LVE.
/// Advisory only, so floating point is acceptable here.
pub fn staking_fee_discount_percent(stake: Amount) -> u8 {
    let stake_coins = stake / COIN;
    if stake_coins < 10 {
        return 0;
    }
    let discount = 10.0 * (stake_coins as f64).log10();
    discount.min(50.0) as u8
}
