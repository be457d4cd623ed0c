//! Slot clock and deterministic leader election for LVE Node
//!
//! Slots are fixed-length windows since genesis; for every slot the seed
//! `sha256(previousBlockHash ‖ slotNumber)` elects exactly one leader from
//! the stake-weighted validator set. The election is a pure function of its
//! inputs — two nodes with the same chain tip agree on the leader without
//! exchanging a single message.

use crate::crypto::sha256_hex;
use crate::ledger::Amount;

/// Current wall-clock time in milliseconds.
pub fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis() as u64
}

/// The slot a millisecond timestamp falls into.
pub fn slot_at(now_ms: u64, genesis_time_ms: u64, slot_duration_ms: u64) -> u64 {
    now_ms.saturating_sub(genesis_time_ms) / slot_duration_ms
}

/// Milliseconds until the next slot boundary.
pub fn time_until_next_slot_ms(now_ms: u64, genesis_time_ms: u64, slot_duration_ms: u64) -> u64 {
    let elapsed = now_ms.saturating_sub(genesis_time_ms) % slot_duration_ms;
    slot_duration_ms - elapsed
}

/// Selection seed for a slot on top of a given block.
pub fn slot_seed(previous_block_hash: &str, slot_number: u64) -> String {
    sha256_hex(format!("{previous_block_hash}{slot_number}").as_bytes())
}

/// Weighted deterministic selection.
///
/// Validators are sorted lexicographically by address; a 64-bit draw from
/// `sha256(seed)` is scaled into the total weight with u128 arithmetic
/// (no modulo bias, no floats), and the first validator whose cumulative
/// weight exceeds the draw wins.
pub fn select_weighted(seed: &str, weights: &[(String, Amount)]) -> Option<String> {
    let total: u128 = weights.iter().map(|(_, w)| *w as u128).sum();
    if total == 0 {
        return None;
    }
    let digest = crate::crypto::sha256_bytes(seed.as_bytes());
    let draw = u64::from_be_bytes(digest[..8].try_into().expect("digest has 32 bytes"));
    // r < total because draw < 2^64
    let r = (draw as u128 * total) >> 64;
    let mut sorted: Vec<&(String, Amount)> = weights.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));
    let mut cumulative: u128 = 0;
    for (address, weight) in sorted {
        cumulative += *weight as u128;
        if cumulative > r {
            return Some(address.clone());
        }
    }
    None
}

/// Leader for `slot_number` on top of the block with `previous_block_hash`.
pub fn select_leader(
    previous_block_hash: &str,
    slot_number: u64,
    weights: &[(String, Amount)],
) -> Option<String> {
    select_weighted(&slot_seed(previous_block_hash, slot_number), weights)
}
