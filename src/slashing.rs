//! Liveness and double-sign accounting for LVE Node
//!
//! Tracks, per slot, which validator was expected to produce and what it
//! actually signed. A second distinct signature for the same (slot,
//! validator) is a double-sign; chronic absence over the sliding window is
//! downtime. Both produce [`SlashCommand`]s that the node applies to the
//! staking state — this module never mutates stakes itself.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::crypto::sha256_hex;

/// Length of the per-validator liveness window, in observed slots.
pub const SIGNED_BLOCKS_WINDOW: usize = 100;
/// Fraction of the window a validator must have signed: 1/2.
pub const MIN_SIGNED_PER_WINDOW: (u32, u32) = (1, 2);
/// Stake percentage destroyed on a proven double-sign.
pub const DOUBLE_SIGN_SLASH_PERCENT: u8 = 50;
/// Stake percentage destroyed on a downtime breach.
pub const DOWNTIME_SLASH_PERCENT: u8 = 1;
/// Bookkeeping older than this many slots is pruned.
const PRUNE_DEPTH_SLOTS: u64 = SIGNED_BLOCKS_WINDOW as u64 * 2;

/// Misbehavior the window machinery can prove.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SlashKind {
    DoubleSign,
    Downtime,
}

/// Immutable record of a slash, kept for the pruning horizon.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlashingEvidence {
    pub validator: String,
    pub kind: SlashKind,
    pub slot: u64,
    pub penalty_percent: u8,
    pub details: String,
}

/// An instruction for the staking state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlashCommand {
    pub validator: String,
    pub percent: u8,
    pub kind: SlashKind,
}

/// Sliding liveness window of one validator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatorSigningInfo {
    pub address: String,
    pub start_slot: u64,
    /// Observed slots since (re)start; the write cursor into the bit array.
    pub index_offset: u64,
    pub missed_blocks: Vec<bool>,
    pub missed_counter: u32,
}

impl ValidatorSigningInfo {
    fn new(address: &str, slot: u64) -> Self {
        Self {
            address: address.to_string(),
            start_slot: slot,
            index_offset: 0,
            missed_blocks: vec![false; SIGNED_BLOCKS_WINDOW],
            missed_counter: 0,
        }
    }

    /// Record one observed slot. Counter stays equal to the popcount of the
    /// bit array because each write adjusts it by the delta at the cursor.
    fn observe(&mut self, missed: bool) {
        let idx = (self.index_offset as usize) % SIGNED_BLOCKS_WINDOW;
        let previous = self.missed_blocks[idx];
        self.missed_blocks[idx] = missed;
        match (previous, missed) {
            (false, true) => self.missed_counter += 1,
            (true, false) => self.missed_counter -= 1,
            _ => {}
        }
        self.index_offset += 1;
    }

    fn window_full(&self) -> bool {
        self.index_offset >= SIGNED_BLOCKS_WINDOW as u64
    }

    fn breached(&self) -> bool {
        let (num, den) = MIN_SIGNED_PER_WINDOW;
        let max_missed = SIGNED_BLOCKS_WINDOW as u32 - SIGNED_BLOCKS_WINDOW as u32 * num / den;
        self.window_full() && self.missed_counter > max_missed
    }

    fn reset(&mut self, slot: u64) {
        self.start_slot = slot;
        self.index_offset = 0;
        self.missed_blocks = vec![false; SIGNED_BLOCKS_WINDOW];
        self.missed_counter = 0;
    }
}

/// The signature identity recorded per (slot, validator): two distinct
/// block hashes in the same slot yield two distinct identities.
pub fn signature_identity(block_hash: &str, validator: &str, slot: u64) -> String {
    sha256_hex(format!("{block_hash}{validator}{slot}").as_bytes())
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlashingState {
    signing_infos: HashMap<String, ValidatorSigningInfo>,
    /// Slot → validator the selector elected.
    expected: BTreeMap<u64, String>,
    /// Slot → validator → recorded signature identity.
    observed: BTreeMap<u64, HashMap<String, String>>,
    evidence: Vec<SlashingEvidence>,
}

impl SlashingState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn evidence(&self) -> &[SlashingEvidence] {
        &self.evidence
    }

    pub fn signing_info(&self, validator: &str) -> Option<&ValidatorSigningInfo> {
        self.signing_infos.get(validator)
    }

    pub fn expected_validator(&self, slot: u64) -> Option<&str> {
        self.expected.get(&slot).map(String::as_str)
    }

    /// Whether any block was recorded for this slot. (An empty entry only
    /// marks the slot as processed by the miss accounting.)
    pub fn slot_produced(&self, slot: u64) -> bool {
        self.observed.get(&slot).is_some_and(|m| !m.is_empty())
    }

    /// The producer announces who the selector elected for a slot.
    pub fn record_expected_validator(&mut self, slot: u64, validator: &str) {
        self.expected.insert(slot, validator.to_string());
    }

    /// Record a signed block for (slot, validator).
    ///
    /// Re-recording the same identity is idempotent (gossip re-delivers);
    /// a *different* identity is a double-sign and returns the slash
    /// command. The caller rejects the offending block.
    pub fn record_block_signed(
        &mut self,
        slot: u64,
        validator: &str,
        sig_identity: &str,
    ) -> Result<(), SlashCommand> {
        let by_validator = self.observed.entry(slot).or_default();
        if let Some(existing) = by_validator.get(validator) {
            if existing != sig_identity {
                self.evidence.push(SlashingEvidence {
                    validator: validator.to_string(),
                    kind: SlashKind::DoubleSign,
                    slot,
                    penalty_percent: DOUBLE_SIGN_SLASH_PERCENT,
                    details: format!("second signature in slot {slot}"),
                });
                return Err(SlashCommand {
                    validator: validator.to_string(),
                    percent: DOUBLE_SIGN_SLASH_PERCENT,
                    kind: SlashKind::DoubleSign,
                });
            }
            return Ok(());
        }
        by_validator.insert(validator.to_string(), sig_identity.to_string());
        self.observe(validator, slot, false);
        Ok(())
    }

    /// Catch up the missed-slot bookkeeping: every expected slot strictly
    /// below `current_slot` that never produced a block counts as missed for
    /// its elected validator. Returns any downtime slashes that tripped.
    pub fn advance_to_slot(&mut self, current_slot: u64) -> Vec<SlashCommand> {
        let mut commands = Vec::new();
        let missed: Vec<(u64, String)> = self
            .expected
            .range(..current_slot)
            .filter(|(slot, _)| !self.observed.contains_key(slot))
            .map(|(slot, v)| (*slot, v.clone()))
            .collect();
        for (slot, validator) in missed {
            // Mark the slot handled so it is only counted once
            self.observed.entry(slot).or_default();
            if let Some(command) = self.observe(&validator, slot, true) {
                commands.push(command);
            }
        }
        self.prune(current_slot);
        commands
    }

    /// Update one validator's window; returns a downtime command on breach.
    fn observe(&mut self, validator: &str, slot: u64, missed: bool) -> Option<SlashCommand> {
        let info = self
            .signing_infos
            .entry(validator.to_string())
            .or_insert_with(|| ValidatorSigningInfo::new(validator, slot));
        info.observe(missed);
        if info.breached() {
            info.reset(slot);
            self.evidence.push(SlashingEvidence {
                validator: validator.to_string(),
                kind: SlashKind::Downtime,
                slot,
                penalty_percent: DOWNTIME_SLASH_PERCENT,
                details: format!(
                    "missed more than {}/{} slots in window",
                    SIGNED_BLOCKS_WINDOW as u32 * (MIN_SIGNED_PER_WINDOW.1 - MIN_SIGNED_PER_WINDOW.0)
                        / MIN_SIGNED_PER_WINDOW.1,
                    SIGNED_BLOCKS_WINDOW
                ),
            });
            return Some(SlashCommand {
                validator: validator.to_string(),
                percent: DOWNTIME_SLASH_PERCENT,
                kind: SlashKind::Downtime,
            });
        }
        None
    }

    /// Drop per-slot maps and evidence older than twice the window.
    fn prune(&mut self, current_slot: u64) {
        let horizon = current_slot.saturating_sub(PRUNE_DEPTH_SLOTS);
        self.expected = self.expected.split_off(&horizon);
        self.observed = self.observed.split_off(&horizon);
        self.evidence.retain(|e| e.slot >= horizon);
    }
}
