//! Staking state for LVE Node
//!
//! Stakes, delegations, unbonding requests, and the validator registry.
//! Activation is epoch-gated: stakes and delegations submitted in epoch N
//! join the active set at the transition to epoch N+1, with one exception —
//! the bootstrap stake that brings the validator set from zero to one
//! activates immediately, otherwise no block could ever be produced.
//!
//! Registration is implicit: any address whose active stake reaches
//! [`MIN_STAKE`] is a validator with the default commission.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ledger::{Amount, coins};
use crate::vrf;

/// Minimum active stake conferring validator status.
pub const MIN_STAKE: Amount = coins(100);
/// Minimum size of a single delegation.
pub const MIN_DELEGATION: Amount = coins(10);
/// Commission (percent) for validators that never set one.
pub const DEFAULT_COMMISSION: u8 = 10;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StakingError {
    #[error("stake of {0} is below the minimum of {min}", min = MIN_STAKE)]
    BelowMinStake(Amount),
    #[error("delegation of {0} is below the minimum of {min}", min = MIN_DELEGATION)]
    BelowMinDelegation(Amount),
    #[error("{0} is not an active validator")]
    NotAValidator(String),
    #[error("{address} has {available} at stake, {needed} requested")]
    InsufficientStake { address: String, needed: Amount, available: Amount },
    #[error("{delegator} has no matching delegation to {validator}")]
    NoSuchDelegation { delegator: String, validator: String },
    #[error("commission must be 0..=100, got {0}")]
    InvalidCommission(u8),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stake {
    pub owner: String,
    pub amount: Amount,
    pub epoch_staked: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Delegation {
    pub delegator: String,
    pub validator: String,
    pub amount: Amount,
    pub epoch_delegated: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingStake {
    pub address: String,
    pub amount: Amount,
    pub epoch_effective: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingDelegation {
    pub delegator: String,
    pub validator: String,
    pub amount: Amount,
    pub epoch_effective: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnstakeRequest {
    pub address: String,
    pub amount: Amount,
    pub epoch_effective: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatorInfo {
    pub address: String,
    /// Hex public key captured from the validator's stake transaction; used
    /// to verify block signatures.
    pub public_key: String,
    pub stake: Amount,
    pub delegated_stake: Amount,
    pub commission: u8,
    pub blocks_created: u64,
    pub total_rewards: Amount,
    pub slash_count: u32,
    pub is_active: bool,
    /// Set on a double-sign slash; a tombstoned validator never rejoins.
    #[serde(default)]
    pub tombstoned: bool,
}

/// A reward owed to a delegator, queued until a produced block carries the
/// matching system transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardPayout {
    pub to: String,
    pub amount: Amount,
}

/// Outcome of a stake submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StakeOutcome {
    /// Bootstrap path: activated in the current epoch.
    ActivatedNow,
    /// Normal path: queued for the next epoch.
    Deferred { epoch_effective: u64 },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StakingState {
    pub current_epoch: u64,
    pub epoch_start_block: u64,
    stakes: HashMap<String, Stake>,
    /// Active delegations keyed by validator.
    delegations: HashMap<String, Vec<Delegation>>,
    pending_stakes: Vec<PendingStake>,
    pending_delegations: Vec<PendingDelegation>,
    unstake_requests: Vec<UnstakeRequest>,
    validators: HashMap<String, ValidatorInfo>,
    /// Delegator rewards owed but not yet carried by a block.
    pending_payouts: Vec<RewardPayout>,
}

impl StakingState {
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_validator_entry(&mut self, address: &str, public_key: &str) {
        self.validators
            .entry(address.to_string())
            .or_insert_with(|| ValidatorInfo {
                address: address.to_string(),
                public_key: public_key.to_string(),
                stake: 0,
                delegated_stake: 0,
                commission: DEFAULT_COMMISSION,
                blocks_created: 0,
                total_rewards: 0,
                slash_count: 0,
                is_active: false,
                tombstoned: false,
            });
    }

    /// Recompute a validator's activity flag from its active stake.
    pub fn update_validator(&mut self, address: &str) {
        let stake = self.stake_of(address);
        let delegated = self.delegated_to(address);
        if let Some(info) = self.validators.get_mut(address) {
            info.stake = stake;
            info.delegated_stake = delegated;
            info.is_active = stake >= MIN_STAKE && !info.tombstoned;
        }
    }

    pub fn active_validator_count(&self) -> usize {
        self.validators.values().filter(|v| v.is_active).count()
    }

    pub fn validator(&self, address: &str) -> Option<&ValidatorInfo> {
        self.validators.get(address)
    }

    pub fn validators(&self) -> impl Iterator<Item = &ValidatorInfo> {
        self.validators.values()
    }

    pub fn is_active_validator(&self, address: &str) -> bool {
        self.validators.get(address).is_some_and(|v| v.is_active)
    }

    pub fn stake_of(&self, address: &str) -> Amount {
        self.stakes.get(address).map(|s| s.amount).unwrap_or(0)
    }

    pub fn pending_stake_of(&self, address: &str) -> Amount {
        self.pending_stakes
            .iter()
            .filter(|p| p.address == address)
            .map(|p| p.amount)
            .sum()
    }

    /// Total actively delegated to a validator.
    pub fn delegated_to(&self, validator: &str) -> Amount {
        self.delegations
            .get(validator)
            .map(|ds| ds.iter().map(|d| d.amount).sum())
            .unwrap_or(0)
    }

    pub fn delegations_of(&self, validator: &str) -> &[Delegation] {
        self.delegations.get(validator).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn unstake_requests_of(&self, address: &str) -> Vec<&UnstakeRequest> {
        self.unstake_requests.iter().filter(|u| u.address == address).collect()
    }

    /// Rewards owed to an address that no block has paid out yet.
    pub fn owed_rewards_of(&self, address: &str) -> Amount {
        self.pending_payouts
            .iter()
            .filter(|p| p.to == address)
            .map(|p| p.amount)
            .sum()
    }

    /// Sum of all locked value (active + pending stakes and delegations,
    /// plus unbonding amounts). Used by conservation checks in tests.
    pub fn total_locked(&self) -> Amount {
        let active: Amount = self.stakes.values().map(|s| s.amount).sum();
        let delegated: Amount = self
            .delegations
            .values()
            .flat_map(|v| v.iter())
            .map(|d| d.amount)
            .sum();
        let pending: Amount = self.pending_stakes.iter().map(|p| p.amount).sum::<Amount>()
            + self.pending_delegations.iter().map(|p| p.amount).sum::<Amount>();
        let unbonding: Amount = self.unstake_requests.iter().map(|u| u.amount).sum();
        active + delegated + pending + unbonding
    }

    /// Submit a stake. The first stake on an empty validator set activates
    /// immediately; everything else waits for the next epoch.
    pub fn stake(
        &mut self,
        address: &str,
        public_key: &str,
        amount: Amount,
    ) -> Result<StakeOutcome, StakingError> {
        if amount < MIN_STAKE {
            return Err(StakingError::BelowMinStake(amount));
        }
        self.ensure_validator_entry(address, public_key);
        if self.active_validator_count() == 0 {
            let entry = self.stakes.entry(address.to_string()).or_insert(Stake {
                owner: address.to_string(),
                amount: 0,
                epoch_staked: self.current_epoch,
            });
            entry.amount += amount;
            self.update_validator(address);
            Ok(StakeOutcome::ActivatedNow)
        } else {
            let epoch_effective = self.current_epoch + 1;
            self.pending_stakes.push(PendingStake {
                address: address.to_string(),
                amount,
                epoch_effective,
            });
            Ok(StakeOutcome::Deferred { epoch_effective })
        }
    }

    /// Request an unstake: the amount leaves the active stake immediately
    /// but only becomes spendable when its epoch elapses.
    pub fn request_unstake(&mut self, address: &str, amount: Amount) -> Result<u64, StakingError> {
        let available = self.stake_of(address);
        if amount == 0 || amount > available {
            return Err(StakingError::InsufficientStake {
                address: address.to_string(),
                needed: amount,
                available,
            });
        }
        self.stakes
            .get_mut(address)
            .expect("stake_of verified existence")
            .amount -= amount;
        let epoch_effective = self.current_epoch + 1;
        self.unstake_requests.push(UnstakeRequest {
            address: address.to_string(),
            amount,
            epoch_effective,
        });
        self.update_validator(address);
        Ok(epoch_effective)
    }

    /// Queue a delegation to an active validator for the next epoch.
    pub fn delegate(
        &mut self,
        delegator: &str,
        validator: &str,
        amount: Amount,
    ) -> Result<u64, StakingError> {
        if amount < MIN_DELEGATION {
            return Err(StakingError::BelowMinDelegation(amount));
        }
        if !self.is_active_validator(validator) {
            return Err(StakingError::NotAValidator(validator.to_string()));
        }
        let epoch_effective = self.current_epoch + 1;
        self.pending_delegations.push(PendingDelegation {
            delegator: delegator.to_string(),
            validator: validator.to_string(),
            amount,
            epoch_effective,
        });
        Ok(epoch_effective)
    }

    /// Remove delegated amount immediately. Returns how much was actually
    /// released (pending delegations are drained first, then active ones).
    pub fn undelegate(
        &mut self,
        delegator: &str,
        validator: &str,
        amount: Amount,
    ) -> Result<Amount, StakingError> {
        let mut remaining = amount;
        // Drain pending delegations first
        for pending in self
            .pending_delegations
            .iter_mut()
            .filter(|p| p.delegator == delegator && p.validator == validator)
        {
            let take = pending.amount.min(remaining);
            pending.amount -= take;
            remaining -= take;
            if remaining == 0 {
                break;
            }
        }
        self.pending_delegations.retain(|p| p.amount > 0);
        if remaining > 0 {
            if let Some(entries) = self.delegations.get_mut(validator) {
                for entry in entries.iter_mut().filter(|d| d.delegator == delegator) {
                    let take = entry.amount.min(remaining);
                    entry.amount -= take;
                    remaining -= take;
                    if remaining == 0 {
                        break;
                    }
                }
                entries.retain(|d| d.amount > 0);
            }
        }
        let released = amount - remaining;
        if released == 0 {
            return Err(StakingError::NoSuchDelegation {
                delegator: delegator.to_string(),
                validator: validator.to_string(),
            });
        }
        self.update_validator(validator);
        Ok(released)
    }

    /// Update a validator's commission (authorized by its own signature,
    /// which the transaction layer has already checked).
    pub fn set_commission(&mut self, validator: &str, rate: u8) -> Result<(), StakingError> {
        if rate > 100 {
            return Err(StakingError::InvalidCommission(rate));
        }
        match self.validators.get_mut(validator) {
            Some(info) => {
                info.commission = rate;
                Ok(())
            }
            None => Err(StakingError::NotAValidator(validator.to_string())),
        }
    }

    /// Whether the block about to be appended crosses an epoch boundary.
    pub fn should_transition_epoch(&self, next_block_index: u64, epoch_duration: u64) -> bool {
        next_block_index >= self.epoch_start_block + epoch_duration
    }

    /// Advance one epoch and apply every matured pending mutation. This is
    /// the only place active stake and delegation amounts grow. Returns the
    /// unbonded amounts that just became spendable, for the ledger to credit.
    pub fn transition_epoch(&mut self, new_block_index: u64) -> Vec<(String, Amount)> {
        self.current_epoch += 1;
        self.epoch_start_block = new_block_index;
        let epoch = self.current_epoch;

        let matured: Vec<PendingStake> = {
            let (ready, rest) = std::mem::take(&mut self.pending_stakes)
                .into_iter()
                .partition(|p| p.epoch_effective <= epoch);
            self.pending_stakes = rest;
            ready
        };
        for pending in matured {
            let entry = self.stakes.entry(pending.address.clone()).or_insert(Stake {
                owner: pending.address.clone(),
                amount: 0,
                epoch_staked: epoch,
            });
            entry.amount += pending.amount;
            self.update_validator(&pending.address);
        }

        let matured: Vec<PendingDelegation> = {
            let (ready, rest) = std::mem::take(&mut self.pending_delegations)
                .into_iter()
                .partition(|p| p.epoch_effective <= epoch);
            self.pending_delegations = rest;
            ready
        };
        for pending in matured {
            self.delegations
                .entry(pending.validator.clone())
                .or_default()
                .push(Delegation {
                    delegator: pending.delegator,
                    validator: pending.validator.clone(),
                    amount: pending.amount,
                    epoch_delegated: epoch,
                });
            self.update_validator(&pending.validator);
        }

        let released: Vec<UnstakeRequest> = {
            let (ready, rest) = std::mem::take(&mut self.unstake_requests)
                .into_iter()
                .partition(|u| u.epoch_effective <= epoch);
            self.unstake_requests = rest;
            ready
        };
        released.into_iter().map(|u| (u.address, u.amount)).collect()
    }

    /// Split a block reward for a producing validator.
    ///
    /// Commission comes off the top; the remainder is divided pro-rata over
    /// self-stake and delegations, with integer-division residue going to
    /// the validator. Returns the validator's share and the delegator
    /// payouts.
    pub fn reward_split(&self, validator: &str, total: Amount) -> (Amount, Vec<RewardPayout>) {
        let Some(info) = self.validators.get(validator) else {
            return (total, Vec::new());
        };
        let commission = (total as u128 * info.commission as u128 / 100) as Amount;
        let remainder = total - commission;
        let self_stake = self.stake_of(validator);
        let delegations = self.delegations_of(validator);
        let weight = self_stake as u128
            + delegations.iter().map(|d| d.amount as u128).sum::<u128>();
        if weight == 0 {
            return (total, Vec::new());
        }
        // Aggregate per delegator (sorted) so each block owes at most one
        // payout per address
        let mut shares: std::collections::BTreeMap<&str, Amount> = std::collections::BTreeMap::new();
        for delegation in delegations {
            let share = (remainder as u128 * delegation.amount as u128 / weight) as Amount;
            if share > 0 {
                *shares.entry(delegation.delegator.as_str()).or_insert(0) += share;
            }
        }
        let paid: Amount = shares.values().sum();
        let payouts = shares
            .into_iter()
            .map(|(to, amount)| RewardPayout { to: to.to_string(), amount })
            .collect();
        (total - paid, payouts)
    }

    /// Record that a block by `validator` was applied, crediting stats and
    /// queueing the delegator payouts it owes.
    pub fn record_block_applied(&mut self, validator: &str, validator_share: Amount, payouts: Vec<RewardPayout>) {
        if let Some(info) = self.validators.get_mut(validator) {
            info.blocks_created += 1;
            info.total_rewards += validator_share;
        }
        self.pending_payouts.extend(payouts);
    }

    /// Consume the queued payout matching a system transaction in an
    /// incoming block. Returns false when no such payout is owed.
    pub fn take_matching_payout(&mut self, to: &str, amount: Amount) -> bool {
        if let Some(pos) = self
            .pending_payouts
            .iter()
            .position(|p| p.to == to && p.amount == amount)
        {
            self.pending_payouts.remove(pos);
            true
        } else {
            false
        }
    }

    /// Drain every payout owed to an address (CLAIM transaction): instead of
    /// waiting for the owing validator to carry the payout in one of its
    /// blocks, the claimer pulls the total directly. Returns the amount the
    /// ledger must credit.
    pub fn claim_owed_rewards(&mut self, address: &str) -> Amount {
        let owed = self.owed_rewards_of(address);
        self.pending_payouts.retain(|p| p.to != address);
        owed
    }

    /// Slash a percentage of a validator's active stake and delegations
    /// pro-rata. Returns the total amount destroyed.
    pub fn slash(&mut self, validator: &str, percent: u8, tombstone: bool) -> Amount {
        let mut destroyed: Amount = 0;
        if let Some(stake) = self.stakes.get_mut(validator) {
            let cut = (stake.amount as u128 * percent as u128 / 100) as Amount;
            stake.amount -= cut;
            destroyed += cut;
        }
        if let Some(entries) = self.delegations.get_mut(validator) {
            for entry in entries.iter_mut() {
                let cut = (entry.amount as u128 * percent as u128 / 100) as Amount;
                entry.amount -= cut;
                destroyed += cut;
            }
            entries.retain(|d| d.amount > 0);
        }
        if let Some(info) = self.validators.get_mut(validator) {
            info.slash_count += 1;
            if tombstone {
                info.tombstoned = true;
            }
        }
        self.update_validator(validator);
        destroyed
    }

    /// Active validators with their selection weight (own + delegated stake).
    pub fn weighted_validators(&self) -> Vec<(String, Amount)> {
        self.validators
            .values()
            .filter(|v| v.is_active)
            .map(|v| {
                (
                    v.address.clone(),
                    self.stake_of(&v.address) + self.delegated_to(&v.address),
                )
            })
            .collect()
    }

    /// Deterministic fallback selector over the active set, used when the
    /// caller has no slot context. Same arithmetic as the slot leader
    /// election, at full 64-bit resolution.
    pub fn select_validator(&self, seed: &str) -> Option<String> {
        vrf::select_weighted(seed, &self.weighted_validators())
    }

    /// Public key a validator committed when staking.
    pub fn validator_public_key(&self, address: &str) -> Option<&str> {
        self.validators.get(address).map(|v| v.public_key.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const V1: &str = "tLVE_aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const V2: &str = "tLVE_bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";
    const D1: &str = "tLVE_cccccccccccccccccccccccccccccccccccccccc";

    fn bootstrapped() -> StakingState {
        let mut state = StakingState::new();
        assert_eq!(state.stake(V1, "pk1", coins(100)).unwrap(), StakeOutcome::ActivatedNow);
        state
    }

    #[test]
    fn bootstrap_stake_activates_immediately() {
        let state = bootstrapped();
        assert_eq!(state.stake_of(V1), coins(100));
        assert!(state.is_active_validator(V1));
        assert_eq!(state.active_validator_count(), 1);
    }

    #[test]
    fn second_stake_is_epoch_deferred() {
        let mut state = bootstrapped();
        match state.stake(V2, "pk2", coins(200)).unwrap() {
            StakeOutcome::Deferred { epoch_effective } => assert_eq!(epoch_effective, 1),
            other => panic!("expected deferral, got {other:?}"),
        }
        assert_eq!(state.stake_of(V2), 0);
        assert_eq!(state.pending_stake_of(V2), coins(200));
        state.transition_epoch(100);
        assert_eq!(state.stake_of(V2), coins(200));
        assert_eq!(state.pending_stake_of(V2), 0);
        assert!(state.is_active_validator(V2));
    }

    #[test]
    fn stake_below_minimum_is_rejected() {
        let mut state = StakingState::new();
        assert!(matches!(
            state.stake(V1, "pk1", coins(99)),
            Err(StakingError::BelowMinStake(_))
        ));
    }

    #[test]
    fn epoch_transition_conserves_locked_value() {
        let mut state = bootstrapped();
        state.stake(V2, "pk2", coins(300)).unwrap();
        state.delegate(D1, V1, coins(50)).unwrap();
        state.request_unstake(V1, coins(40)).unwrap();
        let before = state.total_locked();
        let released = state.transition_epoch(100);
        let released_total: Amount = released.iter().map(|(_, a)| a).sum();
        assert_eq!(released, vec![(V1.to_string(), coins(40))]);
        assert_eq!(state.total_locked() + released_total, before);
    }

    #[test]
    fn unstake_debits_immediately_but_releases_later() {
        let mut state = bootstrapped();
        state.request_unstake(V1, coins(30)).unwrap();
        assert_eq!(state.stake_of(V1), coins(70));
        // Dropping below MIN_STAKE deactivates on the registry refresh
        assert!(!state.is_active_validator(V1));
        assert!(state
            .request_unstake(V1, coins(1_000))
            .is_err_and(|e| matches!(e, StakingError::InsufficientStake { .. })));
        let released = state.transition_epoch(100);
        assert_eq!(released, vec![(V1.to_string(), coins(30))]);
    }

    #[test]
    fn delegation_requires_active_validator() {
        let mut state = bootstrapped();
        assert!(matches!(
            state.delegate(D1, V2, coins(10)),
            Err(StakingError::NotAValidator(_))
        ));
        assert!(matches!(
            state.delegate(D1, V1, coins(1)),
            Err(StakingError::BelowMinDelegation(_))
        ));
        state.delegate(D1, V1, coins(50)).unwrap();
        assert_eq!(state.delegated_to(V1), 0);
        state.transition_epoch(100);
        assert_eq!(state.delegated_to(V1), coins(50));
    }

    #[test]
    fn undelegate_is_immediate() {
        let mut state = bootstrapped();
        state.delegate(D1, V1, coins(50)).unwrap();
        // Pending delegations can be withdrawn before they activate
        assert_eq!(state.undelegate(D1, V1, coins(20)).unwrap(), coins(20));
        state.transition_epoch(100);
        assert_eq!(state.delegated_to(V1), coins(30));
        assert_eq!(state.undelegate(D1, V1, coins(30)).unwrap(), coins(30));
        assert_eq!(state.delegated_to(V1), 0);
        assert!(state.undelegate(D1, V1, coins(1)).is_err());
    }

    #[test]
    fn reward_split_matches_commission_and_prorata() {
        let mut state = StakingState::new();
        state.stake(V1, "pk1", coins(1000)).unwrap();
        state.delegate(D1, V1, coins(1000)).unwrap();
        state.transition_epoch(100);
        // commission 10% of 10 = 1; remainder 9 split half/half
        let (validator_share, payouts) = state.reward_split(V1, coins(10));
        assert_eq!(validator_share, coins(5) + coins(1) / 2);
        assert_eq!(payouts, vec![RewardPayout { to: D1.into(), amount: coins(4) + coins(1) / 2 }]);
        // Without delegators everything goes to the validator
        let (all, none) = state.reward_split(V2, coins(10));
        assert_eq!(all, coins(10));
        assert!(none.is_empty());
    }

    #[test]
    fn payout_queue_matches_and_drains() {
        let mut state = bootstrapped();
        state.record_block_applied(
            V1,
            coins(5),
            vec![RewardPayout { to: D1.into(), amount: coins(2) }],
        );
        assert!(!state.take_matching_payout(D1, coins(3)));
        assert!(state.take_matching_payout(D1, coins(2)));
        assert!(!state.take_matching_payout(D1, coins(2)));
        assert_eq!(state.validator(V1).unwrap().blocks_created, 1);
    }

    #[test]
    fn claim_drains_owed_payouts() {
        let mut state = bootstrapped();
        state.record_block_applied(
            V1,
            coins(5),
            vec![
                RewardPayout { to: D1.into(), amount: coins(2) },
                RewardPayout { to: D1.into(), amount: coins(3) },
            ],
        );
        assert_eq!(state.owed_rewards_of(D1), coins(5));
        assert_eq!(state.claim_owed_rewards(D1), coins(5));
        assert_eq!(state.owed_rewards_of(D1), 0);
        // Claimed payouts can no longer be matched by a validator's block
        assert!(!state.take_matching_payout(D1, coins(2)));
        assert_eq!(state.claim_owed_rewards(D1), 0);
    }

    #[test]
    fn slash_hits_stake_and_delegations() {
        let mut state = bootstrapped();
        state.delegate(D1, V1, coins(50)).unwrap();
        state.transition_epoch(100);
        let destroyed = state.slash(V1, 50, true);
        assert_eq!(destroyed, coins(75));
        assert_eq!(state.stake_of(V1), coins(50));
        assert_eq!(state.delegated_to(V1), coins(25));
        // Tombstoned: never active again even above MIN_STAKE
        assert!(!state.is_active_validator(V1));
        state.stake(V1, "pk1", coins(500)).unwrap();
        state.transition_epoch(200);
        assert!(!state.is_active_validator(V1));
    }

    #[test]
    fn fallback_selector_is_deterministic() {
        let mut state = bootstrapped();
        state.stake(V2, "pk2", coins(300)).unwrap();
        state.transition_epoch(100);
        let a = state.select_validator("seed-1");
        let b = state.select_validator("seed-1");
        assert_eq!(a, b);
        assert!(a.is_some());
    }
}
