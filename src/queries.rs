//! Read-only state queries for LVE Node
//!
//! The named interface the HTTP API and CLI front-ends consume. Everything
//! here takes a shared reference to the core state and copies plain data
//! out, so callers never hold views into the locked state.

use serde::{Deserialize, Serialize};

use crate::ledger::{Amount, format_amount};
use crate::mempool::FeeRecommendation;
use crate::node::CoreState;
use crate::vrf;

/// Top-level node status.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStatus {
    pub network: String,
    pub chain_id: String,
    pub height: u64,
    pub tip_hash: String,
    pub current_slot: u64,
    pub current_epoch: u64,
    pub active_validators: usize,
    pub mempool_pending: usize,
    pub fee: FeeRecommendation,
    pub minted_supply: String,
    pub applied_tx_count: usize,
}

/// One validator's registry entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatorView {
    pub address: String,
    pub stake: Amount,
    pub delegated_stake: Amount,
    pub commission: u8,
    pub blocks_created: u64,
    pub total_rewards: Amount,
    pub slash_count: u32,
    pub is_active: bool,
}

/// Everything an address owns across ledger, staking, and pool state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountView {
    pub address: String,
    pub balance: Amount,
    pub projected_balance: Amount,
    pub nonce: u64,
    pub stake: Amount,
    pub pending_stake: Amount,
    /// Requested unstakes still waiting for their epoch to elapse.
    pub unbonding: Amount,
    pub owed_rewards: Amount,
    pub uzs_balance: Amount,
    pub lp_balance: Amount,
}

/// Pool reserves summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolView {
    pub reserve_lve: Amount,
    pub reserve_uzs: Amount,
    pub total_lp: Amount,
    pub initialized: bool,
}

/// Query interface over the core state.
pub struct Queries;

impl Queries {
    pub fn node_status(state: &CoreState, now_ms: u64) -> NodeStatus {
        let params = state.params();
        NodeStatus {
            network: params.network.dir_name().to_string(),
            chain_id: params.chain_id.clone(),
            height: state.ledger.height(),
            tip_hash: state.ledger.tip().hash.clone(),
            current_slot: vrf::slot_at(now_ms, params.genesis_time_ms, params.slot_duration_ms),
            current_epoch: state.staking.current_epoch,
            active_validators: state.staking.active_validator_count(),
            mempool_pending: state.mempool.len(),
            fee: state.fee_recommendation(None),
            minted_supply: format_amount(state.ledger.minted_supply()),
            applied_tx_count: state.ledger.tx_count(),
        }
    }

    /// Validator registry, heaviest first.
    pub fn validators(state: &CoreState) -> Vec<ValidatorView> {
        let mut views: Vec<ValidatorView> = state
            .staking
            .validators()
            .map(|v| ValidatorView {
                address: v.address.clone(),
                stake: v.stake,
                delegated_stake: v.delegated_stake,
                commission: v.commission,
                blocks_created: v.blocks_created,
                total_rewards: v.total_rewards,
                slash_count: v.slash_count,
                is_active: v.is_active,
            })
            .collect();
        views.sort_by(|a, b| {
            (b.stake + b.delegated_stake)
                .cmp(&(a.stake + a.delegated_stake))
                .then(a.address.cmp(&b.address))
        });
        views
    }

    pub fn account(state: &CoreState, address: &str) -> AccountView {
        AccountView {
            address: address.to_string(),
            balance: state.ledger.balance_of(address),
            projected_balance: state.projected_balance(address),
            nonce: state.ledger.nonce_of(address),
            stake: state.staking.stake_of(address),
            pending_stake: state.staking.pending_stake_of(address),
            unbonding: state
                .staking
                .unstake_requests_of(address)
                .iter()
                .map(|u| u.amount)
                .sum(),
            owed_rewards: state.staking.owed_rewards_of(address),
            uzs_balance: state.pool.uzs_balance_of(address),
            lp_balance: state.pool.lp_balance_of(address),
        }
    }

    pub fn pool(state: &CoreState) -> PoolView {
        PoolView {
            reserve_lve: state.pool.reserve_lve,
            reserve_uzs: state.pool.reserve_uzs,
            total_lp: state.pool.total_lp,
            initialized: state.pool.is_initialized(),
        }
    }
}
