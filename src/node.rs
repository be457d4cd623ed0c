//! Node state and block pipeline for LVE Node
//!
//! [`CoreState`] owns the ledger, mempool, staking, slashing, and pool
//! state as plain fields — there are no process-wide singletons; every
//! component receives what it needs from here. All five write operations
//! (`submit_tx`, `produce_block`, `accept_block`, `replace_chain`, and the
//! epoch hook inside them) run under the one exclusive lock [`Node`] wraps
//! around the core, which is what makes a block and its staking/pool side
//! effects atomic.
//!
//! Incoming blocks are validated and applied against a staged copy of the
//! state; only a fully valid block replaces the live state, so a bad block
//! can never leave the node half-mutated.

use std::path::Path;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{RwLock, broadcast};
use tracing::{info, warn};

use crate::amm::{AmmState, PoolError, PoolToken};
use crate::chaindb::ChainDB;
use crate::identity::{self, NodeIdentity};
use crate::ledger::{
    Amount, Block, ChainParams, Ledger, LedgerError, MAX_TX_PER_BLOCK, Transaction, TxMeta,
    TxType, reward_at,
};
use crate::mempool::{FeeRecommendation, MEMPOOL_CAP, Mempool, staking_fee_discount_percent};
use crate::slashing::{self, SlashingState};
use crate::staking::{RewardPayout, StakingError, StakingState};
use crate::vrf;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Staking(#[from] StakingError),
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error("double-sign by {validator} in slot {slot}; block rejected and stake slashed")]
    DoubleSign { validator: String, slot: u64 },
    #[error("persisted state is corrupt: {0}")]
    CorruptState(String),
}

/// Events published by the core; the P2P layer subscribes and gossips.
#[derive(Debug, Clone)]
pub enum NodeEvent {
    BlockApplied(Block),
    TxAdmitted(Transaction),
}

/// State staged during block validation; committed only on success.
#[derive(Clone)]
struct Staged {
    ledger: Ledger,
    staking: StakingState,
    pool: AmmState,
}

/// What applying a block did, beyond the state swap.
struct BlockEffects {
    validator_share: Amount,
    payouts: Vec<RewardPayout>,
    sig_identity: String,
}

/// All consensus-relevant node state.
#[derive(Clone)]
pub struct CoreState {
    pub ledger: Ledger,
    pub mempool: Mempool,
    pub staking: StakingState,
    pub slashing: SlashingState,
    pub pool: AmmState,
}

impl CoreState {
    pub fn new(params: ChainParams) -> Self {
        let pool = AmmState::genesis(&params.genesis_uzs_allocations);
        Self {
            ledger: Ledger::new(params),
            mempool: Mempool::new(MEMPOOL_CAP),
            staking: StakingState::new(),
            slashing: SlashingState::new(),
            pool,
        }
    }

    pub fn params(&self) -> &ChainParams {
        &self.ledger.params
    }

    /// Balance minus the net effect of the address's own mempool entries.
    pub fn projected_balance(&self, address: &str) -> Amount {
        self.ledger
            .balance_of(address)
            .saturating_sub(self.mempool.pending_outflow(address))
    }

    /// Fee guidance, optionally discounted by the caller's stake.
    pub fn fee_recommendation(&self, staker: Option<&str>) -> FeeRecommendation {
        let mut rec = self.mempool.fee_recommendation();
        if let Some(address) = staker {
            let discount = staking_fee_discount_percent(self.staking.stake_of(address));
            rec.recommended -= rec.recommended * discount as Amount / 100;
        }
        rec
    }

    /// Admit a wallet transaction into the mempool.
    pub fn submit_tx(&mut self, tx: Transaction) -> Result<(), NodeError> {
        self.ledger.validate_tx_stateless(&tx)?;
        if self.ledger.contains_tx(&tx.id) || self.mempool.contains(&tx.id) {
            return Err(LedgerError::DuplicateTx(tx.id).into());
        }
        let from = tx.from.clone().expect("stateless validation rejects system txs");
        let expected = self.ledger.nonce_of(&from) + self.mempool.pending_count_for(&from) + 1;
        if tx.nonce != expected {
            return Err(LedgerError::InvalidNonce { expected, got: tx.nonce }.into());
        }
        let debit = Ledger::debit_of(&tx);
        let projected = self.projected_balance(&from);
        if projected < debit {
            return Err(LedgerError::InsufficientFunds {
                address: from,
                needed: debit,
                available: projected,
            }
            .into());
        }
        self.precheck_tx_semantics(&tx, &from)?;
        self.mempool.add(tx)?;
        Ok(())
    }

    /// Soft semantic checks at admission time. Final enforcement happens at
    /// block application; these exist to reject hopeless transactions early
    /// with a precise error instead of letting them rot in the pool.
    fn precheck_tx_semantics(&self, tx: &Transaction, from: &str) -> Result<(), NodeError> {
        match tx.tx_type {
            TxType::Transfer => Ok(()),
            TxType::Reward => Err(LedgerError::InvalidSignature(tx.id.clone()).into()),
            TxType::Stake => {
                if tx.amount < crate::staking::MIN_STAKE {
                    return Err(StakingError::BelowMinStake(tx.amount).into());
                }
                Ok(())
            }
            TxType::Unstake => {
                let available = self.staking.stake_of(from);
                if tx.amount == 0 || tx.amount > available {
                    return Err(StakingError::InsufficientStake {
                        address: from.to_string(),
                        needed: tx.amount,
                        available,
                    }
                    .into());
                }
                Ok(())
            }
            TxType::Claim => Ok(()),
            TxType::Delegate => {
                if tx.amount < crate::staking::MIN_DELEGATION {
                    return Err(StakingError::BelowMinDelegation(tx.amount).into());
                }
                if !self.staking.is_active_validator(&tx.to) {
                    return Err(StakingError::NotAValidator(tx.to.clone()).into());
                }
                Ok(())
            }
            TxType::Undelegate => Ok(()),
            TxType::Commission => match tx.meta {
                Some(TxMeta::Commission { rate }) if rate <= 100 => Ok(()),
                Some(TxMeta::Commission { rate }) => {
                    Err(StakingError::InvalidCommission(rate).into())
                }
                _ => Err(LedgerError::InvalidBlock("commission tx without rate".into()).into()),
            },
            TxType::PoolAdd => match tx.meta {
                Some(TxMeta::PoolAdd { uzs_amount }) => {
                    let held = self.pool.uzs_balance_of(from);
                    if held < uzs_amount {
                        return Err(PoolError::InsufficientUzs {
                            address: from.to_string(),
                            needed: uzs_amount,
                            available: held,
                        }
                        .into());
                    }
                    Ok(())
                }
                _ => Err(LedgerError::InvalidBlock("pool add without amounts".into()).into()),
            },
            TxType::PoolRemove => match tx.meta {
                Some(TxMeta::PoolRemove { lp_amount }) => {
                    let held = self.pool.lp_balance_of(from);
                    if held < lp_amount {
                        return Err(PoolError::InsufficientLp {
                            address: from.to_string(),
                            needed: lp_amount,
                            available: held,
                        }
                        .into());
                    }
                    Ok(())
                }
                _ => Err(LedgerError::InvalidBlock("pool remove without lp".into()).into()),
            },
            TxType::PoolSwap => match tx.meta {
                Some(TxMeta::PoolSwap { token_in, min_amount_out }) => {
                    // Dry-run the quote so slippage surfaces at submit time
                    let quote = self.pool.quote(token_in, tx.amount)?;
                    if quote.amount_out < min_amount_out {
                        return Err(PoolError::SlippageExceeded {
                            would_receive: quote.amount_out,
                            minimum: min_amount_out,
                        }
                        .into());
                    }
                    Ok(())
                }
                _ => Err(LedgerError::InvalidBlock("pool swap without terms".into()).into()),
            },
        }
    }

    /// Whether a block carries a stake transaction from its own validator
    /// large enough to bootstrap an empty validator set.
    fn contains_bootstrap_stake(block: &Block) -> bool {
        block.transactions.iter().any(|tx| {
            tx.tx_type == TxType::Stake
                && tx.from.as_deref() == Some(block.validator.as_str())
                && tx.amount >= crate::staking::MIN_STAKE
        })
    }

    /// Apply one wallet transaction to the staged state.
    fn apply_wallet_tx(&self, staged: &mut Staged, tx: &Transaction) -> Result<(), NodeError> {
        if tx.tx_type == TxType::Reward {
            return Err(LedgerError::InvalidBlock("reward txs are system-only".into()).into());
        }
        staged.ledger.validate_tx_stateless(tx)?;
        let from = tx.from.clone().expect("wallet tx has a sender");
        let expected = staged.ledger.nonce_of(&from) + 1;
        if tx.nonce != expected {
            return Err(LedgerError::InvalidNonce { expected, got: tx.nonce }.into());
        }
        staged.ledger.apply_tx_debit(tx)?;
        match tx.tx_type {
            TxType::Transfer => staged.ledger.credit(&tx.to, tx.amount),
            TxType::Stake => {
                let public_key = tx.public_key.as_deref().unwrap_or_default();
                staged.staking.stake(&from, public_key, tx.amount)?;
            }
            TxType::Unstake => {
                staged.staking.request_unstake(&from, tx.amount)?;
            }
            TxType::Claim => {
                let owed = staged.staking.claim_owed_rewards(&from);
                staged.ledger.credit(&from, owed);
            }
            TxType::Delegate => {
                staged.staking.delegate(&from, &tx.to, tx.amount)?;
            }
            TxType::Undelegate => {
                let released = staged.staking.undelegate(&from, &tx.to, tx.amount)?;
                staged.ledger.credit(&from, released);
            }
            TxType::Commission => {
                let Some(TxMeta::Commission { rate }) = tx.meta else {
                    return Err(LedgerError::InvalidBlock("commission tx without rate".into()).into());
                };
                staged.staking.set_commission(&from, rate)?;
            }
            TxType::PoolAdd => {
                let Some(TxMeta::PoolAdd { uzs_amount }) = tx.meta else {
                    return Err(LedgerError::InvalidBlock("pool add without amounts".into()).into());
                };
                staged.pool.add_liquidity(&from, tx.amount, uzs_amount)?;
            }
            TxType::PoolRemove => {
                let Some(TxMeta::PoolRemove { lp_amount }) = tx.meta else {
                    return Err(LedgerError::InvalidBlock("pool remove without lp".into()).into());
                };
                let (lve_out, _uzs_out) = staged.pool.remove_liquidity(&from, lp_amount)?;
                staged.ledger.credit(&from, lve_out);
            }
            TxType::PoolSwap => {
                let Some(TxMeta::PoolSwap { token_in, min_amount_out }) = tx.meta else {
                    return Err(LedgerError::InvalidBlock("pool swap without terms".into()).into());
                };
                let out = staged.pool.swap(&from, token_in, tx.amount, min_amount_out)?;
                if token_in == PoolToken::Uzs {
                    staged.ledger.credit(&from, out);
                }
            }
            TxType::Reward => unreachable!("rejected above"),
        }
        Ok(())
    }

    /// Validate a candidate successor block and build the post-state.
    ///
    /// Runs the full acceptance rule set: header continuity, the epoch
    /// hook, leader re-derivation, the validator's block signature, the
    /// coinbase amount, payout-queue matching, and every transaction
    /// including nonce sequencing and funds.
    fn validate_and_stage(&self, block: &Block) -> Result<(Staged, BlockEffects), NodeError> {
        self.ledger.validate_header(block)?;
        let mut staged = Staged {
            ledger: self.ledger.clone(),
            staking: self.staking.clone(),
            pool: self.pool.clone(),
        };
        let epoch_duration = self.params().epoch_duration;
        if staged.staking.should_transition_epoch(block.index, epoch_duration) {
            for (address, amount) in staged.staking.transition_epoch(block.index) {
                staged.ledger.credit(&address, amount);
            }
        }
        let weights = staged.staking.weighted_validators();
        if weights.is_empty() {
            // Genesis bootstrap: the very first block may be produced by the
            // staker it contains, since no validator can be active before
            // the first stake activates
            if !Self::contains_bootstrap_stake(block) {
                return Err(LedgerError::InvalidBlock("no active validator set".into()).into());
            }
        } else {
            let leader = vrf::select_leader(&block.previous_hash, block.slot_number, &weights)
                .expect("non-empty weight set elects a leader");
            if leader != block.validator {
                return Err(LedgerError::InvalidBlock(format!(
                    "slot {} belongs to {leader}, not {}",
                    block.slot_number, block.validator
                ))
                .into());
            }
        }
        let public_key = staged
            .staking
            .validator_public_key(&block.validator)
            .map(str::to_string)
            .or_else(|| {
                // Bootstrap block: the key rides in the stake tx itself
                block
                    .transactions
                    .iter()
                    .find(|tx| {
                        tx.tx_type == TxType::Stake
                            && tx.from.as_deref() == Some(block.validator.as_str())
                    })
                    .and_then(|tx| tx.public_key.clone())
            })
            .ok_or_else(|| LedgerError::InvalidBlock("validator has no known key".into()))?;
        let chain_id = self.params().chain_id.clone();
        if !identity::verify_block_signature(
            &public_key,
            &chain_id,
            block.index,
            &block.hash,
            &block.block_signature,
        ) {
            return Err(LedgerError::InvalidBlock("bad block signature".into()).into());
        }

        let (validator_share, payouts) =
            staged.staking.reward_split(&block.validator, reward_at(block.index));
        let expected_coinbase = validator_share + block.total_fees();
        let Some(first) = block.transactions.first() else {
            return Err(LedgerError::InvalidBlock("block carries no coinbase".into()).into());
        };
        if !first.is_system() || first.tx_type != TxType::Reward || first.amount != expected_coinbase
        {
            return Err(LedgerError::InvalidBlock(format!(
                "coinbase must mint exactly {expected_coinbase}"
            ))
            .into());
        }

        for (i, tx) in block.transactions.iter().enumerate() {
            if tx.is_system() {
                if tx.tx_type != TxType::Reward || tx.id != tx.canonical_id() {
                    return Err(LedgerError::InvalidBlock("malformed system tx".into()).into());
                }
                if i > 0 && !staged.staking.take_matching_payout(&tx.to, tx.amount) {
                    return Err(LedgerError::InvalidBlock(format!(
                        "no reward of {} is owed to {}",
                        tx.amount, tx.to
                    ))
                    .into());
                }
                staged.ledger.apply_tx_debit(tx)?;
                staged.ledger.credit(&tx.to, tx.amount);
            } else {
                self.apply_wallet_tx(&mut staged, tx)?;
            }
        }

        staged
            .staking
            .record_block_applied(&block.validator, validator_share, payouts.clone());
        staged.ledger.push_block(block.clone());
        let sig_identity =
            slashing::signature_identity(&block.hash, &block.validator, block.slot_number);
        Ok((staged, BlockEffects { validator_share, payouts, sig_identity }))
    }

    fn commit(&mut self, staged: Staged, block: &Block) {
        self.ledger = staged.ledger;
        self.staking = staged.staking;
        self.pool = staged.pool;
        let ids: Vec<String> = block.transactions.iter().map(|tx| tx.id.clone()).collect();
        self.mempool.remove_applied(&ids);
    }

    /// Record the signature of a block that failed validation: a correctly
    /// signed sibling of an already-applied block is double-sign evidence
    /// even though it can never be appended.
    fn note_rejected_signature(&mut self, block: &Block) {
        let Some(public_key) = self.staking.validator_public_key(&block.validator) else {
            return;
        };
        if !identity::verify_block_signature(
            public_key,
            &self.params().chain_id.clone(),
            block.index,
            &block.hash,
            &block.block_signature,
        ) {
            return;
        }
        let sig_identity =
            slashing::signature_identity(&block.hash, &block.validator, block.slot_number);
        if let Err(command) =
            self.slashing
                .record_block_signed(block.slot_number, &block.validator, &sig_identity)
        {
            let destroyed = self.staking.slash(&command.validator, command.percent, true);
            warn!(
                validator = %command.validator,
                slot = block.slot_number,
                destroyed,
                "double-sign proven by rejected sibling block"
            );
        }
    }

    /// Accept a block received from a peer (or replayed from disk).
    pub fn accept_block(&mut self, block: &Block) -> Result<(), NodeError> {
        let (staged, effects) = match self.validate_and_stage(block) {
            Ok(result) => result,
            Err(e) => {
                self.note_rejected_signature(block);
                return Err(e);
            }
        };
        if let Err(command) = self.slashing.record_block_signed(
            block.slot_number,
            &block.validator,
            &effects.sig_identity,
        ) {
            let destroyed = self.staking.slash(&command.validator, command.percent, true);
            warn!(
                validator = %command.validator,
                slot = block.slot_number,
                destroyed,
                "double-sign detected; offending block rejected"
            );
            return Err(NodeError::DoubleSign {
                validator: block.validator.clone(),
                slot: block.slot_number,
            });
        }
        self.commit(staged, block);
        Ok(())
    }

    /// Produce, sign, and apply a block for `slot` if this node's identity
    /// is the elected leader. Returns `None` when another validator leads.
    pub fn produce_block(
        &mut self,
        node_identity: &NodeIdentity,
        slot: u64,
        now_ms: u64,
    ) -> Result<Option<Block>, NodeError> {
        let next_index = self.ledger.height() + 1;
        let epoch_duration = self.params().epoch_duration;
        // Selection sees the validator set as it will be once the epoch
        // hook for this block has run
        let mut selection = self.staking.clone();
        if selection.should_transition_epoch(next_index, epoch_duration) {
            selection.transition_epoch(next_index);
        }
        let prev_hash = self.ledger.tip().hash.clone();
        let weights = selection.weighted_validators();
        if weights.is_empty() {
            // Genesis bootstrap: produce only if our own first stake is
            // waiting in the mempool
            let has_own_stake = self.mempool.transactions().iter().any(|tx| {
                tx.tx_type == TxType::Stake
                    && tx.from.as_deref() == Some(node_identity.address())
                    && tx.amount >= crate::staking::MIN_STAKE
            });
            if !has_own_stake {
                return Ok(None);
            }
        } else {
            let leader = vrf::select_leader(&prev_hash, slot, &weights)
                .expect("non-empty weight set elects a leader");
            self.slashing.record_expected_validator(slot, &leader);
            if leader != node_identity.address() {
                return Ok(None);
            }
        }

        let chain_id = self.params().chain_id.clone();
        let drained = self
            .mempool
            .drain_top(MAX_TX_PER_BLOCK - 1, |address| self.ledger.nonce_of(address));
        let kept = self.revalidate_for_block(drained, next_index);

        let fees: Amount = kept.iter().map(|tx| tx.fee).sum();
        let (validator_share, _) =
            selection.reward_split(node_identity.address(), reward_at(next_index));
        let coinbase = Transaction::system(
            &chain_id,
            TxType::Reward,
            &node_identity.reward_destination(),
            validator_share + fees,
            now_ms,
            next_index * 1000,
        );
        let mut transactions = vec![coinbase];
        transactions.extend(kept);

        let hash = Block::compute_hash(
            &chain_id,
            next_index,
            now_ms,
            &prev_hash,
            node_identity.address(),
            slot,
            &transactions,
        );
        let block_signature = node_identity.sign_block(&chain_id, next_index, &hash);
        let block = Block {
            index: next_index,
            timestamp: now_ms,
            transactions,
            previous_hash: prev_hash,
            hash,
            validator: node_identity.address().to_string(),
            slot_number: slot,
            block_signature,
        };

        let (staged, effects) = self.validate_and_stage(&block)?;
        if self
            .slashing
            .record_block_signed(slot, &block.validator, &effects.sig_identity)
            .is_err()
        {
            // We already signed a different block for this slot; drop the
            // candidate rather than publish a double-sign
            let destroyed = self.staking.slash(&block.validator, slashing::DOUBLE_SIGN_SLASH_PERCENT, true);
            warn!(slot, destroyed, "refusing to double-sign own slot");
            return Err(NodeError::DoubleSign {
                validator: block.validator.clone(),
                slot,
            });
        }
        self.commit(staged, &block);

        // Queue the delegator payouts this block owes as system txs for a
        // subsequent block
        for (i, payout) in effects.payouts.iter().enumerate() {
            let tx = Transaction::system(
                &chain_id,
                TxType::Reward,
                &payout.to,
                payout.amount,
                now_ms,
                next_index * 1000 + 1 + i as u64,
            );
            if let Err(e) = self.mempool.add(tx) {
                warn!(error = %e, to = %payout.to, "could not queue delegator payout");
            }
        }
        info!(
            index = block.index,
            slot,
            txs = block.transactions.len(),
            reward = effects.validator_share,
            "produced block"
        );
        Ok(Some(block))
    }

    /// Re-validate drained transactions against the post-tip state, dropping
    /// any that no longer apply (spent funds, stale nonces, claimed payouts).
    fn revalidate_for_block(&self, drained: Vec<Transaction>, next_index: u64) -> Vec<Transaction> {
        let mut staged = Staged {
            ledger: self.ledger.clone(),
            staking: self.staking.clone(),
            pool: self.pool.clone(),
        };
        if staged
            .staking
            .should_transition_epoch(next_index, self.params().epoch_duration)
        {
            for (address, amount) in staged.staking.transition_epoch(next_index) {
                staged.ledger.credit(&address, amount);
            }
        }
        let mut kept = Vec::new();
        for tx in drained {
            if tx.is_system() {
                // Producer-queued payout: keep only while still owed
                if staged.staking.take_matching_payout(&tx.to, tx.amount) {
                    let _ = staged.ledger.apply_tx_debit(&tx);
                    staged.ledger.credit(&tx.to, tx.amount);
                    kept.push(tx);
                }
                continue;
            }
            let mut scratch = staged.clone();
            if self.apply_wallet_tx(&mut scratch, &tx).is_ok() {
                staged = scratch;
                kept.push(tx);
            }
        }
        kept
    }

    /// Advance the missed-slot bookkeeping to `current_slot`, applying any
    /// downtime slashes it trips.
    pub fn observe_slot(&mut self, current_slot: u64) {
        for command in self.slashing.advance_to_slot(current_slot) {
            let destroyed = self.staking.slash(&command.validator, command.percent, false);
            warn!(
                validator = %command.validator,
                percent = command.percent,
                destroyed,
                "downtime slash applied"
            );
        }
    }

    /// Adopt a longer valid chain sharing our genesis. The whole replacement
    /// is replayed from genesis; any invalid block rejects the candidate.
    pub fn replace_chain(&mut self, new_chain: &[Block]) -> Result<(), NodeError> {
        if new_chain.len() <= self.ledger.chain().len() {
            return Err(LedgerError::ChainRejected("candidate is not longer".into()).into());
        }
        match new_chain.first() {
            Some(genesis) if genesis.hash == self.ledger.genesis_hash() => {}
            _ => {
                return Err(LedgerError::ChainRejected("genesis mismatch".into()).into());
            }
        }
        let mut fresh = CoreState::new(self.params().clone());
        for block in &new_chain[1..] {
            fresh
                .accept_block(block)
                .map_err(|e| LedgerError::ChainRejected(format!("block {}: {e}", block.index)))?;
        }
        // Keep pending transactions that the new chain has not applied
        let mut mempool = std::mem::take(&mut self.mempool);
        let applied: Vec<String> = new_chain
            .iter()
            .flat_map(|b| b.transactions.iter().map(|tx| tx.id.clone()))
            .collect();
        mempool.remove_applied(&applied);
        fresh.mempool = mempool;
        *self = fresh;
        info!(height = self.ledger.height(), "adopted longer chain");
        Ok(())
    }
}

/// The running node: the core under one exclusive lock plus the event
/// channel the P2P layer subscribes to.
pub struct Node {
    state: RwLock<CoreState>,
    events: broadcast::Sender<NodeEvent>,
    db: ChainDB,
}

impl Node {
    /// Open a node, replaying any persisted chain from the data directory.
    pub async fn open(params: ChainParams, data_dir: &Path) -> Result<Arc<Self>, NodeError> {
        let db = ChainDB::open(data_dir)
            .await
            .map_err(|e| NodeError::CorruptState(e.to_string()))?;
        let mut core = CoreState::new(params.clone());
        match db.load_chain().await {
            Ok(Some(blocks)) => {
                if blocks.first().map(|b| b.hash.clone())
                    != Some(core.ledger.genesis_hash().to_string())
                {
                    return Err(NodeError::CorruptState(
                        "persisted chain has a different genesis".into(),
                    ));
                }
                for block in &blocks[1..] {
                    core.accept_block(block)
                        .map_err(|e| NodeError::CorruptState(format!("replaying block: {e}")))?;
                }
                info!(height = core.ledger.height(), "restored chain from disk");
            }
            Ok(None) => info!("starting from genesis"),
            Err(e) => return Err(NodeError::CorruptState(e.to_string())),
        }
        let (events, _) = broadcast::channel(256);
        Ok(Arc::new(Self { state: RwLock::new(core), events, db }))
    }

    /// In-memory node for tests and tools.
    pub async fn open_ephemeral(params: ChainParams) -> Arc<Self> {
        let (events, _) = broadcast::channel(256);
        Arc::new(Self {
            state: RwLock::new(CoreState::new(params)),
            events,
            db: ChainDB::ephemeral(),
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.events.subscribe()
    }

    /// Shared-lock read access.
    pub async fn read<R>(&self, f: impl FnOnce(&CoreState) -> R) -> R {
        f(&*self.state.read().await)
    }

    pub async fn submit_tx(&self, tx: Transaction) -> Result<(), NodeError> {
        let mut state = self.state.write().await;
        state.submit_tx(tx.clone())?;
        drop(state);
        let _ = self.events.send(NodeEvent::TxAdmitted(tx));
        Ok(())
    }

    /// Accept a gossiped block and re-announce it on success.
    pub async fn accept_block(&self, block: &Block) -> Result<(), NodeError> {
        let mut state = self.state.write().await;
        state.accept_block(block)?;
        drop(state);
        let _ = self.events.send(NodeEvent::BlockApplied(block.clone()));
        Ok(())
    }

    pub async fn replace_chain(&self, new_chain: &[Block]) -> Result<(), NodeError> {
        let mut state = self.state.write().await;
        state.replace_chain(new_chain)?;
        let tip = state.ledger.tip().clone();
        drop(state);
        let _ = self.events.send(NodeEvent::BlockApplied(tip));
        Ok(())
    }

    pub async fn produce_block(
        &self,
        node_identity: &NodeIdentity,
        slot: u64,
        now_ms: u64,
    ) -> Result<Option<Block>, NodeError> {
        let mut state = self.state.write().await;
        let produced = state.produce_block(node_identity, slot, now_ms)?;
        drop(state);
        if let Some(block) = &produced {
            let _ = self.events.send(NodeEvent::BlockApplied(block.clone()));
            if let Err(e) = self.persist().await {
                warn!(error = %e, "failed to persist state after producing");
            }
        }
        Ok(produced)
    }

    pub async fn observe_slot(&self, current_slot: u64) {
        self.state.write().await.observe_slot(current_slot);
    }

    /// Flush chain, staking, and pool state to the data directory.
    pub async fn persist(&self) -> std::io::Result<()> {
        let (chain, staking, pool) = {
            let state = self.state.read().await;
            (
                state.ledger.chain().to_vec(),
                state.staking.clone(),
                state.pool.clone(),
            )
        };
        self.db.save_chain(&chain).await?;
        self.db.save_staking(&staking).await?;
        self.db.save_pool(&pool).await?;
        Ok(())
    }
}
