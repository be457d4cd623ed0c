//! Ledger state for LVE Node
//!
//! Block and transaction types, the append-only chain, and the balance/nonce
//! projections derived from it. Validation is split in two: stateless checks
//! on a single transaction (signature, chain id, address derivation) live
//! here next to the types; the cross-component block pipeline (VRF leader
//! re-validation, staking and pool side effects) is driven from the node
//! state in [`crate::node`].

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::amm::PoolToken;
use crate::crypto::{self, Network};

/// Fixed-point amount with 9 decimal places. 1 LVE = [`COIN`] units.
pub type Amount = u64;

/// Units per whole LVE.
pub const COIN: Amount = 1_000_000_000;

/// Whole-coin helper for constants and tests.
pub const fn coins(n: u64) -> Amount {
    n * COIN
}

/// Render an amount as a decimal coin string, trimming trailing zeros.
pub fn format_amount(amount: Amount) -> String {
    let whole = amount / COIN;
    let frac = amount % COIN;
    if frac == 0 {
        return whole.to_string();
    }
    let frac = format!("{frac:09}");
    format!("{whole}.{}", frac.trim_end_matches('0'))
}

/// Upper bound on transactions drained into one block.
pub const MAX_TX_PER_BLOCK: usize = 100;
/// Block reward at the start of the chain.
pub const INITIAL_REWARD: Amount = coins(10);
/// Blocks between reward halvings.
pub const REWARD_HALVING_INTERVAL: u64 = 100_000;
/// Floor of the reward schedule.
pub const MIN_REWARD: Amount = coins(1);
/// LVE minted to the faucet in the genesis block.
pub const GENESIS_FAUCET_ALLOCATION: Amount = coins(1_000_000);

const GENESIS_PREVIOUS_HASH: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

/// Chain-level parameters fixed at genesis. The allocation lists are part of
/// the genesis identity: changing them changes the genesis hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainParams {
    pub network: Network,
    pub chain_id: String,
    /// Millisecond timestamp of slot 0.
    pub genesis_time_ms: u64,
    pub slot_duration_ms: u64,
    /// Blocks per epoch.
    pub epoch_duration: u64,
    /// LVE minted in the genesis block.
    pub genesis_allocations: Vec<(String, Amount)>,
    /// UZS issued into the pool ledger at genesis.
    pub genesis_uzs_allocations: Vec<(String, Amount)>,
}

impl ChainParams {
    pub fn for_network(network: Network) -> Self {
        let genesis_time_ms = match network {
            Network::Mainnet => 1_735_689_600_000, // 2025-01-01T00:00:00Z
            Network::Testnet => 1_733_011_200_000, // 2024-12-01T00:00:00Z
        };
        let faucet = crypto::faucet_address(network);
        Self {
            network,
            chain_id: network.chain_id().to_string(),
            genesis_time_ms,
            slot_duration_ms: 30_000,
            epoch_duration: 100,
            genesis_allocations: vec![(faucet.clone(), GENESIS_FAUCET_ALLOCATION)],
            genesis_uzs_allocations: vec![(faucet, crate::amm::GENESIS_UZS_ALLOCATION)],
        }
    }
}

/// Transaction kinds understood by the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TxType {
    Transfer,
    Reward,
    Stake,
    Unstake,
    Claim,
    Delegate,
    Undelegate,
    Commission,
    PoolAdd,
    PoolRemove,
    PoolSwap,
}

impl TxType {
    pub fn wire_name(&self) -> &'static str {
        match self {
            TxType::Transfer => "TRANSFER",
            TxType::Reward => "REWARD",
            TxType::Stake => "STAKE",
            TxType::Unstake => "UNSTAKE",
            TxType::Claim => "CLAIM",
            TxType::Delegate => "DELEGATE",
            TxType::Undelegate => "UNDELEGATE",
            TxType::Commission => "COMMISSION",
            TxType::PoolAdd => "POOL_ADD",
            TxType::PoolRemove => "POOL_REMOVE",
            TxType::PoolSwap => "POOL_SWAP",
        }
    }
}

impl std::fmt::Display for TxType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// Type-specific transaction parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TxMeta {
    #[serde(rename_all = "camelCase")]
    PoolAdd { uzs_amount: Amount },
    #[serde(rename_all = "camelCase")]
    PoolRemove { lp_amount: Amount },
    #[serde(rename_all = "camelCase")]
    PoolSwap { token_in: PoolToken, min_amount_out: Amount },
    #[serde(rename_all = "camelCase")]
    Commission { rate: u8 },
}

/// A transaction. `from == None` marks a system transaction (coinbase and
/// queued reward payouts); system transactions are unsigned and carry no
/// nonce.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: String,
    pub from: Option<String>,
    pub to: String,
    pub amount: Amount,
    pub fee: Amount,
    pub timestamp: u64,
    pub nonce: u64,
    pub chain_id: String,
    pub tx_type: TxType,
    pub signature: Option<String>,
    pub public_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<TxMeta>,
}

impl Transaction {
    /// Canonical id preimage; the id commits to everything that moves value.
    fn id_preimage(
        chain_id: &str,
        tx_type: TxType,
        from: Option<&str>,
        to: &str,
        amount: Amount,
        fee: Amount,
        nonce: u64,
    ) -> String {
        format!(
            "{chain_id}:{tx_type}:{}:{to}:{amount}:{fee}:{nonce}",
            from.unwrap_or_default()
        )
    }

    /// Recompute the canonical id of this transaction.
    pub fn canonical_id(&self) -> String {
        crypto::sha256_hex(
            Self::id_preimage(
                &self.chain_id,
                self.tx_type,
                self.from.as_deref(),
                &self.to,
                self.amount,
                self.fee,
                self.nonce,
            )
            .as_bytes(),
        )
    }

    /// Build and sign a wallet transaction.
    #[allow(clippy::too_many_arguments)]
    pub fn build_signed(
        chain_id: &str,
        tx_type: TxType,
        keys: &crypto::KeyMaterial,
        to: &str,
        amount: Amount,
        fee: Amount,
        nonce: u64,
        timestamp: u64,
        meta: Option<TxMeta>,
    ) -> Result<Self, crypto::CryptoError> {
        let id = crypto::sha256_hex(
            Self::id_preimage(chain_id, tx_type, Some(&keys.address), to, amount, fee, nonce)
                .as_bytes(),
        );
        let signature = crypto::sign_message(&keys.private_key, &keys.public_key, id.as_bytes())?;
        Ok(Self {
            id,
            from: Some(keys.address.clone()),
            to: to.to_string(),
            amount,
            fee,
            timestamp,
            nonce,
            chain_id: chain_id.to_string(),
            tx_type,
            signature: Some(signature),
            public_key: Some(keys.public_key.clone()),
            meta,
        })
    }

    /// Build an unsigned system transaction (coinbase, reward payouts).
    /// System transactions have no sender nonce chain, so `nonce` is a
    /// producer-chosen discriminator keeping otherwise identical payouts
    /// distinct in the canonical id.
    pub fn system(
        chain_id: &str,
        tx_type: TxType,
        to: &str,
        amount: Amount,
        timestamp: u64,
        nonce: u64,
    ) -> Self {
        let id = crypto::sha256_hex(
            Self::id_preimage(chain_id, tx_type, None, to, amount, 0, nonce).as_bytes(),
        );
        Self {
            id,
            from: None,
            to: to.to_string(),
            amount,
            fee: 0,
            timestamp,
            nonce,
            chain_id: chain_id.to_string(),
            tx_type,
            signature: None,
            public_key: None,
            meta: None,
        }
    }

    pub fn is_system(&self) -> bool {
        self.from.is_none()
    }
}

/// A block. `validator` and `block_signature` are empty only at genesis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub index: u64,
    pub timestamp: u64,
    pub transactions: Vec<Transaction>,
    pub previous_hash: String,
    pub hash: String,
    pub validator: String,
    pub slot_number: u64,
    pub block_signature: String,
}

impl Block {
    /// Canonical header hash. Commits to the ordered transaction ids.
    pub fn compute_hash(
        chain_id: &str,
        index: u64,
        timestamp: u64,
        previous_hash: &str,
        validator: &str,
        slot_number: u64,
        transactions: &[Transaction],
    ) -> String {
        let tx_ids: Vec<&str> = transactions.iter().map(|tx| tx.id.as_str()).collect();
        crypto::sha256_hex(
            format!(
                "{chain_id}:{index}:{timestamp}:{previous_hash}:{validator}:{slot_number}:{}",
                tx_ids.join(",")
            )
            .as_bytes(),
        )
    }

    /// The deterministic genesis block minting the configured allocations.
    pub fn genesis(params: &ChainParams) -> Self {
        let transactions: Vec<Transaction> = params
            .genesis_allocations
            .iter()
            .enumerate()
            .map(|(i, (address, amount))| {
                Transaction::system(
                    &params.chain_id,
                    TxType::Reward,
                    address,
                    *amount,
                    params.genesis_time_ms,
                    i as u64,
                )
            })
            .collect();
        let hash = Self::compute_hash(
            &params.chain_id,
            0,
            params.genesis_time_ms,
            GENESIS_PREVIOUS_HASH,
            "",
            0,
            &transactions,
        );
        Self {
            index: 0,
            timestamp: params.genesis_time_ms,
            transactions,
            previous_hash: GENESIS_PREVIOUS_HASH.to_string(),
            hash,
            validator: String::new(),
            slot_number: 0,
            block_signature: String::new(),
        }
    }

    /// Sum of fees carried by this block's transactions.
    pub fn total_fees(&self) -> Amount {
        self.transactions.iter().map(|tx| tx.fee).sum()
    }
}

/// Block reward at a chain index: halves every [`REWARD_HALVING_INTERVAL`]
/// blocks, floored at [`MIN_REWARD`].
pub fn reward_at(index: u64) -> Amount {
    let halvings = index / REWARD_HALVING_INTERVAL;
    if halvings >= 63 {
        return MIN_REWARD;
    }
    (INITIAL_REWARD >> halvings).max(MIN_REWARD)
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("transaction targets chain {got}, this node runs {expected}")]
    InvalidChain { expected: String, got: String },
    #[error("invalid signature on transaction {0}")]
    InvalidSignature(String),
    #[error("invalid nonce: expected {expected}, got {got}")]
    InvalidNonce { expected: u64, got: u64 },
    #[error("insufficient funds for {address}: need {needed}, have {available}")]
    InsufficientFunds { address: String, needed: Amount, available: Amount },
    #[error("duplicate transaction {0}")]
    DuplicateTx(String),
    #[error("block {got} is beyond tip {tip}; sync required")]
    GapDetected { tip: u64, got: u64 },
    #[error("block at {index} extends a different history; fork resolution required")]
    ForkDetected { index: u64 },
    #[error("invalid block: {0}")]
    InvalidBlock(String),
    #[error("mempool is full; retry after the next block")]
    MempoolFull,
    #[error("replacement chain rejected: {0}")]
    ChainRejected(String),
}

/// The chain plus its derived balance and nonce projections.
///
/// Balances are materialized at block application so that pool swaps and
/// staking releases (whose credits are computed from state, not carried in a
/// transaction field) stay part of one deterministic projection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ledger {
    pub params: ChainParams,
    chain: Vec<Block>,
    balances: HashMap<String, Amount>,
    nonces: HashMap<String, u64>,
    applied_tx_ids: HashSet<String>,
}

impl Ledger {
    /// A fresh ledger holding only the genesis block.
    pub fn new(params: ChainParams) -> Self {
        let genesis = Block::genesis(&params);
        let mut ledger = Self {
            params,
            chain: Vec::new(),
            balances: HashMap::new(),
            nonces: HashMap::new(),
            applied_tx_ids: HashSet::new(),
        };
        ledger
            .append_unchecked(genesis)
            .expect("genesis block applies");
        ledger
    }

    pub fn tip(&self) -> &Block {
        self.chain.last().expect("chain holds at least genesis")
    }

    pub fn genesis_hash(&self) -> &str {
        &self.chain[0].hash
    }

    pub fn height(&self) -> u64 {
        self.tip().index
    }

    pub fn block_at(&self, index: u64) -> Option<&Block> {
        self.chain.get(index as usize)
    }

    pub fn blocks_from(&self, from: u64, limit: usize) -> &[Block] {
        let start = (from as usize).min(self.chain.len());
        let end = (start + limit).min(self.chain.len());
        &self.chain[start..end]
    }

    pub fn chain(&self) -> &[Block] {
        &self.chain
    }

    pub fn tx_count(&self) -> usize {
        self.applied_tx_ids.len()
    }

    /// Spendable balance of an address over applied blocks only.
    pub fn balance_of(&self, address: &str) -> Amount {
        self.balances.get(address).copied().unwrap_or(0)
    }

    /// Last applied nonce of an address (0 when unseen).
    pub fn nonce_of(&self, address: &str) -> u64 {
        self.nonces.get(address).copied().unwrap_or(0)
    }

    pub fn contains_tx(&self, id: &str) -> bool {
        self.applied_tx_ids.contains(id)
    }

    /// Total LVE ever minted by system transactions (including genesis).
    pub fn minted_supply(&self) -> Amount {
        self.chain
            .iter()
            .flat_map(|b| &b.transactions)
            .filter(|tx| tx.is_system())
            .map(|tx| tx.amount)
            .sum()
    }

    /// Stateless validity of a wallet transaction: chain id, canonical id,
    /// signature, and that `from` is derivable from the public key.
    pub fn validate_tx_stateless(&self, tx: &Transaction) -> Result<(), LedgerError> {
        if tx.chain_id != self.params.chain_id {
            return Err(LedgerError::InvalidChain {
                expected: self.params.chain_id.clone(),
                got: tx.chain_id.clone(),
            });
        }
        if tx.is_system() {
            // System transactions are only ever minted by block application
            return Err(LedgerError::InvalidSignature(tx.id.clone()));
        }
        if tx.id != tx.canonical_id() {
            return Err(LedgerError::InvalidSignature(tx.id.clone()));
        }
        let (Some(public_key), Some(signature), Some(from)) =
            (&tx.public_key, &tx.signature, &tx.from)
        else {
            return Err(LedgerError::InvalidSignature(tx.id.clone()));
        };
        if crypto::derive_address(self.params.network, public_key) != *from {
            return Err(LedgerError::InvalidSignature(tx.id.clone()));
        }
        if !crypto::verify_signature(public_key, tx.id.as_bytes(), signature) {
            return Err(LedgerError::InvalidSignature(tx.id.clone()));
        }
        if !crypto::validate_address(self.params.network, &tx.to) {
            return Err(LedgerError::InvalidBlock(format!(
                "recipient {} is not a valid address",
                tx.to
            )));
        }
        Ok(())
    }

    /// How much spendable balance a transaction takes from its sender when
    /// applied. Credits are handled by the block pipeline.
    pub fn debit_of(tx: &Transaction) -> Amount {
        match tx.tx_type {
            TxType::Transfer | TxType::Stake | TxType::Delegate | TxType::PoolAdd => {
                tx.amount.saturating_add(tx.fee)
            }
            // Swapping UZS in only spends the fee from the LVE balance
            TxType::PoolSwap => match &tx.meta {
                Some(TxMeta::PoolSwap { token_in: PoolToken::Lve, .. }) => {
                    tx.amount.saturating_add(tx.fee)
                }
                _ => tx.fee,
            },
            TxType::Unstake
            | TxType::Claim
            | TxType::Undelegate
            | TxType::Commission
            | TxType::PoolRemove => tx.fee,
            TxType::Reward => 0,
        }
    }

    /// Debit the sender of a transaction, record its nonce and id.
    /// The caller has already validated funds and nonce ordering.
    pub(crate) fn apply_tx_debit(&mut self, tx: &Transaction) -> Result<(), LedgerError> {
        if !self.applied_tx_ids.insert(tx.id.clone()) {
            return Err(LedgerError::DuplicateTx(tx.id.clone()));
        }
        if let Some(from) = &tx.from {
            let debit = Self::debit_of(tx);
            let available = self.balance_of(from);
            if available < debit {
                return Err(LedgerError::InsufficientFunds {
                    address: from.clone(),
                    needed: debit,
                    available,
                });
            }
            self.credit(from, 0);
            *self.balances.get_mut(from).expect("entry just ensured") -= debit;
            self.nonces.insert(from.clone(), tx.nonce);
        }
        Ok(())
    }

    /// Credit an address (reward payouts, transfer receipts, pool outputs,
    /// staking releases).
    pub(crate) fn credit(&mut self, address: &str, amount: Amount) {
        *self.balances.entry(address.to_string()).or_insert(0) += amount;
    }

    /// Push a block whose transactions were already applied one by one.
    pub(crate) fn push_block(&mut self, block: Block) {
        self.chain.push(block);
    }

    /// Append a block whose cross-component validation already ran.
    /// Applies per-transaction debits and direct credits (transfers,
    /// rewards); type-specific credits are the block pipeline's job.
    pub(crate) fn append_unchecked(&mut self, block: Block) -> Result<(), LedgerError> {
        for tx in &block.transactions {
            self.apply_tx_debit(tx)?;
            match tx.tx_type {
                TxType::Transfer | TxType::Reward => self.credit(&tx.to, tx.amount),
                _ => {}
            }
        }
        self.chain.push(block);
        Ok(())
    }

    /// Header-level checks of a candidate successor block: continuity,
    /// recomputed hash, slot monotonicity.
    pub fn validate_header(&self, block: &Block) -> Result<(), LedgerError> {
        let tip = self.tip();
        if block.index > tip.index + 1 {
            return Err(LedgerError::GapDetected { tip: tip.index, got: block.index });
        }
        if block.index != tip.index + 1 {
            return Err(LedgerError::InvalidBlock(format!(
                "index {} does not extend tip {}",
                block.index, tip.index
            )));
        }
        if block.previous_hash != tip.hash {
            return Err(LedgerError::ForkDetected { index: block.index });
        }
        if block.slot_number <= tip.slot_number && tip.index > 0 {
            return Err(LedgerError::InvalidBlock("slot number does not advance".into()));
        }
        let expected = Block::compute_hash(
            &self.params.chain_id,
            block.index,
            block.timestamp,
            &block.previous_hash,
            &block.validator,
            block.slot_number,
            &block.transactions,
        );
        if expected != block.hash {
            return Err(LedgerError::InvalidBlock("header hash mismatch".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn testnet_params() -> ChainParams {
        ChainParams::for_network(Network::Testnet)
    }

    fn wallet() -> crypto::KeyMaterial {
        crypto::generate_ed25519_keypair(Network::Testnet)
    }

    #[test]
    fn genesis_is_deterministic() {
        let a = Ledger::new(testnet_params());
        let b = Ledger::new(testnet_params());
        assert_eq!(a.genesis_hash(), b.genesis_hash());
        assert_eq!(a.tip().index, 0);
        let faucet = crypto::faucet_address(Network::Testnet);
        assert_eq!(a.balance_of(&faucet), GENESIS_FAUCET_ALLOCATION);
        assert_eq!(a.minted_supply(), GENESIS_FAUCET_ALLOCATION);
    }

    #[test]
    fn canonical_tx_id_commits_to_fields() {
        let keys = wallet();
        let tx = Transaction::build_signed(
            "lve-testnet",
            TxType::Transfer,
            &keys,
            "tLVE_0000000000000000000000000000000000000002",
            coins(5),
            1_000,
            1,
            42,
            None,
        )
        .unwrap();
        assert_eq!(tx.id, tx.canonical_id());
        let mut altered = tx.clone();
        altered.amount += 1;
        assert_ne!(altered.canonical_id(), altered.id);
    }

    #[test]
    fn stateless_validation_catches_tampering() {
        let ledger = Ledger::new(testnet_params());
        let keys = wallet();
        let to = wallet().address;
        let tx = Transaction::build_signed(
            "lve-testnet", TxType::Transfer, &keys, &to, coins(1), 1_000, 1, 42, None,
        )
        .unwrap();
        assert!(ledger.validate_tx_stateless(&tx).is_ok());

        let mut wrong_chain = tx.clone();
        wrong_chain.chain_id = "lve-mainnet".into();
        assert!(matches!(
            ledger.validate_tx_stateless(&wrong_chain),
            Err(LedgerError::InvalidChain { .. })
        ));

        let mut forged = tx.clone();
        forged.to = keys.address.clone();
        forged.id = forged.canonical_id();
        assert!(matches!(
            ledger.validate_tx_stateless(&forged),
            Err(LedgerError::InvalidSignature(_))
        ));

        // System txs are never accepted from the outside
        let system = Transaction::system("lve-testnet", TxType::Reward, &to, coins(1), 0, 0);
        assert!(ledger.validate_tx_stateless(&system).is_err());
    }

    #[test]
    fn reward_schedule_halves_and_floors() {
        assert_eq!(reward_at(0), INITIAL_REWARD);
        assert_eq!(reward_at(REWARD_HALVING_INTERVAL - 1), INITIAL_REWARD);
        assert_eq!(reward_at(REWARD_HALVING_INTERVAL), INITIAL_REWARD / 2);
        assert_eq!(reward_at(REWARD_HALVING_INTERVAL * 2), INITIAL_REWARD / 4);
        // Far future bottoms out at the floor
        assert_eq!(reward_at(REWARD_HALVING_INTERVAL * 40), MIN_REWARD);
    }

    #[test]
    fn header_validation_flags_gaps_and_mismatches() {
        let ledger = Ledger::new(testnet_params());
        let tip = ledger.tip().clone();
        let mut block = Block {
            index: tip.index + 2,
            timestamp: tip.timestamp + 30_000,
            transactions: vec![],
            previous_hash: tip.hash.clone(),
            hash: String::new(),
            validator: "tLVE_x".into(),
            slot_number: 2,
            block_signature: String::new(),
        };
        assert!(matches!(
            ledger.validate_header(&block),
            Err(LedgerError::GapDetected { .. })
        ));
        block.index = tip.index + 1;
        block.previous_hash = "ff".repeat(32);
        block.hash = Block::compute_hash(
            "lve-testnet", block.index, block.timestamp, &block.previous_hash,
            &block.validator, block.slot_number, &block.transactions,
        );
        assert!(ledger.validate_header(&block).is_err());
    }

    #[test]
    fn amount_formatting() {
        assert_eq!(format_amount(coins(3)), "3");
        assert_eq!(format_amount(coins(4) + COIN / 2), "4.5");
        assert_eq!(format_amount(1), "0.000000001");
    }
}
