//! End-to-end ledger scenarios: bootstrap, transfers, nonces, replay.

use lve_node::crypto::{self, Network};
use lve_node::identity::NodeIdentity;
use lve_node::ledger::{
    ChainParams, INITIAL_REWARD, LedgerError, Transaction, TxType, coins,
};
use lve_node::node::{CoreState, NodeError};

const FEE: u64 = 1_000;

fn funded_params(addresses: &[&str]) -> ChainParams {
    let mut params = ChainParams::for_network(Network::Testnet);
    params.genesis_allocations = addresses
        .iter()
        .map(|a| (a.to_string(), coins(10_000)))
        .collect();
    params
}

fn validator() -> (NodeIdentity, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let identity = NodeIdentity::create(dir.path(), Network::Testnet).unwrap();
    (identity, dir)
}

fn slot_time(params: &ChainParams, slot: u64) -> u64 {
    params.genesis_time_ms + slot * params.slot_duration_ms + 500
}

fn stake_tx(keys: &crypto::KeyMaterial, amount: u64, nonce: u64, ts: u64) -> Transaction {
    Transaction::build_signed(
        "lve-testnet", TxType::Stake, keys, &keys.address, amount, FEE, nonce, ts, None,
    )
    .unwrap()
}

/// Bring a fresh state to height 1 with the identity staked and active.
fn bootstrap(identity: &NodeIdentity, params: &ChainParams) -> CoreState {
    let mut state = CoreState::new(params.clone());
    let keys = identity.key_material();
    state
        .submit_tx(stake_tx(&keys, coins(100), 1, slot_time(params, 1)))
        .unwrap();
    let block = state
        .produce_block(identity, 1, slot_time(params, 1))
        .unwrap()
        .expect("sole identity with a pending stake must produce");
    assert_eq!(block.index, 1);
    state
}

#[test]
fn bootstrap_stake_activates_and_produces() {
    let (identity, _dir) = validator();
    let params = funded_params(&[identity.address()]);
    let state = bootstrap(&identity, &params);

    assert_eq!(state.staking.stake_of(identity.address()), coins(100));
    assert!(state.staking.is_active_validator(identity.address()));
    assert_eq!(state.staking.active_validator_count(), 1);
    // 10,000 funded − 100 staked − fee + coinbase (full reward + the fee)
    assert_eq!(
        state.ledger.balance_of(identity.address()),
        coins(10_000) - coins(100) + INITIAL_REWARD
    );
}

#[test]
fn transfers_apply_with_sequential_nonces() {
    let (identity, _dir) = validator();
    let recipient = crypto::generate_ed25519_keypair(Network::Testnet);
    let params = funded_params(&[identity.address()]);
    let mut state = bootstrap(&identity, &params);
    let keys = identity.key_material();
    let ts = slot_time(&params, 2);

    for (i, amount) in [coins(5), coins(7)].into_iter().enumerate() {
        let tx = Transaction::build_signed(
            "lve-testnet", TxType::Transfer, &keys, &recipient.address,
            amount, FEE, 2 + i as u64, ts, None,
        )
        .unwrap();
        state.submit_tx(tx).unwrap();
    }
    state.produce_block(&identity, 2, ts).unwrap().unwrap();

    assert_eq!(state.ledger.balance_of(&recipient.address), coins(12));
    assert_eq!(state.ledger.nonce_of(identity.address()), 3);
}

#[test]
fn nonce_gaps_and_replays_are_rejected() {
    let (identity, _dir) = validator();
    let params = funded_params(&[identity.address()]);
    let mut state = bootstrap(&identity, &params);
    let keys = identity.key_material();
    let recipient = crypto::generate_ed25519_keypair(Network::Testnet);
    let ts = slot_time(&params, 2);

    // Nonce 4 when 2 is expected
    let gap = Transaction::build_signed(
        "lve-testnet", TxType::Transfer, &keys, &recipient.address, coins(1), FEE, 4, ts, None,
    )
    .unwrap();
    assert!(matches!(
        state.submit_tx(gap),
        Err(NodeError::Ledger(LedgerError::InvalidNonce { expected: 2, got: 4 }))
    ));

    let ok = Transaction::build_signed(
        "lve-testnet", TxType::Transfer, &keys, &recipient.address, coins(1), FEE, 2, ts, None,
    )
    .unwrap();
    state.submit_tx(ok.clone()).unwrap();
    state.produce_block(&identity, 2, ts).unwrap().unwrap();

    // Replaying the applied transaction is refused
    match state.submit_tx(ok) {
        Err(NodeError::Ledger(LedgerError::DuplicateTx(_)))
        | Err(NodeError::Ledger(LedgerError::InvalidNonce { .. })) => {}
        other => panic!("replay must be rejected, got {other:?}"),
    }
}

#[test]
fn insufficient_funds_and_wrong_chain_are_rejected() {
    let (identity, _dir) = validator();
    let params = funded_params(&[identity.address()]);
    let mut state = bootstrap(&identity, &params);
    let poor = crypto::generate_ed25519_keypair(Network::Testnet);
    let ts = slot_time(&params, 2);

    let broke = Transaction::build_signed(
        "lve-testnet", TxType::Transfer, &poor, identity.address(), coins(1), FEE, 1, ts, None,
    )
    .unwrap();
    assert!(matches!(
        state.submit_tx(broke),
        Err(NodeError::Ledger(LedgerError::InsufficientFunds { .. }))
    ));

    let keys = identity.key_material();
    let wrong_chain = Transaction::build_signed(
        "lve-mainnet", TxType::Transfer, &keys, &poor.address, coins(1), FEE, 2, ts, None,
    )
    .unwrap();
    assert!(matches!(
        state.submit_tx(wrong_chain),
        Err(NodeError::Ledger(LedgerError::InvalidChain { .. }))
    ));
}

#[test]
fn projected_balance_reflects_pending_spend() {
    let (identity, _dir) = validator();
    let params = funded_params(&[identity.address()]);
    let mut state = bootstrap(&identity, &params);
    let keys = identity.key_material();
    let recipient = crypto::generate_ed25519_keypair(Network::Testnet);
    let ts = slot_time(&params, 2);

    let before = state.ledger.balance_of(identity.address());
    let tx = Transaction::build_signed(
        "lve-testnet", TxType::Transfer, &keys, &recipient.address, coins(50), FEE, 2, ts, None,
    )
    .unwrap();
    state.submit_tx(tx).unwrap();

    assert_eq!(state.ledger.balance_of(identity.address()), before);
    assert_eq!(
        state.projected_balance(identity.address()),
        before - coins(50) - FEE
    );
}

#[test]
fn every_applied_block_satisfies_chain_invariants() {
    let (identity, _dir) = validator();
    let params = funded_params(&[identity.address()]);
    let mut state = bootstrap(&identity, &params);
    for slot in 2..=6 {
        state
            .produce_block(&identity, slot, slot_time(&params, slot))
            .unwrap()
            .unwrap();
    }
    let chain = state.ledger.chain();
    assert_eq!(chain.len(), 7);
    for pair in chain.windows(2) {
        assert_eq!(pair[1].previous_hash, pair[0].hash);
        assert_eq!(pair[1].index, pair[0].index + 1);
        assert!(pair[1].slot_number > pair[0].slot_number);
    }
}
