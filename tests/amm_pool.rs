//! AMM operations applied through transactions at block-apply time.

use lve_node::amm::PoolToken;
use lve_node::crypto::Network;
use lve_node::identity::NodeIdentity;
use lve_node::ledger::{ChainParams, Transaction, TxMeta, TxType, coins};
use lve_node::node::{CoreState, NodeError};

const FEE: u64 = 1_000;

fn setup() -> (CoreState, NodeIdentity, ChainParams, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let identity = NodeIdentity::create(dir.path(), Network::Testnet).unwrap();
    let mut params = ChainParams::for_network(Network::Testnet);
    params.genesis_allocations = vec![(identity.address().to_string(), coins(10_000))];
    params.genesis_uzs_allocations = vec![(identity.address().to_string(), coins(10_000))];
    let mut state = CoreState::new(params.clone());
    let keys = identity.key_material();
    let ts = params.genesis_time_ms + params.slot_duration_ms;
    state
        .submit_tx(
            Transaction::build_signed(
                "lve-testnet", TxType::Stake, &keys, &keys.address, coins(100), FEE, 1, ts, None,
            )
            .unwrap(),
        )
        .unwrap();
    state.produce_block(&identity, 1, ts).unwrap().unwrap();
    (state, identity, params, dir)
}

fn slot_time(params: &ChainParams, slot: u64) -> u64 {
    params.genesis_time_ms + slot * params.slot_duration_ms + 500
}

fn add_liquidity(state: &mut CoreState, identity: &NodeIdentity, params: &ChainParams, nonce: u64, slot: u64) {
    let keys = identity.key_material();
    let ts = slot_time(params, slot);
    state
        .submit_tx(
            Transaction::build_signed(
                "lve-testnet",
                TxType::PoolAdd,
                &keys,
                &keys.address,
                coins(1000),
                FEE,
                nonce,
                ts,
                Some(TxMeta::PoolAdd { uzs_amount: coins(1000) }),
            )
            .unwrap(),
        )
        .unwrap();
    state.produce_block(identity, slot, ts).unwrap().unwrap();
}

#[test]
fn add_liquidity_moves_both_legs_at_block_apply() {
    let (mut state, identity, params, _dir) = setup();
    let lve_before = state.ledger.balance_of(identity.address());
    let uzs_before = state.pool.uzs_balance_of(identity.address());

    add_liquidity(&mut state, &identity, &params, 2, 2);

    assert_eq!(state.pool.reserve_lve, coins(1000));
    assert_eq!(state.pool.reserve_uzs, coins(1000));
    assert!(state.pool.lp_balance_of(identity.address()) > 0);
    // LVE leg settles on the chain balance (minus fee, plus the coinbase
    // that returns reward + fee), UZS leg on the pool ledger
    assert_eq!(
        state.ledger.balance_of(identity.address()),
        lve_before - coins(1000) + lve_node::ledger::INITIAL_REWARD
    );
    assert_eq!(state.pool.uzs_balance_of(identity.address()), uzs_before - coins(1000));
}

#[test]
fn swap_respects_slippage_bounds() {
    let (mut state, identity, params, _dir) = setup();
    add_liquidity(&mut state, &identity, &params, 2, 2);
    let keys = identity.key_material();
    let ts = slot_time(&params, 3);

    // Expected output for 100 in against (1000, 1000) is ≈ 90.66
    let too_tight = Transaction::build_signed(
        "lve-testnet",
        TxType::PoolSwap,
        &keys,
        &keys.address,
        coins(100),
        FEE,
        3,
        ts,
        Some(TxMeta::PoolSwap { token_in: PoolToken::Lve, min_amount_out: coins(95) }),
    )
    .unwrap();
    assert!(matches!(
        state.submit_tx(too_tight),
        Err(NodeError::Pool(lve_node::amm::PoolError::SlippageExceeded { .. }))
    ));

    let k_before = state.pool.reserve_lve as u128 * state.pool.reserve_uzs as u128;
    let uzs_before = state.pool.uzs_balance_of(identity.address());
    let ok = Transaction::build_signed(
        "lve-testnet",
        TxType::PoolSwap,
        &keys,
        &keys.address,
        coins(100),
        FEE,
        3,
        ts,
        Some(TxMeta::PoolSwap { token_in: PoolToken::Lve, min_amount_out: coins(90) }),
    )
    .unwrap();
    state.submit_tx(ok).unwrap();
    state.produce_block(&identity, 3, ts).unwrap().unwrap();

    let received = state.pool.uzs_balance_of(identity.address()) - uzs_before;
    assert!(received > coins(90) && received < coins(91), "got {received}");
    let k_after = state.pool.reserve_lve as u128 * state.pool.reserve_uzs as u128;
    assert!(k_after > k_before, "the fee must grow k");
}

#[test]
fn swap_uzs_to_lve_credits_the_chain_balance() {
    let (mut state, identity, params, _dir) = setup();
    add_liquidity(&mut state, &identity, &params, 2, 2);
    let keys = identity.key_material();
    let ts = slot_time(&params, 3);
    let lve_before = state.ledger.balance_of(identity.address());

    let tx = Transaction::build_signed(
        "lve-testnet",
        TxType::PoolSwap,
        &keys,
        &keys.address,
        coins(50),
        FEE,
        3,
        ts,
        Some(TxMeta::PoolSwap { token_in: PoolToken::Uzs, min_amount_out: coins(40) }),
    )
    .unwrap();
    state.submit_tx(tx).unwrap();
    state.produce_block(&identity, 3, ts).unwrap().unwrap();

    // Net of the fee paid and the coinbase earned, the balance gains the
    // swap output: 50 UZS in against (1000, 1000) yields ≈ 47.48 LVE
    let gained =
        state.ledger.balance_of(identity.address()) - lve_node::ledger::INITIAL_REWARD - lve_before;
    assert!(gained > coins(47) && gained < coins(48), "got {gained}");
}

#[test]
fn remove_liquidity_returns_both_assets() {
    let (mut state, identity, params, _dir) = setup();
    add_liquidity(&mut state, &identity, &params, 2, 2);
    let keys = identity.key_material();
    let ts = slot_time(&params, 3);
    let lp = state.pool.lp_balance_of(identity.address());
    let uzs_before = state.pool.uzs_balance_of(identity.address());

    let tx = Transaction::build_signed(
        "lve-testnet",
        TxType::PoolRemove,
        &keys,
        &keys.address,
        0,
        FEE,
        3,
        ts,
        Some(TxMeta::PoolRemove { lp_amount: lp / 2 }),
    )
    .unwrap();
    state.submit_tx(tx).unwrap();
    state.produce_block(&identity, 3, ts).unwrap().unwrap();

    assert_eq!(state.pool.reserve_lve, coins(500));
    assert_eq!(state.pool.reserve_uzs, coins(500));
    assert_eq!(state.pool.uzs_balance_of(identity.address()), uzs_before + coins(500));
    assert_eq!(state.pool.lp_balance_of(identity.address()), lp - lp / 2);
}

#[test]
fn pool_state_is_identical_across_replaying_nodes() {
    let (mut state, identity, params, _dir) = setup();
    add_liquidity(&mut state, &identity, &params, 2, 2);
    let keys = identity.key_material();
    let ts = slot_time(&params, 3);
    let tx = Transaction::build_signed(
        "lve-testnet",
        TxType::PoolSwap,
        &keys,
        &keys.address,
        coins(25),
        FEE,
        3,
        ts,
        Some(TxMeta::PoolSwap { token_in: PoolToken::Lve, min_amount_out: 0 }),
    )
    .unwrap();
    state.submit_tx(tx).unwrap();
    state.produce_block(&identity, 3, ts).unwrap().unwrap();

    // A second node replaying the same blocks reaches identical pool state
    let mut replica = CoreState::new(params.clone());
    for block in &state.ledger.chain()[1..] {
        replica.accept_block(block).unwrap();
    }
    assert_eq!(replica.pool.reserve_lve, state.pool.reserve_lve);
    assert_eq!(replica.pool.reserve_uzs, state.pool.reserve_uzs);
    assert_eq!(replica.pool.total_lp, state.pool.total_lp);
    assert_eq!(
        replica.ledger.balance_of(identity.address()),
        state.ledger.balance_of(identity.address())
    );
    assert_eq!(replica.ledger.tip().hash, state.ledger.tip().hash);
}
