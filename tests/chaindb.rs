//! Persistence: a restarted node replays its chain to identical state.

use std::sync::Arc;

use lve_node::crypto::Network;
use lve_node::identity::NodeIdentity;
use lve_node::ledger::{ChainParams, Transaction, TxType, coins};
use lve_node::node::Node;

const FEE: u64 = 1_000;

#[tokio::test]
async fn restart_replays_the_persisted_chain() {
    let dir = tempfile::tempdir().unwrap();
    let identity = NodeIdentity::create(dir.path(), Network::Testnet).unwrap();
    let mut params = ChainParams::for_network(Network::Testnet);
    params.genesis_allocations = vec![(identity.address().to_string(), coins(10_000))];

    let tip_hash = {
        let node: Arc<Node> = Node::open(params.clone(), dir.path()).await.unwrap();
        let keys = identity.key_material();
        let ts = params.genesis_time_ms + params.slot_duration_ms;
        node.submit_tx(
            Transaction::build_signed(
                "lve-testnet", TxType::Stake, &keys, &keys.address, coins(100), FEE, 1, ts, None,
            )
            .unwrap(),
        )
        .await
        .unwrap();
        node.produce_block(&identity, 1, ts).await.unwrap().unwrap();
        node.produce_block(&identity, 2, ts + 30_000).await.unwrap().unwrap();
        node.persist().await.unwrap();
        node.read(|state| state.ledger.tip().hash.clone()).await
    };

    let reopened: Arc<Node> = Node::open(params.clone(), dir.path()).await.unwrap();
    let (height, hash, stake) = reopened
        .read(|state| {
            (
                state.ledger.height(),
                state.ledger.tip().hash.clone(),
                state.staking.stake_of(identity.address()),
            )
        })
        .await;
    assert_eq!(height, 2);
    assert_eq!(hash, tip_hash);
    assert_eq!(stake, coins(100));
}

#[tokio::test]
async fn foreign_chain_on_disk_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let params = ChainParams::for_network(Network::Testnet);
    {
        let node: Arc<Node> = Node::open(params.clone(), dir.path()).await.unwrap();
        node.persist().await.unwrap();
    }
    // Same directory, different genesis parameters
    let mut other = params.clone();
    other.genesis_time_ms += 1;
    assert!(Node::open(other, dir.path()).await.is_err());
}
