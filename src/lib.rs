//! # LVE Node
//!
//! A proof-of-stake blockchain node for the LVE network: slot-timed block
//! production with deterministic stake-weighted leader election, epoch-gated
//! staking and delegation, liveness/double-sign slashing, WebSocket peer
//! gossip with chunked chain sync, and an on-chain constant-product AMM.
//!
//! ## Modules
//! - [`configuration`]: node configuration and CLI parsing.
//! - [`crypto`]: hashing, Ed25519/secp256k1 signatures, mnemonics, addresses.
//! - [`identity`]: the file-backed validator identity.
//! - [`ledger`]: blocks, transactions, the chain, and balance projections.
//! - [`mempool`]: the fee-prioritized transaction pool.
//! - [`staking`]: stakes, delegations, unbonding, epochs, and rewards.
//! - [`slashing`]: liveness windows and double-sign evidence.
//! - [`vrf`]: the slot clock and leader election.
//! - [`producer`]: the slot-timed block production loop.
//! - [`node`]: the state container and block pipeline.
//! - [`networking`]: WebSocket P2P, handshake, peer scoring, sync.
//! - [`amm`]: the LVE/UZS constant-product pool.
//! - [`chaindb`]: JSON persistence for chain, staking, and pool state.
//! - [`queries`]: the read-only surface consumed by API and CLI front-ends.
//! - [`tracing`]: structured logging setup and the event tracer.
//! - [`handlers`]: graceful shutdown signals.

pub mod amm;
pub mod chaindb;
pub mod configuration;
pub mod crypto;
pub mod handlers;
pub mod identity;
pub mod ledger;
pub mod mempool;
pub mod networking;
pub mod node;
pub mod producer;
pub mod queries;
pub mod slashing;
pub mod staking;
pub mod tracing;
pub mod vrf;
